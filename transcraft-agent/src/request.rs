//! Translation requests and the JSON payload they arrive in

use crate::prompts::PromptOverrides;
use serde::{Deserialize, Serialize};
use transcraft_error::{Error, Result};

pub const DEFAULT_MAX_ITERATIONS: usize = 3;
pub const DEFAULT_MAX_TOKENS: usize = 2000;

/// Defaults applied when a request does not set its own limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopConfig {
    pub max_iterations: usize,
    /// Advisory prompt-size budget, never sent to the model
    pub max_tokens: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

/// Immutable input to one run of the refinement loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationRequest {
    pub source_language: String,
    pub target_language: String,
    pub source_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,
    pub max_iterations: usize,
    pub max_tokens: usize,
}

impl TranslationRequest {
    pub fn new(
        source_language: impl Into<String>,
        target_language: impl Into<String>,
        source_text: impl Into<String>,
    ) -> Self {
        let defaults = LoopConfig::default();
        Self {
            source_language: source_language.into(),
            target_language: target_language.into(),
            source_text: source_text.into(),
            instruction: None,
            max_iterations: defaults.max_iterations,
            max_tokens: defaults.max_tokens,
        }
    }

    /// Blank instructions are dropped
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        let instruction = instruction.into();
        self.instruction = (!instruction.trim().is_empty()).then_some(instruction);
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// The instruction, if one with content was given
    pub fn instruction(&self) -> Option<&str> {
        self.instruction.as_deref().filter(|i| !i.trim().is_empty())
    }

    /// Precondition check done before the loop is started.
    ///
    /// Every blank required field is reported in one error.
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.target_language.trim().is_empty() {
            missing.push("target_language");
        }
        if self.source_text.trim().is_empty() {
            missing.push("source_text");
        }
        if !missing.is_empty() {
            return Err(Error::missing_fields(missing.as_slice()).with_operation("request::validate"));
        }

        if self.max_iterations == 0 {
            return Err(Error::invalid_argument("max_iterations must be at least 1")
                .with_operation("request::validate")
                .with_context("max_iterations", "0"));
        }
        Ok(())
    }
}

/// Wire form of a translation request:
///
/// ```json
/// {
///   "context": {
///     "source_language": "English",
///     "target_language": "French",
///     "source_text": "Hello, world.",
///     "instruction": "",
///     "judgement_prompt": "..."
///   },
///   "max_iterations": 3,
///   "max_tokens": 2000
/// }
/// ```
///
/// Prompt template overrides ride along inside `context`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranslationPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<TranslationContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranslationContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,
    #[serde(flatten)]
    pub prompts: PromptOverrides,
}

impl TranslationPayload {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            Error::parse_failed("failed to parse JSON payload")
                .with_operation("payload::from_json")
                .set_source(e)
        })
    }

    /// Split the payload into a validated request and its prompt overrides.
    ///
    /// Missing keys are reported together as `context` or `context.<field>`.
    pub fn into_request(self, defaults: LoopConfig) -> Result<(TranslationRequest, PromptOverrides)> {
        let Some(context) = self.context else {
            return Err(Error::missing_fields(&["context"]).with_operation("payload::into_request"));
        };

        let mut missing = Vec::new();
        if context.source_language.is_none() {
            missing.push("context.source_language");
        }
        if context.target_language.is_none() {
            missing.push("context.target_language");
        }
        if context.source_text.is_none() {
            missing.push("context.source_text");
        }
        if !missing.is_empty() {
            return Err(Error::missing_fields(missing.as_slice()).with_operation("payload::into_request"));
        }

        let mut request = TranslationRequest::new(
            context.source_language.unwrap_or_default(),
            context.target_language.unwrap_or_default(),
            context.source_text.unwrap_or_default(),
        )
        .with_max_iterations(self.max_iterations.unwrap_or(defaults.max_iterations))
        .with_max_tokens(self.max_tokens.unwrap_or(defaults.max_tokens));
        if let Some(instruction) = context.instruction {
            request = request.with_instruction(instruction);
        }

        request
            .validate()
            .map_err(|e| e.with_operation("payload::into_request"))?;
        Ok((request, context.prompts))
    }
}
