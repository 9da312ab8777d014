//! Refinement loop - translate, critique, judge, repeat
//!
//! One run drives three chat roles over the same source text. The translator
//! produces a candidate, the critic reviews it, and the judge decides whether
//! it is good enough. Rejected candidates are kept with their critiques and
//! replayed to the translator on the next attempt.

use crate::emission::{AgentKind, Emission};
use crate::prompts::{estimate_tokens, PromptTemplates};
use crate::request::TranslationRequest;
use futures_core::Stream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use transcraft_error::{Error, ErrorKind, Result};
use transcraft_provider::{LlmProvider, ProviderError};

/// A rejected attempt and the critique it received
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub translation: String,
    pub critique: String,
}

impl HistoryEntry {
    pub fn new(translation: impl Into<String>, critique: impl Into<String>) -> Self {
        Self {
            translation: translation.into(),
            critique: critique.into(),
        }
    }
}

/// The judge's decision on one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject,
}

impl Verdict {
    /// Only a bare "yes" (any case, surrounding whitespace ignored) accepts.
    /// Anything else, including "Yes." or a sentence that contains yes, rejects.
    pub fn parse(response: &str) -> Self {
        if response.trim().to_lowercase() == "yes" {
            Verdict::Accept
        } else {
            Verdict::Reject
        }
    }

    pub fn is_accept(&self) -> bool {
        matches!(self, Verdict::Accept)
    }
}

#[derive(Debug, Clone, Copy)]
enum Stage {
    Translate,
    Critique,
    Judge,
}

impl Stage {
    fn as_str(&self) -> &'static str {
        match self {
            Stage::Translate => "translate",
            Stage::Critique => "critique",
            Stage::Judge => "judge",
        }
    }
}

/// Per-run state, never shared between runs
#[derive(Debug, Default)]
struct LoopState {
    translation: String,
    critique: String,
    history: Vec<HistoryEntry>,
    iteration: usize,
}

/// Summary of a finished run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationOutcome {
    pub translation: String,
    /// Translate/critique/judge cycles performed
    pub iterations: usize,
    /// Whether the judge accepted the final translation
    pub accepted: bool,
    pub emissions: Vec<Emission>,
}

impl TranslationOutcome {
    /// Summarise a complete emission trail. `None` when it has no final translation.
    pub fn from_emissions(emissions: Vec<Emission>) -> Option<Self> {
        let translation = emissions.iter().find(|e| e.is_final())?.content.clone();
        let iterations = emissions
            .iter()
            .filter(|e| e.agent == AgentKind::Judge)
            .count();
        let accepted = emissions
            .iter()
            .rev()
            .find(|e| e.agent == AgentKind::Judge)
            .map(|e| Verdict::parse(&e.content).is_accept())
            .unwrap_or(false);

        Some(Self {
            translation,
            iterations,
            accepted,
            emissions,
        })
    }
}

/// Drives the translate/critique/judge loop against one provider.
///
/// The loop holds no per-run state, so one instance can serve any number of
/// concurrent runs as long as the provider can.
pub struct RefinementLoop<P> {
    provider: P,
    templates: PromptTemplates,
}

impl<P: LlmProvider> RefinementLoop<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            templates: PromptTemplates::default(),
        }
    }

    pub fn with_templates(mut self, templates: PromptTemplates) -> Self {
        self.templates = templates;
        self
    }

    pub fn templates(&self) -> &PromptTemplates {
        &self.templates
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Run the loop, yielding each emission as soon as its stage finishes.
    ///
    /// Nothing happens until the stream is polled, and dropping it stops the
    /// run before the next chat call. A failed chat call ends the stream with
    /// one `Err`; no `final translation` follows it. An invalid request or
    /// template fails before the first chat call.
    pub fn run(&self, request: TranslationRequest) -> impl Stream<Item = Result<Emission>> + '_ {
        async_stream::try_stream! {
            request.validate()?;
            self.templates
                .validate()
                .map_err(|e| e.with_operation("refine::run"))?;
            let mut state = LoopState::default();

            loop {
                let iteration = state.iteration;
                debug!(iteration = iteration + 1, history = state.history.len(), "starting iteration");

                let system = self.templates.translator_system(&request)?;
                let prompt = self.templates.translation(&request, &state.history)?;
                state.translation = self
                    .call(Stage::Translate, iteration, &request, &system, &prompt)
                    .await?;
                yield Emission::action(state.translation.as_str());

                let system = self.templates.critique_system(&request)?;
                let prompt = self.templates.reflection(&request, &state.translation)?;
                state.critique = self
                    .call(Stage::Critique, iteration, &request, &system, &prompt)
                    .await?;
                yield Emission::critique(state.critique.as_str());

                let system = self.templates.judge_system(&request)?;
                let prompt = self
                    .templates
                    .judgement(&request, &state.translation, &state.critique)?;
                let answer = self
                    .call(Stage::Judge, iteration, &request, &system, &prompt)
                    .await?;
                let verdict = Verdict::parse(&answer);
                yield Emission::judge(answer);

                info!(iteration = iteration + 1, verdict = ?verdict, "judge answered");

                if verdict.is_accept() || iteration + 1 >= request.max_iterations {
                    yield Emission::final_translation(state.translation.as_str());
                    break;
                }

                let entry = HistoryEntry::new(
                    std::mem::take(&mut state.translation),
                    std::mem::take(&mut state.critique),
                );
                state.history.push(entry);
                state.iteration += 1;
            }
        }
    }

    /// Run to completion and summarise the emissions
    pub async fn translate(&self, request: TranslationRequest) -> Result<TranslationOutcome> {
        let stream = self.run(request);
        futures_util::pin_mut!(stream);

        let mut emissions = Vec::new();
        while let Some(emission) = stream.next().await {
            emissions.push(emission?);
        }

        TranslationOutcome::from_emissions(emissions).ok_or_else(|| {
            Error::unexpected("run ended without a final translation").with_operation("refine::translate")
        })
    }

    async fn call(
        &self,
        stage: Stage,
        iteration: usize,
        request: &TranslationRequest,
        system: &str,
        prompt: &str,
    ) -> Result<String> {
        let estimate = estimate_tokens(system) + estimate_tokens(prompt);
        if estimate > request.max_tokens {
            warn!(
                stage = stage.as_str(),
                iteration = iteration + 1,
                estimated_tokens = estimate,
                max_tokens = request.max_tokens,
                "prompt exceeds token budget"
            );
        } else {
            debug!(stage = stage.as_str(), estimated_tokens = estimate, "calling provider");
        }

        self.provider
            .invoke_chat(Some(system), prompt)
            .await
            .map_err(|e| {
                Error::new(upstream_kind(&e), format!("{} call failed", stage.as_str()))
                    .with_operation("refine::run")
                    .with_context("stage", stage.as_str())
                    .with_context("iteration", (iteration + 1).to_string())
                    .with_context("provider", self.provider.name())
                    .set_source(e)
            })
    }
}

fn upstream_kind(err: &ProviderError) -> ErrorKind {
    match err {
        ProviderError::Network(_) => ErrorKind::NetworkFailed,
        ProviderError::RateLimited { .. } => ErrorKind::RateLimited,
        _ => ErrorKind::InferenceFailed,
    }
}
