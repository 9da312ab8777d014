//! Prompt templates for the translator, critic and judge agents.
//!
//! Templates use `{name}` placeholders; `{{` and `}}` stand for literal
//! braces. Each template only accepts the placeholders listed for it in
//! [`PromptTemplates::placeholders`], so a typo in an override is reported
//! before any model call is made.

use crate::refine::HistoryEntry;
use crate::request::TranslationRequest;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use transcraft_error::{Error, Result};

const TRANSLATOR_SYSTEM_MESSAGE: &str =
    "You are an expert linguist who translates from {source_language} to {target_language}.";

const TRANSLATION_PROMPT: &str = "\
Translate the following {source_language} text into {target_language}.
Reply with the translation only, without notes or explanations.

The source text is delimited by <SOURCE_TEXT></SOURCE_TEXT> tags:

<SOURCE_TEXT>{source_text}</SOURCE_TEXT>";

const TRANSLATION_INSTRUCTION: &str = "Follow these instructions when translating: {instruction}";

const PROMPT_HISTORY: &str = "\
Earlier attempts and the critiques they received are listed below, oldest
first, between <HISTORY></HISTORY> tags. Take all of them into account.

<HISTORY>
{history}
</HISTORY>";

const HISTORY_ENTRY: &str = "\
<ATTEMPT number=\"{iteration}\">
<TRANSLATION>{translation}</TRANSLATION>
<CRITIQUE>{critique}</CRITIQUE>
</ATTEMPT>";

const CRITIQUE_SYSTEM_MESSAGE: &str = "\
You are an expert linguist who translates from {source_language} to {target_language}. \
You review a source text and its translation and suggest how to improve the translation.";

const REFLECTION_PROMPT: &str = "\
Read the {source_language} source text and its {target_language} translation below, then
give specific, constructive suggestions for improving the translation.

<SOURCE_TEXT>{source_text}</SOURCE_TEXT>

<TRANSLATION>{translation}</TRANSLATION>

Look for problems with:
(i) accuracy: additions, mistranslations, omissions or untranslated text;
(ii) fluency: {target_language} grammar, spelling, punctuation and needless repetition;
(iii) style: matching the tone and cultural context of the source;
(iv) terminology: consistent, domain-appropriate terms and idioms in {target_language}.

List one suggestion per issue. Output only the suggestions.";

const JUDGE_SYSTEM_MESSAGE: &str = "\
You are an expert linguist who translates from {source_language} to {target_language}. \
You decide whether a translation is good enough given a critique of it.";

const JUDGEMENT_PROMPT: &str = "\
Read the {source_language} source text, its {target_language} translation and the critique
below. Decide whether the translation is already accurate, fluent and stylistically
appropriate, or whether it should be revised according to the critique.

<SOURCE_TEXT>{source_text}</SOURCE_TEXT>

<TRANSLATION>{translation}</TRANSLATION>

<CRITIQUE>{critique}</CRITIQUE>

Is the translation of high quality? Answer with \"Yes\" or \"No\" only.";

/// The full set of templates used by one refinement loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTemplates {
    pub translator_system_message: String,
    pub translation_prompt: String,
    pub translation_instruction: String,
    pub prompt_history: String,
    pub history_entry: String,
    pub critique_system_message: String,
    pub reflection_prompt: String,
    pub judge_system_message: String,
    pub judgement_prompt: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            translator_system_message: TRANSLATOR_SYSTEM_MESSAGE.to_string(),
            translation_prompt: TRANSLATION_PROMPT.to_string(),
            translation_instruction: TRANSLATION_INSTRUCTION.to_string(),
            prompt_history: PROMPT_HISTORY.to_string(),
            history_entry: HISTORY_ENTRY.to_string(),
            critique_system_message: CRITIQUE_SYSTEM_MESSAGE.to_string(),
            reflection_prompt: REFLECTION_PROMPT.to_string(),
            judge_system_message: JUDGE_SYSTEM_MESSAGE.to_string(),
            judgement_prompt: JUDGEMENT_PROMPT.to_string(),
        }
    }
}

/// A partial set of templates; `None` keeps whatever is already in place
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translator_system_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translation_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translation_instruction: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_history: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_entry: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub critique_system_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reflection_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub judge_system_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub judgement_prompt: Option<String>,
}

impl PromptOverrides {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

const LANGUAGES: &[&str] = &["source_language", "target_language"];
const TRANSLATION_KEYS: &[&str] = &["source_language", "target_language", "source_text"];
const REFLECTION_KEYS: &[&str] = &["source_language", "target_language", "source_text", "translation"];
const JUDGEMENT_KEYS: &[&str] = &[
    "source_language",
    "target_language",
    "source_text",
    "translation",
    "critique",
];
const INSTRUCTION_KEYS: &[&str] = &["instruction"];
const HISTORY_KEYS: &[&str] = &["history"];
const HISTORY_ENTRY_KEYS: &[&str] = &["iteration", "translation", "critique"];

impl PromptTemplates {
    /// Replace the templates that `overrides` sets
    pub fn with_overrides(mut self, overrides: PromptOverrides) -> Self {
        if let Some(t) = overrides.translator_system_message {
            self.translator_system_message = t;
        }
        if let Some(t) = overrides.translation_prompt {
            self.translation_prompt = t;
        }
        if let Some(t) = overrides.translation_instruction {
            self.translation_instruction = t;
        }
        if let Some(t) = overrides.prompt_history {
            self.prompt_history = t;
        }
        if let Some(t) = overrides.history_entry {
            self.history_entry = t;
        }
        if let Some(t) = overrides.critique_system_message {
            self.critique_system_message = t;
        }
        if let Some(t) = overrides.reflection_prompt {
            self.reflection_prompt = t;
        }
        if let Some(t) = overrides.judge_system_message {
            self.judge_system_message = t;
        }
        if let Some(t) = overrides.judgement_prompt {
            self.judgement_prompt = t;
        }
        self
    }

    /// Defaults overlaid with a JSON object of overrides read from `path`
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            Error::from(e)
                .with_operation("prompts::from_file")
                .with_context("path", path.display().to_string())
        })?;
        let overrides: PromptOverrides = serde_json::from_str(&json).map_err(|e| {
            Error::parse_failed("prompt file is not a JSON object of templates")
                .with_operation("prompts::from_file")
                .with_context("path", path.display().to_string())
                .set_source(e)
        })?;

        let templates = Self::default().with_overrides(overrides);
        templates.validate()?;
        Ok(templates)
    }

    /// Name, body and accepted placeholders of every template
    pub fn placeholders(&self) -> [(&'static str, &str, &'static [&'static str]); 9] {
        [
            ("translator_system_message", self.translator_system_message.as_str(), LANGUAGES),
            ("translation_prompt", self.translation_prompt.as_str(), TRANSLATION_KEYS),
            ("translation_instruction", self.translation_instruction.as_str(), INSTRUCTION_KEYS),
            ("prompt_history", self.prompt_history.as_str(), HISTORY_KEYS),
            ("history_entry", self.history_entry.as_str(), HISTORY_ENTRY_KEYS),
            ("critique_system_message", self.critique_system_message.as_str(), LANGUAGES),
            ("reflection_prompt", self.reflection_prompt.as_str(), REFLECTION_KEYS),
            ("judge_system_message", self.judge_system_message.as_str(), LANGUAGES),
            ("judgement_prompt", self.judgement_prompt.as_str(), JUDGEMENT_KEYS),
        ]
    }

    /// Check every template against its placeholder set
    pub fn validate(&self) -> Result<()> {
        for (name, template, keys) in self.placeholders() {
            let values: Vec<(&str, &str)> = keys.iter().map(|k| (*k, "")).collect();
            render(name, template, &values).map_err(|e| e.with_operation("prompts::validate"))?;
        }
        Ok(())
    }

    pub fn translator_system(&self, request: &TranslationRequest) -> Result<String> {
        render(
            "translator_system_message",
            &self.translator_system_message,
            &languages(request),
        )
    }

    /// Translation prompt, followed by the instruction block when an
    /// instruction is set and the full history block when there is history.
    pub fn translation(&self, request: &TranslationRequest, history: &[HistoryEntry]) -> Result<String> {
        let mut prompt = render(
            "translation_prompt",
            &self.translation_prompt,
            &[
                ("source_language", request.source_language.as_str()),
                ("target_language", request.target_language.as_str()),
                ("source_text", request.source_text.as_str()),
            ],
        )?;

        if let Some(instruction) = request.instruction() {
            prompt.push_str("\n\n");
            prompt.push_str(&render(
                "translation_instruction",
                &self.translation_instruction,
                &[("instruction", instruction)],
            )?);
        }

        if !history.is_empty() {
            let entries = history
                .iter()
                .enumerate()
                .map(|(i, entry)| {
                    let number = (i + 1).to_string();
                    render(
                        "history_entry",
                        &self.history_entry,
                        &[
                            ("iteration", number.as_str()),
                            ("translation", entry.translation.as_str()),
                            ("critique", entry.critique.as_str()),
                        ],
                    )
                })
                .collect::<Result<Vec<_>>>()?;

            let joined = entries.join("\n");
            prompt.push_str("\n\n");
            prompt.push_str(&render(
                "prompt_history",
                &self.prompt_history,
                &[("history", joined.as_str())],
            )?);
        }

        Ok(prompt)
    }

    pub fn critique_system(&self, request: &TranslationRequest) -> Result<String> {
        render(
            "critique_system_message",
            &self.critique_system_message,
            &languages(request),
        )
    }

    pub fn reflection(&self, request: &TranslationRequest, translation: &str) -> Result<String> {
        render(
            "reflection_prompt",
            &self.reflection_prompt,
            &[
                ("source_language", request.source_language.as_str()),
                ("target_language", request.target_language.as_str()),
                ("source_text", request.source_text.as_str()),
                ("translation", translation),
            ],
        )
    }

    pub fn judge_system(&self, request: &TranslationRequest) -> Result<String> {
        render(
            "judge_system_message",
            &self.judge_system_message,
            &languages(request),
        )
    }

    pub fn judgement(&self, request: &TranslationRequest, translation: &str, critique: &str) -> Result<String> {
        render(
            "judgement_prompt",
            &self.judgement_prompt,
            &[
                ("source_language", request.source_language.as_str()),
                ("target_language", request.target_language.as_str()),
                ("source_text", request.source_text.as_str()),
                ("translation", translation),
                ("critique", critique),
            ],
        )
    }
}

fn languages(request: &TranslationRequest) -> [(&'static str, &str); 2] {
    [
        ("source_language", request.source_language.as_str()),
        ("target_language", request.target_language.as_str()),
    ]
}

/// Substitute `{name}` placeholders in `template`.
///
/// `name` only labels errors. Values are inserted verbatim, so braces inside
/// a value are never re-interpreted.
pub fn render(name: &str, template: &str, values: &[(&str, &str)]) -> Result<String> {
    let vars: HashMap<String, String> = values
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    strfmt::strfmt(template, &vars).map_err(|e| {
        Error::template_invalid(name, e.to_string()).with_operation("prompts::render")
    })
}

/// Rough token estimate, ~4 characters per token
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

#[cfg(test)]
mod tests {
    use super::*;
    use transcraft_error::ErrorKind;

    fn request() -> TranslationRequest {
        TranslationRequest::new("English", "French", "Hello, world.")
    }

    #[test]
    fn test_render_substitutes_and_escapes() {
        let out = render(
            "t",
            "{{literal}} {a} and {b}, again {a}",
            &[("a", "x"), ("b", "{not a placeholder}")],
        )
        .unwrap();
        assert_eq!(out, "{literal} x and {not a placeholder}, again x");
    }

    #[test]
    fn test_render_unknown_placeholder() {
        let err = render("judgement_prompt", "Is {translaton} good?", &[("translation", "x")]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TemplateInvalid);
        assert_eq!(err.context_value("template"), Some("judgement_prompt"));
        assert!(err.to_string().contains("translaton"));
    }

    #[test]
    fn test_render_unbalanced_braces() {
        assert!(render("t", "open { never closed", &[]).is_err());
        assert!(render("t", "stray } brace", &[]).is_err());
        assert_eq!(render("t", "no placeholders", &[]).unwrap(), "no placeholders");
    }

    #[test]
    fn test_defaults_are_valid() {
        PromptTemplates::default().validate().unwrap();
    }

    #[test]
    fn test_translation_prompt_without_extras() {
        let templates = PromptTemplates::default();
        let prompt = templates.translation(&request(), &[]).unwrap();
        assert!(prompt.contains("<SOURCE_TEXT>Hello, world.</SOURCE_TEXT>"));
        assert!(prompt.contains("into French"));
        assert!(!prompt.contains("<HISTORY>"));
        assert!(!prompt.contains("instructions"));
    }

    #[test]
    fn test_translation_prompt_with_instruction_and_history() {
        let templates = PromptTemplates::default();
        let request = request().with_instruction("Use the informal 'tu'.");
        let history = vec![
            HistoryEntry::new("Bonjour monde.", "Missing article."),
            HistoryEntry::new("Bonjour le monde.", "Missing comma."),
        ];

        let prompt = templates.translation(&request, &history).unwrap();
        assert!(prompt.contains("Use the informal 'tu'."));
        assert!(prompt.contains("<TRANSLATION>Bonjour monde.</TRANSLATION>"));
        assert!(prompt.contains("<CRITIQUE>Missing comma.</CRITIQUE>"));
        assert!(prompt.contains("number=\"2\""));
        let first = prompt.find("Bonjour monde.").unwrap();
        let second = prompt.find("Bonjour le monde.").unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_judgement_prompt_carries_everything() {
        let templates = PromptTemplates::default();
        let prompt = templates
            .judgement(&request(), "Bonjour, le monde.", "Looks right.")
            .unwrap();
        assert!(prompt.contains("Hello, world."));
        assert!(prompt.contains("Bonjour, le monde."));
        assert!(prompt.contains("Looks right."));

        let system = templates.judge_system(&request()).unwrap();
        assert!(system.contains("from English to French"));
    }

    #[test]
    fn test_overrides_apply_selectively() {
        let overrides = PromptOverrides {
            judgement_prompt: Some("{translation}? yes/no".into()),
            ..Default::default()
        };
        assert!(!overrides.is_empty());
        assert!(PromptOverrides::default().is_empty());

        let templates = PromptTemplates::default().with_overrides(overrides);
        assert_eq!(templates.judgement_prompt, "{translation}? yes/no");
        assert_eq!(templates.translation_prompt, TRANSLATION_PROMPT);
    }

    #[test]
    fn test_validate_catches_bad_override() {
        let templates = PromptTemplates::default().with_overrides(PromptOverrides {
            reflection_prompt: Some("Critique {translation} against {critique}".into()),
            ..Default::default()
        });
        let err = templates.validate().unwrap_err();
        assert_eq!(err.context_value("template"), Some("reflection_prompt"));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompts.json");
        std::fs::write(&path, r#"{"translation_prompt": "Say {source_text} in {target_language}"}"#).unwrap();

        let templates = PromptTemplates::from_file(&path).unwrap();
        assert_eq!(templates.translation_prompt, "Say {source_text} in {target_language}");
        assert_eq!(templates.judgement_prompt, JUDGEMENT_PROMPT);
    }

    #[test]
    fn test_from_file_errors() {
        let dir = tempfile::tempdir().unwrap();

        let err = PromptTemplates::from_file(dir.path().join("missing.json")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileNotFound);

        let path = dir.path().join("bad.json");
        std::fs::write(&path, "[1, 2]").unwrap();
        let err = PromptTemplates::from_file(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParseFailed);

        let path = dir.path().join("typo.json");
        std::fs::write(&path, r#"{"judge_system_message": "{sourc_language}"}"#).unwrap();
        let err = PromptTemplates::from_file(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TemplateInvalid);
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens("Hello, world!"), 3);
        assert_eq!(estimate_tokens(""), 0);
    }
}
