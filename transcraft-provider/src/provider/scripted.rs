//! Scripted provider - replays canned responses in order
//!
//! Each `complete` call pops the next scripted entry and records the request,
//! so tests can assert on both the outputs and the prompts that produced them.

use super::*;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

/// In-memory provider driven by a queue of responses and failures
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<String, ProviderError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
    models: Vec<String>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            models: vec!["scripted".to_string()],
            ..Default::default()
        }
    }

    /// Queue successful responses
    pub fn with_responses<I, S>(self, responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for response in responses {
            self.push_response(response);
        }
        self
    }

    /// Models reported by `list_models`
    pub fn with_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.models = models.into_iter().map(Into::into).collect();
        self
    }

    pub fn push_response(&self, response: impl Into<String>) {
        locked(&self.script).push_back(Ok(response.into()));
    }

    pub fn push_error(&self, error: ProviderError) {
        locked(&self.script).push_back(Err(error));
    }

    /// Every request received so far, in order
    pub fn requests(&self) -> Vec<CompletionRequest> {
        locked(&self.requests).clone()
    }

    pub fn call_count(&self) -> usize {
        locked(&self.requests).len()
    }

    /// Entries not yet consumed
    pub fn remaining(&self) -> usize {
        locked(&self.script).len()
    }
}

impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        self.models.first().map(String::as_str).unwrap_or("scripted")
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.default_model().to_string());
        locked(&self.requests).push(request);

        let next = locked(&self.script)
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::Other("script exhausted".into())));

        next.map(|content| CompletionResponse {
            id: format!("scripted-{}", self.call_count()),
            model,
            content: Some(content),
            finish_reason: FinishReason::Stop,
            usage: Usage::default(),
        })
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        Ok(self.models.clone())
    }
}
