//! Readiness probing and model discovery.
//!
//! Model servers often come up well after the application that uses them.
//! Before the first translation we poll the model listing until it answers,
//! and take the first listed model as the one to talk to.

use crate::provider::{LlmProvider, ProviderError};
use std::time::Duration;
use tracing::{debug, info, warn};
use transcraft_error::{Error, ErrorKind, Result};

/// Polling knobs for [`wait_until_ready`]
#[derive(Debug, Clone)]
pub struct ReadinessConfig {
    /// Total number of probes (at least one is always made)
    pub attempts: u32,
    /// Pause between probes
    pub delay: Duration,
    /// Upper bound on a single probe
    pub probe_timeout: Duration,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            attempts: 10,
            delay: Duration::from_secs(2),
            probe_timeout: Duration::from_millis(500),
        }
    }
}

impl ReadinessConfig {
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }
}

/// Outcome of one probe
enum Probe {
    Ready(Vec<String>),
    NotYet(String),
}

async fn probe_once<P: LlmProvider>(provider: &P, timeout: Duration) -> Result<Probe> {
    match tokio::time::timeout(timeout, provider.list_models()).await {
        Err(_) => Ok(Probe::NotYet(format!("no answer within {:?}", timeout))),
        Ok(Ok(models)) if models.is_empty() => Err(Error::parse_failed(
            "model listing is empty",
        )),
        Ok(Ok(models)) => Ok(Probe::Ready(models)),
        Ok(Err(e @ ProviderError::Parse(_))) => {
            Err(Error::parse_failed("invalid model listing").set_source(e))
        }
        Ok(Err(e @ ProviderError::AuthenticationFailed)) => {
            Err(Error::new(ErrorKind::ConfigInvalid, "model endpoint rejected credentials")
                .set_source(e))
        }
        Ok(Err(e)) => Ok(Probe::NotYet(e.to_string())),
    }
}

/// One readiness check. Returns the served models when the endpoint is up.
pub async fn probe<P: LlmProvider>(provider: &P, config: &ReadinessConfig) -> Result<Vec<String>> {
    match probe_once(provider, config.probe_timeout)
        .await
        .map_err(|e| e.with_operation("readiness::probe"))?
    {
        Probe::Ready(models) => Ok(models),
        Probe::NotYet(reason) => Err(Error::provider_unavailable(reason)
            .with_operation("readiness::probe")
            .with_context("provider", provider.name())),
    }
}

/// Poll the model listing until it answers, then return the first model id.
///
/// Unreachable endpoints, timeouts and non-2xx answers are retried. A
/// malformed or empty listing fails immediately.
pub async fn wait_until_ready<P: LlmProvider>(provider: &P, config: &ReadinessConfig) -> Result<String> {
    let attempts = config.attempts.max(1);
    let mut last_reason = String::new();

    for attempt in 0..attempts {
        if attempt != 0 {
            warn!(
                reason = %last_reason,
                delay_ms = config.delay.as_millis() as u64,
                "model endpoint not ready, waiting"
            );
            tokio::time::sleep(config.delay).await;
        }
        debug!(attempt = attempt + 1, attempts, "probing model endpoint");

        match probe_once(provider, config.probe_timeout)
            .await
            .map_err(|e| e.with_operation("readiness::wait_until_ready"))?
        {
            Probe::Ready(models) => {
                // probe_once never reports an empty listing as ready
                let model = models.into_iter().next().unwrap_or_default();
                info!(model = %model, attempt = attempt + 1, "model endpoint ready");
                return Ok(model);
            }
            Probe::NotYet(reason) => last_reason = reason,
        }
    }

    Err(Error::provider_unavailable(format!(
        "model endpoint not ready after {} attempts",
        attempts
    ))
    .with_operation("readiness::wait_until_ready")
    .with_context("provider", provider.name())
    .with_context("last_error", last_reason)
    .persist())
}
