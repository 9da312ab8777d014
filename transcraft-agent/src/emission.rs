//! Emissions - the tagged progress events a run produces
//!
//! A consumer sees them in pipeline order and may forward them one per line
//! as NDJSON: `{"agent":"critique","content":"..."}`.

use futures_core::Stream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use transcraft_error::{Error, ErrorKind, Result};

/// Which step produced an emission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentKind {
    #[serde(rename = "action")]
    Action,
    #[serde(rename = "critique")]
    Critique,
    #[serde(rename = "judge")]
    Judge,
    #[serde(rename = "final translation")]
    FinalTranslation,
    #[serde(rename = "error")]
    Error,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Action => "action",
            AgentKind::Critique => "critique",
            AgentKind::Judge => "judge",
            AgentKind::FinalTranslation => "final translation",
            AgentKind::Error => "error",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One `(agent, content)` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Emission {
    pub agent: AgentKind,
    pub content: String,
}

impl Emission {
    pub fn new(agent: AgentKind, content: impl Into<String>) -> Self {
        Self {
            agent,
            content: content.into(),
        }
    }

    pub fn action(content: impl Into<String>) -> Self {
        Self::new(AgentKind::Action, content)
    }

    pub fn critique(content: impl Into<String>) -> Self {
        Self::new(AgentKind::Critique, content)
    }

    pub fn judge(content: impl Into<String>) -> Self {
        Self::new(AgentKind::Judge, content)
    }

    pub fn final_translation(content: impl Into<String>) -> Self {
        Self::new(AgentKind::FinalTranslation, content)
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::new(AgentKind::Error, content)
    }

    pub fn is_final(&self) -> bool {
        self.agent == AgentKind::FinalTranslation
    }

    /// Compact single-line JSON, without the trailing newline
    pub fn to_ndjson(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            Error::new(ErrorKind::SerializationFailed, "failed to serialize emission")
                .with_operation("emission::to_ndjson")
                .with_context("agent", self.agent.as_str())
                .set_source(e)
        })
    }

    pub fn from_ndjson(line: &str) -> Result<Self> {
        serde_json::from_str(line).map_err(|e| {
            Error::parse_failed("failed to parse emission")
                .with_operation("emission::from_ndjson")
                .set_source(e)
        })
    }
}

/// Forward every emission and turn a failure into a closing `error` emission.
///
/// Nothing is buffered: each item is passed on as soon as the loop yields it.
pub fn into_emissions<S>(stream: S) -> impl Stream<Item = Emission>
where
    S: Stream<Item = Result<Emission>>,
{
    async_stream::stream! {
        futures_util::pin_mut!(stream);
        while let Some(item) = stream.next().await {
            match item {
                Ok(emission) => yield emission,
                Err(err) => {
                    tracing::error!(error = %err, "translation aborted");
                    yield Emission::error(err.to_string());
                    break;
                }
            }
        }
    }
}
