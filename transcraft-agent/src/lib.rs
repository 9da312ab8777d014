//! # transcraft-agent
//!
//! Iterative translation with three cooperating chat roles.
//!
//! ## Core Concepts
//! - **RefinementLoop**: translate, critique, judge until accepted or out of iterations
//! - **Emission**: tagged progress event streamed to the caller as each stage finishes
//! - **PromptTemplates**: overridable prompts with `{name}` placeholders
//! - **TranslationPayload**: JSON request form with inline prompt overrides
//!
//! ```ignore
//! let refine = RefinementLoop::new(provider);
//! let stream = into_emissions(refine.run(request));
//! ```

pub mod emission;
pub mod prompts;
pub mod refine;
pub mod request;

pub use emission::{into_emissions, AgentKind, Emission};
pub use prompts::{estimate_tokens, render, PromptOverrides, PromptTemplates};
pub use refine::{HistoryEntry, RefinementLoop, TranslationOutcome, Verdict};
pub use request::{
    LoopConfig, TranslationContext, TranslationPayload, TranslationRequest, DEFAULT_MAX_ITERATIONS,
    DEFAULT_MAX_TOKENS,
};
