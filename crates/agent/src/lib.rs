//! Conversational orchestration for Tempra.
//!
//! A turn flows through the intent router, then either the draft merger for
//! single-shot intents or the tool selector and agent loop for compound
//! requests. Accepting a draft goes straight to the commit handlers.
//!
//! # Modules
//!
//! - `router` - continuation check, intent and sub-action classification, compound detection
//! - `drafting` - slot filling over the completion gateway
//! - `briefing` - read-only calendar and inbox answers
//! - `tools` / `builtin_tools` - tool catalog, selection and implicit parameters
//! - `runtime` / `guardrails` - bounded agent loop with a repeat circuit breaker
//! - `commit` - side effects for accepted drafts
//! - `orchestrator` - `process_turn` and `resolve_pending_action`
//!
//! The model only translates text into structured requests. Which intent is
//! active, when a loop stops and what gets committed are decided here.

pub mod audit_log;
pub mod briefing;
pub mod builtin_tools;
pub mod commit;
pub mod drafting;
pub mod gateway;
pub mod guardrails;
pub mod llm;
pub mod orchestrator;
pub mod parse;
pub mod router;
pub mod runtime;
pub mod tools;

pub use audit_log::TracingAuditSink;
pub use gateway::HttpCompletionGateway;
pub use llm::{CompletionGateway, CompletionRequest, ModelHint, ScriptedGateway};
pub use orchestrator::{
    Orchestrator, OrchestratorDeps, OrchestratorError, PendingDecision, Resolution, TurnReply,
    TurnRequest,
};
pub use router::{Lookup, SubAction};
pub use runtime::{AgentOutcome, AgentRuntime, Termination};
pub use tools::{RunContext, Tool, ToolRegistry, ToolSelector, ToolSpec};
