//! Per-turn entry points: `process_turn` and `resolve_pending_action`.
//!
//! The orchestrator never mutates a session directly. It returns the next
//! intent and draft, and the caller applies them once the turn completes, so a
//! dropped or failed turn leaves the stored session unchanged.

use std::sync::Arc;
use std::time::Duration;

use tempra_core::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use tempra_core::config::AppConfig;
use tempra_core::domain::timestamp::utc_offset;
use tempra_core::providers::{
    CalendarProvider, CredentialProvider, EmailProvider, PlanStore, TodoStore,
};
use tempra_core::{
    ApplicationError, ChatMessage, ConversationFlow, ConversationSession, Draft, GatewayError,
    IntentLabel, RouterAction, RouterEvent, RouterState, TransitionOutcome, UserIdentity,
};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::briefing::{Briefer, BriefingDeps, BriefingSettings};
use crate::builtin_tools::{default_catalog, ToolDeps};
use crate::commit::{ActionCommitter, CommitDeps, CommitOutcome, CommitSettings};
use crate::drafting::{DraftMerger, MergeError};
use crate::llm::{complete_within, CompletionGateway, CompletionRequest};
use crate::router::{Continuation, IntentRouter, Lookup, SubAction};
use crate::runtime::{AgentRuntime, AgentSettings, Termination};
use crate::tools::{ImplicitParam, RunContext, ToolRegistry, ToolSelector};

pub const DENIED_MESSAGE: &str = "Okay, I've discarded that. Let me know if there's anything else.";
const INTERNAL_ERROR_MESSAGE: &str = "Sorry, something went wrong on my side. Please try again.";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error("there is no pending draft to resolve")]
    NoPendingDraft,
    #[error("draft is not ready to confirm; missing {missing:?}")]
    DraftNotReady { missing: Vec<String> },
}

#[derive(Clone, Copy, Debug)]
pub struct TurnRequest<'a> {
    pub message: &'a str,
    pub session: &'a ConversationSession,
    pub user: &'a UserIdentity,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TurnReply {
    pub reply_text: String,
    pub updated_draft: Option<Draft>,
    pub updated_intent: Option<IntentLabel>,
    pub show_confirm_buttons: bool,
}

impl TurnReply {
    /// Records the exchange and the new routing state on `session`.
    pub fn apply_to(&self, session: &mut ConversationSession, message: &str, history_window: usize) {
        session.push(ChatMessage::user(message));
        session.push(ChatMessage::assistant(self.reply_text.clone()));
        session.active_intent = self.updated_intent;
        session.pending_draft = self.updated_draft.clone();
        session.trim_history(history_window);
    }

    fn unchanged(session: &ConversationSession, reply_text: impl Into<String>) -> Self {
        Self {
            reply_text: reply_text.into(),
            updated_draft: session.pending_draft.clone(),
            updated_intent: session.active_intent,
            show_confirm_buttons: false,
        }
    }

    /// Reply for a turn whose routing `outcome` settled. Without an outcome the turn
    /// falls back to `General` with no draft.
    fn settled(
        session: &ConversationSession,
        outcome: Option<&TransitionOutcome>,
        reply_text: impl Into<String>,
    ) -> Self {
        let keeps_draft = outcome.map_or(false, |outcome| !outcome.discards_draft());
        Self {
            reply_text: reply_text.into(),
            updated_draft: if keeps_draft { session.pending_draft.clone() } else { None },
            updated_intent: Some(
                outcome.and_then(|outcome| outcome.to.active_intent()).unwrap_or(IntentLabel::General),
            ),
            show_confirm_buttons: false,
        }
    }

    fn general(reply_text: impl Into<String>) -> Self {
        Self {
            reply_text: reply_text.into(),
            updated_draft: None,
            updated_intent: Some(IntentLabel::General),
            show_confirm_buttons: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PendingDecision {
    Accept,
    Deny,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub success: bool,
    pub message: String,
    pub next_intent: IntentLabel,
    /// True when the draft should stay pending so the user can retry.
    pub keep_draft: bool,
}

impl Resolution {
    /// Resolution whose next intent and draft handling come from the routing `outcome`.
    fn settled(outcome: Option<&TransitionOutcome>, success: bool, message: impl Into<String>) -> Self {
        Self {
            success,
            message: message.into(),
            next_intent: outcome
                .and_then(|outcome| outcome.to.active_intent())
                .unwrap_or(IntentLabel::General),
            keep_draft: outcome.map_or(false, |outcome| !outcome.discards_draft()),
        }
    }
}

/// Collaborators shared by every turn.
#[derive(Clone)]
pub struct OrchestratorDeps {
    pub gateway: Arc<dyn CompletionGateway>,
    pub calendar: Arc<dyn CalendarProvider>,
    pub email: Arc<dyn EmailProvider>,
    pub todos: Arc<dyn TodoStore>,
    pub plans: Arc<dyn PlanStore>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub audit: Arc<dyn AuditSink>,
}

pub struct Orchestrator {
    flow: ConversationFlow,
    router: IntentRouter,
    merger: DraftMerger,
    briefer: Briefer,
    selector: ToolSelector,
    runtime: AgentRuntime,
    committer: ActionCommitter,
    catalog: ToolRegistry,
    gateway: Arc<dyn CompletionGateway>,
    gateway_timeout: Duration,
    credentials: Arc<dyn CredentialProvider>,
    audit: Arc<dyn AuditSink>,
    agent_enabled: bool,
    history_window: usize,
}

impl Orchestrator {
    pub fn new(deps: OrchestratorDeps, config: &AppConfig) -> Self {
        let gateway_timeout = Duration::from_secs(config.llm.timeout_secs);
        let local_offset = utc_offset(config.dialogue.utc_offset_minutes);
        let default_event_length =
            Duration::from_secs(config.dialogue.default_event_minutes.max(1) as u64 * 60);

        let provider_timeout = Duration::from_secs(config.providers.timeout_secs);
        let briefer = Briefer::new(
            BriefingDeps {
                calendar: Arc::clone(&deps.calendar),
                email: Arc::clone(&deps.email),
                credentials: Arc::clone(&deps.credentials),
                gateway: Arc::clone(&deps.gateway),
            },
            BriefingSettings { provider_timeout, gateway_timeout, local_offset },
        );
        let catalog = default_catalog(ToolDeps {
            calendar: Arc::clone(&deps.calendar),
            email: Arc::clone(&deps.email),
            todos: Arc::clone(&deps.todos),
            local_offset,
            default_event_length,
        });
        let committer = ActionCommitter::new(
            CommitDeps {
                calendar: deps.calendar,
                email: deps.email,
                todos: deps.todos,
                plans: deps.plans,
                credentials: Arc::clone(&deps.credentials),
                gateway: Arc::clone(&deps.gateway),
            },
            CommitSettings { provider_timeout, gateway_timeout, default_event_length, local_offset },
        );

        Self {
            flow: ConversationFlow,
            router: IntentRouter::new(Arc::clone(&deps.gateway), gateway_timeout, &config.dialogue),
            merger: DraftMerger::new(Arc::clone(&deps.gateway), gateway_timeout, local_offset),
            briefer,
            selector: ToolSelector::new(Arc::clone(&deps.gateway), gateway_timeout),
            runtime: AgentRuntime::new(
                Arc::clone(&deps.gateway),
                AgentSettings::from_config(&config.agent, &config.llm),
            ),
            committer,
            catalog,
            gateway: deps.gateway,
            gateway_timeout,
            credentials: deps.credentials,
            audit: deps.audit,
            agent_enabled: config.agent.enabled,
            history_window: config.dialogue.history_window,
        }
    }

    /// Replaces the built-in tool catalog.
    pub fn with_catalog(mut self, catalog: ToolRegistry) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn catalog(&self) -> &ToolRegistry {
        &self.catalog
    }

    pub fn history_window(&self) -> usize {
        self.history_window
    }

    pub async fn process_turn(&self, request: TurnRequest<'_>) -> TurnReply {
        let TurnRequest { message, session, user } = request;
        let audit = AuditContext::new(
            Some(session.id.clone()),
            Some(user.user_id.clone()),
            Uuid::new_v4().to_string(),
            "orchestrator",
        );
        let history: Vec<ChatMessage> = session.transcript().cloned().collect();
        let mut state = RouterState::from_session(session.active_intent);
        let mut draft = session.pending_draft.clone();

        if let RouterState::Active(active) = state {
            let event = match self.router.check_continuation(active, &history, message).await {
                Continuation::Continue => RouterEvent::ContinuationConfirmed,
                Continuation::Exit => RouterEvent::ContinuationRejected,
            };
            let Some(outcome) = self.transition(&state, event, &audit) else {
                return TurnReply::unchanged(session, INTERNAL_ERROR_MESSAGE);
            };
            if outcome.discards_draft() {
                draft = None;
            }
            state = outcome.to;
            if event == RouterEvent::ContinuationConfirmed {
                return self.execute(&outcome, message, &history, draft, session, user, &audit).await;
            }
        }

        let event = if self.agent_enabled && self.router.detect_compound(&history, message).await {
            RouterEvent::CompoundRequestDetected
        } else {
            RouterEvent::IntentClassified(self.router.classify(&history, message).await)
        };
        let Some(outcome) = self.transition(&state, event, &audit) else {
            return TurnReply::unchanged(session, INTERNAL_ERROR_MESSAGE);
        };
        self.execute(&outcome, message, &history, draft, session, user, &audit).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute(
        &self,
        outcome: &TransitionOutcome,
        message: &str,
        history: &[ChatMessage],
        draft: Option<Draft>,
        session: &ConversationSession,
        user: &UserIdentity,
        audit: &AuditContext,
    ) -> TurnReply {
        for action in &outcome.actions {
            match action {
                RouterAction::MergeDraft(label) => {
                    return self.merge(*label, message, draft.as_ref(), session, user, audit).await;
                }
                RouterAction::ReplyConversationally => {
                    return self.converse(message, history, session).await;
                }
                RouterAction::RunAgent => {
                    return self.run_agent(message, history, session, user, audit).await;
                }
                RouterAction::DiscardDraft
                | RouterAction::CommitDraft
                | RouterAction::PromptReauthentication => {}
            }
        }
        TurnReply::unchanged(session, INTERNAL_ERROR_MESSAGE)
    }

    async fn merge(
        &self,
        label: IntentLabel,
        message: &str,
        draft: Option<&Draft>,
        session: &ConversationSession,
        user: &UserIdentity,
        audit: &AuditContext,
    ) -> TurnReply {
        let prior = draft.filter(|draft| draft.intent() == label);
        let merged = match prior {
            Some(prior) => self.merger.merge(label, message, Some(prior)).await,
            None => match self.router.classify_sub_action(label, message).await {
                Some(SubAction::Collect(seed)) => self.merger.start(seed, message).await,
                Some(SubAction::Answer(lookup)) => {
                    return self.answer(label, lookup, message, session, user, audit).await;
                }
                None => self.merger.merge(label, message, None).await,
            },
        };

        match merged {
            Ok(merged) => {
                let mut event = audit
                    .event("draft.merged", AuditCategory::Drafting, AuditOutcome::Success)
                    .with_metadata("intent", label.as_str())
                    .with_metadata("ready_for_confirm", merged.ready_for_confirm.to_string());
                if merged.draft.is_none() {
                    event.outcome = AuditOutcome::Failed;
                }
                self.audit.emit(event);

                TurnReply {
                    reply_text: merged.confirmation_message,
                    updated_draft: merged.draft,
                    updated_intent: Some(label),
                    show_confirm_buttons: merged.ready_for_confirm,
                }
            }
            Err(MergeError::Gateway(error)) => self.gateway_failure(session, error),
            Err(error @ MergeError::NotActionable(_)) => {
                warn!(event_name = "draft.merge.rejected", error = %error, "merge requested for non-actionable intent");
                TurnReply::unchanged(session, INTERNAL_ERROR_MESSAGE)
            }
        }
    }

    async fn answer(
        &self,
        label: IntentLabel,
        lookup: Lookup,
        message: &str,
        session: &ConversationSession,
        user: &UserIdentity,
        audit: &AuditContext,
    ) -> TurnReply {
        let state = RouterState::Active(label);
        let (event, reply) = match self.briefer.answer(lookup, message, user).await {
            Ok(reply) => (RouterEvent::LookupAnswered, reply),
            Err(ApplicationError::Gateway(error)) => return self.gateway_failure(session, error),
            Err(error) => {
                warn!(
                    event_name = "lookup.failed",
                    lookup = ?lookup,
                    user_id = %user.user_id,
                    error = %error,
                    "read-only request could not be answered"
                );
                let event = if error.requires_reauthentication() {
                    RouterEvent::CredentialsRejected
                } else {
                    RouterEvent::LookupAnswered
                };
                (event, error.user_message().to_owned())
            }
        };

        let outcome = self.transition(&state, event, audit);
        self.audit.emit(
            audit
                .event(
                    "lookup.answered",
                    AuditCategory::Agent,
                    if event == RouterEvent::LookupAnswered {
                        AuditOutcome::Success
                    } else {
                        AuditOutcome::Failed
                    },
                )
                .with_metadata("intent", label.as_str())
                .with_metadata("lookup", format!("{lookup:?}")),
        );
        TurnReply::settled(session, outcome.as_ref(), reply)
    }

    async fn converse(
        &self,
        message: &str,
        history: &[ChatMessage],
        session: &ConversationSession,
    ) -> TurnReply {
        let mut messages =
            vec![ChatMessage::system("You are a helpful AI assistant. Be conversational and friendly.")];
        messages.extend(history.iter().cloned());
        messages.push(ChatMessage::user(message));

        let request = CompletionRequest::new(messages).with_max_tokens(500).with_temperature(0.7);
        match complete_within(self.gateway.as_ref(), request, self.gateway_timeout).await {
            Ok(reply) => TurnReply::general(reply.trim()),
            Err(error) => self.gateway_failure(session, error),
        }
    }

    async fn run_agent(
        &self,
        message: &str,
        history: &[ChatMessage],
        session: &ConversationSession,
        user: &UserIdentity,
        audit: &AuditContext,
    ) -> TurnReply {
        let recent_start = history.len().saturating_sub(6);
        let tools = self.selector.select(message, &self.catalog, &history[recent_start..]).await;

        let mut context = RunContext::new(user.user_id.clone());
        if tools.needs(ImplicitParam::AccessToken) {
            match self.credentials.get_credentials(&user.user_id).await {
                Ok(credentials) => context = context.with_access_token(credentials.access_token),
                Err(error) => {
                    warn!(
                        event_name = "agent.credentials.rejected",
                        user_id = %user.user_id,
                        error = %error,
                        "credentials unavailable for agent run"
                    );
                    let reply = ApplicationError::from(error).user_message();
                    let outcome = self.transition(
                        &RouterState::Active(IntentLabel::General),
                        RouterEvent::CredentialsRejected,
                        audit,
                    );
                    return TurnReply::settled(session, outcome.as_ref(), reply);
                }
            }
        }

        let outcome = self.runtime.run(message, &tools, history, &context).await;
        self.audit.emit(
            audit
                .event(
                    "agent.run_finished",
                    AuditCategory::Agent,
                    if outcome.termination == Termination::Completed {
                        AuditOutcome::Success
                    } else {
                        AuditOutcome::Failed
                    },
                )
                .with_metadata("termination", outcome.termination.as_str())
                .with_metadata("steps_taken", outcome.steps_taken.to_string())
                .with_metadata("tools", tools.names().join(",")),
        );
        TurnReply::general(outcome.message)
    }

    fn gateway_failure(&self, session: &ConversationSession, error: GatewayError) -> TurnReply {
        warn!(
            event_name = "turn.gateway_failed",
            session_id = %session.id.as_str(),
            error = %error,
            "completion gateway failed; session left unchanged"
        );
        TurnReply::unchanged(session, ApplicationError::from(error).user_message())
    }

    fn transition(
        &self,
        state: &RouterState,
        event: RouterEvent,
        audit: &AuditContext,
    ) -> Option<TransitionOutcome> {
        match self.flow.apply_with_audit(state, &event, self.audit.as_ref(), audit) {
            Ok(outcome) => {
                info!(
                    event_name = "router.transition",
                    correlation_id = %audit.correlation_id,
                    from = ?outcome.from,
                    to = ?outcome.to,
                    event = ?outcome.event,
                    "router transition applied"
                );
                Some(outcome)
            }
            Err(error) => {
                warn!(
                    event_name = "router.transition_rejected",
                    correlation_id = %audit.correlation_id,
                    error = %error,
                    "router transition rejected"
                );
                None
            }
        }
    }

    /// Accepts or denies a pending draft. Bypasses the router's classifiers.
    pub async fn resolve_pending_action(
        &self,
        decision: PendingDecision,
        draft: Option<&Draft>,
        user: &UserIdentity,
    ) -> Result<Resolution, OrchestratorError> {
        let draft = draft.ok_or(OrchestratorError::NoPendingDraft)?;
        let audit =
            AuditContext::new(None, Some(user.user_id.clone()), Uuid::new_v4().to_string(), "orchestrator");
        let state = RouterState::Active(draft.intent());

        if decision == PendingDecision::Deny {
            let outcome = self.transition(&state, RouterEvent::DraftDenied, &audit);
            return Ok(Resolution::settled(outcome.as_ref(), true, DENIED_MESSAGE));
        }

        let missing = draft.missing_fields();
        if !missing.is_empty() {
            return Err(OrchestratorError::DraftNotReady {
                missing: missing.into_iter().map(str::to_owned).collect(),
            });
        }

        let outcome = self.committer.commit(draft, user).await;
        let resolution = match outcome {
            CommitOutcome::Committed { message } => {
                let outcome = self.transition(&state, RouterEvent::DraftAccepted, &audit);
                self.audit.emit(
                    audit
                        .event("commit.applied", AuditCategory::Commit, AuditOutcome::Success)
                        .with_metadata("intent", draft.intent().as_str()),
                );
                Resolution::settled(outcome.as_ref(), true, message)
            }
            CommitOutcome::Reauthenticate { message } => {
                let outcome = self.transition(&state, RouterEvent::CredentialsRejected, &audit);
                self.audit.emit(
                    audit
                        .event("commit.credentials_rejected", AuditCategory::Credential, AuditOutcome::Failed)
                        .with_metadata("intent", draft.intent().as_str()),
                );
                Resolution::settled(outcome.as_ref(), false, message)
            }
            CommitOutcome::Failed { message } => {
                self.audit.emit(
                    audit
                        .event("commit.failed", AuditCategory::Commit, AuditOutcome::Failed)
                        .with_metadata("intent", draft.intent().as_str()),
                );
                Resolution { success: false, message, next_intent: draft.intent(), keep_draft: true }
            }
        };
        Ok(resolution)
    }

    /// Resolves the session's pending draft and records the outcome on the session.
    pub async fn resolve_for_session(
        &self,
        decision: PendingDecision,
        session: &mut ConversationSession,
        user: &UserIdentity,
    ) -> Result<Resolution, OrchestratorError> {
        let resolution =
            self.resolve_pending_action(decision, session.pending_draft.as_ref(), user).await?;

        session.active_intent = Some(resolution.next_intent);
        if !resolution.keep_draft {
            session.clear_pending();
        }
        session.push(ChatMessage::assistant(resolution.message.clone()));
        session.trim_history(self.history_window);
        Ok(resolution)
    }
}

