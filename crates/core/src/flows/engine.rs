use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use crate::domain::intent::IntentLabel;
use crate::flows::states::{RouterAction, RouterEvent, RouterState, TransitionOutcome};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RouterTransitionError {
    #[error("invalid router transition from {state:?} using event {event:?}")]
    InvalidTransition { state: RouterState, event: RouterEvent },
}

/// Deterministic routing state machine for one conversation.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConversationFlow;

impl ConversationFlow {
    pub fn initial_state(&self) -> RouterState {
        RouterState::NoActiveIntent
    }

    pub fn apply(
        &self,
        current: &RouterState,
        event: &RouterEvent,
    ) -> Result<TransitionOutcome, RouterTransitionError> {
        transition(current, event)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &RouterState,
        event: &RouterEvent,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, RouterTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    audit
                        .event(
                            "router.transition_applied",
                            AuditCategory::Routing,
                            AuditOutcome::Success,
                        )
                        .with_metadata("from", format!("{:?}", outcome.from))
                        .with_metadata("to", format!("{:?}", outcome.to))
                        .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    audit
                        .event(
                            "router.transition_rejected",
                            AuditCategory::Routing,
                            AuditOutcome::Rejected,
                        )
                        .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

fn transition(
    current: &RouterState,
    event: &RouterEvent,
) -> Result<TransitionOutcome, RouterTransitionError> {
    use RouterAction::{
        CommitDraft, DiscardDraft, MergeDraft, PromptReauthentication, ReplyConversationally,
        RunAgent,
    };
    use RouterEvent::{
        CompoundRequestDetected, ContinuationConfirmed, ContinuationRejected, CredentialsRejected,
        DraftAccepted, DraftDenied, IntentClassified, LookupAnswered,
    };
    use RouterState::{Active, NoActiveIntent};

    let general = Active(IntentLabel::General);
    let (to, actions) = match (*current, *event) {
        (Active(IntentLabel::General), ContinuationConfirmed) => {
            (general, vec![ReplyConversationally])
        }
        (Active(label), ContinuationConfirmed) => (Active(label), vec![MergeDraft(label)]),
        (Active(_), ContinuationRejected) => (NoActiveIntent, vec![DiscardDraft]),
        (NoActiveIntent, IntentClassified(IntentLabel::General)) => {
            (general, vec![ReplyConversationally])
        }
        (NoActiveIntent, IntentClassified(label)) => (Active(label), vec![MergeDraft(label)]),
        (NoActiveIntent, CompoundRequestDetected) => (general, vec![RunAgent]),
        (Active(label), DraftAccepted) if label.is_actionable() => {
            (general, vec![CommitDraft, DiscardDraft])
        }
        (Active(label), DraftDenied) if label.is_actionable() => (general, vec![DiscardDraft]),
        (Active(label), LookupAnswered) if label.is_actionable() => (general, vec![DiscardDraft]),
        (_, CredentialsRejected) => (general, vec![DiscardDraft, PromptReauthentication]),
        _ => {
            return Err(RouterTransitionError::InvalidTransition {
                state: *current,
                event: *event,
            });
        }
    };

    Ok(TransitionOutcome { from: *current, to, event: *event, actions })
}

#[cfg(test)]
mod tests {
    use crate::audit::{AuditContext, InMemoryAuditSink};
    use crate::domain::intent::IntentLabel;
    use crate::domain::session::SessionId;
    use crate::flows::engine::{ConversationFlow, RouterTransitionError};
    use crate::flows::states::{RouterAction, RouterEvent, RouterState};

    #[test]
    fn slot_filling_path_reaches_commit() {
        let flow = ConversationFlow;
        let mut state = flow.initial_state();

        let classified = flow
            .apply(&state, &RouterEvent::IntentClassified(IntentLabel::Schedule))
            .expect("classify schedule");
        assert_eq!(classified.actions, vec![RouterAction::MergeDraft(IntentLabel::Schedule)]);
        state = classified.to;

        state = flow
            .apply(&state, &RouterEvent::ContinuationConfirmed)
            .expect("continue schedule")
            .to;
        assert_eq!(state, RouterState::Active(IntentLabel::Schedule));

        let accepted = flow.apply(&state, &RouterEvent::DraftAccepted).expect("accept");
        assert_eq!(accepted.to, RouterState::Active(IntentLabel::General));
        assert_eq!(accepted.actions, vec![RouterAction::CommitDraft, RouterAction::DiscardDraft]);
    }

    #[test]
    fn exit_always_discards_the_draft() {
        let flow = ConversationFlow;
        for label in IntentLabel::ALL {
            let outcome = flow
                .apply(&RouterState::Active(label), &RouterEvent::ContinuationRejected)
                .expect("exit is valid from any active intent");
            assert_eq!(outcome.to, RouterState::NoActiveIntent);
            assert!(outcome.discards_draft());
        }
    }

    #[test]
    fn general_continuation_replies_conversationally() {
        let outcome = ConversationFlow
            .apply(&RouterState::Active(IntentLabel::General), &RouterEvent::ContinuationConfirmed)
            .expect("general continues");
        assert_eq!(outcome.actions, vec![RouterAction::ReplyConversationally]);
    }

    #[test]
    fn compound_request_runs_agent_from_idle_only() {
        let flow = ConversationFlow;
        let outcome = flow
            .apply(&RouterState::NoActiveIntent, &RouterEvent::CompoundRequestDetected)
            .expect("idle -> agent");
        assert_eq!(outcome.actions, vec![RouterAction::RunAgent]);

        let error = flow
            .apply(&RouterState::Active(IntentLabel::Email), &RouterEvent::CompoundRequestDetected)
            .expect_err("active intent must exit first");
        assert!(matches!(error, RouterTransitionError::InvalidTransition { .. }));
    }

    #[test]
    fn accepting_without_actionable_intent_is_rejected() {
        let flow = ConversationFlow;
        assert!(flow.apply(&RouterState::NoActiveIntent, &RouterEvent::DraftAccepted).is_err());
        assert!(flow
            .apply(&RouterState::Active(IntentLabel::General), &RouterEvent::DraftAccepted)
            .is_err());
    }

    #[test]
    fn credential_rejection_resets_to_general() {
        let outcome = ConversationFlow
            .apply(&RouterState::Active(IntentLabel::Schedule), &RouterEvent::CredentialsRejected)
            .expect("credential failure is recoverable");
        assert_eq!(outcome.to, RouterState::Active(IntentLabel::General));
        assert!(outcome.actions.contains(&RouterAction::PromptReauthentication));
    }

    #[test]
    fn answered_lookup_returns_to_general() {
        let flow = ConversationFlow;
        let outcome = flow
            .apply(&RouterState::Active(IntentLabel::Email), &RouterEvent::LookupAnswered)
            .expect("lookup from an actionable intent");
        assert_eq!(outcome.to, RouterState::Active(IntentLabel::General));
        assert!(outcome.discards_draft());

        assert!(flow.apply(&RouterState::NoActiveIntent, &RouterEvent::LookupAnswered).is_err());
    }

    #[test]
    fn transitions_emit_audit_events() {
        let flow = ConversationFlow;
        let sink = InMemoryAuditSink::default();
        let audit = AuditContext::new(Some(SessionId::new("s-9")), None, "req-42", "router");

        let _ = flow
            .apply_with_audit(
                &RouterState::NoActiveIntent,
                &RouterEvent::IntentClassified(IntentLabel::Todo),
                &sink,
                &audit,
            )
            .expect("transition should succeed");
        let _ = flow.apply_with_audit(
            &RouterState::NoActiveIntent,
            &RouterEvent::DraftDenied,
            &sink,
            &audit,
        );

        let events = sink.event_types();
        assert_eq!(events, vec!["router.transition_applied", "router.transition_rejected"]);
        assert_eq!(sink.events()[0].correlation_id, "req-42");
    }
}
