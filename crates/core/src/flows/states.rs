use serde::{Deserialize, Serialize};

use crate::domain::intent::IntentLabel;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouterState {
    NoActiveIntent,
    Active(IntentLabel),
}

impl RouterState {
    pub fn from_session(active_intent: Option<IntentLabel>) -> Self {
        active_intent.map_or(Self::NoActiveIntent, Self::Active)
    }

    pub fn active_intent(self) -> Option<IntentLabel> {
        match self {
            Self::NoActiveIntent => None,
            Self::Active(label) => Some(label),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouterEvent {
    ContinuationConfirmed,
    ContinuationRejected,
    IntentClassified(IntentLabel),
    CompoundRequestDetected,
    DraftAccepted,
    DraftDenied,
    /// A read-only request was answered without collecting a draft.
    LookupAnswered,
    CredentialsRejected,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouterAction {
    DiscardDraft,
    MergeDraft(IntentLabel),
    ReplyConversationally,
    RunAgent,
    CommitDraft,
    PromptReauthentication,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: RouterState,
    pub to: RouterState,
    pub event: RouterEvent,
    pub actions: Vec<RouterAction>,
}

impl TransitionOutcome {
    pub fn discards_draft(&self) -> bool {
        self.actions.contains(&RouterAction::DiscardDraft)
    }
}
