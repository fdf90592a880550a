pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod providers;

pub use domain::draft::{Draft, DraftField};
pub use domain::intent::IntentLabel;
pub use domain::session::{ChatMessage, ConversationSession, Role, SessionId, UserIdentity};
pub use errors::{ApplicationError, CredentialError, DomainError, GatewayError, ProviderError};
pub use flows::{ConversationFlow, RouterAction, RouterEvent, RouterState, TransitionOutcome};
