pub mod engine;
pub mod states;

pub use engine::{ConversationFlow, RouterTransitionError};
pub use states::{RouterAction, RouterEvent, RouterState, TransitionOutcome};
