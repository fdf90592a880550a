use thiserror::Error;

use crate::{domain::intent::IntentLabel, flows::RouterTransitionError};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    RouterTransition(#[from] RouterTransitionError),
    #[error("cannot merge a {found} draft into a {expected} draft")]
    DraftIntentMismatch { expected: IntentLabel, found: IntentLabel },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Failure reported by the completion gateway.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("completion timed out after {after_secs}s")]
    Timeout { after_secs: u64 },
    #[error("completion transport failure: {0}")]
    Transport(String),
    #[error("completion endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("completion returned no content")]
    EmptyResponse,
    #[error("completion gateway misconfigured: {0}")]
    Configuration(String),
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout { .. } => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::EmptyResponse | Self::Configuration(_) => false,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("credentials for `{user_id}` have expired")]
    Expired { user_id: String },
    #[error("credentials for `{user_id}` were revoked")]
    Revoked { user_id: String },
    #[error("no credentials stored for `{user_id}`")]
    NotFound { user_id: String },
    #[error("credential store unavailable: {0}")]
    Unavailable(String),
}

/// Failure reported by a calendar, email, todo or plan collaborator.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider rejected credentials: {0}")]
    Unauthorized(String),
    #[error("provider resource not found: {0}")]
    NotFound(String),
    #[error("provider call timed out after {after_secs}s")]
    Timeout { after_secs: u64 },
    #[error("provider call failed: {0}")]
    Failed(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl ApplicationError {
    /// Fixed text that is safe to show in a chat reply.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Domain(_) => "I couldn't apply that request. Could you rephrase it?",
            Self::Gateway(_) => {
                "Sorry, I'm having trouble thinking right now. Please try again in a moment."
            }
            Self::Credential(_) | Self::Provider(ProviderError::Unauthorized(_)) => {
                "Your account connection has expired. Please re-authenticate and try again."
            }
            Self::Provider(_) | Self::Persistence(_) => {
                "Sorry, I couldn't complete that action. Please try again shortly."
            }
            Self::Configuration(_) => "An unexpected internal error occurred.",
        }
    }

    pub fn requires_reauthentication(&self) -> bool {
        matches!(self, Self::Credential(_) | Self::Provider(ProviderError::Unauthorized(_)))
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{
        ApplicationError, CredentialError, DomainError, GatewayError, ProviderError,
    };

    #[test]
    fn credential_failures_ask_for_reauthentication() {
        let error = ApplicationError::from(CredentialError::Expired { user_id: "u-1".to_owned() });

        assert!(error.requires_reauthentication());
        assert_eq!(
            error.user_message(),
            "Your account connection has expired. Please re-authenticate and try again."
        );
    }

    #[test]
    fn unauthorized_provider_is_treated_like_a_credential_failure() {
        let error = ApplicationError::from(ProviderError::Unauthorized("401".to_owned()));
        assert!(error.requires_reauthentication());
    }

    #[test]
    fn gateway_failure_has_user_safe_message() {
        let error = ApplicationError::from(GatewayError::Timeout { after_secs: 30 });

        assert!(!error.requires_reauthentication());
        assert!(!error.user_message().contains("30"));
    }

    #[test]
    fn domain_error_does_not_leak_internal_detail() {
        let error = ApplicationError::from(DomainError::InvariantViolation(
            "draft missing tag".to_owned(),
        ));
        assert!(!error.user_message().contains("tag"));
    }

    #[test]
    fn retryable_gateway_errors_are_transient_ones() {
        assert!(GatewayError::Transport("reset".to_owned()).is_retryable());
        assert!(GatewayError::Status { status: 503, body: String::new() }.is_retryable());
        assert!(GatewayError::Status { status: 429, body: String::new() }.is_retryable());
        assert!(!GatewayError::Status { status: 400, body: String::new() }.is_retryable());
        assert!(!GatewayError::EmptyResponse.is_retryable());
    }
}
