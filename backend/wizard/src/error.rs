use catalog::CatalogError;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WizardError {
    #[error("{0}")]
    Validation(String),

    #[error("Identity verification in progress")]
    VerificationInProgress,

    #[error("Catalog error: {0}")]
    Provider(#[from] CatalogError),

    #[error("OTP error: {0}")]
    Otp(#[from] OtpError),

    #[error("Corrupted session: {0}")]
    StateCorruption(String),

    #[error("No active voter session")]
    Unauthenticated,

    #[error("Vote submission in progress")]
    SubmissionInProgress,

    #[error("Vote already cast")]
    AlreadySubmitted,

    #[error("Discarded response for an outdated selection")]
    Stale,

    #[error("Session store error: {0}")]
    Store(#[from] StoreError),

    #[error("Vote submission failed: {0}")]
    Submission(String),
}

impl WizardError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::VerificationInProgress => ErrorKind::Validation,
            Self::Provider(_) => ErrorKind::Provider,
            Self::Otp(_) => ErrorKind::Otp,
            Self::StateCorruption(_) => ErrorKind::StateCorruption,
            Self::Unauthenticated
            | Self::SubmissionInProgress
            | Self::AlreadySubmitted
            | Self::Stale => ErrorKind::Session,
            Self::Store(_) => ErrorKind::Store,
            Self::Submission(_) => ErrorKind::Submission,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Provider(_) | Self::Submission(_) | Self::Store(_)
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OtpError {
    #[error("invalid code")]
    InvalidCode,

    #[error("no code has been sent")]
    NotSent,

    #[error("too many attempts, request a new code")]
    AttemptsExhausted,

    #[error("code expired, request a new code")]
    Expired,

    #[error("delivery failed: {0}")]
    Delivery(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unreadable session {session_id}: {reason}")]
    Corrupt { session_id: String, reason: String },

    #[error("Invalid session id: {0}")]
    InvalidKey(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Provider,
    Otp,
    StateCorruption,
    Session,
    Store,
    Submission,
}

/// Inline message shown to the voter for the last failed action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl From<&WizardError> for Notice {
    fn from(err: &WizardError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}
