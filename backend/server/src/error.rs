use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use wizard::{ErrorKind, WizardError};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Unknown session {0}")]
    UnknownSession(String),

    #[error(transparent)]
    Wizard(#[from] WizardError),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::UnknownSession(_) => StatusCode::NOT_FOUND,
            AppError::Wizard(WizardError::Unauthenticated) => StatusCode::UNAUTHORIZED,
            AppError::Wizard(e) => match e.kind() {
                ErrorKind::Validation => StatusCode::BAD_REQUEST,
                ErrorKind::Otp => StatusCode::UNPROCESSABLE_ENTITY,
                ErrorKind::Provider => StatusCode::SERVICE_UNAVAILABLE,
                ErrorKind::Session | ErrorKind::StateCorruption => StatusCode::CONFLICT,
                ErrorKind::Submission => StatusCode::BAD_GATEWAY,
                ErrorKind::Store => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}
