use axum::{
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use thiserror::Error;
use tower_sessions::session;

use super::DEFAULT_LOGIN_PATH;

#[derive(Debug, Error)]
pub enum GateError {
    #[error("The request does not carry an authenticated session")]
    Unauthenticated,

    #[error("The session does not have the required access level")]
    Forbidden,

    #[error("The session layer was not installed in front of the gate")]
    MissingSession,

    #[error("The session could not be read. Reason: {0}")]
    Session(#[from] session::Error),
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        match self {
            GateError::Unauthenticated => Redirect::to(DEFAULT_LOGIN_PATH).into_response(),
            GateError::Forbidden => (StatusCode::FORBIDDEN, "Access denied").into_response(),
            GateError::MissingSession | GateError::Session(_) => {
                tracing::error!(error = %self, "unable to evaluate session.");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}
