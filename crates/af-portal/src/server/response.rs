use anyhow::anyhow;
use axum::{
    extract::{
        rejection::{FormRejection, QueryRejection},
        FromRequest, FromRequestParts,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, warn};

use super::page::Page;

/// Every way a handler can fail. Each variant has exactly one response shape,
/// and none of them carries fault details to the client.
#[derive(Debug)]
pub(crate) enum HandlerError {
    Page(anyhow::Error),
    BadRequest(anyhow::Error),
    NotFound(anyhow::Error),
    Json { error: anyhow::Error, payload: Value },
}

pub(crate) type HandlerResult<T> = Result<T, HandlerError>;

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        match self {
            HandlerError::Page(e) => {
                error!(error = %e, "unhandled error occurred.");
                (StatusCode::INTERNAL_SERVER_ERROR, Page::internal_server_error()).into_response()
            }
            HandlerError::BadRequest(e) => {
                warn!(error = %e, "malformed request rejected.");
                (StatusCode::BAD_REQUEST, Page::bad_request()).into_response()
            }
            HandlerError::NotFound(e) => {
                error!(error = %e, "requested resource not found.");
                not_found().into_response()
            }
            HandlerError::Json { error: e, payload } => {
                error!(error = %e, "unhandled error occurred.");
                Json(payload).into_response()
            }
        }
    }
}

impl From<FormRejection> for HandlerError {
    fn from(rejection: FormRejection) -> Self {
        HandlerError::BadRequest(anyhow!(rejection.body_text()))
    }
}

impl From<QueryRejection> for HandlerError {
    fn from(rejection: QueryRejection) -> Self {
        HandlerError::BadRequest(anyhow!(rejection.body_text()))
    }
}

/// `Form` that renders the bad request page when the body does not deserialize.
#[derive(FromRequest)]
#[from_request(via(axum::Form), rejection(HandlerError))]
pub(crate) struct PageForm<T>(pub T);

/// `Query` that renders the bad request page when the query string does not deserialize.
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(HandlerError))]
pub(crate) struct PageQuery<T>(pub T);

pub(crate) fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Page::not_found())
}

pub(crate) trait IntoHandlerResult<T> {
    /// Fails with the internal server error page.
    fn or_page(self) -> HandlerResult<T>;
    /// Fails with the not found page.
    fn or_not_found(self) -> HandlerResult<T>;
    /// Fails with `payload` as the JSON body.
    fn or_json(self, payload: Value) -> HandlerResult<T>;
}

impl<T, E> IntoHandlerResult<T> for Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn or_page(self) -> HandlerResult<T> {
        self.map_err(|e| HandlerError::Page(e.into()))
    }

    fn or_not_found(self) -> HandlerResult<T> {
        self.map_err(|e| HandlerError::NotFound(e.into()))
    }

    fn or_json(self, payload: Value) -> HandlerResult<T> {
        self.map_err(|e| HandlerError::Json { error: e.into(), payload })
    }
}

/// Result of an admin action.
#[derive(Serialize, Debug, PartialEq, Eq)]
pub(crate) struct Outcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Outcome {
    pub fn succeeded(message: impl Into<String>) -> Json<Self> {
        Json(Self { success: true, message: Some(message.into()) })
    }

    pub fn failed(message: impl Into<String>) -> Json<Self> {
        Json(Self { success: false, message: Some(message.into()) })
    }

    pub fn of(success: bool) -> Json<Self> {
        Json(Self { success, message: None })
    }
}
