use std::sync::Arc;

use axum::{debug_handler, extract::State, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use tower_sessions::Session;

use crate::{
    application::{notebook::NotebookUseCase, Application},
    server::{
        page::Page,
        response::{HandlerResult, IntoHandlerResult},
    },
};

pub(crate) fn router(application: Arc<Application>) -> Router {
    Router::new()
        .route("/", get(handle_home))
        .route("/about", get(handle_about))
        .route("/hardware", get(handle_hardware))
        .route("/hardware/gpus", get(handle_get_gpus))
        .route("/signup", get(handle_signup))
        .route("/aup", get(handle_aup))
        .with_state(application)
}

async fn handle_home(session: Session) -> Page {
    Page::new("home.html", "Home").for_session(&session).await
}

async fn handle_about(session: Session) -> Page {
    Page::new("about.html", "About").for_session(&session).await
}

async fn handle_hardware(session: Session) -> Page {
    Page::new("hardware.html", "Hardware").for_session(&session).await
}

async fn handle_signup(session: Session) -> Page {
    Page::new("signup.html", "Sign up").for_session(&session).await
}

async fn handle_aup(session: Session) -> Page {
    Page::new("aup.html", "Acceptable use policy").for_session(&session).await
}

#[debug_handler]
async fn handle_get_gpus(State(application): State<Arc<Application>>) -> HandlerResult<impl IntoResponse> {
    let gpus = application
        .notebook()
        .gpu_products()
        .await
        .or_json(json!({ "gpus": [], "error": "There was an error getting GPU product information." }))?;

    Ok(Json(json!({ "gpus": gpus })))
}
