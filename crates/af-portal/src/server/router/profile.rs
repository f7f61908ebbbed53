use std::sync::Arc;

use af_session::{
    flash::{push_flash, Flash},
    gate::AuthGateLayer,
    AccessLevel, SessionContext,
};
use axum::{
    debug_handler,
    extract::{Path, State},
    response::{IntoResponse, Redirect},
    routing::get,
    Extension, Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_sessions::Session;

use crate::{
    application::{profile::ProfileUseCase, Application},
    domain::directory::ProfileUpdate,
    server::{
        page::Page,
        response::{HandlerResult, IntoHandlerResult, PageForm},
    },
};

pub(crate) fn router(application: Arc<Application>) -> Router {
    Router::new()
        .route("/profile", get(handle_profile))
        .route("/profile/edit", get(handle_edit_profile_form).post(handle_edit_profile))
        .route("/profile/groups", get(handle_user_groups))
        .route("/profile/get_user_groups", get(handle_get_user_groups))
        .route("/profile/request_membership/:unix_name", get(handle_request_membership))
        .route_layer(AuthGateLayer::require(AccessLevel::Authenticated))
        .with_state(application)
}

#[debug_handler]
async fn handle_profile(
    State(application): State<Arc<Application>>,
    session: Session,
    Extension(context): Extension<SessionContext>,
) -> HandlerResult<Page> {
    let profile = application.profile().get(context.unix_name_or_empty()).await.or_page()?;

    Ok(Page::new("profile.html", "Profile").with("profile", profile).for_session(&session).await)
}

#[debug_handler]
async fn handle_edit_profile_form(
    State(application): State<Arc<Application>>,
    session: Session,
    Extension(context): Extension<SessionContext>,
) -> HandlerResult<Page> {
    let profile = application.profile().get(context.unix_name_or_empty()).await.or_page()?;

    Ok(Page::new("edit_profile.html", "Edit profile").with("profile", profile).for_session(&session).await)
}

#[derive(Deserialize, Debug)]
struct EditProfileForm {
    name: String,
    phone: String,
    institution: String,
    email: String,
    #[serde(rename = "X.509_DN")]
    x509_dn: String,
    public_key: String,
}

impl From<EditProfileForm> for ProfileUpdate {
    fn from(value: EditProfileForm) -> Self {
        Self {
            name: Some(value.name),
            phone: Some(value.phone),
            institution: Some(value.institution),
            email: Some(value.email),
            x509_dn: Some(value.x509_dn),
            public_key: Some(value.public_key),
        }
    }
}

#[debug_handler]
async fn handle_edit_profile(
    State(application): State<Arc<Application>>,
    Extension(context): Extension<SessionContext>,
    PageForm(form): PageForm<EditProfileForm>,
) -> HandlerResult<Redirect> {
    application.profile().update(context.unix_name_or_empty(), form.into()).await.or_page()?;

    Ok(Redirect::to("/profile"))
}

async fn handle_user_groups(session: Session) -> Page {
    Page::new("user_groups.html", "Groups").for_session(&session).await
}

#[debug_handler]
async fn handle_get_user_groups(
    State(application): State<Arc<Application>>,
    Extension(context): Extension<SessionContext>,
) -> HandlerResult<impl IntoResponse> {
    let groups = application
        .profile()
        .groups(context.unix_name_or_empty())
        .await
        .or_json(json!({ "groups": [], "error": "There was an error getting user groups." }))?;

    Ok(Json(json!({ "groups": groups })))
}

#[debug_handler]
async fn handle_request_membership(
    State(application): State<Arc<Application>>,
    session: Session,
    Extension(context): Extension<SessionContext>,
    Path(unix_name): Path<String>,
) -> HandlerResult<Redirect> {
    let portal_group = &application.settings().portal_group;
    let requested = unix_name == context.unix_name_or_empty()
        && application.profile().request_membership(&unix_name).await.or_page()?;

    let flash = if requested {
        Flash::success(format!("Requested membership in the {portal_group} group"))
    } else {
        Flash::warning(format!("Unable to request membership in the {portal_group} group"))
    };
    push_flash(&session, flash).await.or_page()?;

    Ok(Redirect::to("/profile"))
}
