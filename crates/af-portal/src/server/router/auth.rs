use std::sync::Arc;

use af_session::{gate::AuthGateLayer, redirect::resolve_safe_redirect, AccessLevel, SessionContext};
use anyhow::anyhow;
use axum::{
    debug_handler,
    extract::State,
    http::{header::REFERER, HeaderMap},
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Extension, Router,
};
use rand::{distributions::Alphanumeric, Rng};
use serde::Deserialize;
use tower_sessions::Session;
use url::Url;

use crate::{
    application::{
        identity::{IdentityUseCase, LoginTarget},
        Application,
    },
    server::response::{HandlerError, HandlerResult, IntoHandlerResult, PageQuery},
};

const OAUTH_STATE_KEY: &str = "oauth_state";
const LOGIN_TARGET_KEY: &str = "login_target";
const OAUTH_STATE_LENGTH: usize = 32;

pub(crate) fn router(application: Arc<Application>) -> Router {
    let authenticated = Router::new()
        .route("/logout", get(handle_logout))
        .route_layer(AuthGateLayer::require(AccessLevel::Authenticated));

    Router::new().route("/login", get(handle_login)).merge(authenticated).with_state(application)
}

#[derive(Deserialize, Debug, Default)]
struct LoginQuery {
    code: Option<String>,
    state: Option<String>,
    next: Option<String>,
    signup: Option<String>,
}

fn generate_oauth_state() -> String {
    rand::thread_rng().sample_iter(&Alphanumeric).take(OAUTH_STATE_LENGTH).map(char::from).collect()
}

fn login_redirect_uri(application: &Application) -> anyhow::Result<Url> {
    Ok(application.settings().base_url.join("login")?)
}

#[debug_handler]
async fn handle_login(
    State(application): State<Arc<Application>>,
    session: Session,
    headers: HeaderMap,
    PageQuery(query): PageQuery<LoginQuery>,
) -> HandlerResult<Response> {
    let redirect_uri = login_redirect_uri(&application).or_page()?;

    let Some(code) = query.code else {
        let referrer = headers.get(REFERER).and_then(|value| value.to_str().ok());
        let target = resolve_safe_redirect(&application.settings().base_url, query.next.as_deref(), referrer);
        let state = generate_oauth_state();

        session.insert(OAUTH_STATE_KEY, &state).await.or_page()?;
        session.insert(LOGIN_TARGET_KEY, &target).await.or_page()?;

        let login_target = match query.signup.as_deref() {
            Some(signup) if !signup.is_empty() => LoginTarget::Signup,
            _ => LoginTarget::Next(target),
        };
        let authorization_url =
            application.identity().authorization_url(&redirect_uri, &state, &login_target).or_page()?;
        return Ok(Redirect::to(authorization_url.as_str()).into_response());
    };

    let expected_state: Option<String> = session.remove(OAUTH_STATE_KEY).await.or_page()?;
    if expected_state.is_none() || expected_state != query.state {
        return Err(HandlerError::BadRequest(anyhow!("login callback state does not match the session")));
    }

    let context = application.identity().complete_login(&code, &redirect_uri).await.or_page()?;
    let target: Option<String> = session.remove(LOGIN_TARGET_KEY).await.or_page()?;

    session.cycle_id().await.or_page()?;
    context.save(&session).await.or_page()?;

    Ok(Redirect::to(target.as_deref().unwrap_or("/")).into_response())
}

#[debug_handler]
async fn handle_logout(
    State(application): State<Arc<Application>>,
    session: Session,
    Extension(context): Extension<SessionContext>,
) -> HandlerResult<Redirect> {
    let logout_url = application.identity().logout(&context).await.or_page()?;
    SessionContext::clear(&session).await.or_page()?;

    Ok(Redirect::to(logout_url.as_str()))
}
