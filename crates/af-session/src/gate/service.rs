use std::task::{Context, Poll};

use axum::{
    body::Body,
    extract::{OriginalUri, Request},
    http::Uri,
    response::{IntoResponse, Redirect},
};
use futures_util::future::BoxFuture;
use tower_sessions::Session;

use crate::context::SessionContext;

use super::{authorize, error::GateError, layer::AuthGateLayer};

#[derive(Clone)]
pub struct AuthGateService<S> {
    inner: S,
    layer: AuthGateLayer,
}

impl<S> AuthGateService<S> {
    pub fn new(inner: S, layer: &AuthGateLayer) -> Self {
        Self { inner, layer: layer.clone() }
    }
}

impl<S> tower::Service<Request<Body>> for AuthGateService<S>
where
    S: tower::Service<Request<Body>, Response = axum::response::Response> + Send + Clone + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<Body>) -> Self::Future {
        let mut inner = self.inner.clone();
        let layer = self.layer.clone();
        Box::pin(async move {
            let Some(session) = request.extensions().get::<Session>().cloned() else {
                return Ok(GateError::MissingSession.into_response());
            };
            let context = match SessionContext::load(&session).await {
                Ok(context) => context,
                Err(err) => return Ok(GateError::from(err).into_response()),
            };

            match authorize(&context, layer.requirement) {
                Ok(()) => {
                    request.extensions_mut().insert(context);
                    inner.call(request).await
                }
                Err(GateError::Unauthenticated) => {
                    let uri = match request.extensions().get::<OriginalUri>() {
                        Some(OriginalUri(uri)) => uri.clone(),
                        None => request.uri().clone(),
                    };
                    tracing::debug!(%uri, "anonymous request redirected to login");
                    Ok(Redirect::to(&login_location(&layer.login_path, &uri)).into_response())
                }
                Err(err) => {
                    tracing::debug!(?err, requirement = ?layer.requirement, "request rejected by gate");
                    Ok(err.into_response())
                }
            }
        })
    }
}

fn login_location(login_path: &str, uri: &Uri) -> String {
    let next = uri.path_and_query().map(|path_and_query| path_and_query.as_str()).unwrap_or("/");
    format!("{login_path}?next={}", urlencoding::encode(next))
}
