use std::sync::Arc;

use axum::{response::IntoResponse, routing::get, Router};
use tower_http::trace::TraceLayer;
use tower_sessions::{cookie::time::Duration, Expiry, MemoryStore, SessionManagerLayer};
use tracing::info;

use crate::{application::Application, config::ApplicationConfig};

mod page;
mod response;
mod router;

pub(super) struct ServerConfig {
    pub port: u16,
    pub secure_cookie: bool,
    pub inactivity_timeout_minutes: i64,
}

impl From<&ApplicationConfig> for ServerConfig {
    fn from(value: &ApplicationConfig) -> Self {
        Self {
            port: value.port,
            secure_cookie: value.session.secure_cookie,
            inactivity_timeout_minutes: value.session.inactivity_timeout_minutes,
        }
    }
}

pub(super) async fn run(application: Application, config: ServerConfig) -> anyhow::Result<()> {
    let app = app(Arc::new(application), &config);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!("starting portal server on {}", config.port);
    axum::serve(listener, app).await?;
    Ok(())
}

fn app(application: Arc<Application>, config: &ServerConfig) -> Router {
    with_layers(routes(application), config)
}

fn routes(application: Arc<Application>) -> Router {
    Router::new()
        .route("/health", get(|| async { "" }))
        .merge(router::public::router(application.clone()))
        .merge(router::auth::router(application.clone()))
        .merge(router::profile::router(application.clone()))
        .merge(router::jupyterlab::router(application.clone()))
        .merge(router::admin::router(application))
}

fn with_layers(routes: Router, config: &ServerConfig) -> Router {
    let session_layer = SessionManagerLayer::new(MemoryStore::default())
        .with_secure(config.secure_cookie)
        .with_expiry(Expiry::OnInactivity(Duration::minutes(config.inactivity_timeout_minutes)));

    routes.fallback(handle_not_found).layer(session_layer).layer(TraceLayer::new_for_http())
}

async fn handle_not_found() -> impl IntoResponse {
    response::not_found()
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use af_session::{Role, SessionContext};
    use axum::{
        body::{to_bytes, Body},
        extract::Path,
        http::{header, Method, Request, StatusCode},
        routing::get as get_route,
        Router,
    };
    use serde_json::json;
    use tower::ServiceExt;
    use tower_sessions::Session;
    use url::Url;

    use super::{routes, with_layers, ServerConfig};
    use crate::{
        application::{identity::test::settings, Application},
        domain::{
            directory::MockDirectoryService,
            identity::MockIdentityProvider,
            mail::MockMailService,
            notebook::{MockClusterService, Notebook, NotebookPolicy},
        },
    };

    fn config() -> ServerConfig {
        ServerConfig { port: 0, secure_cookie: false, inactivity_timeout_minutes: 60 }
    }

    fn policy() -> NotebookPolicy {
        NotebookPolicy {
            max_cpu: 16,
            max_memory: 32,
            max_gpu: 7,
            max_duration: 72,
            max_notebooks_per_user: 5,
            images: vec!["ml-platform:latest".to_owned()],
        }
    }

    async fn login_as(session: Session, Path((unix_name, role)): Path<(String, String)>) -> &'static str {
        let mut context = SessionContext { is_authenticated: true, ..Default::default() };
        context.resolve(unix_name, Role::from(role.as_str()));
        context.save(&session).await.unwrap();
        ""
    }

    fn app(cluster_service: MockClusterService) -> Router {
        app_with(MockIdentityProvider::new(), MockDirectoryService::new(), cluster_service)
    }

    fn app_with(
        identity_provider: MockIdentityProvider,
        directory_service: MockDirectoryService,
        cluster_service: MockClusterService,
    ) -> Router {
        let application = Application::with_services(
            settings(),
            policy(),
            Arc::new(identity_provider),
            Arc::new(directory_service),
            Arc::new(cluster_service),
            Arc::new(MockMailService::new()),
        );
        let routes = routes(Arc::new(application)).route("/test-login/:unix_name/:role", get_route(login_as));

        with_layers(routes, &config())
    }

    async fn session_cookie(app: &Router, unix_name: &str, role: &str) -> String {
        let uri = format!("/test-login/{unix_name}/{role}");
        let response = app.clone().oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap()).await.unwrap();
        let set_cookie = response.headers().get(header::SET_COOKIE).expect("session cookie should be set");
        set_cookie.to_str().unwrap().split(';').next().unwrap().to_owned()
    }

    async fn get(app: Router, uri: &str, cookie: Option<&str>) -> axum::response::Response {
        let mut request = Request::builder().uri(uri);
        if let Some(cookie) = cookie {
            request = request.header(header::COOKIE, cookie);
        }
        app.oneshot(request.body(Body::empty()).unwrap()).await.unwrap()
    }

    async fn post_form(app: Router, uri: &str, cookie: &str, form: &str) -> axum::response::Response {
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::COOKIE, cookie)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form.to_owned()))
            .unwrap();
        app.oneshot(request).await.unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn health_check_answers_ok() {
        let response = get(app(MockClusterService::new()), "/health", None).await;

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_path_renders_not_found_page() {
        let response = get(app(MockClusterService::new()), "/no/such/page", None).await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8(body.to_vec()).unwrap().contains("404.html"));
    }

    #[tokio::test]
    async fn when_anonymous_user_requests_profile_then_redirected_to_login() {
        let response = get(app(MockClusterService::new()), "/profile", None).await;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers().get(header::LOCATION).unwrap(), "/login?next=%2Fprofile");
    }

    #[tokio::test]
    async fn when_member_requests_admin_page_then_access_is_denied() {
        let app = app(MockClusterService::new());
        let cookie = session_cookie(&app, "jdoe", "active").await;

        let response = get(app, "/admin/users", Some(&cookie)).await;

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn when_member_removes_notebook_of_another_user_then_removal_fails() {
        let mut cluster_service = MockClusterService::new();
        cluster_service.expect_get_notebook().returning(|name| {
            Ok(Some(Notebook { name: name.to_owned(), owner: "asmith".to_owned(), ..Default::default() }))
        });
        cluster_service.expect_remove_notebook().never();
        let app = app(cluster_service);
        let cookie = session_cookie(&app, "jdoe", "active").await;

        let response = get(app, "/jupyterlab/remove/asmith-notebook-1", Some(&cookie)).await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body, json!({ "success": false }));
    }

    #[tokio::test]
    async fn when_member_removes_own_notebook_then_removal_succeeds() {
        let mut cluster_service = MockClusterService::new();
        cluster_service.expect_get_notebook().returning(|name| {
            Ok(Some(Notebook { name: name.to_owned(), owner: "jdoe".to_owned(), ..Default::default() }))
        });
        cluster_service.expect_remove_notebook().times(1).returning(|_| Ok(()));
        let app = app(cluster_service);
        let cookie = session_cookie(&app, "jdoe", "active").await;

        let response = get(app, "/jupyterlab/remove/jdoe-notebook-1", Some(&cookie)).await;

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body, json!({ "success": true, "message": "Notebook jdoe-notebook-1 was deleted." }));
    }

    #[tokio::test]
    async fn when_cluster_fails_then_gpu_listing_answers_error_payload() {
        let mut cluster_service = MockClusterService::new();
        cluster_service.expect_list_gpu_products().returning(|| Err(anyhow::anyhow!("cluster unreachable").into()));

        let response = get(app(cluster_service), "/hardware/gpus", None).await;

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body, json!({ "gpus": [], "error": "There was an error getting GPU product information." }));
    }

    #[tokio::test]
    async fn when_profile_form_is_incomplete_then_bad_request_page_is_rendered() {
        let app = app(MockClusterService::new());
        let cookie = session_cookie(&app, "jdoe", "active").await;

        let response = post_form(app, "/profile/edit", &cookie, "name=J").await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().get(header::CONTENT_TYPE).unwrap().to_str().unwrap().starts_with("text/html"));
        let body = body_text(response).await;
        assert!(body.contains("400.html"));
        assert!(!body.contains("missing field"));
    }

    #[tokio::test]
    async fn when_deploy_exceeds_policy_then_user_is_sent_back_to_form_with_warning() {
        let mut cluster_service = MockClusterService::new();
        cluster_service.expect_create_notebook().never();
        cluster_service.expect_list_user_notebooks().returning(|_| Ok(vec![]));
        let app = app(cluster_service);
        let cookie = session_cookie(&app, "jdoe", "active").await;

        let form = "notebook-name=jdoe-notebook-1&cpu=4&memory=8&gpu=9&gpu-memory=&image=ml-platform%3Alatest&duration=12";
        let response = post_form(app.clone(), "/jupyterlab/deploy", &cookie, form).await;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers().get(header::LOCATION).unwrap(), "/jupyterlab/configure");

        let configure = get(app, "/jupyterlab/configure", Some(&cookie)).await;
        assert_eq!(configure.status(), StatusCode::OK);
        let body = body_text(configure).await;
        assert!(body.contains("<li class=\"flash flash-warning\">Requested 9 GPUs, but the allowed range is 0 to 7</li>"));
    }

    #[tokio::test]
    async fn when_group_has_no_recipients_then_email_answers_failure_payload() {
        let mut directory_service = MockDirectoryService::new();
        directory_service.expect_get_group_members().returning(|_, _| Ok(vec![]));
        let app = app_with(MockIdentityProvider::new(), directory_service, MockClusterService::new());
        let cookie = session_cookie(&app, "admin", "admin").await;

        let response = post_form(app, "/admin/email/root.atlas-af", &cookie, "subject=Maintenance&body=Friday").await;

        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body, json!({ "success": false, "message": "Unable to send email to group root.atlas-af" }));
    }

    #[tokio::test]
    async fn when_login_callback_state_does_not_match_then_code_is_never_exchanged() {
        let mut identity_provider = MockIdentityProvider::new();
        identity_provider
            .expect_authorization_url()
            .returning(|_, _, _| Ok(Url::parse("https://auth.example.org/v2/oauth2/authorize").unwrap()));
        identity_provider.expect_exchange_code().never();
        let app = app_with(identity_provider, MockDirectoryService::new(), MockClusterService::new());

        let start = get(app.clone(), "/login", None).await;
        assert_eq!(start.status(), StatusCode::SEE_OTHER);
        let set_cookie = start.headers().get(header::SET_COOKIE).expect("session cookie should be set");
        let cookie = set_cookie.to_str().unwrap().split(';').next().unwrap().to_owned();

        let response = get(app, "/login?code=abc&state=forged", Some(&cookie)).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(response).await.contains("400.html"));
    }
}
