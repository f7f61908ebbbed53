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
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_sessions::Session;

use crate::{
    application::{
        notebook::{self, NotebookOwner, NotebookUseCase},
        Application,
    },
    domain::notebook::{NotebookRejection, NotebookRequest},
    server::{
        page::Page,
        response::{HandlerError, HandlerResult, IntoHandlerResult, Outcome, PageForm},
    },
};

pub(crate) fn router(application: Arc<Application>) -> Router {
    Router::new()
        .route("/jupyterlab", get(handle_jupyterlab))
        .route("/jupyterlab/get_notebooks", get(handle_get_notebooks))
        .route("/jupyterlab/configure", get(handle_configure))
        .route("/jupyterlab/deploy", post(handle_deploy))
        .route("/jupyterlab/remove/:notebook", get(handle_remove))
        .route("/kibana", get(handle_kibana))
        .route_layer(AuthGateLayer::require(AccessLevel::Member))
        .with_state(application)
}

async fn handle_jupyterlab(session: Session) -> Page {
    Page::new("jupyterlab.html", "JupyterLab").for_session(&session).await
}

#[debug_handler]
async fn handle_get_notebooks(
    State(application): State<Arc<Application>>,
    Extension(context): Extension<SessionContext>,
) -> HandlerResult<impl IntoResponse> {
    let notebooks = application
        .notebook()
        .list_user(context.unix_name_or_empty())
        .await
        .or_json(json!({ "notebooks": [], "error": "There was an error getting user notebooks." }))?;

    Ok(Json(json!({ "notebooks": notebooks })))
}

#[debug_handler]
async fn handle_configure(
    State(application): State<Arc<Application>>,
    session: Session,
    Extension(context): Extension<SessionContext>,
) -> HandlerResult<Page> {
    let notebooks = application.notebook();
    let notebook_name = notebooks.generate_name(context.unix_name_or_empty()).await.or_page()?;

    Ok(Page::new("jupyterlab_form.html", "Configure notebook")
        .with("notebook_name", notebook_name)
        .with("policy", notebooks.policy())
        .for_session(&session)
        .await)
}

/// Raw deploy form. Numbers stay text until parsed so a typo is flashed back as a rejection.
#[derive(Deserialize, Debug)]
struct DeployForm {
    #[serde(rename = "notebook-name")]
    notebook_name: String,
    cpu: String,
    memory: String,
    gpu: String,
    #[serde(rename = "gpu-memory", default)]
    gpu_memory: String,
    image: String,
    duration: String,
}

fn parse_number(field: &'static str, value: &str) -> Result<u32, NotebookRejection> {
    value.trim().parse().map_err(|_| NotebookRejection::InvalidNumber { field })
}

impl TryFrom<DeployForm> for NotebookRequest {
    type Error = NotebookRejection;

    fn try_from(value: DeployForm) -> Result<Self, Self::Error> {
        let gpu_memory =
            if value.gpu_memory.trim().is_empty() { 0 } else { parse_number("gpu-memory", &value.gpu_memory)? };

        Ok(Self {
            name: value.notebook_name.trim().to_owned(),
            cpu: parse_number("cpu", &value.cpu)?,
            memory: parse_number("memory", &value.memory)?,
            gpu: parse_number("gpu", &value.gpu)?,
            gpu_memory,
            image: value.image,
            duration: parse_number("duration", &value.duration)?,
        })
    }
}

#[debug_handler]
async fn handle_deploy(
    State(application): State<Arc<Application>>,
    session: Session,
    Extension(context): Extension<SessionContext>,
    PageForm(form): PageForm<DeployForm>,
) -> HandlerResult<Redirect> {
    let owner = NotebookOwner { unix_name: context.unix_name_or_empty().to_owned(), subject: context.subject };
    let deployed = match NotebookRequest::try_from(form) {
        Ok(request) => application.notebook().deploy(request, &owner).await,
        Err(rejection) => Err(rejection.into()),
    };

    match deployed {
        Ok(_) => Ok(Redirect::to("/jupyterlab")),
        Err(e) if e.is_rejection() => {
            push_flash(&session, Flash::warning(e.to_string())).await.or_page()?;
            Ok(Redirect::to("/jupyterlab/configure"))
        }
        Err(e) => Err(HandlerError::Page(e.into())),
    }
}

#[debug_handler]
async fn handle_remove(
    State(application): State<Arc<Application>>,
    Extension(context): Extension<SessionContext>,
    Path(notebook): Path<String>,
) -> HandlerResult<Json<Outcome>> {
    match application.notebook().remove(&notebook, context.unix_name_or_empty()).await {
        Ok(()) => Ok(Outcome::succeeded(format!("Notebook {notebook} was deleted."))),
        Err(notebook::Error::NotOwner { .. } | notebook::Error::NotebookNotFound { .. }) => Ok(Outcome::of(false)),
        Err(e) => Err(e).or_json(json!({ "success": false })),
    }
}

#[debug_handler]
async fn handle_kibana(
    State(application): State<Arc<Application>>,
    session: Session,
    Extension(context): Extension<SessionContext>,
) -> HandlerResult<Page> {
    let notebooks = application.notebook().list_user(context.unix_name_or_empty()).await.or_page()?;

    Ok(Page::new("kibana_user.html", "Monitoring").with("notebooks", notebooks).for_session(&session).await)
}

#[cfg(test)]
mod test {
    use super::DeployForm;
    use crate::domain::notebook::{NotebookRejection, NotebookRequest};

    fn form() -> DeployForm {
        DeployForm {
            notebook_name: " jdoe-notebook-1 ".to_owned(),
            cpu: "4".to_owned(),
            memory: "8".to_owned(),
            gpu: "1".to_owned(),
            gpu_memory: "40536".to_owned(),
            image: "ml-platform:latest".to_owned(),
            duration: "12".to_owned(),
        }
    }

    #[test]
    fn deploy_form_is_parsed_into_request() {
        let request = NotebookRequest::try_from(form()).expect("parsing form should be successful");

        assert_eq!(request.name, "jdoe-notebook-1");
        assert_eq!((request.cpu, request.memory, request.gpu, request.gpu_memory), (4, 8, 1, 40536));
        assert_eq!(request.duration, 12);
    }

    #[test]
    fn when_number_is_malformed_then_field_is_named() {
        let result = NotebookRequest::try_from(DeployForm { memory: "eight".to_owned(), ..form() });

        assert_eq!(result, Err(NotebookRejection::InvalidNumber { field: "memory" }));
    }

    #[test]
    fn when_gpu_memory_is_blank_then_hint_is_dropped() {
        let request = NotebookRequest::try_from(DeployForm { gpu_memory: String::new(), ..form() }).unwrap();

        assert_eq!(request.gpu_memory, 0);
    }
}
