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
        group::{self, ApprovalOutcome, GroupUseCase},
        notebook::NotebookUseCase,
        report::{self, ReportUseCase},
        Application,
    },
    domain::directory::{GroupUpdate, SubgroupRequest},
    server::{
        page::Page,
        response::{HandlerError, HandlerResult, IntoHandlerResult, Outcome, PageForm},
    },
};

use super::group_page_path;

pub(crate) fn router(application: Arc<Application>) -> Router {
    Router::new()
        .route("/admin/notebooks", get(handle_notebooks))
        .route("/admin/list_notebooks", get(handle_list_notebooks))
        .route("/admin/get_notebook/:notebook_name", get(handle_get_notebook))
        .route("/admin/users", get(handle_users))
        .route("/admin/get_user_profiles", get(handle_get_user_profiles))
        .route("/admin/update_user_institution", post(handle_update_user_institution))
        .route("/admin/plot_users_over_time", get(handle_plot_users_over_time))
        .route("/admin/kibana", get(handle_kibana))
        .route("/admin/groups/:group_name", get(handle_group))
        .route("/admin/get_group_members/:group_name", get(handle_get_group_members))
        .route("/admin/get_group_member_requests/:group_name", get(handle_get_group_member_requests))
        .route("/admin/get_subgroups/:group_name", get(handle_get_subgroups))
        .route("/admin/get_subgroup_requests/:group_name", get(handle_get_subgroup_requests))
        .route("/admin/get_potential_members/:group_name", get(handle_get_potential_members))
        .route("/admin/email/:group_name", post(handle_email_group))
        .route("/admin/add_group_member/:group_name/:unix_name", get(handle_add_group_member))
        .route("/admin/remove_group_member/:group_name/:unix_name", get(handle_remove_group_member))
        .route("/admin/approve_membership_request/:group_name/:unix_name", get(handle_approve_membership_request))
        .route("/admin/deny_membership_request/:group_name/:unix_name", get(handle_deny_membership_request))
        .route("/admin/approve_subgroup_request/:group_name/:subgroup_name", get(handle_approve_subgroup_request))
        .route("/admin/deny_subgroup_request/:group_name/:subgroup_name", get(handle_deny_subgroup_request))
        .route("/admin/edit_group/:group_name", get(handle_edit_group_form).post(handle_edit_group))
        .route("/admin/create_subgroup/:group_name", get(handle_create_subgroup_form).post(handle_create_subgroup))
        .route("/admin/delete_group/:group_name", get(handle_delete_group))
        .route("/admin/login_nodes", get(handle_login_nodes))
        .route_layer(AuthGateLayer::require(AccessLevel::Admin))
        .with_state(application)
}

async fn handle_notebooks(session: Session) -> Page {
    Page::new("notebooks.html", "Notebooks").for_session(&session).await
}

#[debug_handler]
async fn handle_list_notebooks(State(application): State<Arc<Application>>) -> HandlerResult<impl IntoResponse> {
    let notebooks = application
        .notebook()
        .list_all()
        .await
        .or_json(json!({ "notebooks": [], "error": "There was an error listing notebooks." }))?;

    Ok(Json(json!({ "notebooks": notebooks })))
}

#[debug_handler]
async fn handle_get_notebook(
    State(application): State<Arc<Application>>,
    Path(notebook_name): Path<String>,
) -> HandlerResult<impl IntoResponse> {
    let notebook = application.notebook().get(&notebook_name).await.or_json(json!({
        "notebook": null,
        "error": format!("There was an error getting notebook {notebook_name}."),
    }))?;

    Ok(Json(json!({ "notebook": notebook })))
}

async fn handle_users(session: Session) -> Page {
    Page::new("users.html", "Users").for_session(&session).await
}

#[debug_handler]
async fn handle_get_user_profiles(State(application): State<Arc<Application>>) -> HandlerResult<impl IntoResponse> {
    let users = application
        .group()
        .portal_users()
        .await
        .or_json(json!({ "error": "There was an error getting user profiles." }))?;

    Ok(Json(json!({ "users": users })))
}

#[derive(Deserialize, Debug)]
struct UpdateInstitutionForm {
    username: String,
    institution: String,
}

#[debug_handler]
async fn handle_update_user_institution(
    State(application): State<Arc<Application>>,
    PageForm(form): PageForm<UpdateInstitutionForm>,
) -> HandlerResult<Json<Outcome>> {
    application
        .group()
        .update_user_institution(&form.username, &form.institution)
        .await
        .or_json(json!({ "success": false, "message": "There was an error updating the user institution" }))?;

    Ok(Outcome::succeeded("Updated user institution"))
}

#[debug_handler]
async fn handle_plot_users_over_time(
    State(application): State<Arc<Application>>,
    session: Session,
) -> HandlerResult<Page> {
    let image = application.report().plot_users_over_time().await.or_page()?;

    Ok(Page::new("plot_users_over_time.html", "Users over time")
        .with("base64_encoded_image", image)
        .for_session(&session)
        .await)
}

#[debug_handler]
async fn handle_kibana(State(application): State<Arc<Application>>, session: Session) -> HandlerResult<Page> {
    let notebooks = application.notebook().list_all().await.or_page()?;

    Ok(Page::new("kibana_admin.html", "Monitoring").with("notebooks", notebooks).for_session(&session).await)
}

#[debug_handler]
async fn handle_group(
    State(application): State<Arc<Application>>,
    session: Session,
    Path(group_name): Path<String>,
) -> HandlerResult<Page> {
    let group = application.group().info(&group_name).await.or_not_found()?;

    Ok(Page::new("groups.html", "Group").with("group", group).for_session(&session).await)
}

#[debug_handler]
async fn handle_get_group_members(
    State(application): State<Arc<Application>>,
    Path(group_name): Path<String>,
) -> HandlerResult<impl IntoResponse> {
    let members = application
        .group()
        .members(&group_name)
        .await
        .or_json(json!({ "error": "There was an error getting member profiles." }))?;

    Ok(Json(json!({ "members": members })))
}

#[debug_handler]
async fn handle_get_group_member_requests(
    State(application): State<Arc<Application>>,
    Path(group_name): Path<String>,
) -> HandlerResult<impl IntoResponse> {
    let member_requests = application
        .group()
        .member_requests(&group_name)
        .await
        .or_json(json!({ "error": "There was an error getting member requests." }))?;

    Ok(Json(json!({ "member_requests": member_requests })))
}

#[debug_handler]
async fn handle_get_subgroups(
    State(application): State<Arc<Application>>,
    Path(group_name): Path<String>,
) -> HandlerResult<impl IntoResponse> {
    let subgroups = application
        .group()
        .subgroups(&group_name)
        .await
        .or_json(json!({ "error": "There was an error getting subgroups." }))?;

    Ok(Json(json!({ "subgroups": subgroups })))
}

#[debug_handler]
async fn handle_get_subgroup_requests(
    State(application): State<Arc<Application>>,
    Path(group_name): Path<String>,
) -> HandlerResult<impl IntoResponse> {
    let subgroup_requests = application
        .group()
        .subgroup_requests(&group_name)
        .await
        .or_json(json!({ "error": "There was an error getting subgroup requests." }))?;

    Ok(Json(json!({ "subgroup_requests": subgroup_requests })))
}

#[debug_handler]
async fn handle_get_potential_members(
    State(application): State<Arc<Application>>,
    Path(group_name): Path<String>,
) -> HandlerResult<impl IntoResponse> {
    let potential_members = application
        .group()
        .potential_members(&group_name)
        .await
        .or_json(json!({ "error": "There was an error getting potential members." }))?;

    Ok(Json(json!({ "potential_members": potential_members })))
}

#[derive(Deserialize, Debug)]
struct EmailForm {
    subject: String,
    body: String,
}

#[debug_handler]
async fn handle_email_group(
    State(application): State<Arc<Application>>,
    Path(group_name): Path<String>,
    PageForm(form): PageForm<EmailForm>,
) -> HandlerResult<Json<Outcome>> {
    match application.report().email_group(&group_name, &form.subject, &form.body).await {
        Ok(_) => Ok(Outcome::succeeded(format!("Sent email to group {group_name}"))),
        Err(report::Error::NoRecipients { .. }) => {
            Ok(Outcome::failed(format!("Unable to send email to group {group_name}")))
        }
        Err(e) => Err(e).or_json(json!({
            "success": false,
            "message": format!("Error sending email to group {group_name}"),
        })),
    }
}

#[debug_handler]
async fn handle_add_group_member(
    State(application): State<Arc<Application>>,
    Path((group_name, unix_name)): Path<(String, String)>,
) -> HandlerResult<Json<Outcome>> {
    let added = application.group().add_member(&group_name, &unix_name).await.or_json(json!({ "success": false }))?;

    Ok(Outcome::of(added))
}

#[debug_handler]
async fn handle_remove_group_member(
    State(application): State<Arc<Application>>,
    Path((group_name, unix_name)): Path<(String, String)>,
) -> HandlerResult<Json<Outcome>> {
    let removed =
        application.group().remove_member(&group_name, &unix_name).await.or_json(json!({ "success": false }))?;

    Ok(Outcome::of(removed))
}

#[debug_handler]
async fn handle_approve_membership_request(
    State(application): State<Arc<Application>>,
    Extension(context): Extension<SessionContext>,
    Path((group_name, unix_name)): Path<(String, String)>,
) -> HandlerResult<Json<Outcome>> {
    let outcome = application
        .group()
        .approve_membership(&group_name, &unix_name, context.unix_name_or_empty())
        .await
        .or_json(json!({ "success": false }))?;

    Ok(Outcome::of(matches!(outcome, ApprovalOutcome::Approved | ApprovalOutcome::AlreadyMember)))
}

#[debug_handler]
async fn handle_deny_membership_request(
    State(application): State<Arc<Application>>,
    Path((group_name, unix_name)): Path<(String, String)>,
) -> HandlerResult<Json<Outcome>> {
    let denied =
        application.group().deny_membership(&group_name, &unix_name).await.or_json(json!({ "success": false }))?;

    Ok(Outcome::of(denied))
}

#[debug_handler]
async fn handle_approve_subgroup_request(
    State(application): State<Arc<Application>>,
    session: Session,
    Path((group_name, subgroup_name)): Path<(String, String)>,
) -> HandlerResult<Redirect> {
    let approved = application.group().approve_subgroup(&group_name, &subgroup_name).await.or_page()?;

    let flash = if approved {
        Flash::success(format!("Approved request for subgroup {subgroup_name}"))
    } else {
        Flash::warning(format!("Unable to approve request for subgroup {subgroup_name}"))
    };
    push_flash(&session, flash).await.or_page()?;

    Ok(Redirect::to(&group_page_path(&group_name)))
}

#[debug_handler]
async fn handle_deny_subgroup_request(
    State(application): State<Arc<Application>>,
    session: Session,
    Path((group_name, subgroup_name)): Path<(String, String)>,
) -> HandlerResult<Redirect> {
    let denied = application.group().deny_subgroup(&group_name, &subgroup_name).await.or_page()?;

    let flash = if denied {
        Flash::success(format!("Denied request for subgroup {subgroup_name}"))
    } else {
        Flash::warning(format!("Unable to deny request for subgroup {subgroup_name}"))
    };
    push_flash(&session, flash).await.or_page()?;

    Ok(Redirect::to(&group_page_path(&group_name)))
}

#[debug_handler]
async fn handle_edit_group_form(
    State(application): State<Arc<Application>>,
    session: Session,
    Path(group_name): Path<String>,
) -> HandlerResult<Page> {
    let group = application.group().info(&group_name).await.or_page()?;

    Ok(Page::new("edit_group.html", "Edit group").with("group", group).for_session(&session).await)
}

#[derive(Deserialize, Debug)]
struct EditGroupForm {
    #[serde(rename = "display-name")]
    display_name: String,
    email: String,
    phone: String,
    description: String,
}

impl From<EditGroupForm> for GroupUpdate {
    fn from(value: EditGroupForm) -> Self {
        Self {
            display_name: value.display_name,
            email: value.email,
            phone: value.phone,
            description: value.description,
        }
    }
}

#[debug_handler]
async fn handle_edit_group(
    State(application): State<Arc<Application>>,
    session: Session,
    Path(group_name): Path<String>,
    PageForm(form): PageForm<EditGroupForm>,
) -> HandlerResult<Redirect> {
    application.group().update(&group_name, form.into()).await.or_page()?;
    push_flash(&session, Flash::success(format!("Updated group {group_name} successfully"))).await.or_page()?;

    Ok(Redirect::to(&group_page_path(&group_name)))
}

#[debug_handler]
async fn handle_create_subgroup_form(
    State(application): State<Arc<Application>>,
    session: Session,
    Path(group_name): Path<String>,
) -> HandlerResult<Page> {
    let group = application.group().info(&group_name).await.or_page()?;

    Ok(Page::new("create_subgroup.html", "Create subgroup").with("group", group).for_session(&session).await)
}

#[derive(Deserialize, Debug)]
struct CreateSubgroupForm {
    #[serde(rename = "short-name")]
    short_name: String,
    #[serde(rename = "display-name")]
    display_name: String,
    purpose: String,
    email: String,
    phone: String,
    description: String,
}

impl From<CreateSubgroupForm> for SubgroupRequest {
    fn from(value: CreateSubgroupForm) -> Self {
        Self {
            name: value.short_name,
            display_name: value.display_name,
            purpose: value.purpose,
            email: value.email,
            phone: value.phone,
            description: value.description,
        }
    }
}

#[debug_handler]
async fn handle_create_subgroup(
    State(application): State<Arc<Application>>,
    session: Session,
    Path(group_name): Path<String>,
    PageForm(form): PageForm<CreateSubgroupForm>,
) -> HandlerResult<Redirect> {
    let request = SubgroupRequest::from(form);
    let subgroup_name = request.name.clone();
    let created = application.group().create_subgroup(&group_name, request).await.or_page()?;

    let flash = if created {
        Flash::success(format!("Created subgroup {subgroup_name}"))
    } else {
        Flash::warning(format!("Error creating subgroup {subgroup_name}"))
    };
    push_flash(&session, flash).await.or_page()?;

    Ok(Redirect::to(&group_page_path(&group_name)))
}

#[debug_handler]
async fn handle_delete_group(
    State(application): State<Arc<Application>>,
    session: Session,
    Path(group_name): Path<String>,
) -> HandlerResult<Redirect> {
    let flash = match application.group().delete(&group_name).await {
        Ok(true) => Flash::success(format!("Deleted group {group_name}")),
        Ok(false) => Flash::warning(format!("Error deleting group {group_name}")),
        Err(group::Error::NotDeletable { .. }) => Flash::warning(format!("Group {group_name} cannot be deleted")),
        Err(e) => return Err(HandlerError::Page(e.into())),
    };
    push_flash(&session, flash).await.or_page()?;

    Ok(Redirect::to(&group_page_path(&application.settings().portal_group)))
}

async fn handle_login_nodes(session: Session) -> Page {
    Page::new("login_nodes.html", "Login nodes").for_session(&session).await
}
