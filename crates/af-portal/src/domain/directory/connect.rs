use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::info;
use url::Url;

use super::{
    DirectoryService, Group, GroupMembership, GroupUpdate, MembershipState, ProfileUpdate, SubgroupRequest,
    UserProfile,
};

const API_VERSION: &str = "v1alpha1";

/// Client for a CI-Connect style directory API.
pub(crate) struct ConnectDirectoryService {
    client: reqwest::Client,
    url: Url,
    token: String,
    protected_groups: Vec<String>,
}

impl ConnectDirectoryService {
    pub fn new(url: Url, token: String, protected_groups: Vec<String>) -> Self {
        Self { client: reqwest::Client::new(), url, token, protected_groups }
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let path = segments.iter().map(|segment| urlencoding::encode(segment)).collect::<Vec<_>>().join("/");
        let mut url = self.url.join(&format!("{API_VERSION}/{path}"))?;
        url.query_pairs_mut().append_pair("token", &self.token);
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder> {
        Ok(self.client.request(method, self.endpoint(segments)?))
    }

    /// Sends the request and returns `None` when the directory answers 404.
    async fn send_optional(&self, request: RequestBuilder) -> Result<Option<Response>> {
        let response = request.send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(response.error_for_status()?))
    }

    /// Sends a mutating request; the directory reports failures through the status code only.
    async fn send_command(&self, request: RequestBuilder) -> Result<bool> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%status, %body, "directory rejected the request.");
        }
        Ok(status.is_success())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MetadataRequest<'a, M: Serialize> {
    api_version: &'static str,
    metadata: &'a M,
}

impl<'a, M: Serialize> MetadataRequest<'a, M> {
    fn new(metadata: &'a M) -> Self {
        Self { api_version: API_VERSION, metadata }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GroupMembershipRequest {
    api_version: &'static str,
    group_membership: MembershipStateBody,
}

#[derive(Serialize, Deserialize)]
struct MembershipStateBody {
    state: MembershipState,
}

#[derive(Deserialize)]
struct MetadataResponse<M> {
    metadata: M,
}

#[derive(Deserialize)]
struct MembershipResponse {
    membership: MembershipStateBody,
}

#[derive(Deserialize)]
struct UserGroupsResponse {
    #[serde(default)]
    group_memberships: Vec<GroupMembership>,
}

#[derive(Deserialize)]
pub(super) struct MemberEntry {
    pub user_name: String,
    pub state: MembershipState,
}

#[derive(Deserialize)]
struct GroupMembersResponse {
    #[serde(default)]
    memberships: Vec<MemberEntry>,
}

#[derive(Deserialize)]
struct GroupsResponse {
    #[serde(default)]
    groups: Vec<MetadataResponse<Group>>,
}

pub(super) fn filter_members(memberships: Vec<MemberEntry>, states: &[MembershipState]) -> Vec<String> {
    memberships
        .into_iter()
        .filter(|membership| states.is_empty() || states.contains(&membership.state))
        .map(|membership| membership.user_name)
        .collect()
}

#[async_trait]
impl DirectoryService for ConnectDirectoryService {
    async fn find_user(&self, subject: &str) -> Result<Option<UserProfile>> {
        if subject.is_empty() {
            return Ok(None);
        }
        let mut url = self.endpoint(&["find_user"])?;
        url.query_pairs_mut().append_pair("globus_id", subject);

        match self.send_optional(self.client.get(url)).await? {
            Some(response) => Ok(Some(response.json::<MetadataResponse<UserProfile>>().await?.metadata)),
            None => Ok(None),
        }
    }

    async fn get_membership_state(&self, unix_name: &str, group_name: &str) -> Result<MembershipState> {
        if unix_name.is_empty() {
            return Ok(MembershipState::Nonmember);
        }
        let request = self.request(Method::GET, &["users", unix_name, "groups", group_name])?;

        match self.send_optional(request).await? {
            Some(response) => Ok(response.json::<MembershipResponse>().await?.membership.state),
            None => Ok(MembershipState::Nonmember),
        }
    }

    async fn get_user_profile(&self, unix_name: &str) -> Result<Option<UserProfile>> {
        if unix_name.is_empty() {
            return Ok(None);
        }
        let request = self.request(Method::GET, &["users", unix_name])?;

        match self.send_optional(request).await? {
            Some(response) => Ok(Some(response.json::<MetadataResponse<UserProfile>>().await?.metadata)),
            None => Ok(None),
        }
    }

    async fn update_user_profile(&self, unix_name: &str, update: &ProfileUpdate) -> Result<()> {
        self.request(Method::PUT, &["users", unix_name])?
            .json(&MetadataRequest::new(update))
            .send()
            .await?
            .error_for_status()?;

        info!("profile of user(unix_name: {unix_name}) updated.");
        Ok(())
    }

    async fn get_user_groups(&self, unix_name: &str) -> Result<Vec<GroupMembership>> {
        if unix_name.is_empty() {
            return Ok(vec![]);
        }
        let request = self.request(Method::GET, &["users", unix_name, "groups"])?;

        match self.send_optional(request).await? {
            Some(response) => Ok(response.json::<UserGroupsResponse>().await?.group_memberships),
            None => Ok(vec![]),
        }
    }

    async fn update_user_group_status(
        &self,
        unix_name: &str,
        group_name: &str,
        state: MembershipState,
    ) -> Result<bool> {
        let request = self.request(Method::PUT, &["groups", group_name, "members", unix_name])?.json(
            &GroupMembershipRequest { api_version: API_VERSION, group_membership: MembershipStateBody { state } },
        );

        let updated = self.send_command(request).await?;
        if updated {
            info!("membership of user(unix_name: {unix_name}) in group(name: {group_name}) set to {}.", state.as_str());
        }
        Ok(updated)
    }

    async fn remove_user_from_group(&self, unix_name: &str, group_name: &str) -> Result<bool> {
        let request = self.request(Method::DELETE, &["groups", group_name, "members", unix_name])?;

        let removed = self.send_command(request).await?;
        if removed {
            info!("user(unix_name: {unix_name}) removed from group(name: {group_name}).");
        }
        Ok(removed)
    }

    async fn get_group_info(&self, group_name: &str) -> Result<Option<Group>> {
        if group_name.is_empty() {
            return Ok(None);
        }
        let request = self.request(Method::GET, &["groups", group_name])?;

        match self.send_optional(request).await? {
            Some(response) => Ok(Some(response.json::<MetadataResponse<Group>>().await?.metadata)),
            None => Ok(None),
        }
    }

    async fn update_group_info(&self, group_name: &str, update: &GroupUpdate) -> Result<()> {
        self.request(Method::PUT, &["groups", group_name])?
            .json(&MetadataRequest::new(update))
            .send()
            .await?
            .error_for_status()?;

        info!("group(name: {group_name}) updated.");
        Ok(())
    }

    async fn get_group_members(&self, group_name: &str, states: &[MembershipState]) -> Result<Vec<String>> {
        let request = self.request(Method::GET, &["groups", group_name, "members"])?;

        match self.send_optional(request).await? {
            Some(response) => Ok(filter_members(response.json::<GroupMembersResponse>().await?.memberships, states)),
            None => Ok(vec![]),
        }
    }

    async fn get_subgroups(&self, group_name: &str) -> Result<Vec<Group>> {
        let request = self.request(Method::GET, &["groups", group_name, "subgroups"])?;

        match self.send_optional(request).await? {
            Some(response) => {
                Ok(response.json::<GroupsResponse>().await?.groups.into_iter().map(|group| group.metadata).collect())
            }
            None => Ok(vec![]),
        }
    }

    async fn get_subgroup_requests(&self, group_name: &str) -> Result<Vec<Group>> {
        let request = self.request(Method::GET, &["groups", group_name, "subgroup_requests"])?;

        match self.send_optional(request).await? {
            Some(response) => {
                Ok(response.json::<GroupsResponse>().await?.groups.into_iter().map(|group| group.metadata).collect())
            }
            None => Ok(vec![]),
        }
    }

    async fn create_subgroup(&self, parent_group_name: &str, request: &SubgroupRequest) -> Result<bool> {
        let http_request = self
            .request(Method::PUT, &["groups", parent_group_name, "subgroup_requests", &request.name])?
            .json(&MetadataRequest::new(request));

        let created = self.send_command(http_request).await?;
        if created {
            info!("subgroup(name: {}) requested under group(name: {parent_group_name}).", request.name);
        }
        Ok(created)
    }

    async fn approve_subgroup_request(&self, subgroup_name: &str, group_name: &str) -> Result<bool> {
        let request = self.request(Method::PUT, &["groups", group_name, "subgroup_requests", subgroup_name, "approve"])?;

        self.send_command(request).await
    }

    async fn deny_subgroup_request(&self, subgroup_name: &str, group_name: &str) -> Result<bool> {
        let request = self.request(Method::DELETE, &["groups", group_name, "subgroup_requests", subgroup_name])?;

        self.send_command(request).await
    }

    async fn is_group_deletable(&self, group_name: &str) -> Result<bool> {
        if group_name.is_empty() || self.protected_groups.iter().any(|protected| protected == group_name) {
            return Ok(false);
        }
        if self.get_group_info(group_name).await?.is_none() {
            return Ok(false);
        }
        Ok(self.get_subgroups(group_name).await?.is_empty())
    }

    async fn delete_group(&self, group_name: &str) -> Result<bool> {
        let request = self.request(Method::DELETE, &["groups", group_name])?;

        let deleted = self.send_command(request).await?;
        if deleted {
            info!("group(name: {group_name}) deleted.");
        }
        Ok(deleted)
    }
}
