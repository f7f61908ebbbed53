use af_session::Role;
use anyhow::Result;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};

mod connect;

pub(crate) use connect::ConnectDirectoryService;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MembershipState {
    Admin,
    Active,
    Pending,
    Disabled,
    #[serde(other)]
    Nonmember,
}

impl MembershipState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipState::Admin => "admin",
            MembershipState::Active => "active",
            MembershipState::Pending => "pending",
            MembershipState::Disabled => "disabled",
            MembershipState::Nonmember => "nonmember",
        }
    }

    pub fn is_member(&self) -> bool {
        matches!(self, MembershipState::Admin | MembershipState::Active)
    }
}

impl From<MembershipState> for Role {
    fn from(value: MembershipState) -> Self {
        Role::from(value.as_str())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct UserProfile {
    #[serde(default)]
    pub unix_name: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub institution: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, rename = "X.509_DN")]
    pub x509_dn: String,
    #[serde(default)]
    pub public_key: String,
    #[serde(default)]
    pub join_date: String,
    #[serde(default)]
    pub last_use_time: String,
}

#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub institution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(rename = "X.509_DN", skip_serializing_if = "Option::is_none")]
    pub x509_dn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct GroupMembership {
    pub name: String,
    pub state: MembershipState,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Group {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub creation_date: String,
    #[serde(default)]
    pub pending: bool,
}

#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupUpdate {
    pub display_name: String,
    pub email: String,
    pub phone: String,
    pub description: String,
}

#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct SubgroupRequest {
    pub name: String,
    pub display_name: String,
    pub purpose: String,
    pub email: String,
    pub phone: String,
    pub description: String,
}

/// Users and groups as held by the external directory.
///
/// An empty unix name is never sent upstream: lookups answer "not found".
#[cfg_attr(test, automock)]
#[async_trait]
pub(crate) trait DirectoryService {
    async fn find_user(&self, subject: &str) -> Result<Option<UserProfile>>;
    async fn get_membership_state(&self, unix_name: &str, group_name: &str) -> Result<MembershipState>;
    async fn get_user_profile(&self, unix_name: &str) -> Result<Option<UserProfile>>;
    async fn update_user_profile(&self, unix_name: &str, update: &ProfileUpdate) -> Result<()>;
    async fn get_user_groups(&self, unix_name: &str) -> Result<Vec<GroupMembership>>;
    async fn update_user_group_status(&self, unix_name: &str, group_name: &str, state: MembershipState)
        -> Result<bool>;
    async fn remove_user_from_group(&self, unix_name: &str, group_name: &str) -> Result<bool>;
    async fn get_group_info(&self, group_name: &str) -> Result<Option<Group>>;
    async fn update_group_info(&self, group_name: &str, update: &GroupUpdate) -> Result<()>;
    /// Unix names of the group's members whose state is in `states`; every member when `states` is empty.
    async fn get_group_members(&self, group_name: &str, states: &[MembershipState]) -> Result<Vec<String>>;
    async fn get_subgroups(&self, group_name: &str) -> Result<Vec<Group>>;
    async fn get_subgroup_requests(&self, group_name: &str) -> Result<Vec<Group>>;
    async fn create_subgroup(&self, parent_group_name: &str, request: &SubgroupRequest) -> Result<bool>;
    async fn approve_subgroup_request(&self, subgroup_name: &str, group_name: &str) -> Result<bool>;
    async fn deny_subgroup_request(&self, subgroup_name: &str, group_name: &str) -> Result<bool>;
    async fn is_group_deletable(&self, group_name: &str) -> Result<bool>;
    async fn delete_group(&self, group_name: &str) -> Result<bool>;
}

#[cfg(test)]
mod test {
    use af_session::Role;

    use super::{MembershipState, UserProfile};

    #[test]
    fn unknown_membership_state_deserializes_as_nonmember() {
        let state: MembershipState = serde_json::from_str("\"superuser\"").unwrap();

        assert_eq!(state, MembershipState::Nonmember);
        assert_eq!(Role::from(MembershipState::Active), Role::Active);
        assert_eq!(Role::from(MembershipState::Admin), Role::Admin);
    }

    #[test]
    fn user_profile_reads_directory_field_names() {
        let profile: UserProfile = serde_json::from_value(serde_json::json!({
            "unix_name": "jdoe",
            "name": "Jane Doe",
            "X.509_DN": "/DC=org/CN=Jane Doe",
            "superuser": false
        }))
        .unwrap();

        assert_eq!(profile.unix_name, "jdoe");
        assert_eq!(profile.x509_dn, "/DC=org/CN=Jane Doe");
        assert_eq!(profile.email, "");
    }
}
