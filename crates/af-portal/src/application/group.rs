use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use crate::domain::{
    directory::{DirectoryService, Group, GroupUpdate, MembershipState, ProfileUpdate, SubgroupRequest, UserProfile},
    mail::MailService,
    report::format_join_date,
};

use super::{load_profiles, report::email_staff, PortalSettings};

const JOIN_DATE_FORMAT: &str = "%m/%d/%Y";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ApprovalOutcome {
    Approved,
    /// Nothing changed and nobody was notified.
    AlreadyMember,
    /// The directory refused the transition.
    Unchanged,
}

#[async_trait]
pub(crate) trait GroupUseCase {
    async fn info(&self, group_name: &str) -> Result<Group>;
    async fn update(&self, group_name: &str, update: GroupUpdate) -> Result<()>;
    async fn members(&self, group_name: &str) -> Result<Vec<UserProfile>>;
    async fn member_requests(&self, group_name: &str) -> Result<Vec<UserProfile>>;
    async fn subgroups(&self, group_name: &str) -> Result<Vec<Group>>;
    async fn subgroup_requests(&self, group_name: &str) -> Result<Vec<Group>>;
    /// Directory users who are not yet active in `group_name`.
    async fn potential_members(&self, group_name: &str) -> Result<Vec<UserProfile>>;
    /// Every portal group member, join dates formatted for display.
    async fn portal_users(&self) -> Result<Vec<UserProfile>>;
    async fn update_user_institution(&self, unix_name: &str, institution: &str) -> Result<()>;
    async fn add_member(&self, group_name: &str, unix_name: &str) -> Result<bool>;
    async fn remove_member(&self, group_name: &str, unix_name: &str) -> Result<bool>;
    async fn approve_membership(&self, group_name: &str, unix_name: &str, approver: &str)
        -> Result<ApprovalOutcome>;
    async fn deny_membership(&self, group_name: &str, unix_name: &str) -> Result<bool>;
    async fn create_subgroup(&self, group_name: &str, request: SubgroupRequest) -> Result<bool>;
    async fn approve_subgroup(&self, group_name: &str, subgroup_name: &str) -> Result<bool>;
    async fn deny_subgroup(&self, group_name: &str, subgroup_name: &str) -> Result<bool>;
    async fn delete(&self, group_name: &str) -> Result<bool>;
}

pub(crate) struct GroupUseCaseImpl {
    settings: Arc<PortalSettings>,
    directory_service: Arc<dyn DirectoryService + Sync + Send>,
    mail_service: Arc<dyn MailService + Sync + Send>,
}

impl GroupUseCaseImpl {
    pub fn new(
        settings: Arc<PortalSettings>,
        directory_service: Arc<dyn DirectoryService + Sync + Send>,
        mail_service: Arc<dyn MailService + Sync + Send>,
    ) -> Self {
        Self { settings, directory_service, mail_service }
    }

    async fn profiles_in_state(&self, group_name: &str, states: &[MembershipState]) -> Result<Vec<UserProfile>> {
        let unix_names = self.directory_service.get_group_members(group_name, states).await?;
        Ok(load_profiles(self.directory_service.as_ref(), &unix_names).await?)
    }

    async fn notify_staff_of_approval(&self, group_name: &str, unix_name: &str, approver: &str) -> anyhow::Result<()> {
        let profile = self.directory_service.get_user_profile(unix_name).await?.unwrap_or_default();
        let body = format!(
            "User {approver} approved a request from {unix_name} to join group {group_name}.\n\n\
             Unix name: {}\nFull name: {}\nEmail: {}\nInstitution: {}\n",
            profile.unix_name, profile.name, profile.email, profile.institution
        );

        email_staff(&self.settings, self.mail_service.as_ref(), "Account approval", &body).await
    }
}

#[async_trait]
impl GroupUseCase for GroupUseCaseImpl {
    async fn info(&self, group_name: &str) -> Result<Group> {
        self.directory_service
            .get_group_info(group_name)
            .await?
            .ok_or_else(|| Error::GroupNotFound { group_name: group_name.to_owned() })
    }

    async fn update(&self, group_name: &str, update: GroupUpdate) -> Result<()> {
        self.directory_service.update_group_info(group_name, &update).await?;

        info!("group(name: {group_name}) updated.");
        Ok(())
    }

    async fn members(&self, group_name: &str) -> Result<Vec<UserProfile>> {
        self.profiles_in_state(group_name, &[MembershipState::Active, MembershipState::Admin]).await
    }

    async fn member_requests(&self, group_name: &str) -> Result<Vec<UserProfile>> {
        self.profiles_in_state(group_name, &[MembershipState::Pending]).await
    }

    async fn subgroups(&self, group_name: &str) -> Result<Vec<Group>> {
        Ok(self.directory_service.get_subgroups(group_name).await?)
    }

    async fn subgroup_requests(&self, group_name: &str) -> Result<Vec<Group>> {
        Ok(self.directory_service.get_subgroup_requests(group_name).await?)
    }

    async fn potential_members(&self, group_name: &str) -> Result<Vec<UserProfile>> {
        let members = self
            .directory_service
            .get_group_members(group_name, &[MembershipState::Admin, MembershipState::Active])
            .await?;
        let users = self.directory_service.get_group_members(&self.settings.root_group, &[]).await?;
        let candidates: Vec<String> = users.into_iter().filter(|user| !members.contains(user)).collect();

        Ok(load_profiles(self.directory_service.as_ref(), &candidates).await?)
    }

    async fn portal_users(&self) -> Result<Vec<UserProfile>> {
        let mut profiles = self.profiles_in_state(&self.settings.portal_group, &[]).await?;
        for profile in &mut profiles {
            profile.join_date = format_join_date(&profile.join_date, JOIN_DATE_FORMAT);
        }
        Ok(profiles)
    }

    async fn update_user_institution(&self, unix_name: &str, institution: &str) -> Result<()> {
        let update = ProfileUpdate { institution: Some(institution.to_owned()), ..Default::default() };
        self.directory_service.update_user_profile(unix_name, &update).await?;

        info!("institution of user(unix_name: {unix_name}) updated.");
        Ok(())
    }

    async fn add_member(&self, group_name: &str, unix_name: &str) -> Result<bool> {
        let added =
            self.directory_service.update_user_group_status(unix_name, group_name, MembershipState::Active).await?;

        if added {
            info!("user(unix_name: {unix_name}) added to group(name: {group_name}).");
        }
        Ok(added)
    }

    async fn remove_member(&self, group_name: &str, unix_name: &str) -> Result<bool> {
        let removed = self.directory_service.remove_user_from_group(unix_name, group_name).await?;

        if removed {
            info!("user(unix_name: {unix_name}) removed from group(name: {group_name}).");
        }
        Ok(removed)
    }

    async fn approve_membership(
        &self,
        group_name: &str,
        unix_name: &str,
        approver: &str,
    ) -> Result<ApprovalOutcome> {
        let state = self.directory_service.get_membership_state(unix_name, group_name).await?;
        if state.is_member() {
            return Ok(ApprovalOutcome::AlreadyMember);
        }

        if !self.directory_service.update_user_group_status(unix_name, group_name, MembershipState::Active).await? {
            return Ok(ApprovalOutcome::Unchanged);
        }
        info!("user(unix_name: {approver}) approved user(unix_name: {unix_name}) in group(name: {group_name}).");

        if let Err(e) = self.notify_staff_of_approval(group_name, unix_name, approver).await {
            error!(error = %e, "unable to notify staff of approval of user(unix_name: {unix_name}).");
        }
        Ok(ApprovalOutcome::Approved)
    }

    async fn deny_membership(&self, group_name: &str, unix_name: &str) -> Result<bool> {
        self.remove_member(group_name, unix_name).await
    }

    async fn create_subgroup(&self, group_name: &str, request: SubgroupRequest) -> Result<bool> {
        let created = self.directory_service.create_subgroup(group_name, &request).await?;

        if created {
            info!("subgroup(name: {}) created under group(name: {group_name}).", request.name);
        }
        Ok(created)
    }

    async fn approve_subgroup(&self, group_name: &str, subgroup_name: &str) -> Result<bool> {
        Ok(self.directory_service.approve_subgroup_request(subgroup_name, group_name).await?)
    }

    async fn deny_subgroup(&self, group_name: &str, subgroup_name: &str) -> Result<bool> {
        Ok(self.directory_service.deny_subgroup_request(subgroup_name, group_name).await?)
    }

    async fn delete(&self, group_name: &str) -> Result<bool> {
        if !self.directory_service.is_group_deletable(group_name).await? {
            return Err(Error::NotDeletable { group_name: group_name.to_owned() });
        }
        let deleted = self.directory_service.delete_group(group_name).await?;

        if deleted {
            info!("group(name: {group_name}) deleted.");
        }
        Ok(deleted)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("group {group_name} does not exist")]
    GroupNotFound { group_name: String },
    #[error("group {group_name} cannot be deleted")]
    NotDeletable { group_name: String },
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
