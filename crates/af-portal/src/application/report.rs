use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::domain::{
    directory::{DirectoryService, MembershipState},
    mail::{EmailMessage, MailService},
    report::{render_users_plot, users_over_time},
};

use super::{load_profiles, PortalSettings};

#[async_trait]
pub(crate) trait ReportUseCase {
    /// Base64 encoded SVG of the portal group's growth.
    async fn plot_users_over_time(&self) -> Result<String>;
    /// Returns how many members the message was sent to.
    async fn email_group(&self, group_name: &str, subject: &str, body: &str) -> Result<usize>;
}

/// Sends one message to the configured staff address.
pub(super) async fn email_staff(
    settings: &PortalSettings,
    mail_service: &(dyn MailService + Sync + Send),
    subject: &str,
    body: &str,
) -> anyhow::Result<()> {
    mail_service
        .send(&EmailMessage {
            sender: settings.sender.clone(),
            recipients: vec![settings.staff_email.clone()],
            subject: subject.to_owned(),
            body: body.to_owned(),
        })
        .await?;

    info!("email(subject: {subject}) sent to staff.");
    Ok(())
}

pub(crate) struct ReportUseCaseImpl {
    settings: Arc<PortalSettings>,
    directory_service: Arc<dyn DirectoryService + Sync + Send>,
    mail_service: Arc<dyn MailService + Sync + Send>,
}

impl ReportUseCaseImpl {
    pub fn new(
        settings: Arc<PortalSettings>,
        directory_service: Arc<dyn DirectoryService + Sync + Send>,
        mail_service: Arc<dyn MailService + Sync + Send>,
    ) -> Self {
        Self { settings, directory_service, mail_service }
    }
}

#[async_trait]
impl ReportUseCase for ReportUseCaseImpl {
    async fn plot_users_over_time(&self) -> Result<String> {
        let unix_names = self.directory_service.get_group_members(&self.settings.portal_group, &[]).await?;
        let profiles = load_profiles(self.directory_service.as_ref(), &unix_names).await?;
        let join_dates: Vec<&str> = profiles.iter().map(|profile| profile.join_date.as_str()).collect();

        Ok(render_users_plot(&users_over_time(&join_dates))?)
    }

    async fn email_group(&self, group_name: &str, subject: &str, body: &str) -> Result<usize> {
        let unix_names = self
            .directory_service
            .get_group_members(group_name, &[MembershipState::Active, MembershipState::Admin])
            .await?;
        let recipients: Vec<String> = load_profiles(self.directory_service.as_ref(), &unix_names)
            .await?
            .into_iter()
            .map(|profile| profile.email)
            .filter(|email| !email.is_empty())
            .collect();
        if recipients.is_empty() {
            return Err(Error::NoRecipients { group_name: group_name.to_owned() });
        }

        let count = recipients.len();
        self.mail_service
            .send(&EmailMessage {
                sender: self.settings.sender.clone(),
                recipients,
                subject: subject.to_owned(),
                body: body.to_owned(),
            })
            .await?;

        info!("email(subject: {subject}) sent to {count} members of group(name: {group_name}).");
        Ok(count)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("group {group_name} has no members with an email address")]
    NoRecipients { group_name: String },
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
