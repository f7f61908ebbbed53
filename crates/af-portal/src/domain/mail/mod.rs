use anyhow::Result;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

mod mailgun;

pub(crate) use mailgun::MailgunMailService;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub sender: String,
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub(crate) trait MailService {
    /// Sends one message to every recipient; either the whole message is accepted or none of it is.
    async fn send(&self, message: &EmailMessage) -> Result<()>;
}
