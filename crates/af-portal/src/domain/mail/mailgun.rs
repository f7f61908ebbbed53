use anyhow::{bail, Result};
use async_trait::async_trait;
use tracing::info;
use url::Url;

use crate::config::MailConfig;

use super::{EmailMessage, MailService};

pub(crate) struct MailgunMailService {
    client: reqwest::Client,
    url: Url,
    api_key: String,
}

impl MailgunMailService {
    pub fn new(config: &MailConfig) -> Self {
        Self { client: reqwest::Client::new(), url: config.url.clone(), api_key: config.api_key.clone() }
    }

    fn messages_url(&self) -> Result<Url> {
        Ok(self.url.join("messages")?)
    }
}

fn message_form(message: &EmailMessage) -> Vec<(&'static str, &str)> {
    let mut form = vec![("from", message.sender.as_str())];
    form.extend(message.recipients.iter().map(|recipient| ("to", recipient.as_str())));
    form.push(("subject", message.subject.as_str()));
    form.push(("text", message.body.as_str()));
    form
}

#[async_trait]
impl MailService for MailgunMailService {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        if message.recipients.is_empty() {
            bail!("email has no recipients");
        }

        self.client
            .post(self.messages_url()?)
            .basic_auth("api", Some(&self.api_key))
            .form(&message_form(message))
            .send()
            .await?
            .error_for_status()?;

        info!("email(subject: {}) sent to {} recipients.", message.subject, message.recipients.len());
        Ok(())
    }
}
