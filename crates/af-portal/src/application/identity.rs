use std::sync::Arc;

use af_session::{Role, SessionContext};
use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};
use url::Url;

use crate::domain::{
    directory::DirectoryService,
    identity::{IdentityClaims, IdentityProvider},
};

use super::PortalSettings;

/// Where the browser should land once the provider sends it back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LoginTarget {
    Next(String),
    Signup,
}

#[async_trait]
pub(crate) trait IdentityUseCase {
    fn authorization_url(&self, redirect_uri: &Url, state: &str, target: &LoginTarget) -> Result<Url>;
    async fn complete_login(&self, code: &str, redirect_uri: &Url) -> Result<SessionContext>;
    async fn logout(&self, context: &SessionContext) -> Result<Url>;
}

pub(crate) struct IdentityUseCaseImpl {
    settings: Arc<PortalSettings>,
    identity_provider: Arc<dyn IdentityProvider + Sync + Send>,
    directory_service: Arc<dyn DirectoryService + Sync + Send>,
}

impl IdentityUseCaseImpl {
    pub fn new(
        settings: Arc<PortalSettings>,
        identity_provider: Arc<dyn IdentityProvider + Sync + Send>,
        directory_service: Arc<dyn DirectoryService + Sync + Send>,
    ) -> Self {
        Self { settings, identity_provider, directory_service }
    }
}

#[async_trait]
impl IdentityUseCase for IdentityUseCaseImpl {
    fn authorization_url(&self, redirect_uri: &Url, state: &str, target: &LoginTarget) -> Result<Url> {
        let params = match target {
            LoginTarget::Signup => vec![("signup".to_owned(), "1".to_owned())],
            LoginTarget::Next(next) => vec![("next".to_owned(), next.to_owned())],
        };

        Ok(self.identity_provider.authorization_url(redirect_uri, state, &params)?)
    }

    async fn complete_login(&self, code: &str, redirect_uri: &Url) -> Result<SessionContext> {
        let tokens = self.identity_provider.exchange_code(code, redirect_uri).await?;
        let id_token = tokens.id_token.as_deref().ok_or(Error::MissingIdToken)?;
        let claims = IdentityClaims::decode(id_token)?;

        let mut context = SessionContext {
            is_authenticated: true,
            name: claims.name,
            email: claims.email,
            institution: claims.organization,
            subject: claims.sub,
            last_authentication: claims.last_authentication,
            tokens: tokens.by_resource_server(Utc::now().timestamp()),
            ..Default::default()
        };

        if let Some(user) = self.directory_service.find_user(&context.subject).await? {
            let state = self.directory_service.get_membership_state(&user.unix_name, &self.settings.portal_group).await?;
            context.resolve(user.unix_name, Role::from(state));
        }

        info!(
            "user(subject: {}, unix_name: {}) logged in.",
            context.subject,
            context.unix_name_or_empty()
        );
        Ok(context)
    }

    async fn logout(&self, context: &SessionContext) -> Result<Url> {
        for token in context.access_tokens() {
            if let Err(e) = self.identity_provider.revoke_token(token).await {
                warn!(error = %e, "unable to revoke token of user(subject: {}).", context.subject);
            }
        }

        Ok(self.identity_provider.logout_url(&self.settings.base_url)?)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("identity provider did not return an id token")]
    MissingIdToken,
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
