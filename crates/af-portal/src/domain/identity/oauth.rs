use anyhow::Result;
use async_trait::async_trait;
use url::Url;

use crate::config::IdentityConfig;

use super::{IdentityProvider, TokenResponse};

const LOGOUT_REDIRECT_NAME: &str = "AF Portal";

/// Confidential OAuth2 client for a Globus-Auth style provider.
pub(crate) struct OAuthIdentityProvider {
    client: reqwest::Client,
    config: IdentityConfig,
}

impl OAuthIdentityProvider {
    pub fn new(config: IdentityConfig) -> Self {
        Self { client: reqwest::Client::new(), config }
    }
}

#[async_trait]
impl IdentityProvider for OAuthIdentityProvider {
    fn authorization_url(&self, redirect_uri: &Url, state: &str, params: &[(String, String)]) -> Result<Url> {
        let mut url = self.config.authorize_url.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", redirect_uri.as_str())
            .append_pair("scope", &self.config.scopes.join(" "))
            .append_pair("state", state)
            .append_pair("response_type", "code")
            .append_pair("access_type", "offline")
            .extend_pairs(params);
        Ok(url)
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &Url) -> Result<TokenResponse> {
        let response = self
            .client
            .post(self.config.token_url.clone())
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[("grant_type", "authorization_code"), ("code", code), ("redirect_uri", redirect_uri.as_str())])
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json::<TokenResponse>().await?)
    }

    async fn revoke_token(&self, token: &str) -> Result<()> {
        self.client
            .post(self.config.revoke_url.clone())
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[("token", token)])
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }

    fn logout_url(&self, redirect_uri: &Url) -> Result<Url> {
        let mut url = self.config.logout_url.clone();
        url.query_pairs_mut()
            .append_pair("client", &self.config.client_id)
            .append_pair("redirect_uri", redirect_uri.as_str())
            .append_pair("redirect_name", LOGOUT_REDIRECT_NAME);
        Ok(url)
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use url::Url;

    use super::OAuthIdentityProvider;
    use crate::{config::IdentityConfig, domain::identity::IdentityProvider};

    fn provider() -> OAuthIdentityProvider {
        OAuthIdentityProvider::new(IdentityConfig {
            client_id: "portal-client".to_owned(),
            client_secret: "portal-secret".to_owned(),
            authorize_url: Url::parse("https://auth.example.org/v2/oauth2/authorize").unwrap(),
            token_url: Url::parse("https://auth.example.org/v2/oauth2/token").unwrap(),
            revoke_url: Url::parse("https://auth.example.org/v2/oauth2/token/revoke").unwrap(),
            logout_url: Url::parse("https://auth.example.org/v2/web/logout").unwrap(),
            scopes: vec!["openid".to_owned(), "email".to_owned()],
        })
    }

    #[test]
    fn authorization_url_carries_client_state_and_extra_params() {
        let redirect_uri = Url::parse("https://af.example.org/login").unwrap();

        let url = provider()
            .authorization_url(&redirect_uri, "random-state", &[("next".to_owned(), "/jupyterlab".to_owned())])
            .unwrap();
        let query: HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert_eq!(url.path(), "/v2/oauth2/authorize");
        assert_eq!(query["client_id"], "portal-client");
        assert_eq!(query["redirect_uri"], "https://af.example.org/login");
        assert_eq!(query["scope"], "openid email");
        assert_eq!(query["state"], "random-state");
        assert_eq!(query["response_type"], "code");
        assert_eq!(query["next"], "/jupyterlab");
    }

    #[test]
    fn logout_url_names_portal_and_return_address() {
        let url = provider().logout_url(&Url::parse("https://af.example.org/").unwrap()).unwrap();
        let query: HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert_eq!(query["client"], "portal-client");
        assert_eq!(query["redirect_uri"], "https://af.example.org/");
        assert_eq!(query["redirect_name"], "AF Portal");
    }
}
