use std::collections::HashMap;

use af_session::TokenInfo;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD as base64_engine, Engine};
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use url::Url;

mod oauth;

pub(crate) use oauth::OAuthIdentityProvider;

/// Token endpoint answer: the token for the primary resource server plus the
/// tokens granted for every other requested resource server.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub resource_server: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub other_tokens: Vec<TokenResponse>,
}

impl TokenResponse {
    pub fn by_resource_server(&self, now_seconds: i64) -> HashMap<String, TokenInfo> {
        std::iter::once(self)
            .chain(self.other_tokens.iter())
            .map(|token| {
                (
                    token.resource_server.clone(),
                    TokenInfo {
                        access_token: token.access_token.clone(),
                        refresh_token: token.refresh_token.clone(),
                        expires_at_seconds: token.expires_in.map(|expires_in| now_seconds + expires_in),
                        scope: token.scope.clone(),
                    },
                )
            })
            .collect()
    }
}

fn unknown_last_authentication() -> i64 {
    -1
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IdentityClaims {
    #[serde(default)]
    pub sub: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub organization: String,
    #[serde(default = "unknown_last_authentication")]
    pub last_authentication: i64,
}

impl IdentityClaims {
    /// Reads the claims of an id token handed out by the token endpoint.
    ///
    /// The token arrives over the authenticated back channel, so its signature is not checked here.
    pub fn decode(id_token: &str) -> Result<Self> {
        let parts: Vec<&str> = id_token.split('.').collect();
        if parts.len() != 3 {
            return Err(anyhow!("invalid id token format"));
        }

        let payload = base64_engine.decode(parts[1].trim_end_matches('='))?;
        Ok(serde_json::from_slice(&payload)?)
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub(crate) trait IdentityProvider {
    fn authorization_url(&self, redirect_uri: &Url, state: &str, params: &[(String, String)]) -> Result<Url>;
    async fn exchange_code(&self, code: &str, redirect_uri: &Url) -> Result<TokenResponse>;
    async fn revoke_token(&self, token: &str) -> Result<()>;
    fn logout_url(&self, redirect_uri: &Url) -> Result<Url>;
}

#[cfg(test)]
pub(crate) mod test {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD as base64_engine, Engine};

    use super::{IdentityClaims, TokenResponse};

    pub(crate) fn id_token(claims: serde_json::Value) -> String {
        let header = base64_engine.encode(br#"{"alg":"RS512","typ":"JWT"}"#);
        let payload = base64_engine.encode(claims.to_string());
        format!("{header}.{payload}.c2lnbmF0dXJl")
    }

    #[test]
    fn when_id_token_has_claims_then_decode_reads_them() {
        let token = id_token(serde_json::json!({
            "sub": "b2b3a1c2-0000-4000-8000-000000000001",
            "name": "Jane Doe",
            "email": "jane@example.org",
            "organization": "University of Chicago",
            "last_authentication": 1700000000
        }));

        let claims = IdentityClaims::decode(&token).expect("decoding claims should be successful");

        assert_eq!(claims.sub, "b2b3a1c2-0000-4000-8000-000000000001");
        assert_eq!(claims.organization, "University of Chicago");
        assert_eq!(claims.last_authentication, 1700000000);
    }

    #[test]
    fn when_optional_claims_are_missing_then_defaults_are_used() {
        let claims = IdentityClaims::decode(&id_token(serde_json::json!({ "sub": "abc" }))).unwrap();

        assert_eq!(claims.name, "");
        assert_eq!(claims.email, "");
        assert_eq!(claims.last_authentication, -1);
    }

    #[test]
    fn when_id_token_is_malformed_then_decode_fails() {
        assert!(IdentityClaims::decode("not-a-token").is_err());
        assert!(IdentityClaims::decode("a.!!!.c").is_err());
    }

    #[test]
    fn tokens_are_keyed_by_resource_server() {
        let response = TokenResponse {
            access_token: "auth-token".to_owned(),
            resource_server: "auth.globus.org".to_owned(),
            expires_in: Some(3600),
            other_tokens: vec![TokenResponse {
                access_token: "transfer-token".to_owned(),
                resource_server: "transfer.api.globus.org".to_owned(),
                refresh_token: Some("refresh".to_owned()),
                ..Default::default()
            }],
            ..Default::default()
        };

        let tokens = response.by_resource_server(1000);

        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens["auth.globus.org"].expires_at_seconds, Some(4600));
        assert_eq!(tokens["transfer.api.globus.org"].access_token, "transfer-token");
        assert_eq!(tokens["transfer.api.globus.org"].refresh_token.as_deref(), Some("refresh"));
    }
}
