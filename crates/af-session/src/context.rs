use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tower_sessions::{session, Session};

use crate::role::{AccessLevel, Role};

pub const SESSION_CONTEXT_KEY: &str = "context";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TokenInfo {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at_seconds: Option<i64>,
    pub scope: String,
}

/// Everything the portal remembers about a browser session.
///
/// A context is created by the identity exchange, refined once the directory
/// resolves the unix name and role, and cleared on logout. Handlers receive it
/// by value; nothing else holds session state.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionContext {
    pub is_authenticated: bool,
    pub name: String,
    pub email: String,
    pub institution: String,
    /// Subject identifier issued by the identity provider.
    pub subject: String,
    pub last_authentication: i64,
    /// Tokens keyed by resource server.
    pub tokens: HashMap<String, TokenInfo>,
    pub unix_name: Option<String>,
    pub role: Option<Role>,
}

impl SessionContext {
    pub async fn load(session: &Session) -> Result<Self, session::Error> {
        Ok(session.get::<SessionContext>(SESSION_CONTEXT_KEY).await?.unwrap_or_default())
    }

    pub async fn save(&self, session: &Session) -> Result<(), session::Error> {
        session.insert(SESSION_CONTEXT_KEY, self).await
    }

    pub async fn clear(session: &Session) -> Result<(), session::Error> {
        session.flush().await
    }

    pub fn resolve(&mut self, unix_name: String, role: Role) {
        self.unix_name = Some(unix_name);
        self.role = Some(role);
    }

    pub fn access_level(&self) -> AccessLevel {
        if !self.is_authenticated {
            return AccessLevel::Anonymous;
        }
        match self.role {
            Some(Role::Admin) => AccessLevel::Admin,
            Some(Role::Active) => AccessLevel::Member,
            _ => AccessLevel::Authenticated,
        }
    }

    /// Unix name, or an empty identifier when the directory had no match.
    pub fn unix_name_or_empty(&self) -> &str {
        self.unix_name.as_deref().unwrap_or_default()
    }

    pub fn access_tokens(&self) -> impl Iterator<Item = &str> {
        self.tokens.values().map(|token| token.access_token.as_str())
    }
}
