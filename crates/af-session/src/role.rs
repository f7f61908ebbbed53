use serde::{Deserialize, Serialize};

/// Membership role of a user in the portal group, as reported by the directory.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Active,
    Pending,
    Disabled,
    Nonmember,
}

impl From<&str> for Role {
    fn from(s: &str) -> Self {
        match s {
            "admin" => Role::Admin,
            "active" => Role::Active,
            "pending" => Role::Pending,
            "disabled" => Role::Disabled,
            _ => Role::Nonmember,
        }
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        match role {
            Role::Admin => "admin".to_string(),
            Role::Active => "active".to_string(),
            Role::Pending => "pending".to_string(),
            Role::Disabled => "disabled".to_string(),
            Role::Nonmember => "nonmember".to_string(),
        }
    }
}

/// Capability a request carries, ordered for gating purposes.
///
/// `Admin` satisfies every requirement `Member` satisfies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AccessLevel {
    Anonymous,
    Authenticated,
    Member,
    Admin,
}

impl AccessLevel {
    pub fn satisfies(self, requirement: AccessLevel) -> bool {
        self >= requirement
    }
}
