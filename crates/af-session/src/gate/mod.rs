//! Route gating by session access level.
//!
//! Each protected router gets an [`AuthGateLayer`] naming the lowest
//! [`AccessLevel`] it accepts. The layer runs [`authorize`] before the handler
//! and hands the loaded [`SessionContext`] to it through request extensions.

pub mod error;
pub mod layer;
pub mod service;

pub use error::GateError;
pub use layer::AuthGateLayer;

use crate::{context::SessionContext, role::AccessLevel};

pub const DEFAULT_LOGIN_PATH: &str = "/login";

pub fn authorize(context: &SessionContext, requirement: AccessLevel) -> Result<(), GateError> {
    let level = context.access_level();
    if level.satisfies(requirement) {
        Ok(())
    } else if level == AccessLevel::Anonymous {
        Err(GateError::Unauthenticated)
    } else {
        Err(GateError::Forbidden)
    }
}
