pub mod context;
pub mod flash;
pub mod gate;
pub mod redirect;
pub mod role;

pub use context::{SessionContext, TokenInfo};
pub use role::{AccessLevel, Role};
