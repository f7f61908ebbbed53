use bon::Builder;
use tower::Layer;

use crate::role::AccessLevel;

use super::{service::AuthGateService, DEFAULT_LOGIN_PATH};

#[derive(Builder, Clone, Debug)]
pub struct AuthGateLayer {
    pub requirement: AccessLevel,

    #[builder(default = DEFAULT_LOGIN_PATH.to_owned())]
    pub login_path: String,
}

impl AuthGateLayer {
    pub fn require(requirement: AccessLevel) -> Self {
        Self::builder().requirement(requirement).build()
    }
}

impl<S> Layer<S> for AuthGateLayer {
    type Service = AuthGateService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthGateService::new(inner, self)
    }
}
