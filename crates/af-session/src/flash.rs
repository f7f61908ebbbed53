use serde::{Deserialize, Serialize};
use tower_sessions::{session, Session};

const FLASHES_KEY: &str = "_flashes";

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FlashCategory {
    Success,
    Warning,
    Danger,
    Info,
}

/// One-shot message shown on the next rendered page.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Flash {
    pub category: FlashCategory,
    pub message: String,
}

impl Flash {
    pub fn success(message: impl Into<String>) -> Self {
        Self { category: FlashCategory::Success, message: message.into() }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self { category: FlashCategory::Warning, message: message.into() }
    }
}

pub async fn push_flash(session: &Session, flash: Flash) -> Result<(), session::Error> {
    let mut flashes = session.get::<Vec<Flash>>(FLASHES_KEY).await?.unwrap_or_default();
    flashes.push(flash);
    session.insert(FLASHES_KEY, flashes).await
}

pub async fn take_flashes(session: &Session) -> Result<Vec<Flash>, session::Error> {
    Ok(session.remove::<Vec<Flash>>(FLASHES_KEY).await?.unwrap_or_default())
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use tower_sessions::{MemoryStore, Session};

    use super::{push_flash, take_flashes, Flash};

    #[tokio::test]
    async fn flashes_are_drained_in_order_and_only_once() {
        let session = Session::new(None, Arc::new(MemoryStore::default()), None);

        push_flash(&session, Flash::success("Created subgroup physics")).await.unwrap();
        push_flash(&session, Flash::warning("Unable to request membership")).await.unwrap();

        let flashes = take_flashes(&session).await.unwrap();
        assert_eq!(flashes, vec![Flash::success("Created subgroup physics"), Flash::warning("Unable to request membership")]);
        assert!(take_flashes(&session).await.unwrap().is_empty());
    }
}
