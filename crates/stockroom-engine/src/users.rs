use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::debug;

use stockroom_types::UserId;
use stockroom_types::models::{Actor, Entities};

use crate::entities;

/// Username index used to resolve mentions. Fed by every authenticated
/// actor the engine sees; accounts themselves live with the auth service.
#[derive(Default)]
pub struct UserDirectory {
    by_name: RwLock<HashMap<String, UserId>>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn observe(&self, actor: &Actor) {
        let key = actor.username.to_lowercase();
        {
            let names = self.by_name.read().await;
            if names.get(&key) == Some(&actor.user_id) {
                return;
            }
        }
        debug!("Indexed username {} -> {}", actor.username, actor.user_id);
        self.by_name.write().await.insert(key, actor.user_id.clone());
    }

    pub async fn resolve(&self, username: &str) -> Option<UserId> {
        self.by_name.read().await.get(&username.to_lowercase()).cloned()
    }

    /// Parse `text` against a consistent snapshot of the index.
    pub async fn parse(&self, text: &str) -> Entities {
        let names = self.by_name.read().await;
        entities::parse(text, &*names)
    }
}
