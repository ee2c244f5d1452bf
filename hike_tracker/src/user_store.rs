use hike_tracker_lib::user::UserInfo;
use tokio::sync::RwLock;

use crate::{database::KeyValueStore, TrackerError};

const USER_INFO_KEY: &str = "user_info";

/// The logged in user, persisted so a restart keeps the session.
pub struct UserStore {
    store: KeyValueStore,
    current: RwLock<Option<UserInfo>>,
}

impl UserStore {
    /// Restores whoever was logged in when the store was last used.
    pub async fn load(store: KeyValueStore) -> Result<Self, TrackerError> {
        let current = store.get::<UserInfo>(USER_INFO_KEY).await?;
        if let Some(user) = &current {
            tracing::debug!("Restored login for user {}", user.user_id);
        }

        Ok(Self {
            store,
            current: RwLock::new(current),
        })
    }

    pub async fn login(&self, user: UserInfo) -> Result<(), TrackerError> {
        let mut current = self.current.write().await;
        self.store.set(USER_INFO_KEY, &user).await?;
        tracing::info!("Logged in as {} ({})", user.name, user.user_id);
        *current = Some(user);
        Ok(())
    }

    pub async fn logout(&self) -> Result<(), TrackerError> {
        let mut current = self.current.write().await;
        self.store.remove(USER_INFO_KEY).await?;
        if current.take().is_some() {
            tracing::info!("Logged out");
        }
        Ok(())
    }

    pub async fn current(&self) -> Option<UserInfo> {
        self.current.read().await.clone()
    }

    pub async fn is_logged_in(&self) -> bool {
        self.current.read().await.is_some()
    }

    pub async fn bearer_token(&self) -> Option<String> {
        self.current.read().await.as_ref().map(|user| user.access_token.clone())
    }
}
