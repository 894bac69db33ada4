//! User repository: whole-aggregate snapshot round-trips. Load, mutate in
//! memory, persist the entire aggregate back; no partial updates.

use async_trait::async_trait;

use crate::domain::User;
use crate::error::{KbragError, Result};
use crate::locations::Locations;
use crate::storage::FileStore;

/// Repository seam for the user aggregate.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Load the user aggregate; fails `NotFound` when the user does not
    /// exist.
    async fn retrieve(&self, username: &str) -> Result<User>;

    /// Persist the whole aggregate, replacing the previous snapshot.
    async fn persist(&self, user: &User) -> Result<()>;
}

/// JSON-file-backed user store: one aggregate file per user at the path
/// the location resolver computes, written atomically.
pub struct JsonUserStore {
    store: FileStore,
    locations: Locations,
}

impl JsonUserStore {
    pub fn new(store: FileStore, locations: Locations) -> Self {
        Self { store, locations }
    }
}

#[async_trait]
impl UserStore for JsonUserStore {
    async fn retrieve(&self, username: &str) -> Result<User> {
        let path = self.locations.user_file(username);
        self.store.read_json(&path).await.map_err(|e| match e {
            KbragError::Storage(io) if io.kind() == std::io::ErrorKind::NotFound => {
                KbragError::NotFound(format!("User {} does not exist", username))
            }
            other => other,
        })
    }

    async fn persist(&self, user: &User) -> Result<()> {
        let path = self.locations.user_file(&user.username);
        self.store.write_json_atomic(&path, user).await?;
        log::debug!("Persisted user aggregate for {}", user.username);
        Ok(())
    }
}
