//! Shared state for the HTTP server.

use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

use crate::store::{StoreError, WorkflowStore};
use crate::workflow::types::{User, UserId};
use crate::workflow::WorkflowEngine;

pub struct AppState<S: WorkflowStore> {
    pub engine: Arc<WorkflowEngine<S>>,
    users: Cache<UserId, User>,
}

impl<S: WorkflowStore> AppState<S> {
    pub fn new(engine: Arc<WorkflowEngine<S>>, user_cache_ttl: Duration) -> Self {
        Self {
            engine,
            users: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(user_cache_ttl)
                .build(),
        }
    }

    /// Look a caller up, serving repeats from the cache.
    pub async fn resolve_user(&self, user_id: UserId) -> Result<Option<User>, StoreError> {
        if let Some(user) = self.users.get(&user_id).await {
            return Ok(Some(user));
        }
        let user = self.engine.store().get_user(user_id).await?;
        if let Some(user) = &user {
            self.users.insert(user_id, user.clone()).await;
        }
        Ok(user)
    }
}
