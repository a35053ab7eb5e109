use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::RwLock;

use crate::db::models::Community;
use crate::db::repository::CommunityRepository;
use crate::error::AppResult;

/// Known communities and their owners.
///
/// Reads go through an in-memory map that is loaded from the database on
/// first use. Writes hit the database and then the map under one write lock,
/// and this type is the only writer of either.
#[derive(Clone)]
pub struct CommunityDirectory {
    pool: SqlitePool,
    cache: Arc<RwLock<Option<HashMap<String, Community>>>>,
}

impl CommunityDirectory {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            cache: Arc::new(RwLock::new(None)),
        }
    }

    async fn ensure_loaded(&self) -> AppResult<()> {
        if self.cache.read().await.is_some() {
            return Ok(());
        }

        let mut guard = self.cache.write().await;
        if guard.is_none() {
            let communities = CommunityRepository::list_all(&self.pool).await?;
            tracing::debug!("Loaded {} communities into the directory", communities.len());
            *guard = Some(
                communities
                    .into_iter()
                    .map(|c| (c.id.clone(), c))
                    .collect(),
            );
        }

        Ok(())
    }

    pub async fn known_ids(&self) -> AppResult<HashSet<String>> {
        self.ensure_loaded().await?;
        let guard = self.cache.read().await;
        Ok(guard
            .as_ref()
            .map(|cache| cache.keys().cloned().collect())
            .unwrap_or_default())
    }

    pub async fn get(&self, id: &str) -> AppResult<Option<Community>> {
        self.ensure_loaded().await?;
        let guard = self.cache.read().await;
        Ok(guard.as_ref().and_then(|cache| cache.get(id).cloned()))
    }

    /// Record the community with its current owner (last write wins).
    pub async fn save(
        &self,
        id: &str,
        owner_id: &str,
        owner_display_name: &str,
    ) -> AppResult<Community> {
        // Held across the database write so the map sees writes in the same order
        let mut guard = self.cache.write().await;
        let community =
            CommunityRepository::upsert(&self.pool, id, owner_id, owner_display_name).await?;

        if let Some(cache) = guard.as_mut() {
            cache.insert(community.id.clone(), community.clone());
        }

        Ok(community)
    }

    /// Forget the community. Its stream registrations are left in place.
    pub async fn remove(&self, id: &str) -> AppResult<bool> {
        let mut guard = self.cache.write().await;
        let existed = CommunityRepository::delete(&self.pool, id).await?;

        if let Some(cache) = guard.as_mut() {
            cache.remove(id);
        }

        Ok(existed)
    }
}
