use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::db::models::{PlatformType, StreamRegistration};
use crate::db::repository::StreamRegistrationRepository;
use crate::error::{AppError, AppResult};

/// A platform account found by its handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedUser {
    pub handle: String,
    pub id: String,
}

/// A broadcast that is currently running
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveStream {
    pub user_id: String,
}

/// The external streaming provider, as seen by the directory.
#[async_trait]
pub trait StreamProvider: Send + Sync {
    /// Look up platform user ids for `handles`. Unknown handles are simply
    /// missing from the result.
    async fn resolve_users_by_handle(&self, handles: &[String]) -> AppResult<Vec<ResolvedUser>>;

    /// Streams currently live for any of the given platform user ids
    async fn get_live_streams(&self, user_ids: &[String]) -> AppResult<Vec<LiveStream>>;
}

/// Filters registrations down to the ones that are broadcasting right now.
pub struct LiveStatusReconciler<'a> {
    pool: &'a SqlitePool,
    provider: &'a dyn StreamProvider,
    timeout: Duration,
}

impl<'a> LiveStatusReconciler<'a> {
    pub fn new(pool: &'a SqlitePool, provider: &'a dyn StreamProvider, timeout: Duration) -> Self {
        Self {
            pool,
            provider,
            timeout,
        }
    }

    /// Return the subset of `registrations` whose channel is live.
    ///
    /// Handles that were never resolved to a platform user id are resolved
    /// first and the ids are written back to the registry. The returned rows
    /// are read fresh from the registry, restricted to the input scope.
    pub async fn filter_live(
        &self,
        registrations: &[StreamRegistration],
    ) -> AppResult<Vec<StreamRegistration>> {
        if registrations.is_empty() {
            return Ok(vec![]);
        }

        let mut user_ids: BTreeSet<String> = registrations
            .iter()
            .filter_map(|r| r.external_user_id.clone())
            .collect();

        let mut unresolved: BTreeMap<String, PlatformType> = BTreeMap::new();
        for r in registrations
            .iter()
            .filter(|r| r.external_user_id.is_none() && r.platform_type.requires_id_resolution())
        {
            // One malformed login makes the provider reject the whole batch
            if !r.platform_type.is_valid_handle(&r.channel_handle) {
                tracing::debug!(
                    registration_id = %r.id,
                    handle = %r.channel_handle,
                    "Skipping handle that can never resolve"
                );
                continue;
            }
            unresolved.insert(r.channel_handle.clone(), r.platform_type);
        }

        if !unresolved.is_empty() {
            let handles: Vec<String> = unresolved.keys().cloned().collect();
            let resolved = self
                .bounded("user lookup", self.provider.resolve_users_by_handle(&handles))
                .await?;

            let mut resolved_count = 0;
            for user in resolved {
                let handle = user.handle.to_lowercase();
                let Some(platform_type) = unresolved.get(&handle) else {
                    continue;
                };

                let updated = StreamRegistrationRepository::set_external_user_id(
                    self.pool,
                    *platform_type,
                    &handle,
                    &user.id,
                )
                .await?;
                tracing::debug!(
                    handle = %handle,
                    external_user_id = %user.id,
                    rows = updated,
                    "Resolved channel handle"
                );

                user_ids.insert(user.id);
                resolved_count += 1;
            }

            let missing = unresolved.len().saturating_sub(resolved_count);
            if missing > 0 {
                tracing::debug!("{} registered channels could not be resolved", missing);
            }
        }

        if user_ids.is_empty() {
            return Ok(vec![]);
        }

        let user_ids: Vec<String> = user_ids.into_iter().collect();
        let streams = self
            .bounded("live stream lookup", self.provider.get_live_streams(&user_ids))
            .await?;

        let live_ids: Vec<String> = streams
            .into_iter()
            .map(|s| s.user_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let scope: HashSet<(&str, &str)> = registrations
            .iter()
            .map(|r| (r.community_id.as_str(), r.registrant_id.as_str()))
            .collect();

        let live = StreamRegistrationRepository::list_by_external_user_ids(self.pool, &live_ids)
            .await?
            .into_iter()
            .filter(|r| scope.contains(&(r.community_id.as_str(), r.registrant_id.as_str())))
            .collect();

        Ok(live)
    }

    /// Run a provider call under the configured timeout. Any failure of the
    /// provider, including the timeout, is reported as `UpstreamUnavailable`.
    async fn bounded<T, F>(&self, what: &str, call: F) -> AppResult<T>
    where
        F: Future<Output = AppResult<T>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(AppError::UpstreamUnavailable(format!("{}: {}", what, e))),
            Err(_) => Err(AppError::UpstreamUnavailable(format!(
                "{} timed out after {:?}",
                what, self.timeout
            ))),
        }
    }
}
