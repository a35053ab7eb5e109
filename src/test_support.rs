//! Shared fixtures for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db::models::PlatformType;
use crate::error::{AppError, AppResult};
use crate::services::access::CommunityRef;
use crate::services::dashboard::DirectoryService;
use crate::services::directory::CommunityDirectory;
use crate::services::discord::{DiscordService, ViewerIdentity};
use crate::services::live_status::{LiveStream, ResolvedUser, StreamProvider};
use crate::AppState;

/// In-memory database with the real migrations applied.
///
/// One connection that never expires, since every new connection to
/// `sqlite::memory:` opens a fresh empty database.
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();

    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

/// Scripted streaming provider that counts the calls made to it.
#[derive(Default)]
pub struct FakeStreamProvider {
    users: HashMap<String, String>,
    live: Vec<String>,
    fail: bool,
    reject_invalid_logins: bool,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl FakeStreamProvider {
    pub fn with_user(mut self, handle: &str, id: &str) -> Self {
        self.users.insert(handle.to_string(), id.to_string());
        self
    }

    pub fn with_live(mut self, id: &str) -> Self {
        self.live.push(id.to_string());
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Fail the whole lookup when any handle is not a valid login, as Helix does
    pub fn rejecting_invalid_logins(mut self) -> Self {
        self.reject_invalid_logins = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Handle to the call count that survives moving the provider into an `Arc`
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    async fn enter(&self) -> AppResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(AppError::TwitchApi("provider down".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl StreamProvider for FakeStreamProvider {
    async fn resolve_users_by_handle(&self, handles: &[String]) -> AppResult<Vec<ResolvedUser>> {
        self.enter().await?;
        if self.reject_invalid_logins
            && handles
                .iter()
                .any(|h| !PlatformType::Twitch.is_valid_handle(h))
        {
            return Err(AppError::TwitchApi(
                "Failed to get users: Invalid login names, emails or IDs in request".to_string(),
            ));
        }
        Ok(handles
            .iter()
            .filter_map(|handle| {
                self.users.get(handle).map(|id| ResolvedUser {
                    handle: handle.clone(),
                    id: id.clone(),
                })
            })
            .collect())
    }

    async fn get_live_streams(&self, user_ids: &[String]) -> AppResult<Vec<LiveStream>> {
        self.enter().await?;
        Ok(user_ids
            .iter()
            .filter(|id| self.live.contains(id))
            .map(|id| LiveStream {
                user_id: id.clone(),
            })
            .collect())
    }
}

/// Viewer identity that knows a single bearer token.
pub struct FakeViewerIdentity {
    access_token: String,
    communities: Vec<CommunityRef>,
}

impl FakeViewerIdentity {
    pub fn new(access_token: &str, communities: &[(&str, &str)]) -> Self {
        Self {
            access_token: access_token.to_string(),
            communities: communities
                .iter()
                .map(|(id, name)| CommunityRef {
                    id: id.to_string(),
                    name: name.to_string(),
                })
                .collect(),
        }
    }
}

#[async_trait]
impl ViewerIdentity for FakeViewerIdentity {
    async fn list_viewer_communities(&self, access_token: &str) -> AppResult<Vec<CommunityRef>> {
        if access_token != self.access_token {
            return Err(AppError::Unauthorized);
        }
        Ok(self.communities.clone())
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.session.secret = "test-session-secret".to_string();
    config.discord.client_id = "1234".to_string();
    config
}

pub async fn test_state() -> Arc<AppState> {
    test_state_with(
        FakeStreamProvider::default(),
        FakeViewerIdentity::new("viewer-token", &[]),
    )
    .await
}

pub async fn test_state_with(
    provider: FakeStreamProvider,
    viewers: FakeViewerIdentity,
) -> Arc<AppState> {
    let config = test_config();
    let pool = test_pool().await;
    let directory = CommunityDirectory::new(pool.clone());
    let dashboard = DirectoryService::new(
        pool.clone(),
        directory.clone(),
        Arc::new(provider),
        Duration::from_secs(5),
        DiscordService::bot_invite_url(&config.discord.client_id, config.discord.bot_permissions),
    );

    Arc::new(AppState {
        db: pool,
        discord: DiscordService::new(&config).unwrap(),
        config,
        directory,
        dashboard,
        viewers: Arc::new(viewers),
    })
}
