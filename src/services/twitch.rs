use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::Config;
use crate::db::models::PlatformType;
use crate::error::{AppError, AppResult};
use crate::services::live_status::{LiveStream, ResolvedUser, StreamProvider};

const TWITCH_AUTH_URL: &str = "https://id.twitch.tv/oauth2";
const TWITCH_API_URL: &str = "https://api.twitch.tv/helix";

/// Helix accepts at most this many `login` / `user_id` parameters per request.
const MAX_IDS_PER_REQUEST: usize = 100;

#[derive(Debug, Clone)]
pub struct TwitchService {
    client: Client,
    client_id: String,
    client_secret: String,
    app_access_token: Arc<RwLock<Option<AppAccessToken>>>,
}

#[derive(Debug, Clone)]
pub struct AppAccessToken {
    pub token: String,
    pub expires_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct AppAccessTokenResponse {
    pub access_token: String,
    pub expires_in: i64,
}

// ============================================================================
// User Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct TwitchUsersResponse {
    pub data: Vec<TwitchUser>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TwitchUser {
    pub id: String,
    pub login: String,
}

// ============================================================================
// Stream Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StreamsResponse {
    pub data: Vec<Stream>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Stream {
    pub user_id: String,
    #[serde(rename = "type")]
    pub stream_type: String,
}

impl TwitchService {
    /// The app access token is fetched on first use, so construction never
    /// talks to Twitch.
    pub fn new(config: &Config) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Internal(e.into()))?;

        Ok(Self {
            client,
            client_id: config.twitch.client_id.clone(),
            client_secret: config.twitch.client_secret.clone(),
            app_access_token: Arc::new(RwLock::new(None)),
        })
    }

    /// Fetch a new app access token (client credentials grant) and store it.
    pub async fn refresh_app_access_token(&self) -> AppResult<()> {
        let response = self
            .send_with_backoff(|| {
                self.client
                    .post(format!("{}/token", TWITCH_AUTH_URL))
                    .form(&[
                        ("client_id", self.client_id.as_str()),
                        ("client_secret", self.client_secret.as_str()),
                        ("grant_type", "client_credentials"),
                    ])
            })
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::TwitchApi(format!(
                "Failed to get app access token: {}",
                error_text
            )));
        }

        let token_response: AppAccessTokenResponse = response
            .json()
            .await
            .map_err(|e| AppError::TwitchApi(format!("Failed to parse token response: {}", e)))?;

        let expires_at = Utc::now() + Duration::seconds(token_response.expires_in);
        let mut guard = self.app_access_token.write().await;
        *guard = Some(AppAccessToken {
            token: token_response.access_token,
            expires_at,
        });

        tracing::info!(
            "Refreshed Twitch app access token; expires at {}",
            expires_at
        );

        Ok(())
    }

    /// Get a valid app access token, refreshing it if it would expire soon.
    pub async fn get_valid_app_access_token(&self) -> AppResult<String> {
        const REFRESH_MARGIN_SECS: i64 = 60;

        {
            let guard = self.app_access_token.read().await;
            if let Some(ref t) = *guard {
                if t.expires_at - Duration::seconds(REFRESH_MARGIN_SECS) > Utc::now() {
                    return Ok(t.token.clone());
                }
            }
        }

        self.refresh_app_access_token().await?;

        let guard = self.app_access_token.read().await;
        guard
            .as_ref()
            .map(|t| t.token.clone())
            .ok_or_else(|| AppError::TwitchApi("No app access token available".to_string()))
    }

    // ========================================================================
    // User Methods
    // ========================================================================

    /// Get users by logins. Logins Twitch does not know are missing from the result.
    ///
    /// Helix answers 400 for the whole request if any login is malformed, so
    /// those are dropped before sending.
    pub async fn get_users_by_logins(&self, logins: &[String]) -> AppResult<Vec<TwitchUser>> {
        let logins: Vec<String> = logins
            .iter()
            .filter(|login| {
                let valid = PlatformType::Twitch.is_valid_handle(login);
                if !valid {
                    tracing::debug!("Not sending malformed Twitch login {:?}", login);
                }
                valid
            })
            .cloned()
            .collect();
        let mut users = Vec::with_capacity(logins.len());

        for chunk in logins.chunks(MAX_IDS_PER_REQUEST) {
            let query = repeated_query("login", chunk);
            let response = self
                .send_app_request_with_token(|token| {
                    self.client
                        .get(format!("{}/users?{}", TWITCH_API_URL, query))
                        .header("Authorization", format!("Bearer {}", token))
                        .header("Client-Id", &self.client_id)
                })
                .await?;

            if !response.status().is_success() {
                let error_text = response.text().await.unwrap_or_default();
                return Err(AppError::TwitchApi(format!(
                    "Failed to get users: {}",
                    error_text
                )));
            }

            let page: TwitchUsersResponse = response.json().await.map_err(|e| {
                AppError::TwitchApi(format!("Failed to parse users response: {}", e))
            })?;
            users.extend(page.data);
        }

        Ok(users)
    }

    // ========================================================================
    // Stream Methods
    // ========================================================================

    /// Get live streams by user IDs. Offline users are missing from the result.
    pub async fn get_streams(&self, user_ids: &[String]) -> AppResult<Vec<Stream>> {
        let mut streams = Vec::new();

        for chunk in user_ids.chunks(MAX_IDS_PER_REQUEST) {
            let query = format!(
                "{}&first={}",
                repeated_query("user_id", chunk),
                MAX_IDS_PER_REQUEST
            );
            let response = self
                .send_app_request_with_token(|token| {
                    self.client
                        .get(format!("{}/streams?{}", TWITCH_API_URL, query))
                        .header("Authorization", format!("Bearer {}", token))
                        .header("Client-Id", &self.client_id)
                })
                .await?;

            if !response.status().is_success() {
                let error_text = response.text().await.unwrap_or_default();
                return Err(AppError::TwitchApi(format!(
                    "Failed to get streams: {}",
                    error_text
                )));
            }

            let page: StreamsResponse = response.json().await.map_err(|e| {
                AppError::TwitchApi(format!("Failed to parse streams response: {}", e))
            })?;
            streams.extend(page.data);
        }

        Ok(streams)
    }

    /// Send a request, retrying on 429, 5xx and network errors with
    /// exponential backoff. Other statuses are returned to the caller.
    async fn send_with_backoff<F>(&self, make_request: F) -> AppResult<reqwest::Response>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        const MAX_RETRIES: usize = 5;
        let mut backoff_secs: u64 = 1;
        let max_backoff_secs: u64 = 60;

        for attempt in 0..MAX_RETRIES {
            match (make_request)().send().await {
                Ok(resp) => {
                    if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS
                        || resp.status().is_server_error()
                    {
                        let wait_secs = resp
                            .headers()
                            .get("retry-after")
                            .and_then(|h| h.to_str().ok())
                            .and_then(|s| s.parse::<u64>().ok())
                            .unwrap_or(backoff_secs);

                        tracing::warn!(
                            "Transient Twitch error (status: {}). Retrying in {}s (attempt {}/{})",
                            resp.status(),
                            wait_secs,
                            attempt + 1,
                            MAX_RETRIES
                        );

                        if attempt + 1 >= MAX_RETRIES {
                            let err_text = resp.text().await.unwrap_or_default();
                            return Err(AppError::TwitchApi(format!(
                                "Failed after {} attempts: {}",
                                attempt + 1,
                                err_text
                            )));
                        }

                        tokio::time::sleep(std::time::Duration::from_secs(wait_secs)).await;
                        backoff_secs = std::cmp::min(backoff_secs * 2, max_backoff_secs);
                        continue;
                    }

                    return Ok(resp);
                }
                Err(e) => {
                    if attempt + 1 >= MAX_RETRIES {
                        return Err(e.into());
                    }
                    tracing::warn!(
                        "HTTP request failed: {}. Retrying in {}s (attempt {}/{})",
                        e,
                        backoff_secs,
                        attempt + 1,
                        MAX_RETRIES
                    );
                    tokio::time::sleep(std::time::Duration::from_secs(backoff_secs)).await;
                    backoff_secs = std::cmp::min(backoff_secs * 2, max_backoff_secs);
                }
            }
        }

        Err(AppError::TwitchApi(
            "Exceeded Twitch retry attempts".to_string(),
        ))
    }

    /// Run a request that needs the app access token. On 401 the token is
    /// refreshed and the request retried once.
    async fn send_app_request_with_token<F>(&self, make_request: F) -> AppResult<reqwest::Response>
    where
        F: Fn(&str) -> reqwest::RequestBuilder,
    {
        let mut refreshed_token = false;
        loop {
            let token = self.get_valid_app_access_token().await?;
            let response = self.send_with_backoff(|| make_request(&token)).await?;

            if response.status() != reqwest::StatusCode::UNAUTHORIZED {
                return Ok(response);
            }

            if refreshed_token {
                let error_text = response.text().await.unwrap_or_default();
                return Err(AppError::TwitchApi(format!(
                    "Unauthorized Twitch app request: {}",
                    error_text
                )));
            }

            tracing::warn!("Unauthorized Twitch app request. Refreshing token and retrying.");
            self.refresh_app_access_token().await?;
            refreshed_token = true;
        }
    }
}

#[async_trait]
impl StreamProvider for TwitchService {
    async fn resolve_users_by_handle(&self, handles: &[String]) -> AppResult<Vec<ResolvedUser>> {
        let users = self.get_users_by_logins(handles).await?;

        Ok(users
            .into_iter()
            .map(|user| ResolvedUser {
                handle: user.login,
                id: user.id,
            })
            .collect())
    }

    async fn get_live_streams(&self, user_ids: &[String]) -> AppResult<Vec<LiveStream>> {
        let streams = self.get_streams(user_ids).await?;

        Ok(streams
            .into_iter()
            // Helix reports "" for streams that ended but are still cached
            .filter(|stream| stream.stream_type == "live")
            .map(|stream| LiveStream {
                user_id: stream.user_id,
            })
            .collect())
    }
}

/// `name=a&name=b&…`, percent-encoding each value
fn repeated_query(name: &str, values: &[String]) -> String {
    values
        .iter()
        .map(|value| format!("{}={}", name, urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}
