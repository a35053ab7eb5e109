use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::services::access::CommunityRef;

const DISCORD_API_URL: &str = "https://discord.com/api/v10";
const DISCORD_AUTHORIZE_URL: &str = "https://discord.com/oauth2/authorize";

/// Scopes requested when a viewer signs in to the dashboard
pub const OAUTH_SCOPES: &str = "identify guilds";

/// Supplies the communities the signed-in viewer belongs to.
#[async_trait]
pub trait ViewerIdentity: Send + Sync {
    async fn list_viewer_communities(&self, access_token: &str) -> AppResult<Vec<CommunityRef>>;
}

/// Discord REST client for the dashboard's OAuth2 sign-in.
#[derive(Clone)]
pub struct DiscordService {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
}

#[derive(Debug, Deserialize)]
pub struct DiscordTokenResponse {
    pub access_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscordUser {
    pub id: String,
    pub username: String,
    pub global_name: Option<String>,
}

impl DiscordUser {
    pub fn display_name(&self) -> &str {
        self.global_name.as_deref().unwrap_or(&self.username)
    }
}

/// Partial guild object returned by `GET /users/@me/guilds`
#[derive(Debug, Clone, Deserialize)]
pub struct DiscordGuild {
    pub id: String,
    pub name: String,
}

impl From<DiscordGuild> for CommunityRef {
    fn from(guild: DiscordGuild) -> Self {
        CommunityRef {
            id: guild.id,
            name: guild.name,
        }
    }
}

impl DiscordService {
    pub fn new(config: &Config) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Discord(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            client_id: config.discord.client_id.clone(),
            client_secret: config.discord.client_secret.clone(),
            redirect_uri: config.oauth_redirect_uri(),
        })
    }

    fn api_url(&self, endpoint: &str) -> String {
        format!("{}{}", DISCORD_API_URL, endpoint)
    }

    /// Parse retry_after from a Discord rate limit error response
    fn parse_retry_after(error_text: &str) -> Option<f64> {
        serde_json::from_str::<Value>(error_text)
            .ok()?
            .get("retry_after")?
            .as_f64()
    }

    /// Where to send the viewer to grant the dashboard access
    pub fn authorize_url(&self, state: &str) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}",
            DISCORD_AUTHORIZE_URL,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(OAUTH_SCOPES),
            urlencoding::encode(state)
        )
    }

    /// Link that adds the bot to a guild with the given permission bits
    pub fn bot_invite_url(client_id: &str, permissions: u64) -> String {
        format!(
            "{}?client_id={}&scope=bot&permissions={}",
            DISCORD_AUTHORIZE_URL,
            urlencoding::encode(client_id),
            permissions
        )
    }

    /// Exchange an authorization code for an access token.
    pub async fn exchange_code(&self, code: &str) -> AppResult<DiscordTokenResponse> {
        let response = self
            .client
            .post(self.api_url("/oauth2/token"))
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.redirect_uri.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AppError::Discord(format!("Failed to exchange code for token: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::Discord(format!("Failed to read token response body: {}", e)))?;

        if !status.is_success() {
            return Err(AppError::Discord(format!(
                "Discord token exchange failed ({}): {}",
                status, body
            )));
        }

        serde_json::from_str::<DiscordTokenResponse>(&body)
            .map_err(|e| AppError::Discord(format!("Failed to parse token response: {}", e)))
    }

    /// Fetch the user object for a bearer token
    pub async fn get_current_user(&self, access_token: &str) -> AppResult<DiscordUser> {
        let body = self.get_with_bearer("/users/@me", access_token).await?;

        serde_json::from_str::<DiscordUser>(&body)
            .map_err(|e| AppError::Discord(format!("Failed to parse user response: {}", e)))
    }

    /// Guilds the bearer token's user is a member of
    pub async fn get_current_user_guilds(&self, access_token: &str) -> AppResult<Vec<DiscordGuild>> {
        let body = self.get_with_bearer("/users/@me/guilds", access_token).await?;

        serde_json::from_str::<Vec<DiscordGuild>>(&body)
            .map_err(|e| AppError::Discord(format!("Failed to parse guilds response: {}", e)))
    }

    /// GET with a user bearer token. A revoked or expired token is reported
    /// as `Unauthorized`; one rate-limited attempt is retried after the
    /// advertised delay.
    async fn get_with_bearer(&self, endpoint: &str, access_token: &str) -> AppResult<String> {
        let url = self.api_url(endpoint);
        let mut retried = false;

        loop {
            let response = self
                .client
                .get(&url)
                .bearer_auth(access_token)
                .send()
                .await
                .map_err(|e| AppError::Discord(format!("Failed to call {}: {}", endpoint, e)))?;

            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| AppError::Discord(format!("Failed to read response body: {}", e)))?;

            if status == reqwest::StatusCode::UNAUTHORIZED {
                tracing::debug!("Discord rejected viewer token for {}", endpoint);
                return Err(AppError::Unauthorized);
            }

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS && !retried {
                let retry_after = Self::parse_retry_after(&body).ok_or_else(|| {
                    AppError::Discord(format!(
                        "Rate limited but could not parse retry_after: {}",
                        body
                    ))
                })?;
                let wait = std::time::Duration::from_secs_f64(retry_after.max(0.0));
                tracing::warn!("Discord rate limit hit, waiting {:?} before retry", wait);
                tokio::time::sleep(wait).await;
                retried = true;
                continue;
            }

            if !status.is_success() {
                return Err(AppError::Discord(format!(
                    "Discord API error ({}): {}",
                    status, body
                )));
            }

            return Ok(body);
        }
    }
}

#[async_trait]
impl ViewerIdentity for DiscordService {
    async fn list_viewer_communities(&self, access_token: &str) -> AppResult<Vec<CommunityRef>> {
        let guilds = self.get_current_user_guilds(access_token).await?;
        Ok(guilds.into_iter().map(CommunityRef::from).collect())
    }
}
