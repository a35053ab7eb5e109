use std::env;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub twitch: TwitchConfig,
    pub discord: DiscordConfig,
    pub session: SessionConfig,
    pub live_status: LiveStatusConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Externally reachable base URL; the Discord OAuth redirect is built from it.
    pub public_url: String,
    /// Whether to set the `Secure` flag on cookies.
    /// If `None`, inferred from `public_url` (`https` -> true).
    /// Read from env var `COOKIE_SECURE` (accepted values: "true"/"false", "1"/"0", "yes"/"no").
    pub cookie_secure: Option<bool>,
    /// Preferred SameSite value for cookies. Read from env var `COOKIE_SAMESITE`
    /// (accepted values: "Lax", "Strict", "None").
    pub cookie_same_site: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TwitchConfig {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscordConfig {
    /// Gateway bot token. Without it the registration listener is not started.
    pub bot_token: Option<String>,
    pub client_id: String,
    pub client_secret: String,
    /// Permission bits requested by the "add the bot" invite link
    pub bot_permissions: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub secret: String,
    pub expiration_hours: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LiveStatusConfig {
    /// Upper bound for each call to the streaming provider during a dashboard view
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Allowed requests per second (per IP) for the /auth endpoints
    pub auth_per_second: u32,
    /// Burst size for the /auth endpoints
    pub auth_burst: u32,
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Ok(Config {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "3000".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?,
                public_url: env::var("PUBLIC_URL")
                    .unwrap_or_else(|_| "http://localhost:3000".to_string()),
                cookie_secure: env::var("COOKIE_SECURE").ok().and_then(|v| parse_bool(&v)),
                cookie_same_site: env::var("COOKIE_SAMESITE").ok(),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://data/streamers.db".to_string()),
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
            },
            twitch: TwitchConfig {
                client_id: env::var("TWITCH_CLIENT_ID")
                    .map_err(|_| ConfigError::MissingEnv("TWITCH_CLIENT_ID".to_string()))?,
                client_secret: env::var("TWITCH_CLIENT_SECRET")
                    .map_err(|_| ConfigError::MissingEnv("TWITCH_CLIENT_SECRET".to_string()))?,
            },
            discord: DiscordConfig {
                bot_token: env::var("DISCORD_BOT_TOKEN").ok().filter(|t| !t.is_empty()),
                client_id: env::var("DISCORD_CLIENT_ID")
                    .map_err(|_| ConfigError::MissingEnv("DISCORD_CLIENT_ID".to_string()))?,
                client_secret: env::var("DISCORD_CLIENT_SECRET")
                    .map_err(|_| ConfigError::MissingEnv("DISCORD_CLIENT_SECRET".to_string()))?,
                bot_permissions: env::var("DISCORD_BOT_PERMISSIONS")
                    .unwrap_or_else(|_| "1".to_string())
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("DISCORD_BOT_PERMISSIONS".to_string()))?,
            },
            session: SessionConfig {
                secret: env::var("SESSION_SECRET")
                    .map_err(|_| ConfigError::MissingEnv("SESSION_SECRET".to_string()))?,
                expiration_hours: env::var("SESSION_EXPIRATION_HOURS")
                    .unwrap_or_else(|_| "24".to_string())
                    .parse()
                    .unwrap_or(24),
            },
            live_status: LiveStatusConfig {
                timeout_seconds: env::var("LIVE_STATUS_TIMEOUT_SECONDS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
            },
            rate_limit: RateLimitConfig {
                auth_per_second: env::var("RATE_LIMIT_AUTH_PER_SECOND")
                    .unwrap_or_else(|_| "3".to_string())
                    .parse()
                    .unwrap_or(3),
                auth_burst: env::var("RATE_LIMIT_AUTH_BURST")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
            },
        })
    }

    /// Whether session cookies should carry the `Secure` flag
    pub fn cookie_secure(&self) -> bool {
        self.server
            .cookie_secure
            .unwrap_or_else(|| self.server.public_url.starts_with("https://"))
    }

    /// OAuth redirect URI registered with Discord
    pub fn oauth_redirect_uri(&self) -> String {
        format!(
            "{}/auth/callback",
            self.server.public_url.trim_end_matches('/')
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
                public_url: "http://localhost:3000".to_string(),
                cookie_secure: None,
                cookie_same_site: None,
            },
            database: DatabaseConfig {
                url: "sqlite://data/streamers.db".to_string(),
                max_connections: 5,
            },
            twitch: TwitchConfig {
                client_id: String::new(),
                client_secret: String::new(),
            },
            discord: DiscordConfig {
                bot_token: None,
                client_id: String::new(),
                client_secret: String::new(),
                bot_permissions: 1,
            },
            session: SessionConfig {
                secret: String::new(),
                expiration_hours: 24,
            },
            live_status: LiveStatusConfig { timeout_seconds: 5 },
            rate_limit: RateLimitConfig {
                auth_per_second: 3,
                auth_burst: 10,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_uri_ignores_trailing_slash() {
        let mut config = Config::default();
        config.server.public_url = "https://streamers.example.com/".to_string();
        assert_eq!(
            config.oauth_redirect_uri(),
            "https://streamers.example.com/auth/callback"
        );
        assert!(config.cookie_secure());
    }

    #[test]
    fn explicit_cookie_secure_wins() {
        let mut config = Config::default();
        config.server.cookie_secure = Some(true);
        assert!(config.cookie_secure());
    }

    #[test]
    fn bool_values() {
        assert_eq!(parse_bool("Yes"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
