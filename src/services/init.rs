//! Initialization helpers for the application:
//! - database connection + migrations
//! - the optional Discord gateway listener

use std::path::Path;

use anyhow::Result;

use crate::config::Config;
use crate::services::events::BotEvents;
use crate::services::gateway::GatewayHandle;

/// Redact potentially sensitive information from a database URL before logging.
///
/// Attempts to parse the URL and remove userinfo (username:password) components.
/// Falls back to removing everything before '@' or returning "(redacted)".
pub fn redact_db_url(db_url: &str) -> String {
    if let Ok(url) = url::Url::parse(db_url) {
        let host = url.host_str().unwrap_or("");
        let port_part = url.port().map(|p| format!(":{}", p)).unwrap_or_default();
        format!("{}://{}{}{}", url.scheme(), host, port_part, url.path())
    } else if let Some(at_pos) = db_url.find('@') {
        format!("(redacted){}", &db_url[at_pos + 1..])
    } else {
        "(redacted)".to_string()
    }
}

/// Open the SQLite pool and run migrations.
///
/// Creates the parent directory for the database file if needed.
pub async fn init_db(config: &Config) -> Result<sqlx::SqlitePool> {
    let db_url = &config.database.url;
    tracing::info!("Connecting to database: {}", redact_db_url(db_url));

    let db_path = db_url.strip_prefix("sqlite://").unwrap_or(db_url);
    let db_file_path = Path::new(db_path);

    if let Some(parent) = db_file_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                anyhow::anyhow!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                )
            })?;
        }
    }

    let existed = db_file_path.exists();

    let connect_options = sqlx::sqlite::SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true);

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect_with(connect_options)
        .await?;

    if existed {
        tracing::info!("Opened database file: {}", db_file_path.display());
    } else {
        tracing::info!("Created database file: {}", db_file_path.display());
    }

    tracing::info!("Running database migrations");
    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Start the Discord gateway listener when a bot token is configured.
///
/// Failures are logged; the dashboard keeps working without the bot.
pub async fn start_discord_gateway(config: &Config, events: BotEvents) -> Option<GatewayHandle> {
    let Some(ref token) = config.discord.bot_token else {
        tracing::info!("DISCORD_BOT_TOKEN not set; chat registration is disabled");
        return None;
    };

    tracing::info!("Starting Discord gateway");
    match GatewayHandle::start(token, events).await {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!("Failed to start Discord gateway: {}", e);
            None
        }
    }
}
