use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use axum::{
    response::{IntoResponse, Redirect},
    routing::get,
    Router,
};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use axum::body::Body;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::key_extractor::SmartIpKeyExtractor;
use tower_governor::{GovernorError, GovernorLayer};

mod config;
mod db;
mod error;
mod middleware;
mod routes;
mod services;
#[cfg(test)]
mod test_support;

use config::Config;
use error::AppError;
use routes::directory::DIRECTORY_PATH;
use services::{
    dashboard::DirectoryService,
    directory::CommunityDirectory,
    discord::{DiscordService, ViewerIdentity},
    events::BotEvents,
    init,
    live_status::StreamProvider,
    registration::RegistrationService,
    twitch::TwitchService,
};

pub struct AppState {
    pub db: sqlx::SqlitePool,
    pub config: Config,
    pub directory: CommunityDirectory,
    pub dashboard: DirectoryService,
    pub discord: DiscordService,
    pub viewers: Arc<dyn ViewerIdentity>,
}

/// All routes except the rate limiter, which the caller applies to `auth_routes`.
pub fn build_router(state: Arc<AppState>, auth_routes: Router<Arc<AppState>>) -> Router {
    Router::new()
        .route("/", get(|| async { Redirect::to(DIRECTORY_PATH) }))
        .route("/health", get(routes::health::health_check))
        .nest("/auth", auth_routes)
        .nest("/api", routes::directory::router())
        .with_state(state)
        .layer(axum::middleware::from_fn(middleware::csp::csp_middleware))
        .layer(TraceLayer::new_for_http())
}

fn rate_limited(error: GovernorError) -> http::Response<Body> {
    match error {
        GovernorError::TooManyRequests { wait_time, headers } => {
            let mut resp = AppError::RateLimited.into_response();
            if let Some(hmap) = headers {
                for (name, value) in hmap.iter() {
                    resp.headers_mut().append(name.clone(), value.clone());
                }
            }
            resp.headers_mut()
                .insert(http::header::RETRY_AFTER, http::HeaderValue::from(wait_time));
            resp
        }
        GovernorError::UnableToExtractKey => AppError::BadRequest(
            "Unable to determine client IP for rate limiting".to_string(),
        )
        .into_response(),
        GovernorError::Other { msg, .. } => AppError::Internal(anyhow::anyhow!(
            msg.unwrap_or_else(|| "Rate limiting error".to_string())
        ))
        .into_response(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to bind SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "discord_streamers=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    tracing::info!("Starting Discord Streamers");

    let pool = init::init_db(&config).await?;

    let live_status_timeout = Duration::from_secs(config.live_status.timeout_seconds);
    let twitch: Arc<dyn StreamProvider> = Arc::new(TwitchService::new(&config)?);
    let discord = DiscordService::new(&config)?;
    let directory = CommunityDirectory::new(pool.clone());

    let bot_invite_url =
        DiscordService::bot_invite_url(&config.discord.client_id, config.discord.bot_permissions);
    tracing::info!("Add the bot to a server with: {}", bot_invite_url);

    let dashboard = DirectoryService::new(
        pool.clone(),
        directory.clone(),
        twitch.clone(),
        live_status_timeout,
        bot_invite_url,
    );
    let registration = RegistrationService::new(pool.clone(), twitch, live_status_timeout);
    let events = BotEvents::new(registration, directory.clone());

    let gateway = init::start_discord_gateway(&config, events).await;

    let app_state = Arc::new(AppState {
        db: pool,
        config: config.clone(),
        directory,
        dashboard,
        discord: discord.clone(),
        viewers: Arc::new(discord),
    });

    let mut auth_builder = GovernorConfigBuilder::default().key_extractor(SmartIpKeyExtractor);
    auth_builder
        .per_second(config.rate_limit.auth_per_second.into())
        .burst_size(config.rate_limit.auth_burst)
        .error_handler(rate_limited);

    let auth_gov_conf = Arc::new(
        auth_builder
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Failed to build auth governor config"))?,
    );

    // Background cleanup for auth limiter storage
    let thread_shutdown = Arc::new(AtomicBool::new(false));
    let auth_cleaner = {
        let limiter = auth_gov_conf.limiter().clone();
        let flag = thread_shutdown.clone();
        std::thread::spawn(move || {
            let tick = Duration::from_secs(1);
            loop {
                for _ in 0..60 {
                    if flag.load(Ordering::SeqCst) {
                        return;
                    }
                    std::thread::sleep(tick);
                }
                tracing::debug!("auth rate limiter size: {}", limiter.len());
                limiter.retain_recent();
            }
        })
    };

    let auth_routes = routes::auth::router().layer(GovernorLayer {
        config: auth_gov_conf,
    });
    let app = build_router(app_state, auth_routes);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    if let Err(e) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    {
        tracing::error!("Server error: {}", e);
    }

    if let Some(gateway) = gateway {
        gateway.shutdown().await;
    }

    thread_shutdown.store(true, Ordering::SeqCst);
    if let Err(e) = auth_cleaner.join() {
        tracing::warn!("Auth cleanup thread join failed: {:?}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
