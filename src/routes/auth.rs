use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequestParts, Query, State},
    http::request::Parts,
    response::{IntoResponse, Redirect},
    routing::get,
    Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::AppError;
use crate::AppState;

pub const SESSION_COOKIE: &str = "session";

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/start", get(start))
        .route("/callback", get(callback))
        .route("/logout", get(logout).post(logout))
}

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

// ============================================================================
// Signed state and session claims
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OAuthState {
    csrf_token: String,
    iat: usize,
    exp: usize,
}

/// Contents of the session cookie
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Discord user id of the viewer
    pub sub: String,
    pub name: String,
    /// Discord bearer token, used to list the viewer's guilds
    pub access_token: String,
    pub iat: usize,
    pub exp: usize,
}

// ============================================================================
// Handlers
// ============================================================================

/// Send the viewer to Discord to sign in
async fn start(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    let now = Utc::now();
    let claims = OAuthState {
        csrf_token: generate_random_string(32),
        iat: now.timestamp() as usize,
        exp: (now + Duration::minutes(10)).timestamp() as usize,
    };

    // Signed state means no CSRF cookie is needed
    let state_jwt = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(state.config.session.secret.as_bytes()),
    )?;

    Ok(Redirect::to(&state.discord.authorize_url(&state_jwt)))
}

async fn callback(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(query): Query<CallbackQuery>,
) -> Result<impl IntoResponse, AppError> {
    if let Some(error) = query.error {
        let description = query.error_description.unwrap_or_default();
        tracing::warn!("OAuth error: {} - {}", error, description);
        return Err(AppError::BadRequest(format!("OAuth error: {}", error)));
    }

    let code = query
        .code
        .ok_or_else(|| AppError::BadRequest("Missing authorization code".to_string()))?;
    let state_encoded = query
        .state
        .ok_or_else(|| AppError::BadRequest("Missing state parameter".to_string()))?;

    decode::<OAuthState>(
        &state_encoded,
        &DecodingKey::from_secret(state.config.session.secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| {
        tracing::warn!("Failed to decode OAuth state: {:?}", e);
        e
    })?;

    let token = state.discord.exchange_code(&code).await?;
    let user = state.discord.get_current_user(&token.access_token).await?;

    let session = create_session_token(
        &state.config,
        &user.id,
        user.display_name(),
        &token.access_token,
    )?;
    tracing::info!("Viewer {} signed in", user.id);

    Ok((jar.add(session_cookie(&state.config, session)), Redirect::to("/")))
}

async fn logout(jar: CookieJar) -> impl IntoResponse {
    (
        jar.remove(Cookie::build(SESSION_COOKIE).path("/")),
        Redirect::to("/"),
    )
}

// ============================================================================
// Helpers
// ============================================================================

/// Generate a random string of specified length
fn generate_random_string(length: usize) -> String {
    use rand::Rng;
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}

fn same_site(config: &Config) -> SameSite {
    match config
        .server
        .cookie_same_site
        .as_deref()
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("strict") => SameSite::Strict,
        Some("none") => SameSite::None,
        _ => SameSite::Lax,
    }
}

fn session_cookie(config: &Config, token: String) -> Cookie<'static> {
    let same_site = same_site(config);
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        // Browsers drop SameSite=None cookies that are not Secure
        .secure(config.cookie_secure() || same_site == SameSite::None)
        .same_site(same_site)
        .build()
}

/// Create the signed session token for a viewer
pub fn create_session_token(
    config: &Config,
    viewer_id: &str,
    name: &str,
    access_token: &str,
) -> Result<String, AppError> {
    let now = Utc::now();
    let claims = SessionClaims {
        sub: viewer_id.to_string(),
        name: name.to_string(),
        access_token: access_token.to_string(),
        iat: now.timestamp() as usize,
        exp: (now + Duration::hours(config.session.expiration_hours)).timestamp() as usize,
    };

    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.session.secret.as_bytes()),
    )?)
}

fn decode_session_token(config: &Config, token: &str) -> Result<SessionClaims, AppError> {
    let token_data = decode::<SessionClaims>(
        token,
        &DecodingKey::from_secret(config.session.secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

// ============================================================================
// Session Extractor
// ============================================================================

/// The signed-in viewer, read from the session cookie
pub struct ViewerSession(pub SessionClaims);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for ViewerSession {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let token = jar.get(SESSION_COOKIE).map(|c| c.value()).ok_or_else(|| {
            tracing::debug!("No session cookie");
            AppError::Unauthorized
        })?;

        let claims = decode_session_token(&state.config, token).map_err(|e| {
            tracing::debug!("Invalid session cookie: {:?}", e);
            AppError::Unauthorized
        })?;

        Ok(ViewerSession(claims))
    }
}
