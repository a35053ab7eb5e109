use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::error::AppError;
use crate::routes::auth::ViewerSession;
use crate::AppState;

pub const DIRECTORY_PATH: &str = "/api/directory";

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/directory", get(get_directory))
}

#[derive(Debug, Deserialize)]
pub struct DirectoryQuery {
    guild: Option<String>,
}

/// Live channels of one of the viewer's guilds
async fn get_directory(
    State(state): State<Arc<AppState>>,
    ViewerSession(session): ViewerSession,
    Query(query): Query<DirectoryQuery>,
) -> Result<Response, AppError> {
    let communities = state
        .viewers
        .list_viewer_communities(&session.access_token)
        .await?;

    match state
        .dashboard
        .get_directory_view(&communities, query.guild.as_deref())
        .await
    {
        Ok(view) => Ok(Json(view).into_response()),
        // Back to the default view without saying whether the guild exists
        Err(AppError::NotAllowed) => {
            tracing::debug!(
                "Viewer {} asked for a guild outside their visible set",
                session.sub
            );
            Ok(Redirect::to(DIRECTORY_PATH).into_response())
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{PlatformType, UpsertStreamRegistration};
    use crate::db::repository::StreamRegistrationRepository;
    use crate::routes::auth::create_session_token;
    use crate::test_support::{test_state_with, FakeStreamProvider, FakeViewerIdentity};
    use axum::{body::Body, http::Request, http::StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn get(state: Arc<AppState>, uri: &str, cookie: Option<String>) -> Response {
        let mut request = Request::builder().uri(uri);
        if let Some(cookie) = cookie {
            request = request.header("cookie", cookie);
        }

        Router::new()
            .nest("/api", router())
            .with_state(state)
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    fn session_cookie(state: &AppState) -> String {
        let token = create_session_token(&state.config, "U1", "kaitlyn", "viewer-token").unwrap();
        format!("session={}", token)
    }

    async fn state() -> Arc<AppState> {
        let provider = FakeStreamProvider::default()
            .with_user("kaitlyn", "id1")
            .with_live("id1");
        let viewers = FakeViewerIdentity::new("viewer-token", &[("1", "Other"), ("2", "Artists")]);
        let state = test_state_with(provider, viewers).await;

        state.directory.save("2", "U9", "owner").await.unwrap();
        state.directory.save("3", "U8", "someone").await.unwrap();
        StreamRegistrationRepository::upsert(
            &state.db,
            UpsertStreamRegistration {
                community_id: "2".to_string(),
                registrant_id: "U1".to_string(),
                registrant_name: "kaitlyn".to_string(),
                registrant_tag: "0420".to_string(),
                platform_type: PlatformType::Twitch,
                channel_handle: "kaitlyn".to_string(),
                external_user_id: None,
            },
        )
        .await
        .unwrap();

        state
    }

    #[tokio::test]
    async fn requires_a_session() {
        let state = state().await;
        let res = get(state, "/api/directory", None).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn shows_live_channels_of_the_default_guild() {
        let state = state().await;
        let cookie = session_cookie(&state);

        let res = get(state, "/api/directory", Some(cookie)).await;

        assert_eq!(res.status(), StatusCode::OK);
        let body = res.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["selected_community_id"], "2");
        assert_eq!(json["visible_communities"].as_array().unwrap().len(), 1);
        assert_eq!(json["live_registrations"][0]["url"], "https://www.twitch.tv/kaitlyn");
        assert_eq!(json["live_registrations"][0]["platform"], "twitch");
    }

    #[tokio::test]
    async fn foreign_guild_redirects_to_default_view() {
        let state = state().await;
        let cookie = session_cookie(&state);

        let res = get(state, "/api/directory?guild=3", Some(cookie)).await;

        assert_eq!(res.status(), StatusCode::SEE_OTHER);
        assert_eq!(res.headers()["location"], DIRECTORY_PATH);
    }

    #[tokio::test]
    async fn unknown_guild_redirects_the_same_way() {
        let state = state().await;
        let cookie = session_cookie(&state);

        let res = get(state, "/api/directory?guild=404", Some(cookie)).await;

        assert_eq!(res.status(), StatusCode::SEE_OTHER);
        assert_eq!(res.headers()["location"], DIRECTORY_PATH);
    }
}
