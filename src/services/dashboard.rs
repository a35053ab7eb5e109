use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sqlx::SqlitePool;

use crate::db::models::{PlatformType, StreamRegistration};
use crate::db::repository::StreamRegistrationRepository;
use crate::error::{AppError, AppResult};
use crate::services::access::{AccessGate, CommunityRef};
use crate::services::directory::CommunityDirectory;
use crate::services::live_status::{LiveStatusReconciler, StreamProvider};

pub const LIVE_STATUS_UNAVAILABLE: &str = "Unable to fetch live status";

/// A live channel as shown on the dashboard
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveRegistration {
    pub registrant_id: String,
    pub registrant_name: String,
    pub registrant_tag: String,
    pub platform: PlatformType,
    pub channel: String,
    pub url: String,
}

impl From<&StreamRegistration> for LiveRegistration {
    fn from(registration: &StreamRegistration) -> Self {
        LiveRegistration {
            registrant_id: registration.registrant_id.clone(),
            registrant_name: registration.registrant_name.clone(),
            registrant_tag: registration.registrant_tag.clone(),
            platform: registration.platform_type,
            channel: registration.channel().to_string(),
            url: registration.url(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectoryView {
    pub selected_community_id: Option<String>,
    /// Owner of the selected community, when the directory has it
    pub selected_community_owner: Option<String>,
    pub visible_communities: Vec<CommunityRef>,
    pub live_registrations: Vec<LiveRegistration>,
    /// Set when live status could not be fetched; registrations are then empty
    pub live_status_error: Option<String>,
    pub bot_invite_url: String,
}

/// Builds the per-community "who is live" view for a signed-in viewer.
#[derive(Clone)]
pub struct DirectoryService {
    pool: SqlitePool,
    directory: CommunityDirectory,
    streams: Arc<dyn StreamProvider>,
    live_status_timeout: Duration,
    bot_invite_url: String,
}

impl DirectoryService {
    pub fn new(
        pool: SqlitePool,
        directory: CommunityDirectory,
        streams: Arc<dyn StreamProvider>,
        live_status_timeout: Duration,
        bot_invite_url: String,
    ) -> Self {
        Self {
            pool,
            directory,
            streams,
            live_status_timeout,
            bot_invite_url,
        }
    }

    /// Fails with `NotAllowed` when `selected` is not one of the viewer's
    /// visible communities. Without a selection the first visible community
    /// is shown.
    pub async fn get_directory_view(
        &self,
        viewer_communities: &[CommunityRef],
        selected: Option<&str>,
    ) -> AppResult<DirectoryView> {
        let known = self.directory.known_ids().await?;
        let visible = AccessGate::visible_communities(viewer_communities, &known);

        let selected_id = match selected.filter(|id| !id.is_empty()) {
            Some(id) => {
                AccessGate::validate_selection(&visible, id)?;
                Some(id.to_string())
            }
            None => AccessGate::default_selection(&visible).map(|c| c.id.clone()),
        };

        let mut view = DirectoryView {
            selected_community_id: selected_id.clone(),
            selected_community_owner: None,
            visible_communities: visible,
            live_registrations: vec![],
            live_status_error: None,
            bot_invite_url: self.bot_invite_url.clone(),
        };

        let Some(community_id) = selected_id else {
            return Ok(view);
        };

        view.selected_community_owner = self
            .directory
            .get(&community_id)
            .await?
            .map(|c| c.owner_display_name);

        let registrations =
            StreamRegistrationRepository::list_by_community(&self.pool, &community_id).await?;
        let reconciler =
            LiveStatusReconciler::new(&self.pool, self.streams.as_ref(), self.live_status_timeout);

        match reconciler.filter_live(&registrations).await {
            Ok(live) => {
                view.live_registrations = live.iter().map(LiveRegistration::from).collect();
            }
            Err(AppError::UpstreamUnavailable(reason)) => {
                tracing::warn!(
                    community_id = %community_id,
                    "Live status unavailable: {}",
                    reason
                );
                view.live_status_error = Some(LIVE_STATUS_UNAVAILABLE.to_string());
            }
            Err(e) => return Err(e),
        }

        Ok(view)
    }
}
