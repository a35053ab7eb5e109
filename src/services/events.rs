use crate::db::models::Community;
use crate::error::{AppError, AppResult};
use crate::services::directory::CommunityDirectory;
use crate::services::parser;
use crate::services::registration::{Registrant, RegistrationService};

pub const DIRECT_MESSAGE_REPLY: &str = "Private messages are not currently supported";
pub const GENERIC_FAILURE_REPLY: &str =
    "Something went wrong saving your channel. Please try the same command again.";

/// A chat message, as delivered by the gateway adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEvent {
    pub author_id: String,
    pub author_name: String,
    pub author_tag: String,
    /// `None` for direct messages
    pub community_id: Option<String>,
    pub content: String,
    pub is_bot: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRef {
    pub id: String,
    pub name: String,
}

/// A community was created, joined or updated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommunityChangeEvent {
    pub community_id: String,
    pub members: Vec<MemberRef>,
    pub owner_id: String,
}

/// Chat-side entry points into the directory.
#[derive(Clone)]
pub struct BotEvents {
    registration: RegistrationService,
    directory: CommunityDirectory,
}

impl BotEvents {
    pub fn new(registration: RegistrationService, directory: CommunityDirectory) -> Self {
        Self {
            registration,
            directory,
        }
    }

    /// Handle a chat message. Returns the reply to post, if any.
    pub async fn on_message(&self, event: &MessageEvent) -> Option<String> {
        if event.is_bot {
            return None;
        }

        let command = parser::parse_command(&event.content)?;

        let Some(community_id) = event.community_id.as_deref() else {
            return Some(DIRECT_MESSAGE_REPLY.to_string());
        };

        let registrant = Registrant {
            id: event.author_id.clone(),
            name: event.author_name.clone(),
            tag: event.author_tag.clone(),
        };

        let result = match command.reference() {
            Ok(reference) => {
                self.registration
                    .register_reference(community_id, &registrant, reference)
                    .await
            }
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(registration) => Some(format!("Added the URL: {}", registration.url())),
            Err(AppError::Parse(e)) => {
                tracing::debug!(
                    community_id = %community_id,
                    registrant_id = %registrant.id,
                    "Rejected registration: {:?}",
                    e
                );
                Some(e.to_string())
            }
            Err(e) => {
                tracing::error!(
                    community_id = %community_id,
                    registrant_id = %registrant.id,
                    "Failed to save registration: {}",
                    e
                );
                Some(GENERIC_FAILURE_REPLY.to_string())
            }
        }
    }

    /// Record the community and its owner. Events whose owner is not in the
    /// member list carry nothing to record and are skipped.
    pub async fn on_community_change(
        &self,
        event: &CommunityChangeEvent,
    ) -> AppResult<Option<Community>> {
        let Some(owner) = event.members.iter().find(|m| m.id == event.owner_id) else {
            tracing::debug!(
                "Owner {} of community {} not among members; skipping",
                event.owner_id,
                event.community_id
            );
            return Ok(None);
        };

        let community = self
            .directory
            .save(&event.community_id, &owner.id, &owner.name)
            .await?;
        tracing::info!(
            community_id = %community.id,
            owner = %community.owner_display_name,
            "Community saved"
        );

        Ok(Some(community))
    }

    /// The bot left the community or it was deleted. Registrations are
    /// retained; views never show communities the directory does not know.
    pub async fn on_community_removed(&self, community_id: &str) -> AppResult<bool> {
        let existed = self.directory.remove(community_id).await?;
        tracing::info!(community_id = %community_id, existed, "Community removed");
        Ok(existed)
    }
}
