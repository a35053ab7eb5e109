use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;

use crate::db::models::{StreamRegistration, UpsertStreamRegistration};
use crate::db::repository::StreamRegistrationRepository;
use crate::error::AppResult;
use crate::services::live_status::StreamProvider;
use crate::services::parser::{self, ChannelReference};

/// The chat identity issuing a registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registrant {
    pub id: String,
    pub name: String,
    pub tag: String,
}

#[derive(Clone)]
pub struct RegistrationService {
    pool: SqlitePool,
    streams: Arc<dyn StreamProvider>,
    resolve_timeout: Duration,
}

impl RegistrationService {
    pub fn new(pool: SqlitePool, streams: Arc<dyn StreamProvider>, resolve_timeout: Duration) -> Self {
        Self {
            pool,
            streams,
            resolve_timeout,
        }
    }

    /// Parse `raw_text` and store it as the registrant's channel in the community.
    pub async fn register_channel(
        &self,
        community_id: &str,
        registrant: &Registrant,
        raw_text: &str,
    ) -> AppResult<StreamRegistration> {
        let reference = parser::parse(raw_text)?;
        self.register_reference(community_id, registrant, reference)
            .await
    }

    /// Store an already parsed channel, replacing any earlier registration
    /// by the same registrant in this community.
    pub async fn register_reference(
        &self,
        community_id: &str,
        registrant: &Registrant,
        reference: ChannelReference,
    ) -> AppResult<StreamRegistration> {
        let external_user_id = self.resolve_external_id(&reference).await;

        let registration = StreamRegistrationRepository::upsert(
            &self.pool,
            UpsertStreamRegistration {
                community_id: community_id.to_string(),
                registrant_id: registrant.id.clone(),
                registrant_name: registrant.name.clone(),
                registrant_tag: registrant.tag.clone(),
                platform_type: reference.platform_type,
                channel_handle: reference.handle,
                external_user_id,
            },
        )
        .await?;

        tracing::info!(
            community_id = %registration.community_id,
            registrant_id = %registration.registrant_id,
            platform = %registration.platform_type,
            channel = %registration.channel_handle,
            resolved = registration.external_user_id.is_some(),
            "Registered stream channel"
        );

        Ok(registration)
    }

    /// Best-effort lookup of the platform user id. Failures leave the id
    /// unresolved; the dashboard resolves it on a later view.
    async fn resolve_external_id(&self, reference: &ChannelReference) -> Option<String> {
        if !reference.platform_type.requires_id_resolution() {
            return None;
        }

        let handles = std::slice::from_ref(&reference.handle);
        match tokio::time::timeout(
            self.resolve_timeout,
            self.streams.resolve_users_by_handle(handles),
        )
        .await
        {
            Ok(Ok(users)) => {
                let found = users
                    .into_iter()
                    .find(|u| u.handle.eq_ignore_ascii_case(&reference.handle))
                    .map(|u| u.id);
                if found.is_none() {
                    tracing::info!(
                        "Channel {} not found on {}; storing unresolved",
                        reference.handle,
                        reference.platform_type
                    );
                }
                found
            }
            Ok(Err(e)) => {
                tracing::warn!("Failed to resolve channel {}: {}", reference.handle, e);
                None
            }
            Err(_) => {
                tracing::warn!("Timed out resolving channel {}", reference.handle);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::PlatformType;
    use crate::error::{AppError, ParseError};
    use crate::test_support::{test_pool, FakeStreamProvider};

    fn registrant(id: &str) -> Registrant {
        Registrant {
            id: id.to_string(),
            name: "kaitlyn".to_string(),
            tag: "0420".to_string(),
        }
    }

    fn service(pool: &SqlitePool, provider: FakeStreamProvider) -> RegistrationService {
        RegistrationService::new(pool.clone(), Arc::new(provider), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn registers_a_twitch_channel() {
        let pool = test_pool().await;
        let service = service(&pool, FakeStreamProvider::default().with_user("kaitlyn", "99"));

        let registration = service
            .register_channel("G1", &registrant("U1"), "https://www.twitch.tv/kaitlyn")
            .await
            .unwrap();

        assert_eq!(registration.platform_type, PlatformType::Twitch);
        assert_eq!(registration.channel_handle, "kaitlyn");
        assert_eq!(registration.url(), "https://www.twitch.tv/kaitlyn");
        assert_eq!(registration.external_user_id.as_deref(), Some("99"));
        assert_eq!(registration.registrant_tag, "0420");
    }

    #[tokio::test]
    async fn reregistering_replaces_the_channel() {
        let pool = test_pool().await;
        let service = service(&pool, FakeStreamProvider::default());

        let first = service
            .register_channel("G1", &registrant("U1"), "https://www.twitch.tv/kaitlyn")
            .await
            .unwrap();
        let second = service
            .register_channel("G1", &registrant("U1"), "https://twitch.tv/otheruser")
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.channel_handle, "otheruser");

        let rows = StreamRegistrationRepository::list_by_community(&pool, "G1")
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].channel_handle, "otheruser");
    }

    #[tokio::test]
    async fn malformed_input_is_rejected_without_side_effects() {
        let pool = test_pool().await;
        let provider = FakeStreamProvider::default();
        let calls = provider.call_counter();
        let service = service(&pool, provider);

        let err = service
            .register_channel("G1", &registrant("U1"), "not a url")
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Parse(ParseError::MalformedInput)));
        assert!(StreamRegistrationRepository::list_by_community(&pool, "G1")
            .await
            .unwrap()
            .is_empty());
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn provider_outage_still_registers_unresolved() {
        let pool = test_pool().await;
        let service = service(&pool, FakeStreamProvider::default().failing());

        let registration = service
            .register_channel("G1", &registrant("U1"), "https://www.twitch.tv/kaitlyn")
            .await
            .unwrap();

        assert_eq!(registration.external_user_id, None);
    }

    #[tokio::test]
    async fn unknown_channel_is_stored_unresolved() {
        let pool = test_pool().await;
        let service = service(&pool, FakeStreamProvider::default());

        let registration = service
            .register_channel("G1", &registrant("U1"), "https://www.twitch.tv/nobody")
            .await
            .unwrap();

        assert_eq!(registration.channel_handle, "nobody");
        assert_eq!(registration.external_user_id, None);
    }
}
