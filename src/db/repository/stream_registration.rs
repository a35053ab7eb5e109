use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::db::models::{PlatformType, StreamRegistration, UpsertStreamRegistration};
use crate::error::{AppError, AppResult};

const REGISTRATION_COLUMNS: &str = r#"
    id, community_id, registrant_id, registrant_name, registrant_tag,
    platform_type, channel_handle, external_user_id, created_at, updated_at
"#;

// Intermediate structure for reading from DB (with String for platform_type)
#[derive(sqlx::FromRow)]
struct RowStreamRegistration {
    id: String,
    community_id: String,
    registrant_id: String,
    registrant_name: String,
    registrant_tag: String,
    platform_type: String,
    channel_handle: String,
    external_user_id: Option<String>,
    created_at: chrono::NaiveDateTime,
    updated_at: chrono::NaiveDateTime,
}

impl TryFrom<RowStreamRegistration> for StreamRegistration {
    type Error = AppError;

    fn try_from(row: RowStreamRegistration) -> Result<Self, Self::Error> {
        let platform_type = PlatformType::try_from(row.platform_type)
            .map_err(|e| AppError::Database(sqlx::Error::Decode(Box::new(e))))?;

        Ok(StreamRegistration {
            id: row.id,
            community_id: row.community_id,
            registrant_id: row.registrant_id,
            registrant_name: row.registrant_name,
            registrant_tag: row.registrant_tag,
            platform_type,
            channel_handle: row.channel_handle,
            external_user_id: row.external_user_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn convert_rows(rows: Vec<RowStreamRegistration>) -> AppResult<Vec<StreamRegistration>> {
    rows.into_iter().map(StreamRegistration::try_from).collect()
}

pub struct StreamRegistrationRepository;

impl StreamRegistrationRepository {
    /// Insert or overwrite the registrant's registration for a guild.
    ///
    /// Conflicts on (community_id, registrant_id) are resolved by SQLite in the
    /// same statement, so two concurrent registrations from one registrant can
    /// never produce two rows.
    pub async fn upsert(
        pool: &SqlitePool,
        registration: UpsertStreamRegistration,
    ) -> AppResult<StreamRegistration> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();

        let row = sqlx::query_as::<_, RowStreamRegistration>(&format!(
            r#"
            INSERT INTO stream_registrations (
                id, community_id, registrant_id, registrant_name, registrant_tag,
                platform_type, channel_handle, external_user_id, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (community_id, registrant_id) DO UPDATE SET
                registrant_name = excluded.registrant_name,
                registrant_tag = excluded.registrant_tag,
                platform_type = excluded.platform_type,
                channel_handle = excluded.channel_handle,
                external_user_id = excluded.external_user_id,
                updated_at = excluded.updated_at
            RETURNING {}
            "#,
            REGISTRATION_COLUMNS
        ))
        .bind(&id)
        .bind(&registration.community_id)
        .bind(&registration.registrant_id)
        .bind(&registration.registrant_name)
        .bind(&registration.registrant_tag)
        .bind(registration.platform_type.as_str())
        .bind(&registration.channel_handle)
        .bind(&registration.external_user_id)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)?;

        row.try_into()
    }

    /// All registrations for a guild, ordered for stable rendering
    pub async fn list_by_community(
        pool: &SqlitePool,
        community_id: &str,
    ) -> AppResult<Vec<StreamRegistration>> {
        let rows = sqlx::query_as::<_, RowStreamRegistration>(&format!(
            r#"
            SELECT {}
            FROM stream_registrations
            WHERE community_id = ?
            ORDER BY registrant_name, id
            "#,
            REGISTRATION_COLUMNS
        ))
        .bind(community_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        convert_rows(rows)
    }

    /// Registrations across all guilds whose platform user id is in `ids`
    pub async fn list_by_external_user_ids(
        pool: &SqlitePool,
        ids: &[String],
    ) -> AppResult<Vec<StreamRegistration>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM stream_registrations WHERE external_user_id IN (",
            REGISTRATION_COLUMNS
        ));
        let mut separated = query.separated(", ");
        for id in ids {
            separated.push_bind(id.as_str());
        }
        separated.push_unseparated(") ORDER BY community_id, registrant_name, id");

        let rows = query
            .build_query_as::<RowStreamRegistration>()
            .fetch_all(pool)
            .await
            .map_err(AppError::Database)?;

        convert_rows(rows)
    }

    /// Find the registrant's registration in a guild
    pub async fn find(
        pool: &SqlitePool,
        community_id: &str,
        registrant_id: &str,
    ) -> AppResult<Option<StreamRegistration>> {
        let row = sqlx::query_as::<_, RowStreamRegistration>(&format!(
            r#"
            SELECT {}
            FROM stream_registrations
            WHERE community_id = ? AND registrant_id = ?
            "#,
            REGISTRATION_COLUMNS
        ))
        .bind(community_id)
        .bind(registrant_id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        row.map(StreamRegistration::try_from).transpose()
    }

    /// Record a resolved platform user id on every still-unresolved row
    /// carrying this handle. Returns the number of rows updated.
    pub async fn set_external_user_id(
        pool: &SqlitePool,
        platform_type: PlatformType,
        channel_handle: &str,
        external_user_id: &str,
    ) -> AppResult<u64> {
        let now = Utc::now().naive_utc();

        let result = sqlx::query(
            r#"
            UPDATE stream_registrations
            SET external_user_id = ?, updated_at = ?
            WHERE platform_type = ?
              AND channel_handle = ?
              AND external_user_id IS NULL
            "#,
        )
        .bind(external_user_id)
        .bind(now)
        .bind(platform_type.as_str())
        .bind(channel_handle)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_pool;

    fn registration(community: &str, registrant: &str, handle: &str) -> UpsertStreamRegistration {
        UpsertStreamRegistration {
            community_id: community.to_string(),
            registrant_id: registrant.to_string(),
            registrant_name: format!("name-{}", registrant),
            registrant_tag: "0001".to_string(),
            platform_type: PlatformType::Twitch,
            channel_handle: handle.to_string(),
            external_user_id: None,
        }
    }

    #[tokio::test]
    async fn upsert_twice_leaves_one_row_with_latest_values() {
        let pool = test_pool().await;

        let first = StreamRegistrationRepository::upsert(&pool, registration("g1", "u1", "kaitlyn"))
            .await
            .unwrap();

        let mut again = registration("g1", "u1", "otheruser");
        again.registrant_name = "renamed".to_string();
        again.external_user_id = Some("42".to_string());
        let second = StreamRegistrationRepository::upsert(&pool, again).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.channel_handle, "otheruser");
        assert_eq!(second.registrant_name, "renamed");
        assert_eq!(second.external_user_id.as_deref(), Some("42"));

        let rows = StreamRegistrationRepository::list_by_community(&pool, "g1")
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0], second);
    }

    #[tokio::test]
    async fn identical_upserts_are_idempotent() {
        let pool = test_pool().await;

        for _ in 0..2 {
            StreamRegistrationRepository::upsert(&pool, registration("g1", "u1", "kaitlyn"))
                .await
                .unwrap();
        }

        let rows = StreamRegistrationRepository::list_by_community(&pool, "g1")
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].channel_handle, "kaitlyn");
    }

    #[tokio::test]
    async fn registrants_are_unique_per_community_only() {
        let pool = test_pool().await;

        let upserts = [
            ("g1", "u1", "a"),
            ("g1", "u2", "b"),
            ("g1", "u1", "c"),
            ("g2", "u1", "d"),
            ("g2", "u1", "e"),
        ];
        for (community, registrant, handle) in upserts {
            StreamRegistrationRepository::upsert(&pool, registration(community, registrant, handle))
                .await
                .unwrap();
        }

        let g1 = StreamRegistrationRepository::list_by_community(&pool, "g1")
            .await
            .unwrap();
        let mut g1_registrants: Vec<_> = g1.iter().map(|r| r.registrant_id.as_str()).collect();
        g1_registrants.sort();
        assert_eq!(g1_registrants, vec!["u1", "u2"]);

        let g2 = StreamRegistrationRepository::list_by_community(&pool, "g2")
            .await
            .unwrap();
        assert_eq!(g2.len(), 1);
        assert_eq!(g2[0].channel_handle, "e");
    }

    #[tokio::test]
    async fn set_external_user_id_fills_only_unresolved_rows() {
        let pool = test_pool().await;

        StreamRegistrationRepository::upsert(&pool, registration("g1", "u1", "kaitlyn"))
            .await
            .unwrap();
        StreamRegistrationRepository::upsert(&pool, registration("g2", "u1", "kaitlyn"))
            .await
            .unwrap();
        let mut resolved = registration("g3", "u1", "kaitlyn");
        resolved.external_user_id = Some("old".to_string());
        StreamRegistrationRepository::upsert(&pool, resolved).await.unwrap();

        let updated = StreamRegistrationRepository::set_external_user_id(
            &pool,
            PlatformType::Twitch,
            "kaitlyn",
            "123",
        )
        .await
        .unwrap();
        assert_eq!(updated, 2);

        let live = StreamRegistrationRepository::list_by_external_user_ids(&pool, &["123".to_string()])
            .await
            .unwrap();
        let communities: Vec<_> = live.iter().map(|r| r.community_id.as_str()).collect();
        assert_eq!(communities, vec!["g1", "g2"]);

        let g3 = StreamRegistrationRepository::find(&pool, "g3", "u1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(g3.external_user_id.as_deref(), Some("old"));
    }

    #[tokio::test]
    async fn empty_id_batch_returns_nothing() {
        let pool = test_pool().await;
        let rows = StreamRegistrationRepository::list_by_external_user_ids(&pool, &[])
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn unknown_stored_platform_surfaces_as_database_error() {
        let pool = test_pool().await;
        let now = Utc::now().naive_utc();
        sqlx::query(
            "INSERT INTO stream_registrations (id, community_id, registrant_id, registrant_name, registrant_tag, platform_type, channel_handle, created_at, updated_at) VALUES ('x', 'g1', 'u1', 'n', '', 'mixer', 'h', ?, ?)",
        )
        .bind(now)
        .bind(now)
        .execute(&pool)
        .await
        .unwrap();

        let err = StreamRegistrationRepository::list_by_community(&pool, "g1")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Database(_)));
    }
}
