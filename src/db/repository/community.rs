use chrono::Utc;
use sqlx::SqlitePool;

use crate::db::models::Community;
use crate::error::{AppError, AppResult};

pub struct CommunityRepository;

impl CommunityRepository {
    /// Create the guild row or overwrite its owner fields
    pub async fn upsert(
        pool: &SqlitePool,
        id: &str,
        owner_id: &str,
        owner_display_name: &str,
    ) -> AppResult<Community> {
        let now = Utc::now().naive_utc();

        sqlx::query_as::<_, Community>(
            r#"
            INSERT INTO communities (id, owner_id, owner_display_name, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                owner_id = excluded.owner_id,
                owner_display_name = excluded.owner_display_name,
                updated_at = excluded.updated_at
            RETURNING id, owner_id, owner_display_name, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(owner_id)
        .bind(owner_display_name)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<Community>> {
        sqlx::query_as::<_, Community>(
            r#"
            SELECT id, owner_id, owner_display_name, created_at, updated_at
            FROM communities
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn list_all(pool: &SqlitePool) -> AppResult<Vec<Community>> {
        sqlx::query_as::<_, Community>(
            r#"
            SELECT id, owner_id, owner_display_name, created_at, updated_at
            FROM communities
            ORDER BY id
            "#,
        )
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Delete the guild row. Returns whether a row existed.
    pub async fn delete(pool: &SqlitePool, id: &str) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM communities WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(result.rows_affected() > 0)
    }
}
