use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A guild the bot is a member of, with its current owner.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Community {
    pub id: String,
    pub owner_id: String,
    pub owner_display_name: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}
