use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::PlatformType;

/// A registrant's channel within one guild. Unique on
/// (`community_id`, `registrant_id`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamRegistration {
    pub id: String,
    pub community_id: String,
    pub registrant_id: String,
    pub registrant_name: String,
    pub registrant_tag: String,
    pub platform_type: PlatformType,
    pub channel_handle: String,

    // Platform user id used for live-status lookups; absent until resolved
    pub external_user_id: Option<String>,

    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl StreamRegistration {
    pub fn url(&self) -> String {
        format!("{}{}", self.platform_type.base_url(), self.channel_handle)
    }

    pub fn channel(&self) -> &str {
        &self.channel_handle
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertStreamRegistration {
    pub community_id: String,
    pub registrant_id: String,
    pub registrant_name: String,
    pub registrant_tag: String,
    pub platform_type: PlatformType,
    pub channel_handle: String,
    pub external_user_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn url_joins_base_and_handle() {
        let now = Utc::now().naive_utc();
        let registration = StreamRegistration {
            id: "r1".to_string(),
            community_id: "g1".to_string(),
            registrant_id: "u1".to_string(),
            registrant_name: "halkeye".to_string(),
            registrant_tag: "1337".to_string(),
            platform_type: PlatformType::Twitch,
            channel_handle: "halkeye".to_string(),
            external_user_id: None,
            created_at: now,
            updated_at: now,
        };

        assert_eq!(registration.url(), "https://www.twitch.tv/halkeye");
        assert_eq!(registration.channel(), "halkeye");
    }
}
