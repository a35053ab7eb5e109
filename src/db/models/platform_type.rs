use serde::{Deserialize, Serialize};

/// Streaming platforms a channel can be registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformType {
    Twitch,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unsupported platform type: {0}")]
pub struct UnsupportedPlatformType(pub String);

impl PlatformType {
    pub const ALL: [PlatformType; 1] = [PlatformType::Twitch];

    /// Convert from the stored/command name (case-insensitive)
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "twitch" => Some(PlatformType::Twitch),
            _ => None,
        }
    }

    /// Convert to the stored name
    pub fn as_str(self) -> &'static str {
        match self {
            PlatformType::Twitch => "twitch",
        }
    }

    /// Channel URLs are this prefix followed by the handle.
    pub fn base_url(self) -> &'static str {
        match self {
            PlatformType::Twitch => "https://www.twitch.tv/",
        }
    }

    /// Public domain that channel links are served from.
    pub fn domain(self) -> &'static str {
        match self {
            PlatformType::Twitch => "twitch.tv",
        }
    }

    /// Find the platform serving `host` (the bare domain or any subdomain of it).
    pub fn for_host(host: &str) -> Option<Self> {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        Self::ALL.into_iter().find(|platform| {
            let domain = platform.domain();
            host == domain
                || host
                    .strip_suffix(domain)
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }

    /// Bring a raw path segment into the form the platform stores it in.
    pub fn normalize_handle(self, segment: &str) -> String {
        match self {
            // Twitch logins are case-insensitive and always reported lowercase.
            PlatformType::Twitch => segment.to_lowercase(),
        }
    }

    /// Whether a normalized handle is one the platform could ever have issued.
    pub fn is_valid_handle(self, handle: &str) -> bool {
        match self {
            // Twitch logins: 1 to 25 of [a-z0-9_]
            PlatformType::Twitch => {
                (1..=25).contains(&handle.len())
                    && handle
                        .bytes()
                        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
            }
        }
    }

    /// Whether live-status lookups need the platform's own user id rather
    /// than the handle.
    pub fn requires_id_resolution(self) -> bool {
        match self {
            PlatformType::Twitch => true,
        }
    }
}

impl std::fmt::Display for PlatformType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<PlatformType> for String {
    fn from(platform: PlatformType) -> Self {
        platform.as_str().to_string()
    }
}

impl TryFrom<String> for PlatformType {
    type Error = UnsupportedPlatformType;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_name(&value).ok_or(UnsupportedPlatformType(value))
    }
}

impl TryFrom<&str> for PlatformType {
    type Error = UnsupportedPlatformType;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::from_name(value).ok_or_else(|| UnsupportedPlatformType(value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_for_twitch() {
        assert_eq!(PlatformType::Twitch.base_url(), "https://www.twitch.tv/");
    }

    #[test]
    fn host_matching_requires_domain_boundary() {
        assert_eq!(PlatformType::for_host("twitch.tv"), Some(PlatformType::Twitch));
        assert_eq!(PlatformType::for_host("www.twitch.tv"), Some(PlatformType::Twitch));
        assert_eq!(PlatformType::for_host("m.Twitch.TV"), Some(PlatformType::Twitch));
        assert_eq!(PlatformType::for_host("nottwitch.tv"), None);
        assert_eq!(PlatformType::for_host("youtube.com"), None);
    }

    #[test]
    fn twitch_handles_follow_login_rules() {
        let twitch = PlatformType::Twitch;
        assert!(twitch.is_valid_handle("kaitlyn"));
        assert!(twitch.is_valid_handle("the_real_42"));
        assert!(twitch.is_valid_handle(&"a".repeat(25)));

        assert!(!twitch.is_valid_handle(""));
        assert!(!twitch.is_valid_handle("not-a-login"));
        assert!(!twitch.is_valid_handle("Kaitlyn"));
        assert!(!twitch.is_valid_handle("%E2%9C%93"));
        assert!(!twitch.is_valid_handle(&"a".repeat(26)));
    }

    #[test]
    fn unknown_stored_name_is_an_explicit_error() {
        assert_eq!(PlatformType::try_from("twitch"), Ok(PlatformType::Twitch));
        assert_eq!(
            PlatformType::try_from("mixer".to_string()),
            Err(UnsupportedPlatformType("mixer".to_string()))
        );
    }
}
