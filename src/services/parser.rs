use url::Url;

use crate::db::models::PlatformType;
use crate::error::ParseError;

const COMMAND_PREFIX: &str = "!add";

/// A channel on a streaming platform, in the form it is stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelReference {
    pub platform_type: PlatformType,
    pub handle: String,
}

impl ChannelReference {
    pub fn url(&self) -> String {
        format!("{}{}", self.platform_type.base_url(), self.handle)
    }
}

/// A recognised `!add<platform> <text>` chat command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationCommand {
    /// `None` when the word after `!add` names no platform we know
    pub platform: Option<PlatformType>,
    pub argument: String,
}

impl RegistrationCommand {
    /// Parse the command argument, checking it points at the platform the
    /// command named.
    pub fn reference(&self) -> Result<ChannelReference, ParseError> {
        let platform = self.platform.ok_or(ParseError::UnsupportedPlatform)?;
        let reference = parse(&self.argument)?;

        if reference.platform_type != platform {
            return Err(ParseError::UnsupportedPlatform);
        }

        Ok(reference)
    }
}

/// Turn user-submitted text into a channel reference.
pub fn parse(raw: &str) -> Result<ChannelReference, ParseError> {
    let url = Url::parse(raw.trim()).map_err(|_| ParseError::MalformedInput)?;

    let platform_type = url
        .host_str()
        .and_then(PlatformType::for_host)
        .ok_or(ParseError::UnsupportedPlatform)?;

    let path = url
        .path()
        .strip_prefix('/')
        .ok_or(ParseError::MissingChannelSegment)?;

    let segment = path.split('/').next().unwrap_or_default();
    if segment.is_empty() {
        return Err(ParseError::MissingChannelSegment);
    }

    // A segment the platform could never issue does not name a channel
    let handle = platform_type.normalize_handle(segment);
    if !platform_type.is_valid_handle(&handle) {
        return Err(ParseError::MissingChannelSegment);
    }

    Ok(ChannelReference {
        platform_type,
        handle,
    })
}

/// Recognise a registration command. Returns `None` for ordinary chat.
///
/// The prefix is case-insensitive and must be followed by whitespace, so
/// `!addtwitch` alone or `!additional` are not commands.
pub fn parse_command(content: &str) -> Option<RegistrationCommand> {
    let content = content.trim_start();

    let head = content.get(..COMMAND_PREFIX.len())?;
    if !head.eq_ignore_ascii_case(COMMAND_PREFIX) {
        return None;
    }

    let rest = &content[COMMAND_PREFIX.len()..];
    let word_end = rest.find(char::is_whitespace)?;
    let word = &rest[..word_end];
    if word.is_empty() || !word.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }

    Some(RegistrationCommand {
        platform: PlatformType::from_name(word),
        argument: rest[word_end..].trim().to_string(),
    })
}
