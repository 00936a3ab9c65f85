//! Persisted record types for captured messages, tag bindings and subscriptions.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of content a captured message (or group item) carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Text,
    Photo,
    Video,
    Audio,
    Document,
    Animation,
    Voice,
    VideoNote,
    /// Envelope row standing for a whole media group.
    MediaGroup,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Photo => "photo",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
            Self::Animation => "animation",
            Self::Voice => "voice",
            Self::VideoNote => "video_note",
            Self::MediaGroup => "media_group",
        }
    }

    /// Whether Telegram accepts this kind inside `sendMediaGroup`.
    pub fn groupable(&self) -> bool {
        matches!(self, Self::Photo | Self::Video | Self::Audio | Self::Document)
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "photo" => Ok(Self::Photo),
            "video" => Ok(Self::Video),
            "audio" => Ok(Self::Audio),
            "document" => Ok(Self::Document),
            "animation" => Ok(Self::Animation),
            "voice" => Ok(Self::Voice),
            "video_note" => Ok(Self::VideoNote),
            "media_group" => Ok(Self::MediaGroup),
            other => Err(format!("unknown content kind: {other}")),
        }
    }
}

/// File reference plus size/dimension/duration metadata of one media item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDescriptor {
    pub file_id: Option<String>,
    pub file_unique_id: Option<String>,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub file_size: Option<i64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub duration: Option<i64>,
    pub thumbnail_file_id: Option<String>,
}

/// Envelope handed to `capture_message` by the capture trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    /// Chat the bot received the forward in.
    pub chat_id: i64,
    pub message_id: i64,
    pub sender_id: i64,
    pub sender_name: String,
    /// Source channel the message was forwarded from.
    pub origin_chat_id: i64,
    pub origin_message_id: i64,
    pub kind: ContentKind,
    pub caption: Option<String>,
    pub group_id: Option<String>,
    pub media: MediaDescriptor,
    pub tag: Option<String>,
}

/// One media item belonging to a grouped message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaGroupItem {
    pub id: i64,
    pub group_id: String,
    pub kind: ContentKind,
    pub media: MediaDescriptor,
    pub captured_at: DateTime<Utc>,
}

/// A captured source message, as read back for forwarding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMessage {
    /// Store-assigned, monotonically increasing; the cursor unit.
    pub id: i64,
    pub chat_id: i64,
    pub message_id: i64,
    pub sender_id: i64,
    pub sender_name: String,
    pub origin_chat_id: i64,
    pub origin_message_id: i64,
    pub kind: ContentKind,
    pub caption: Option<String>,
    pub group_id: Option<String>,
    pub media: MediaDescriptor,
    pub tag: Option<String>,
    pub captured_at: DateTime<Utc>,
    /// Items of the media group, empty for ungrouped messages.
    pub group_items: Vec<MediaGroupItem>,
}

/// Source channel → routing tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagBinding {
    pub id: i64,
    pub channel_id: i64,
    pub title: String,
    pub handle: String,
    pub tag: String,
    pub enabled: bool,
}

/// Per-target-channel forwarding state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: i64,
    pub channel_id: i64,
    pub name: String,
    pub channel_type: String,
    pub tag: String,
    /// Highest resolved `SourceMessage` id.
    pub cursor: i64,
    /// Messages per cycle, always at least 1.
    pub batch_size: u32,
    pub member_count: Option<i64>,
}

/// Provisioning input for a subscription.
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub channel_id: i64,
    pub name: String,
    pub channel_type: String,
    pub tag: String,
    pub batch_size: u32,
}

impl NewSubscription {
    pub fn new(channel_id: i64, name: &str, tag: &str) -> Self {
        Self {
            channel_id,
            name: name.to_string(),
            channel_type: "channel".to_string(),
            tag: tag.to_string(),
            batch_size: 1,
        }
    }

    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }
}

/// Role of a bot user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorRole {
    Admin,
    Member,
}

impl OperatorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Member => "member",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_kind_string_round_trip() {
        for kind in [
            ContentKind::Text,
            ContentKind::Photo,
            ContentKind::VideoNote,
            ContentKind::MediaGroup,
        ] {
            assert_eq!(kind.as_str().parse::<ContentKind>().unwrap(), kind);
        }
        assert!("sticker".parse::<ContentKind>().is_err());
    }

    #[test]
    fn only_album_kinds_are_groupable() {
        assert!(ContentKind::Photo.groupable());
        assert!(ContentKind::Document.groupable());
        assert!(!ContentKind::Voice.groupable());
        assert!(!ContentKind::Text.groupable());
    }

    #[test]
    fn new_subscription_defaults_to_single_message_batches() {
        let sub = NewSubscription::new(-1001, "Mirror", "news");
        assert_eq!(sub.batch_size, 1);
        assert_eq!(sub.with_batch_size(5).batch_size, 5);
    }
}
