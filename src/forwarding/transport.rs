//! Delivery abstraction between the forwarding engine and the outside world.

use async_trait::async_trait;

use crate::error::DeliveryError;
use crate::store::{ContentKind, SourceMessage};

/// One item of an album send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMedia {
    pub kind: ContentKind,
    pub file_id: String,
}

/// What actually goes over the wire for one captured message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Text {
        text: String,
    },
    Media {
        kind: ContentKind,
        file_id: String,
        caption: Option<String>,
    },
    /// A whole media group, sent as one album. The caption rides on the first item.
    Group {
        items: Vec<GroupMedia>,
        caption: Option<String>,
    },
}

impl Content {
    /// Build the deliverable form of a message. `None` means there is nothing to send.
    pub fn from_message(message: &SourceMessage) -> Option<Self> {
        let caption = message
            .caption
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .map(str::to_string);

        if message.kind == ContentKind::MediaGroup || !message.group_items.is_empty() {
            let mut items: Vec<GroupMedia> = message
                .group_items
                .iter()
                .filter(|item| item.kind.groupable())
                .filter_map(|item| {
                    Some(GroupMedia {
                        kind: item.kind,
                        file_id: item.media.file_id.clone()?,
                    })
                })
                .collect();

            return match items.len() {
                0 => caption.map(|text| Self::Text { text }),
                1 => items.pop().map(|item| Self::Media {
                    kind: item.kind,
                    file_id: item.file_id,
                    caption,
                }),
                _ => Some(Self::Group { items, caption }),
            };
        }

        match message.kind {
            ContentKind::Text => caption.map(|text| Self::Text { text }),
            kind => message.media.file_id.clone().map(|file_id| Self::Media {
                kind,
                file_id,
                caption,
            }),
        }
    }
}

/// Display metadata of a target channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub title: String,
    pub member_count: i64,
}

/// Delivers content to target channels.
///
/// `deliver` is tri-state: `Ok`, `Permanent` (never deliverable, safe to skip)
/// or `Transient` (retry on a later cycle).
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(&self, target: i64, content: &Content) -> Result<(), DeliveryError>;

    async fn channel_info(&self, channel_id: i64) -> Result<ChannelInfo, DeliveryError>;
}
