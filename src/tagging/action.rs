//! Callback actions carried in inline-keyboard button data.
//!
//! Decoded once at the bot boundary; everything downstream matches on the enum.

use crate::error::TaggingError;

/// Telegram rejects callback data longer than this.
pub const MAX_CALLBACK_DATA_LEN: usize = 64;

/// Operator decision about a pending source channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagAction {
    /// Show known tags to pick from.
    Create,
    /// Leave the channel untagged.
    Skip,
    /// File the channel under an existing tag.
    Bind { tag: String },
    /// Ask for a new tag as free text.
    NewTag,
}

/// Any action an inline button can trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    Tag { channel_id: i64, action: TagAction },
    /// Run a forwarding cycle for one subscription now.
    Forward { channel_id: i64 },
}

impl CallbackAction {
    pub fn tag(channel_id: i64, action: TagAction) -> Self {
        Self::Tag { channel_id, action }
    }

    /// Encode as callback data.
    pub fn encode(&self) -> String {
        match self {
            Self::Tag { channel_id, action } => match action {
                TagAction::Create => format!("create_tag:{channel_id}"),
                TagAction::Skip => format!("skip_tag:{channel_id}"),
                TagAction::NewTag => format!("new_tag:{channel_id}"),
                TagAction::Bind { tag } => format!("set_tag:{channel_id}:{tag}"),
            },
            Self::Forward { channel_id } => format!("forward_channel:{channel_id}"),
        }
    }

    /// Whether the encoded form fits in a button.
    pub fn fits_callback_data(&self) -> bool {
        self.encode().len() <= MAX_CALLBACK_DATA_LEN
    }

    /// Decode callback data.
    pub fn decode(data: &str) -> Result<Self, TaggingError> {
        let malformed = || TaggingError::MalformedAction(data.to_string());

        let (verb, rest) = data.split_once(':').ok_or_else(malformed)?;
        let channel_of = |s: &str| s.parse::<i64>().map_err(|_| malformed());

        let action = match verb {
            "create_tag" => Self::tag(channel_of(rest)?, TagAction::Create),
            "skip_tag" => Self::tag(channel_of(rest)?, TagAction::Skip),
            "new_tag" => Self::tag(channel_of(rest)?, TagAction::NewTag),
            "set_tag" => {
                let (channel, tag) = rest.split_once(':').ok_or_else(malformed)?;
                if tag.trim().is_empty() {
                    return Err(malformed());
                }
                Self::tag(
                    channel_of(channel)?,
                    TagAction::Bind {
                        tag: tag.to_string(),
                    },
                )
            }
            "forward_channel" => Self::Forward {
                channel_id: channel_of(rest)?,
            },
            _ => return Err(malformed()),
        };
        Ok(action)
    }
}
