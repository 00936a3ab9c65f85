//! Telegram Bot API types: the subset of updates, messages and keyboards the relay uses.

use serde::{Deserialize, Serialize};

use crate::capture::ForwardedPost;
use crate::store::{ContentKind, MediaDescriptor};
use crate::tagging::Prompt;

/// Envelope of every Bot API response.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
    pub error_code: Option<i64>,
    pub parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
pub struct ResponseParameters {
    pub retry_after: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

impl User {
    /// Username if set, first name otherwise.
    pub fn display_name(&self) -> &str {
        self.username.as_deref().unwrap_or(&self.first_name)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    pub file_unique_id: Option<String>,
    pub width: i64,
    pub height: i64,
    pub file_size: Option<i64>,
}

/// Shared shape of video, audio, document, animation, voice and video note objects.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaFile {
    pub file_id: String,
    pub file_unique_id: Option<String>,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub file_size: Option<i64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub duration: Option<i64>,
    pub thumbnail: Option<PhotoSize>,
}

impl MediaFile {
    fn descriptor(&self) -> MediaDescriptor {
        MediaDescriptor {
            file_id: Some(self.file_id.clone()),
            file_unique_id: self.file_unique_id.clone(),
            file_name: self.file_name.clone(),
            mime_type: self.mime_type.clone(),
            file_size: self.file_size,
            width: self.width,
            height: self.height,
            duration: self.duration,
            thumbnail_file_id: self.thumbnail.as_ref().map(|t| t.file_id.clone()),
        }
    }
}

/// Where a forwarded message came from. Only channel origins are captured.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageOrigin {
    Channel { chat: Chat, message_id: i64 },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<User>,
    pub chat: Chat,
    pub text: Option<String>,
    pub caption: Option<String>,
    pub media_group_id: Option<String>,
    pub forward_origin: Option<MessageOrigin>,
    pub photo: Option<Vec<PhotoSize>>,
    pub video: Option<MediaFile>,
    pub animation: Option<MediaFile>,
    pub document: Option<MediaFile>,
    pub audio: Option<MediaFile>,
    pub voice: Option<MediaFile>,
    pub video_note: Option<MediaFile>,
}

impl Message {
    /// Content kind and media metadata carried by this message.
    pub fn content(&self) -> (ContentKind, MediaDescriptor) {
        if let Some(photo) = self
            .photo
            .as_ref()
            .and_then(|sizes| sizes.iter().max_by_key(|p| p.width * p.height))
        {
            return (
                ContentKind::Photo,
                MediaDescriptor {
                    file_id: Some(photo.file_id.clone()),
                    file_unique_id: photo.file_unique_id.clone(),
                    file_size: photo.file_size,
                    width: Some(photo.width),
                    height: Some(photo.height),
                    ..Default::default()
                },
            );
        }

        // Animations also carry a `document` field, so they are checked first.
        let media = [
            (ContentKind::Video, &self.video),
            (ContentKind::Animation, &self.animation),
            (ContentKind::Document, &self.document),
            (ContentKind::Audio, &self.audio),
            (ContentKind::Voice, &self.voice),
            (ContentKind::VideoNote, &self.video_note),
        ];
        for (kind, file) in media {
            if let Some(file) = file {
                return (kind, file.descriptor());
            }
        }

        (ContentKind::Text, MediaDescriptor::default())
    }

    /// Extract capture data if this is a forward from a channel.
    pub fn channel_forward(&self) -> Option<ForwardedPost> {
        let Some(MessageOrigin::Channel {
            chat: origin,
            message_id: origin_message_id,
        }) = &self.forward_origin
        else {
            return None;
        };
        let from = self.from.as_ref()?;
        let (kind, media) = self.content();

        Some(ForwardedPost {
            chat_id: self.chat.id,
            message_id: self.message_id,
            sender_id: from.id,
            sender_name: from.display_name().to_string(),
            origin_chat_id: origin.id,
            origin_message_id: *origin_message_id,
            origin_title: origin.title.clone().unwrap_or_else(|| "Unknown channel".into()),
            origin_handle: origin.username.clone().unwrap_or_default(),
            kind,
            caption: self.caption.clone().or_else(|| self.text.clone()),
            group_id: self.media_group_id.clone(),
            media,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    pub message: Option<Message>,
    pub data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineKeyboardButton {
    pub text: String,
    pub callback_data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

impl InlineKeyboardMarkup {
    /// Keyboard for a prompt, or `None` when it has no buttons.
    pub fn from_prompt(prompt: &Prompt) -> Option<Self> {
        if prompt.keyboard.is_empty() {
            return None;
        }
        Some(Self {
            inline_keyboard: prompt
                .keyboard
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|b| InlineKeyboardButton {
                            text: b.label.clone(),
                            callback_data: b.action.encode(),
                        })
                        .collect()
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: serde_json::Value) -> Message {
        serde_json::from_value(json).unwrap()
    }

    fn base(extra: serde_json::Value) -> serde_json::Value {
        let mut msg = serde_json::json!({
            "message_id": 55,
            "from": {"id": 7, "is_bot": false, "first_name": "Alice", "username": "alice"},
            "chat": {"id": 7, "type": "private", "first_name": "Alice"},
            "date": 1700000000,
            "forward_origin": {
                "type": "channel",
                "chat": {"id": -1001234, "type": "channel", "title": "Daily News", "username": "dailynews"},
                "message_id": 321,
                "date": 1699999999
            }
        });
        if let (Some(obj), Some(extra)) = (msg.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                obj.insert(k.clone(), v.clone());
            }
        }
        msg
    }

    #[test]
    fn text_forward_from_channel() {
        let msg = parse(base(serde_json::json!({"text": "breaking"})));
        let post = msg.channel_forward().unwrap();

        assert_eq!(post.chat_id, 7);
        assert_eq!(post.message_id, 55);
        assert_eq!(post.sender_id, 7);
        assert_eq!(post.sender_name, "alice");
        assert_eq!(post.origin_chat_id, -1001234);
        assert_eq!(post.origin_message_id, 321);
        assert_eq!(post.origin_title, "Daily News");
        assert_eq!(post.origin_handle, "dailynews");
        assert_eq!(post.kind, ContentKind::Text);
        assert_eq!(post.caption.as_deref(), Some("breaking"));
        assert_eq!(post.group_id, None);
    }

    #[test]
    fn photo_uses_largest_size() {
        let msg = parse(base(serde_json::json!({
            "caption": "pic",
            "media_group_id": "album-1",
            "photo": [
                {"file_id": "small", "file_unique_id": "s", "width": 90, "height": 60},
                {"file_id": "large", "file_unique_id": "l", "width": 1280, "height": 853, "file_size": 9000},
                {"file_id": "medium", "file_unique_id": "m", "width": 320, "height": 213}
            ]
        })));
        let post = msg.channel_forward().unwrap();

        assert_eq!(post.kind, ContentKind::Photo);
        assert_eq!(post.media.file_id.as_deref(), Some("large"));
        assert_eq!(post.media.width, Some(1280));
        assert_eq!(post.media.file_size, Some(9000));
        assert_eq!(post.group_id.as_deref(), Some("album-1"));
        assert_eq!(post.caption.as_deref(), Some("pic"));
    }

    #[test]
    fn video_metadata() {
        let msg = parse(base(serde_json::json!({
            "video": {
                "file_id": "vid", "file_unique_id": "v", "width": 1920, "height": 1080,
                "duration": 42, "mime_type": "video/mp4", "file_name": "clip.mp4",
                "thumbnail": {"file_id": "thumb", "file_unique_id": "t", "width": 320, "height": 180}
            }
        })));
        let (kind, media) = msg.content();
        assert_eq!(kind, ContentKind::Video);
        assert_eq!(media.duration, Some(42));
        assert_eq!(media.file_name.as_deref(), Some("clip.mp4"));
        assert_eq!(media.thumbnail_file_id.as_deref(), Some("thumb"));
    }

    #[test]
    fn animation_wins_over_document() {
        let msg = parse(base(serde_json::json!({
            "animation": {"file_id": "gif", "width": 200, "height": 200, "duration": 3},
            "document": {"file_id": "gif", "mime_type": "video/mp4"}
        })));
        assert_eq!(msg.content().0, ContentKind::Animation);
    }

    #[test]
    fn user_forward_is_not_a_channel_forward() {
        let msg = parse(serde_json::json!({
            "message_id": 1,
            "from": {"id": 7, "first_name": "Alice"},
            "chat": {"id": 7, "type": "private"},
            "text": "hi",
            "forward_origin": {"type": "user", "sender_user": {"id": 9, "first_name": "Bob"}, "date": 1}
        }));
        assert!(matches!(msg.forward_origin, Some(MessageOrigin::Other)));
        assert!(msg.channel_forward().is_none());
    }

    #[test]
    fn plain_message_is_not_a_forward() {
        let msg = parse(serde_json::json!({
            "message_id": 1,
            "from": {"id": 7, "first_name": "Alice"},
            "chat": {"id": 7, "type": "private"},
            "text": "/start"
        }));
        assert!(msg.channel_forward().is_none());
        assert_eq!(msg.from.unwrap().display_name(), "Alice");
    }

    #[test]
    fn callback_query_update() {
        let update: Update = serde_json::from_value(serde_json::json!({
            "update_id": 900,
            "callback_query": {
                "id": "cb-1",
                "from": {"id": 7, "first_name": "Alice"},
                "message": {"message_id": 12, "chat": {"id": 7, "type": "private"}, "date": 1},
                "chat_instance": "x",
                "data": "skip_tag:-1001234"
            }
        }))
        .unwrap();
        let query = update.callback_query.unwrap();
        assert_eq!(query.data.as_deref(), Some("skip_tag:-1001234"));
        assert_eq!(query.message.unwrap().message_id, 12);
    }

    #[test]
    fn api_error_envelope() {
        let resp: ApiResponse<serde_json::Value> = serde_json::from_value(serde_json::json!({
            "ok": false,
            "error_code": 429,
            "description": "Too Many Requests: retry after 7",
            "parameters": {"retry_after": 7}
        }))
        .unwrap();
        assert!(!resp.ok);
        assert_eq!(resp.error_code, Some(429));
        assert_eq!(resp.parameters.unwrap().retry_after, Some(7));
    }
}
