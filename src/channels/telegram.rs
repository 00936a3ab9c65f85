//! Telegram Bot API client.
//!
//! Raw JSON over `reqwest`; implements the forwarding `Transport`.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;

use crate::channels::telegram_types::{
    ApiResponse, Chat, InlineKeyboardMarkup, Message, Update,
};
use crate::error::{ChannelError, DeliveryError};
use crate::forwarding::{ChannelInfo, Content, GroupMedia, Transport};
use crate::store::ContentKind;

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Maximum caption length for media sends, in UTF-16 code units.
const TELEGRAM_MAX_CAPTION_LENGTH: usize = 1024;

/// Maximum items per sendMediaGroup call.
const TELEGRAM_MAX_GROUP_SIZE: usize = 10;

/// Bot API errors that mean the content itself is gone.
const UNRESOLVABLE_CONTENT: &[&str] = &[
    "message to copy not found",
    "message not found",
    "wrong file identifier",
    "wrong remote file identifier",
    "file not found",
];

/// Thin Bot API client.
#[derive(Clone)]
pub struct TelegramApi {
    bot_token: SecretString,
    api_base: String,
    client: reqwest::Client,
}

impl TelegramApi {
    pub fn new(bot_token: SecretString, api_base: &str) -> Self {
        Self {
            bot_token,
            api_base: api_base.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{method}",
            self.api_base,
            self.bot_token.expose_secret()
        )
    }

    /// POST a method call and unwrap the `{ok, result}` envelope.
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &serde_json::Value,
        timeout: Option<Duration>,
    ) -> Result<T, ChannelError> {
        let mut request = self.client.post(self.api_url(method)).json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| ChannelError::Http(format!("{method}: {}", e.without_url())))?;
        let status = resp.status();

        let data: ApiResponse<T> = resp.json().await.map_err(|e| {
            ChannelError::InvalidResponse(format!("{method} (HTTP {status}): {}", e.without_url()))
        })?;

        if !data.ok {
            return Err(ChannelError::Api {
                code: data.error_code.unwrap_or_else(|| i64::from(status.as_u16())),
                description: data.description.unwrap_or_default(),
                retry_after: data.parameters.and_then(|p| p.retry_after),
            });
        }

        data.result
            .ok_or_else(|| ChannelError::InvalidResponse(format!("{method}: missing result")))
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(
        &self,
        offset: i64,
        timeout_secs: u64,
    ) -> Result<Vec<Update>, ChannelError> {
        let body = serde_json::json!({
            "offset": offset,
            "timeout": timeout_secs,
            "allowed_updates": ["message", "callback_query"]
        });
        self.call(
            "getUpdates",
            &body,
            Some(Duration::from_secs(timeout_secs + 10)),
        )
        .await
    }

    /// Send a text message, optionally with an inline keyboard.
    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&InlineKeyboardMarkup>,
    ) -> Result<Message, ChannelError> {
        let mut body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });
        if let Some(keyboard) = keyboard {
            body["reply_markup"] = serde_json::json!(keyboard);
        }
        self.call("sendMessage", &body, None).await
    }

    /// Replace the text (and keyboard) of a message the bot sent.
    pub async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        keyboard: Option<&InlineKeyboardMarkup>,
    ) -> Result<(), ChannelError> {
        let mut body = serde_json::json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": text,
        });
        if let Some(keyboard) = keyboard {
            body["reply_markup"] = serde_json::json!(keyboard);
        }
        // Result is the edited Message, or `true` for inline messages.
        self.call::<serde_json::Value>("editMessageText", &body, None)
            .await
            .map(|_| ())
    }

    /// Acknowledge a button press so the client stops its spinner.
    pub async fn answer_callback_query(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
    ) -> Result<(), ChannelError> {
        let mut body = serde_json::json!({ "callback_query_id": callback_query_id });
        if let Some(text) = text {
            body["text"] = serde_json::json!(text);
        }
        self.call::<bool>("answerCallbackQuery", &body, None)
            .await
            .map(|_| ())
    }

    /// Re-send a stored file by its file id.
    pub async fn send_media(
        &self,
        chat_id: i64,
        kind: ContentKind,
        file_id: &str,
        caption: Option<&str>,
    ) -> Result<Message, ChannelError> {
        let (method, field) = media_method(kind)
            .ok_or_else(|| ChannelError::Unsupported(format!("cannot send {kind} as media")))?;

        let mut body = serde_json::json!({ "chat_id": chat_id });
        body[field] = serde_json::json!(file_id);
        // Video notes take no caption.
        if let Some(caption) = caption
            && kind != ContentKind::VideoNote
        {
            body["caption"] = serde_json::json!(caption);
        }
        self.call(method, &body, None).await
    }

    /// Send an album. Splits into chunks of ten; the caption rides on the very first item.
    pub async fn send_media_group(
        &self,
        chat_id: i64,
        items: &[GroupMedia],
        caption: Option<&str>,
    ) -> Result<(), ChannelError> {
        for (chunk_index, chunk) in items.chunks(TELEGRAM_MAX_GROUP_SIZE).enumerate() {
            let media: Vec<serde_json::Value> = chunk
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    let mut entry = serde_json::json!({
                        "type": item.kind.as_str(),
                        "media": item.file_id,
                    });
                    if chunk_index == 0
                        && i == 0
                        && let Some(caption) = caption
                    {
                        entry["caption"] = serde_json::json!(caption);
                    }
                    entry
                })
                .collect();

            let body = serde_json::json!({ "chat_id": chat_id, "media": media });
            self.call::<Vec<Message>>("sendMediaGroup", &body, None)
                .await?;
        }
        Ok(())
    }

    /// Send text of any length as consecutive messages.
    pub async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), ChannelError> {
        for chunk in split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH) {
            self.send_message(chat_id, &chunk, None).await?;
        }
        Ok(())
    }

    async fn send_follow_up(&self, chat_id: i64, text: Option<&str>) -> Result<(), ChannelError> {
        match text {
            Some(text) => self.send_text(chat_id, text).await,
            None => Ok(()),
        }
    }

    pub async fn get_chat(&self, chat_id: i64) -> Result<Chat, ChannelError> {
        self.call("getChat", &serde_json::json!({ "chat_id": chat_id }), None)
            .await
    }

    pub async fn get_chat_member_count(&self, chat_id: i64) -> Result<i64, ChannelError> {
        self.call(
            "getChatMemberCount",
            &serde_json::json!({ "chat_id": chat_id }),
            None,
        )
        .await
    }
}

#[async_trait]
impl Transport for TelegramApi {
    async fn deliver(&self, target: i64, content: &Content) -> Result<(), DeliveryError> {
        let result = match content {
            Content::Text { text } => self.send_text(target, text).await,
            Content::Media {
                kind,
                file_id,
                caption,
            } => {
                let (inline, follow_up) = fit_caption(caption.as_deref());
                match self.send_media(target, *kind, file_id, inline).await {
                    Ok(_) => self.send_follow_up(target, follow_up).await,
                    Err(e) => Err(e),
                }
            }
            Content::Group { items, caption } => {
                let (inline, follow_up) = fit_caption(caption.as_deref());
                match self.send_media_group(target, items, inline).await {
                    Ok(()) => self.send_follow_up(target, follow_up).await,
                    Err(e) => Err(e),
                }
            }
        };
        result.map_err(|e| classify(&e))
    }

    async fn channel_info(&self, channel_id: i64) -> Result<ChannelInfo, DeliveryError> {
        let chat = self.get_chat(channel_id).await.map_err(|e| classify(&e))?;
        let member_count = self
            .get_chat_member_count(channel_id)
            .await
            .map_err(|e| classify(&e))?;
        Ok(ChannelInfo {
            title: chat.title.or(chat.username).unwrap_or_default(),
            member_count,
        })
    }
}

/// Method name and file field for a media kind.
fn media_method(kind: ContentKind) -> Option<(&'static str, &'static str)> {
    match kind {
        ContentKind::Photo => Some(("sendPhoto", "photo")),
        ContentKind::Video => Some(("sendVideo", "video")),
        ContentKind::Audio => Some(("sendAudio", "audio")),
        ContentKind::Document => Some(("sendDocument", "document")),
        ContentKind::Animation => Some(("sendAnimation", "animation")),
        ContentKind::Voice => Some(("sendVoice", "voice")),
        ContentKind::VideoNote => Some(("sendVideoNote", "video_note")),
        ContentKind::Text | ContentKind::MediaGroup => None,
    }
}

/// Split a caption into the part sent with the media and a text follow-up.
///
/// Captions over the limit go out whole as a separate message after the media.
fn fit_caption(caption: Option<&str>) -> (Option<&str>, Option<&str>) {
    match caption {
        Some(text) if text.encode_utf16().count() > TELEGRAM_MAX_CAPTION_LENGTH => {
            (None, Some(text))
        }
        other => (other, None),
    }
}

/// Classify a Bot API failure for the forwarding engine.
///
/// Only unresolvable content is permanent. Everything else, including rate
/// limits, missing permissions and network errors, is retried next cycle.
pub fn classify(error: &ChannelError) -> DeliveryError {
    match error {
        ChannelError::Api {
            code: 400,
            description,
            ..
        } if is_unresolvable(description) => DeliveryError::Permanent {
            reason: description.clone(),
        },
        ChannelError::Unsupported(reason) => DeliveryError::Permanent {
            reason: reason.clone(),
        },
        ChannelError::Api {
            retry_after: Some(secs),
            ..
        } => DeliveryError::Transient {
            reason: format!("{error} (retry after {secs}s)"),
        },
        other => DeliveryError::Transient {
            reason: other.to_string(),
        },
    }
}

fn is_unresolvable(description: &str) -> bool {
    let lower = description.to_lowercase();
    UNRESOLVABLE_CONTENT.iter().any(|p| lower.contains(p))
}

fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let mut end = max_len;
        while !remaining.is_char_boundary(end) {
            end -= 1;
        }

        // Prefer a newline, then a space.
        let chunk = &remaining[..end];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .filter(|&i| i > 0)
            .unwrap_or(end);

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

// ── Tests ───────────────────────────────────────────────────────────
