//! Capture: stores channel forwards under their channel's tag.
//!
//! Forwards from a channel without an enabled binding are not stored; they
//! start the tagging workflow instead.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::store::{ContentKind, MediaDescriptor, MessageStore, NewMessage, TagRegistry};
use crate::tagging::{Decision, TaggingWorkflow};

/// A message the operator forwarded to the bot from a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedPost {
    /// Chat the forward arrived in.
    pub chat_id: i64,
    pub message_id: i64,
    pub sender_id: i64,
    pub sender_name: String,
    pub origin_chat_id: i64,
    pub origin_message_id: i64,
    pub origin_title: String,
    pub origin_handle: String,
    pub kind: ContentKind,
    pub caption: Option<String>,
    pub group_id: Option<String>,
    pub media: MediaDescriptor,
}

/// What happened to a forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Stored { id: i64, tag: String },
    /// Channel has no tag yet; the operator must decide first.
    PendingTag(Decision),
}

pub struct CaptureService {
    messages: Arc<dyn MessageStore>,
    registry: Arc<dyn TagRegistry>,
    workflow: Arc<TaggingWorkflow>,
}

impl CaptureService {
    pub fn new(
        messages: Arc<dyn MessageStore>,
        registry: Arc<dyn TagRegistry>,
        workflow: Arc<TaggingWorkflow>,
    ) -> Self {
        Self {
            messages,
            registry,
            workflow,
        }
    }

    /// Store a forward, or open a tagging decision for its channel.
    pub async fn handle_forward(
        &self,
        session_id: i64,
        post: &ForwardedPost,
    ) -> Result<CaptureOutcome, DatabaseError> {
        let Some(binding) = self.registry.active_binding(post.origin_chat_id).await? else {
            let decision = self
                .workflow
                .observe(
                    session_id,
                    post.origin_chat_id,
                    &post.origin_title,
                    &post.origin_handle,
                )
                .await;
            return Ok(CaptureOutcome::PendingTag(decision));
        };

        let group_id = post.group_id.as_deref().filter(|g| !g.is_empty());
        let envelope = NewMessage {
            chat_id: post.chat_id,
            message_id: post.message_id,
            sender_id: post.sender_id,
            sender_name: post.sender_name.clone(),
            origin_chat_id: post.origin_chat_id,
            origin_message_id: post.origin_message_id,
            kind: if group_id.is_some() {
                ContentKind::MediaGroup
            } else {
                post.kind
            },
            caption: post.caption.clone(),
            group_id: group_id.map(str::to_string),
            media: if group_id.is_some() {
                MediaDescriptor::default()
            } else {
                post.media.clone()
            },
            tag: Some(binding.tag.clone()),
        };

        // Items first, so a readable envelope always has at least one.
        if let Some(group_id) = group_id {
            self.messages
                .capture_group_item(group_id, post.kind, &post.media)
                .await?;
            debug!(group_id, kind = %post.kind, "Media group item stored");
        }
        let id = self.messages.capture_message(&envelope).await?;

        info!(
            id,
            origin_chat_id = post.origin_chat_id,
            tag = %binding.tag,
            kind = %post.kind,
            "Forward captured"
        );
        Ok(CaptureOutcome::Stored {
            id,
            tag: binding.tag,
        })
    }
}
