//! Tagging workflow: decides which tag a newly seen source channel is filed under.
//!
//! Per (session, channel) the flow is
//! `Idle → AwaitingDecision → {Bound, Skipped}`, with `AwaitingTagInput`
//! while the operator types a new tag name.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{DatabaseError, TaggingError};
use crate::store::TagRegistry;
use crate::tagging::action::{CallbackAction, TagAction};
use crate::tagging::session::{PendingChannel, SessionStore};

/// Where a (session, channel) pair stands after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowState {
    AwaitingDecision,
    AwaitingTagInput,
    Bound { tag: String },
    /// Another decision bound the channel first.
    AlreadyBound,
    Skipped,
}

/// One inline button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub action: CallbackAction,
}

impl Button {
    fn new(label: impl Into<String>, action: CallbackAction) -> Self {
        Self {
            label: label.into(),
            action,
        }
    }
}

/// Text plus keyboard shown to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub text: String,
    /// Rows of buttons; empty means no keyboard.
    pub keyboard: Vec<Vec<Button>>,
}

impl Prompt {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            keyboard: Vec::new(),
        }
    }
}

/// Result of a workflow transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub channel_id: i64,
    pub state: WorkflowState,
    pub prompt: Prompt,
}

/// Drives the tagging state machine over the session store and tag registry.
pub struct TaggingWorkflow {
    registry: Arc<dyn TagRegistry>,
    sessions: Arc<SessionStore>,
}

impl TaggingWorkflow {
    pub fn new(registry: Arc<dyn TagRegistry>, sessions: Arc<SessionStore>) -> Self {
        Self { registry, sessions }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Record an untagged channel and ask whether to tag it.
    pub async fn observe(
        &self,
        session_id: i64,
        channel_id: i64,
        title: &str,
        handle: &str,
    ) -> Decision {
        self.sessions
            .insert(session_id, channel_id, title, handle)
            .await;
        info!(session_id, channel_id, title, "New source channel awaiting a tag decision");

        Decision {
            channel_id,
            state: WorkflowState::AwaitingDecision,
            prompt: Prompt {
                text: format!("New channel detected: {title}\nCreate a tag for this channel?"),
                keyboard: vec![vec![
                    Button::new("Yes", CallbackAction::tag(channel_id, TagAction::Create)),
                    Button::new("No", CallbackAction::tag(channel_id, TagAction::Skip)),
                ]],
            },
        }
    }

    /// Apply a button decision for a pending channel.
    pub async fn decide(
        &self,
        session_id: i64,
        channel_id: i64,
        action: TagAction,
    ) -> Result<Decision, TaggingError> {
        let pending = self
            .sessions
            .get(session_id, channel_id)
            .await
            .ok_or(TaggingError::StaleSession { channel_id })?;

        match action {
            TagAction::Create => self.offer_tags(channel_id, &pending).await,
            TagAction::Skip => {
                self.sessions.remove(session_id, channel_id).await;
                info!(session_id, channel_id, "Channel skipped, its messages will not be stored");
                Ok(Decision {
                    channel_id,
                    state: WorkflowState::Skipped,
                    prompt: Prompt::text(format!(
                        "Skipped {}. Messages from this channel will not be stored.",
                        pending.title
                    )),
                })
            }
            TagAction::Bind { tag } => self.bind(session_id, channel_id, &pending, &tag).await,
            TagAction::NewTag => {
                self.sessions.await_tag_input(session_id, channel_id).await;
                Ok(Decision {
                    channel_id,
                    state: WorkflowState::AwaitingTagInput,
                    prompt: Prompt::text(format!(
                        "Send the new tag name for {}.",
                        pending.title
                    )),
                })
            }
        }
    }

    /// Whether the session's next free-text message should be read as a tag name.
    pub async fn awaiting_tag_input(&self, session_id: i64) -> bool {
        self.sessions.awaiting_channel(session_id).await.is_some()
    }

    /// Consume free text typed after a "new tag" choice.
    ///
    /// Returns `Ok(None)` when the session is not waiting for a tag name.
    pub async fn submit_tag(
        &self,
        session_id: i64,
        text: &str,
    ) -> Result<Option<Decision>, TaggingError> {
        let Some(channel_id) = self.sessions.awaiting_channel(session_id).await else {
            return Ok(None);
        };

        let Some(pending) = self.sessions.get(session_id, channel_id).await else {
            self.sessions.clear_tag_input(session_id).await;
            return Err(TaggingError::StaleSession { channel_id });
        };

        let tag = text.trim();
        if tag.is_empty() {
            return Err(TaggingError::EmptyTag);
        }

        self.bind(session_id, channel_id, &pending, tag)
            .await
            .map(Some)
    }

    async fn offer_tags(
        &self,
        channel_id: i64,
        pending: &PendingChannel,
    ) -> Result<Decision, TaggingError> {
        let tags = self.registry.known_tags().await?;

        let mut keyboard: Vec<Vec<Button>> = tags
            .into_iter()
            .filter_map(|tag| {
                let action = CallbackAction::tag(channel_id, TagAction::Bind { tag: tag.clone() });
                if !action.fits_callback_data() {
                    warn!(channel_id, tag = %tag, "Tag too long for a button, omitted");
                    return None;
                }
                Some(vec![Button::new(tag, action)])
            })
            .collect();
        keyboard.push(vec![Button::new(
            "New tag",
            CallbackAction::tag(channel_id, TagAction::NewTag),
        )]);

        Ok(Decision {
            channel_id,
            state: WorkflowState::AwaitingDecision,
            prompt: Prompt {
                text: format!("Choose a tag for {}:", pending.title),
                keyboard,
            },
        })
    }

    async fn bind(
        &self,
        session_id: i64,
        channel_id: i64,
        pending: &PendingChannel,
        tag: &str,
    ) -> Result<Decision, TaggingError> {
        let tag = tag.trim();
        if tag.is_empty() {
            return Err(TaggingError::EmptyTag);
        }

        match self
            .registry
            .bind(channel_id, &pending.title, &pending.handle, tag)
            .await
        {
            Ok(id) => {
                self.sessions.remove(session_id, channel_id).await;
                info!(session_id, channel_id, binding_id = id, tag, "Channel tagged");
                Ok(Decision {
                    channel_id,
                    state: WorkflowState::Bound {
                        tag: tag.to_string(),
                    },
                    prompt: Prompt::text(format!(
                        "Tagged {} as \"{tag}\". Forward its messages again to store them.",
                        pending.title
                    )),
                })
            }
            Err(DatabaseError::DuplicateBinding { .. }) => {
                self.sessions.remove(session_id, channel_id).await;
                let existing = self
                    .registry
                    .active_binding(channel_id)
                    .await
                    .ok()
                    .flatten()
                    .map(|b| b.tag);
                info!(session_id, channel_id, "Channel was already bound");
                let text = match existing {
                    Some(existing) => {
                        format!("{} is already tagged as \"{existing}\".", pending.title)
                    }
                    None => format!("{} is already tagged.", pending.title),
                };
                Ok(Decision {
                    channel_id,
                    state: WorkflowState::AlreadyBound,
                    prompt: Prompt::text(text),
                })
            }
            Err(e) => {
                warn!(session_id, channel_id, tag, error = %e, "Failed to save tag binding");
                Err(TaggingError::Store(e))
            }
        }
    }
}
