//! Storage traits, one per registry.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::store::model::{
    ContentKind, MediaDescriptor, NewMessage, NewSubscription, OperatorRole, SourceMessage,
    Subscription, TagBinding,
};

/// Append-only record of captured source messages and media-group items.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append one media-group item. Fails if `group_id` is empty.
    async fn capture_group_item(
        &self,
        group_id: &str,
        kind: ContentKind,
        media: &MediaDescriptor,
    ) -> Result<i64, DatabaseError>;

    /// Insert a message, or return the existing id when its group id was already captured.
    async fn capture_message(&self, envelope: &NewMessage) -> Result<i64, DatabaseError>;

    /// Messages tagged `tag` with id strictly greater than `after_id`, ascending, at most `limit`.
    async fn messages_for_tag(
        &self,
        tag: &str,
        after_id: i64,
        limit: u32,
    ) -> Result<Vec<SourceMessage>, DatabaseError>;
}

/// Source channel → tag bindings.
#[async_trait]
pub trait TagRegistry: Send + Sync {
    /// The enabled binding for a channel, if any.
    async fn active_binding(&self, channel_id: i64) -> Result<Option<TagBinding>, DatabaseError>;

    /// Create an enabled binding. Fails with `DuplicateBinding` if one exists.
    async fn bind(
        &self,
        channel_id: i64,
        title: &str,
        handle: &str,
        tag: &str,
    ) -> Result<i64, DatabaseError>;

    /// Distinct tags used by enabled bindings, sorted.
    async fn known_tags(&self) -> Result<Vec<String>, DatabaseError>;

    /// Soft-disable the enabled binding. Returns whether one was disabled.
    async fn disable_binding(&self, channel_id: i64) -> Result<bool, DatabaseError>;
}

/// Per-target-channel forwarding state.
#[async_trait]
pub trait SubscriptionRegistry: Send + Sync {
    async fn add_subscription(&self, sub: &NewSubscription) -> Result<i64, DatabaseError>;

    async fn get_subscription(&self, channel_id: i64)
    -> Result<Option<Subscription>, DatabaseError>;

    async fn list_subscriptions(&self) -> Result<Vec<Subscription>, DatabaseError>;

    /// Move the cursor forward to `cursor`. Never moves it backwards;
    /// returns whether the stored value changed.
    async fn advance_cursor(&self, channel_id: i64, cursor: i64) -> Result<bool, DatabaseError>;

    /// Refresh display metadata.
    async fn update_subscription_metadata(
        &self,
        channel_id: i64,
        name: &str,
        member_count: i64,
    ) -> Result<(), DatabaseError>;
}

/// Bot users allowed to drive capture and tagging.
#[async_trait]
pub trait OperatorRegistry: Send + Sync {
    /// Insert or update an operator.
    async fn upsert_operator(
        &self,
        user_id: i64,
        first_name: &str,
        last_name: Option<&str>,
        role: OperatorRole,
    ) -> Result<(), DatabaseError>;

    async fn is_admin(&self, user_id: i64) -> Result<bool, DatabaseError>;
}
