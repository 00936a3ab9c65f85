//! Error types for tag-relay.

use std::time::Duration;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Channel {channel_id} already has an enabled tag binding")]
    DuplicateBinding { channel_id: i64 },

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Telegram Bot API errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Bot API error {code}: {description}")]
    Api {
        code: i64,
        description: String,
        retry_after: Option<u64>,
    },

    #[error("Invalid response from Bot API: {0}")]
    InvalidResponse(String),

    #[error("Unsupported content: {0}")]
    Unsupported(String),
}

/// Failures surfaced to the operator driving the tagging workflow.
#[derive(Debug, thiserror::Error)]
pub enum TaggingError {
    #[error("Channel info for {channel_id} has expired, please forward a message again")]
    StaleSession { channel_id: i64 },

    #[error("Tag name cannot be empty, please send the tag name again")]
    EmptyTag,

    #[error("Malformed action data: {0}")]
    MalformedAction(String),

    #[error("Failed to save tag binding: {0}")]
    Store(#[from] DatabaseError),
}

/// Classified outcome of a failed delivery attempt.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DeliveryError {
    /// The content can never be delivered (source deleted, file gone).
    #[error("permanent delivery failure: {reason}")]
    Permanent { reason: String },

    /// Possibly recoverable on a later cycle (rate limit, network, unknown).
    #[error("transient delivery failure: {reason}")]
    Transient { reason: String },

    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),
}

impl DeliveryError {
    /// Whether the engine may treat the item as resolved.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent { .. })
    }
}

/// Forwarding-cycle errors.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("Subscription for channel {channel_id} not found")]
    SubscriptionNotFound { channel_id: i64 },

    #[error("A forwarding cycle for channel {channel_id} is already running")]
    CycleInProgress { channel_id: i64 },

    #[error("Store error: {0}")]
    Store(#[from] DatabaseError),
}
