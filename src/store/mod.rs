//! Persistence layer: libSQL-backed message store and registries.

pub mod libsql_backend;
pub mod migrations;
pub mod model;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use model::{
    ContentKind, MediaDescriptor, MediaGroupItem, NewMessage, NewSubscription, OperatorRole,
    SourceMessage, Subscription, TagBinding,
};
pub use traits::{MessageStore, OperatorRegistry, SubscriptionRegistry, TagRegistry};
