//! libSQL backend: implements every registry trait over one async connection.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, Value, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::model::{
    ContentKind, MediaDescriptor, MediaGroupItem, NewMessage, NewSubscription, OperatorRole,
    SourceMessage, Subscription, TagBinding,
};
use crate::store::traits::{MessageStore, OperatorRegistry, SubscriptionRegistry, TagRegistry};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    /// Run all pending schema migrations.
    pub async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn items_for_group(&self, group_id: &str) -> Result<Vec<MediaGroupItem>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {ITEM_COLUMNS} FROM media_group_items WHERE group_id = ?1 ORDER BY id ASC"
                ),
                params![group_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("items_for_group: {e}")))?;

        let mut items = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("items_for_group: {e}")))?
        {
            items.push(row_to_item(&row)?);
        }
        Ok(items)
    }

    async fn existing_group_message(&self, group_id: &str) -> Result<Option<i64>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id FROM source_messages WHERE group_id = ?1",
                params![group_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("existing_group_message: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(int_at(&row, 0)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("existing_group_message: {e}"))),
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> Value {
    match s {
        Some(s) => Value::Text(s.to_string()),
        None => Value::Null,
    }
}

fn opt_int(n: Option<i64>) -> Value {
    match n {
        Some(n) => Value::Integer(n),
        None => Value::Null,
    }
}

fn int_at(row: &libsql::Row, idx: i32) -> Result<i64, DatabaseError> {
    row.get::<i64>(idx)
        .map_err(|e| DatabaseError::Query(format!("column {idx}: {e}")))
}

fn text_at(row: &libsql::Row, idx: i32) -> Result<String, DatabaseError> {
    row.get::<String>(idx)
        .map_err(|e| DatabaseError::Query(format!("column {idx}: {e}")))
}

fn opt_text_at(row: &libsql::Row, idx: i32) -> Result<Option<String>, DatabaseError> {
    match row.get_value(idx) {
        Ok(Value::Text(s)) => Ok(Some(s)),
        Ok(Value::Null) => Ok(None),
        Ok(other) => Err(DatabaseError::Query(format!(
            "column {idx}: expected text, got {other:?}"
        ))),
        Err(e) => Err(DatabaseError::Query(format!("column {idx}: {e}"))),
    }
}

fn opt_int_at(row: &libsql::Row, idx: i32) -> Result<Option<i64>, DatabaseError> {
    match row.get_value(idx) {
        Ok(Value::Integer(n)) => Ok(Some(n)),
        Ok(Value::Null) => Ok(None),
        Ok(other) => Err(DatabaseError::Query(format!(
            "column {idx}: expected integer, got {other:?}"
        ))),
        Err(e) => Err(DatabaseError::Query(format!("column {idx}: {e}"))),
    }
}

fn kind_at(row: &libsql::Row, idx: i32) -> Result<ContentKind, DatabaseError> {
    text_at(row, idx)?
        .parse()
        .map_err(|e: String| DatabaseError::Query(format!("column {idx}: {e}")))
}

/// Media columns start at `start`: file_id, file_unique_id, file_name, mime_type,
/// file_size, width, height, duration, thumbnail_file_id.
fn media_at(row: &libsql::Row, start: i32) -> Result<MediaDescriptor, DatabaseError> {
    Ok(MediaDescriptor {
        file_id: opt_text_at(row, start)?,
        file_unique_id: opt_text_at(row, start + 1)?,
        file_name: opt_text_at(row, start + 2)?,
        mime_type: opt_text_at(row, start + 3)?,
        file_size: opt_int_at(row, start + 4)?,
        width: opt_int_at(row, start + 5)?,
        height: opt_int_at(row, start + 6)?,
        duration: opt_int_at(row, start + 7)?,
        thumbnail_file_id: opt_text_at(row, start + 8)?,
    })
}

fn is_unique_violation(e: &libsql::Error) -> bool {
    e.to_string().contains("UNIQUE constraint failed")
}

/// Map a libsql Row to a SourceMessage (without group items).
///
/// Column order matches MESSAGE_COLUMNS.
fn row_to_message(row: &libsql::Row) -> Result<SourceMessage, DatabaseError> {
    Ok(SourceMessage {
        id: int_at(row, 0)?,
        chat_id: int_at(row, 1)?,
        message_id: int_at(row, 2)?,
        sender_id: int_at(row, 3)?,
        sender_name: text_at(row, 4)?,
        origin_chat_id: int_at(row, 5)?,
        origin_message_id: int_at(row, 6)?,
        kind: kind_at(row, 7)?,
        caption: opt_text_at(row, 8)?,
        group_id: opt_text_at(row, 9)?,
        media: media_at(row, 10)?,
        tag: opt_text_at(row, 19)?,
        captured_at: parse_datetime(&text_at(row, 20)?),
        group_items: Vec::new(),
    })
}

fn row_to_item(row: &libsql::Row) -> Result<MediaGroupItem, DatabaseError> {
    Ok(MediaGroupItem {
        id: int_at(row, 0)?,
        group_id: text_at(row, 1)?,
        kind: kind_at(row, 2)?,
        media: media_at(row, 3)?,
        captured_at: parse_datetime(&text_at(row, 12)?),
    })
}

fn row_to_binding(row: &libsql::Row) -> Result<TagBinding, DatabaseError> {
    Ok(TagBinding {
        id: int_at(row, 0)?,
        channel_id: int_at(row, 1)?,
        title: text_at(row, 2)?,
        handle: text_at(row, 3)?,
        tag: text_at(row, 4)?,
        enabled: int_at(row, 5)? != 0,
    })
}

fn row_to_subscription(row: &libsql::Row) -> Result<Subscription, DatabaseError> {
    let batch_size = int_at(row, 6)?;
    Ok(Subscription {
        id: int_at(row, 0)?,
        channel_id: int_at(row, 1)?,
        name: text_at(row, 2)?,
        channel_type: text_at(row, 3)?,
        tag: text_at(row, 4)?,
        cursor: int_at(row, 5)?,
        batch_size: u32::try_from(batch_size).unwrap_or(1).max(1),
        member_count: opt_int_at(row, 7)?,
    })
}

// ── Trait implementations ───────────────────────────────────────────

const MEDIA_COLUMNS: &str = "file_id, file_unique_id, file_name, mime_type, file_size, width, height, duration, thumbnail_file_id";

const MESSAGE_COLUMNS: &str = "id, chat_id, message_id, sender_id, sender_name, origin_chat_id, origin_message_id, kind, caption, group_id, file_id, file_unique_id, file_name, mime_type, file_size, width, height, duration, thumbnail_file_id, tag, captured_at";

const ITEM_COLUMNS: &str = "id, group_id, kind, file_id, file_unique_id, file_name, mime_type, file_size, width, height, duration, thumbnail_file_id, captured_at";

const BINDING_COLUMNS: &str = "id, channel_id, title, handle, tag, enabled";

const SUBSCRIPTION_COLUMNS: &str =
    "id, channel_id, name, channel_type, tag, cursor, batch_size, member_count";

#[async_trait]
impl MessageStore for LibSqlBackend {
    async fn capture_group_item(
        &self,
        group_id: &str,
        kind: ContentKind,
        media: &MediaDescriptor,
    ) -> Result<i64, DatabaseError> {
        if group_id.is_empty() {
            return Err(DatabaseError::Constraint(
                "media group item requires a group id".into(),
            ));
        }

        let mut rows = self
            .conn()
            .query(
                &format!(
                    "INSERT INTO media_group_items (group_id, kind, {MEDIA_COLUMNS}, captured_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                     RETURNING id"
                ),
                params![
                    group_id,
                    kind.as_str(),
                    opt_text(media.file_id.as_deref()),
                    opt_text(media.file_unique_id.as_deref()),
                    opt_text(media.file_name.as_deref()),
                    opt_text(media.mime_type.as_deref()),
                    opt_int(media.file_size),
                    opt_int(media.width),
                    opt_int(media.height),
                    opt_int(media.duration),
                    opt_text(media.thumbnail_file_id.as_deref()),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("capture_group_item: {e}")))?;

        let id = match rows.next().await {
            Ok(Some(row)) => int_at(&row, 0)?,
            Ok(None) => {
                return Err(DatabaseError::Query(
                    "capture_group_item: insert returned no id".into(),
                ));
            }
            Err(e) => return Err(DatabaseError::Query(format!("capture_group_item: {e}"))),
        };

        debug!(id, group_id, kind = %kind, "Media group item captured");
        Ok(id)
    }

    async fn capture_message(&self, envelope: &NewMessage) -> Result<i64, DatabaseError> {
        let group_id = envelope.group_id.as_deref().filter(|g| !g.is_empty());

        if let Some(group_id) = group_id
            && let Some(existing) = self.existing_group_message(group_id).await?
        {
            debug!(id = existing, group_id, "Media group already captured");
            return Ok(existing);
        }

        // OR IGNORE absorbs a concurrent insert of the same group id.
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "INSERT OR IGNORE INTO source_messages (chat_id, message_id, sender_id, sender_name,
                        origin_chat_id, origin_message_id, kind, caption, group_id, {MEDIA_COLUMNS},
                        tag, captured_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                        ?16, ?17, ?18, ?19, ?20)
                     RETURNING id"
                ),
                params![
                    envelope.chat_id,
                    envelope.message_id,
                    envelope.sender_id,
                    envelope.sender_name.as_str(),
                    envelope.origin_chat_id,
                    envelope.origin_message_id,
                    envelope.kind.as_str(),
                    opt_text(envelope.caption.as_deref()),
                    opt_text(group_id),
                    opt_text(envelope.media.file_id.as_deref()),
                    opt_text(envelope.media.file_unique_id.as_deref()),
                    opt_text(envelope.media.file_name.as_deref()),
                    opt_text(envelope.media.mime_type.as_deref()),
                    opt_int(envelope.media.file_size),
                    opt_int(envelope.media.width),
                    opt_int(envelope.media.height),
                    opt_int(envelope.media.duration),
                    opt_text(envelope.media.thumbnail_file_id.as_deref()),
                    opt_text(envelope.tag.as_deref()),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("capture_message: {e}")))?;

        let inserted = match rows.next().await {
            Ok(Some(row)) => Some(int_at(&row, 0)?),
            Ok(None) => None,
            Err(e) => return Err(DatabaseError::Query(format!("capture_message: {e}"))),
        };

        let id = match (inserted, group_id) {
            (Some(id), _) => id,
            (None, Some(group_id)) => self.existing_group_message(group_id).await?.ok_or_else(
                || DatabaseError::Query(format!("capture_message: group {group_id} vanished")),
            )?,
            (None, None) => {
                return Err(DatabaseError::Query(
                    "capture_message: insert returned no id".into(),
                ));
            }
        };

        debug!(
            id,
            origin_chat_id = envelope.origin_chat_id,
            kind = %envelope.kind,
            tag = envelope.tag.as_deref().unwrap_or(""),
            "Message captured"
        );
        Ok(id)
    }

    async fn messages_for_tag(
        &self,
        tag: &str,
        after_id: i64,
        limit: u32,
    ) -> Result<Vec<SourceMessage>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM source_messages
                     WHERE tag = ?1 AND id > ?2 ORDER BY id ASC LIMIT ?3"
                ),
                params![tag, after_id, i64::from(limit)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("messages_for_tag: {e}")))?;

        let mut messages = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("messages_for_tag: {e}")))?
        {
            messages.push(row_to_message(&row)?);
        }
        drop(rows);

        for message in &mut messages {
            if let Some(group_id) = message.group_id.clone() {
                message.group_items = self.items_for_group(&group_id).await?;
            }
        }
        Ok(messages)
    }
}

#[async_trait]
impl TagRegistry for LibSqlBackend {
    async fn active_binding(&self, channel_id: i64) -> Result<Option<TagBinding>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {BINDING_COLUMNS} FROM tag_bindings WHERE channel_id = ?1 AND enabled = 1"
                ),
                params![channel_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("active_binding: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_binding(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("active_binding: {e}"))),
        }
    }

    async fn bind(
        &self,
        channel_id: i64,
        title: &str,
        handle: &str,
        tag: &str,
    ) -> Result<i64, DatabaseError> {
        if tag.trim().is_empty() {
            return Err(DatabaseError::Constraint("tag cannot be empty".into()));
        }

        let now = Utc::now().to_rfc3339();
        let mut rows = self
            .conn()
            .query(
                "INSERT INTO tag_bindings (channel_id, title, handle, tag, enabled, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5)
                 RETURNING id",
                params![channel_id, title, handle, tag, now],
            )
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    DatabaseError::DuplicateBinding { channel_id }
                } else {
                    DatabaseError::Query(format!("bind: {e}"))
                }
            })?;

        let id = match rows.next().await {
            Ok(Some(row)) => int_at(&row, 0)?,
            Ok(None) => return Err(DatabaseError::Query("bind: insert returned no id".into())),
            Err(e) if is_unique_violation(&e) => {
                return Err(DatabaseError::DuplicateBinding { channel_id });
            }
            Err(e) => return Err(DatabaseError::Query(format!("bind: {e}"))),
        };

        info!(id, channel_id, tag, "Tag binding created");
        Ok(id)
    }

    async fn known_tags(&self) -> Result<Vec<String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT DISTINCT tag FROM tag_bindings WHERE enabled = 1 AND tag != '' ORDER BY tag",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("known_tags: {e}")))?;

        let mut tags = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("known_tags: {e}")))?
        {
            tags.push(text_at(&row, 0)?);
        }
        Ok(tags)
    }

    async fn disable_binding(&self, channel_id: i64) -> Result<bool, DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE tag_bindings SET enabled = 0, updated_at = ?2
                 WHERE channel_id = ?1 AND enabled = 1",
                params![channel_id, Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("disable_binding: {e}")))?;

        if changed > 0 {
            info!(channel_id, "Tag binding disabled");
        }
        Ok(changed > 0)
    }
}

#[async_trait]
impl SubscriptionRegistry for LibSqlBackend {
    async fn add_subscription(&self, sub: &NewSubscription) -> Result<i64, DatabaseError> {
        if sub.batch_size == 0 {
            return Err(DatabaseError::Constraint("batch size must be at least 1".into()));
        }

        let now = Utc::now().to_rfc3339();
        let mut rows = self
            .conn()
            .query(
                "INSERT INTO subscriptions (channel_id, name, channel_type, tag, cursor, batch_size,
                    created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, ?6)
                 RETURNING id",
                params![
                    sub.channel_id,
                    sub.name.as_str(),
                    sub.channel_type.as_str(),
                    sub.tag.as_str(),
                    i64::from(sub.batch_size),
                    now,
                ],
            )
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    DatabaseError::Constraint(format!(
                        "subscription for channel {} already exists",
                        sub.channel_id
                    ))
                } else {
                    DatabaseError::Query(format!("add_subscription: {e}"))
                }
            })?;

        match rows.next().await {
            Ok(Some(row)) => {
                let id = int_at(&row, 0)?;
                info!(id, channel_id = sub.channel_id, tag = %sub.tag, "Subscription added");
                Ok(id)
            }
            Ok(None) => Err(DatabaseError::Query(
                "add_subscription: insert returned no id".into(),
            )),
            Err(e) => Err(DatabaseError::Query(format!("add_subscription: {e}"))),
        }
    }

    async fn get_subscription(
        &self,
        channel_id: i64,
    ) -> Result<Option<Subscription>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE channel_id = ?1"),
                params![channel_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_subscription: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_subscription(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_subscription: {e}"))),
        }
    }

    async fn list_subscriptions(&self) -> Result<Vec<Subscription>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions ORDER BY id ASC"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_subscriptions: {e}")))?;

        let mut subs = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_subscriptions: {e}")))?
        {
            subs.push(row_to_subscription(&row)?);
        }
        Ok(subs)
    }

    async fn advance_cursor(&self, channel_id: i64, cursor: i64) -> Result<bool, DatabaseError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE subscriptions SET cursor = ?2, updated_at = ?3
                 WHERE channel_id = ?1 AND cursor < ?2",
                params![channel_id, cursor, Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("advance_cursor: {e}")))?;

        debug!(channel_id, cursor, changed, "Cursor update");
        Ok(changed > 0)
    }

    async fn update_subscription_metadata(
        &self,
        channel_id: i64,
        name: &str,
        member_count: i64,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE subscriptions SET name = ?2, member_count = ?3, updated_at = ?4
                 WHERE channel_id = ?1",
                params![channel_id, name, member_count, Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_subscription_metadata: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl OperatorRegistry for LibSqlBackend {
    async fn upsert_operator(
        &self,
        user_id: i64,
        first_name: &str,
        last_name: Option<&str>,
        role: OperatorRole,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO operators (user_id, first_name, last_name, role)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(user_id) DO UPDATE SET
                    first_name = excluded.first_name,
                    last_name = excluded.last_name,
                    role = excluded.role,
                    updated_at = datetime('now')",
                params![user_id, first_name, opt_text(last_name), role.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_operator: {e}")))?;
        Ok(())
    }

    async fn is_admin(&self, user_id: i64) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT role FROM operators WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("is_admin: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(text_at(&row, 0)? == OperatorRole::Admin.as_str()),
            Ok(None) => Ok(false),
            Err(e) => Err(DatabaseError::Query(format!("is_admin: {e}"))),
        }
    }
}
