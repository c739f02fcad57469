//! Domain model structs and their document mappings.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the UI layer over IPC.  The `from_document` constructors are
//! the validation boundary: a document missing a required field (or holding
//! one of the wrong type) is rejected with [`StoreError::Malformed`] instead
//! of leaking defaults into business logic; genuinely optional fields
//! default explicitly.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use palaver_shared::constants::{COLLECTION_CHATS, COLLECTION_MESSAGES, COLLECTION_USERS};
use palaver_shared::{ChatId, MessageId, UserId};

use crate::document::{Document, Fields};
use crate::error::{Result, StoreError};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A user profile.  `id` is the auth provider's uid, stored as a `uid`
/// field; the document id itself is store-assigned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn from_document(doc: &Document) -> Result<Self> {
        let ctx = MapCtx::new(COLLECTION_USERS, doc);
        Ok(Self {
            id: UserId::new(ctx.req_str("uid")?),
            email: ctx.req_str("email")?.to_string(),
            display_name: ctx.opt_str("display_name")?,
            created_at: ctx.req_time("created_at")?,
        })
    }

    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("uid".into(), Value::from(self.id.as_str()));
        fields.insert("email".into(), Value::from(self.email.as_str()));
        if let Some(name) = &self.display_name {
            fields.insert("display_name".into(), Value::from(name.as_str()));
        }
        fields.insert("created_at".into(), Value::from(self.created_at.to_rfc3339()));
        fields
    }
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// A conversation record between a fixed set of participants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chat {
    pub id: ChatId,
    /// Sorted at creation; identity of the chat is this set.
    pub participants: Vec<UserId>,
    /// Present for group chats, absent for 1:1.
    pub chat_name: Option<String>,
    /// Denormalized preview of the most recent message.  Last-writer-wins
    /// cache; never used to order message history.
    pub last_message: Option<String>,
    pub last_message_time: Option<DateTime<Utc>>,
    pub last_message_sender: Option<UserId>,
    /// Per-user clear marks.  A user keyed here has hidden the chat from
    /// their own list; the record persists for everyone else.
    pub cleared_by: BTreeMap<UserId, DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Chat {
    pub fn from_document(doc: &Document) -> Result<Self> {
        let ctx = MapCtx::new(COLLECTION_CHATS, doc);

        let participants = ctx.req_array("participants")?;
        let mut cleared_by = BTreeMap::new();
        if let Some(value) = doc.fields.get("cleared_by") {
            let map = value
                .as_object()
                .ok_or_else(|| ctx.malformed("`cleared_by` is not a map"))?;
            for (uid, at) in map {
                let at = at
                    .as_str()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .ok_or_else(|| ctx.malformed("`cleared_by` holds a non-timestamp value"))?;
                cleared_by.insert(UserId::new(uid.clone()), at.with_timezone(&Utc));
            }
        }

        Ok(Self {
            id: ChatId::new(doc.id.clone()),
            participants: participants.into_iter().map(UserId::new).collect(),
            chat_name: ctx.opt_str("chat_name")?,
            last_message: ctx.opt_str("last_message")?,
            last_message_time: ctx.opt_time("last_message_time")?,
            last_message_sender: ctx.opt_str("last_message_sender")?.map(UserId::new),
            cleared_by,
            created_at: ctx.req_time("created_at")?,
        })
    }

    /// Field map for a brand-new chat record.
    pub fn new_chat_fields(
        participants: &[UserId],
        chat_name: Option<&str>,
        created_at: DateTime<Utc>,
    ) -> Fields {
        let mut fields = Fields::new();
        fields.insert(
            "participants".into(),
            Value::Array(
                participants
                    .iter()
                    .map(|p| Value::from(p.as_str()))
                    .collect(),
            ),
        );
        if let Some(name) = chat_name {
            fields.insert("chat_name".into(), Value::from(name));
        }
        fields.insert("cleared_by".into(), Value::Object(serde_json::Map::new()));
        fields.insert("created_at".into(), Value::from(created_at.to_rfc3339()));
        fields
    }

    pub fn is_participant(&self, user: &UserId) -> bool {
        self.participants.contains(user)
    }

    pub fn is_cleared_by(&self, user: &UserId) -> bool {
        self.cleared_by.contains_key(user)
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Kind of message payload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    File,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::File => "file",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(MessageKind::Text),
            "image" => Some(MessageKind::Image),
            "file" => Some(MessageKind::File),
            _ => None,
        }
    }
}

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender: UserId,
    pub content: String,
    pub kind: MessageKind,
    pub timestamp: DateTime<Utc>,
    /// Users currently permitted to see this message.  Computed from the
    /// chat's active participants at send time, then mutated per-user on
    /// clear and restore.  Always a subset of the chat's participants.
    pub visible_to: BTreeSet<UserId>,
}

impl Message {
    pub fn from_document(doc: &Document) -> Result<Self> {
        let ctx = MapCtx::new(COLLECTION_MESSAGES, doc);
        let kind_str = ctx.req_str("kind")?;
        let kind = MessageKind::parse(kind_str)
            .ok_or_else(|| ctx.malformed(format!("unknown message kind `{kind_str}`")))?;
        Ok(Self {
            id: MessageId::new(doc.id.clone()),
            chat_id: ChatId::new(ctx.req_str("chat_id")?),
            sender: UserId::new(ctx.req_str("sender")?),
            content: ctx.req_str("content")?.to_string(),
            kind,
            timestamp: ctx.req_time("timestamp")?,
            visible_to: ctx
                .req_array("visible_to")?
                .into_iter()
                .map(UserId::new)
                .collect(),
        })
    }

    /// Field map for a brand-new message; the id is store-assigned.
    pub fn new_message_fields(
        chat_id: &ChatId,
        sender: &UserId,
        content: &str,
        kind: MessageKind,
        timestamp: DateTime<Utc>,
        visible_to: &BTreeSet<UserId>,
    ) -> Fields {
        let mut fields = Fields::new();
        fields.insert("chat_id".into(), Value::from(chat_id.as_str()));
        fields.insert("sender".into(), Value::from(sender.as_str()));
        fields.insert("content".into(), Value::from(content));
        fields.insert("kind".into(), Value::from(kind.as_str()));
        fields.insert("timestamp".into(), Value::from(timestamp.to_rfc3339()));
        fields.insert(
            "visible_to".into(),
            Value::Array(visible_to.iter().map(|u| Value::from(u.as_str())).collect()),
        );
        fields
    }

    pub fn is_visible_to(&self, user: &UserId) -> bool {
        self.visible_to.contains(user)
    }
}

// ---------------------------------------------------------------------------
// Mapping helpers
// ---------------------------------------------------------------------------

/// Per-document mapping context carrying the collection and id for error
/// reporting.
struct MapCtx<'a> {
    collection: &'static str,
    doc: &'a Document,
}

impl<'a> MapCtx<'a> {
    fn new(collection: &'static str, doc: &'a Document) -> Self {
        Self { collection, doc }
    }

    fn malformed(&self, reason: impl Into<String>) -> StoreError {
        StoreError::Malformed {
            collection: self.collection.to_string(),
            id: self.doc.id.clone(),
            reason: reason.into(),
        }
    }

    fn req_str(&self, field: &str) -> Result<&'a str> {
        self.doc
            .fields
            .get(field)
            .and_then(Value::as_str)
            .ok_or_else(|| self.malformed(format!("missing or non-string `{field}`")))
    }

    fn opt_str(&self, field: &str) -> Result<Option<String>> {
        match self.doc.fields.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(self.malformed(format!("`{field}` is not a string"))),
        }
    }

    fn req_time(&self, field: &str) -> Result<DateTime<Utc>> {
        let raw = self.req_str(field)?;
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| self.malformed(format!("`{field}` is not a timestamp: {e}")))
    }

    fn opt_time(&self, field: &str) -> Result<Option<DateTime<Utc>>> {
        match self.opt_str(field)? {
            None => Ok(None),
            Some(raw) => DateTime::parse_from_rfc3339(&raw)
                .map(|dt| Some(dt.with_timezone(&Utc)))
                .map_err(|e| self.malformed(format!("`{field}` is not a timestamp: {e}"))),
        }
    }

    fn req_array(&self, field: &str) -> Result<Vec<String>> {
        let items = self
            .doc
            .fields
            .get(field)
            .and_then(Value::as_array)
            .ok_or_else(|| self.malformed(format!("missing or non-array `{field}`")))?;
        items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| self.malformed(format!("`{field}` holds a non-string entry")))
            })
            .collect()
    }
}
