//! Single source of truth for conversation lifecycle and message
//! persistence, mediating all visibility semantics.
//!
//! Every operation is a fresh store round-trip; nothing writable is cached
//! between calls.  Reads flow store → repository → consumer, writes flow
//! the other way, and live updates arrive through [`Feed`]s driven by store
//! subscriptions.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info};

use palaver_shared::constants::{
    COLLECTION_CHATS, COLLECTION_MESSAGES, COLLECTION_USERS, MESSAGE_SEARCH_CAP,
};
use palaver_shared::{ChatId, MessageId, UserId};
use palaver_store::{
    Chat, Direction, DocumentStore, FieldUpdate, Filter, Message, MessageKind, Query, StoreError,
    User,
};

use crate::config::RepositoryConfig;
use crate::error::{ChatError, Result};
use crate::feed::{ChatFeed, Feed, MessageFeed};
use crate::visibility;

/// Ordering of a message history page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOrder {
    /// Oldest first, for live display.
    Ascending,
    /// Newest first, for history paging.
    Descending,
}

/// Conversation lifecycle and message persistence over a [`DocumentStore`].
pub struct ChatRepository<S> {
    store: Arc<S>,
    config: RepositoryConfig,
}

impl<S: DocumentStore> ChatRepository<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_config(store, RepositoryConfig::default())
    }

    pub fn with_config(store: Arc<S>, config: RepositoryConfig) -> Self {
        Self { store, config }
    }

    // ------------------------------------------------------------------
    // Conversation lifecycle
    // ------------------------------------------------------------------

    /// Find or create the conversation for exactly this participant set.
    ///
    /// The set is normalized (sorted, deduplicated) before comparison, so
    /// the same participants always resolve to the same chat regardless of
    /// listing order.  If the chat exists and some participants had
    /// cleared it, their clear marks are removed and their view of the
    /// history restored.  A failure leaves the chat in an unknown state;
    /// callers retry the whole operation.
    pub async fn create_or_restore_chat(&self, participants: &[UserId]) -> Result<ChatId> {
        self.create_or_restore(participants, None).await
    }

    /// Same as [`Self::create_or_restore_chat`] but with a display name,
    /// for multi-party chats.  The name only applies when a new chat is
    /// created.
    pub async fn create_group_chat(&self, name: &str, participants: &[UserId]) -> Result<ChatId> {
        self.create_or_restore(participants, Some(name)).await
    }

    async fn create_or_restore(
        &self,
        participants: &[UserId],
        chat_name: Option<&str>,
    ) -> Result<ChatId> {
        let normalized = normalize_participants(participants)?;

        if let Some(chat) = self.find_chat_by_participants(&normalized).await? {
            let cleared: Vec<UserId> = chat.cleared_by.keys().cloned().collect();
            if !cleared.is_empty() {
                self.restore_participants(&chat, &cleared).await?;
            }
            return Ok(chat.id);
        }

        let fields = Chat::new_chat_fields(&normalized, chat_name, Utc::now());
        let doc = self.timed(self.store.create(COLLECTION_CHATS, fields)).await?;
        info!(chat = %doc.id, participants = normalized.len(), "chat created");
        Ok(ChatId::new(doc.id))
    }

    /// Fetch a single chat.
    pub async fn get_chat(&self, chat_id: &ChatId) -> Result<Chat> {
        let doc = match self
            .timed(self.store.get(COLLECTION_CHATS, chat_id.as_str()))
            .await
        {
            Err(ChatError::Store(StoreError::NotFound)) => {
                return Err(ChatError::ChatNotFound(chat_id.clone()))
            }
            other => other?,
        };
        Ok(Chat::from_document(&doc)?)
    }

    /// Hide the chat (and its current history) from one participant's
    /// view.  The conversation persists untouched for everyone else, and
    /// re-engaging later reverses the clear.  Idempotent; a repeat clear
    /// only refreshes the timestamp.
    pub async fn clear_chat_for_user(&self, chat_id: &ChatId, user: &UserId) -> Result<()> {
        let chat = self.get_chat(chat_id).await?;
        if !chat.is_participant(user) {
            return Err(ChatError::NotAParticipant {
                chat: chat_id.clone(),
                user: user.clone(),
            });
        }

        // Per-key write: two users clearing concurrently both land.
        let mark = FieldUpdate::set(
            format!("cleared_by.{user}"),
            Utc::now().to_rfc3339(),
        );
        self.timed(self.store.update(COLLECTION_CHATS, chat_id.as_str(), &[mark]))
            .await?;

        self.set_chat_visibility(chat_id, user, false).await?;
        info!(chat = %chat_id, user = %user.short(), "chat cleared");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    /// Append a message.  It becomes visible to exactly the participants
    /// who have not cleared the chat as of this send.
    ///
    /// A sender who had cleared the chat is re-engaged first: their clear
    /// mark is dropped and their view of the history restored.
    ///
    /// The preview cache on the chat record is a separate write with no
    /// atomicity guarantee, and there is no idempotency key: retrying
    /// after a timeout may duplicate the message.
    pub async fn send_message(
        &self,
        chat_id: &ChatId,
        sender: &UserId,
        content: &str,
        kind: MessageKind,
    ) -> Result<MessageId> {
        let mut chat = self.get_chat(chat_id).await?;
        if !chat.is_participant(sender) {
            return Err(ChatError::NotAParticipant {
                chat: chat_id.clone(),
                user: sender.clone(),
            });
        }

        if chat.is_cleared_by(sender) {
            self.restore_participants(&chat, std::slice::from_ref(sender))
                .await?;
            chat = self.get_chat(chat_id).await?;
        }

        let timestamp = Utc::now();
        let visible_to: BTreeSet<UserId> =
            visibility::active_participants(&chat.participants, &chat.cleared_by)
                .into_iter()
                .collect();

        let fields =
            Message::new_message_fields(chat_id, sender, content, kind, timestamp, &visible_to);
        let doc = self
            .timed(self.store.create(COLLECTION_MESSAGES, fields))
            .await?;

        let preview = [
            FieldUpdate::set("last_message", content),
            FieldUpdate::set("last_message_time", timestamp.to_rfc3339()),
            FieldUpdate::set("last_message_sender", sender.as_str()),
        ];
        self.timed(self.store.update(COLLECTION_CHATS, chat_id.as_str(), &preview))
            .await?;

        info!(message = %doc.id, chat = %chat_id, sender = %sender.short(), "message sent");
        Ok(MessageId::new(doc.id))
    }

    /// One page of a chat's messages.
    ///
    /// Server-side ordering is attempted first; if the store lacks the
    /// composite index, the page is fetched unordered and sorted here with
    /// identical final ordering.  When `viewer` is given, only messages
    /// visible to them are returned, on either path.
    pub async fn list_messages(
        &self,
        chat_id: &ChatId,
        order: MessageOrder,
        limit: Option<u32>,
        viewer: Option<&UserId>,
    ) -> Result<Vec<Message>> {
        let limit = limit.unwrap_or(self.config.message_page) as usize;
        let direction = match order {
            MessageOrder::Ascending => Direction::Ascending,
            MessageOrder::Descending => Direction::Descending,
        };

        let base = Query::collection(COLLECTION_MESSAGES).filter(Filter::FieldEq(
            "chat_id".into(),
            Value::from(chat_id.as_str()),
        ));
        let ordered = base.clone().order_by("timestamp", direction).limit(limit);

        let (docs, needs_sort) = match self.timed(self.store.query(&ordered)).await {
            Ok(docs) => (docs, false),
            Err(ChatError::Store(StoreError::MissingIndex(index))) => {
                debug!(%index, "falling back to client-side message ordering");
                (self.timed(self.store.query(&base)).await?, true)
            }
            Err(e) => return Err(e),
        };

        let mut messages = docs
            .iter()
            .map(Message::from_document)
            .collect::<palaver_store::Result<Vec<_>>>()?;
        if needs_sort {
            messages.sort_by(|a, b| match direction {
                Direction::Ascending => a.timestamp.cmp(&b.timestamp),
                Direction::Descending => b.timestamp.cmp(&a.timestamp),
            });
            messages.truncate(limit);
        }
        if let Some(viewer) = viewer {
            messages.retain(|m| m.is_visible_to(viewer));
        }
        Ok(messages)
    }

    /// Case-insensitive substring search over the messages the viewer can
    /// see, in one chat or across all of their chats, newest first.
    pub async fn search_messages(
        &self,
        viewer: &UserId,
        query: &str,
        chat: Option<&ChatId>,
    ) -> Result<Vec<Message>> {
        let needle = query.to_lowercase();
        let chat_ids: Vec<ChatId> = match chat {
            Some(id) => vec![id.clone()],
            None => self
                .list_chats_for_user(viewer)
                .await?
                .into_iter()
                .map(|c| c.id)
                .collect(),
        };

        let mut results = Vec::new();
        for chat_id in &chat_ids {
            let messages = self.fetch_chat_messages(chat_id).await?;
            results.extend(messages.into_iter().filter(|m| {
                m.is_visible_to(viewer) && m.content.to_lowercase().contains(&needle)
            }));
        }

        results.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        results.truncate(MESSAGE_SEARCH_CAP);
        Ok(results)
    }

    // ------------------------------------------------------------------
    // Chat list
    // ------------------------------------------------------------------

    /// The user's chat list: every conversation they participate in and
    /// have not cleared, most recent activity first (chats with no
    /// messages yet sort last).
    pub async fn list_chats_for_user(&self, user: &UserId) -> Result<Vec<Chat>> {
        let base = Query::collection(COLLECTION_CHATS).filter(Filter::ArrayContains(
            "participants".into(),
            Value::from(user.as_str()),
        ));
        let ordered = base
            .clone()
            .order_by("last_message_time", Direction::Descending);

        let docs = match self.timed(self.store.query(&ordered)).await {
            Ok(docs) => docs,
            Err(ChatError::Store(StoreError::MissingIndex(index))) => {
                debug!(%index, "falling back to client-side chat ordering");
                self.timed(self.store.query(&base)).await?
            }
            Err(e) => return Err(e),
        };

        let mut chats = Vec::with_capacity(docs.len());
        for doc in &docs {
            let chat = Chat::from_document(doc)?;
            if !chat.is_cleared_by(user) {
                chats.push(chat);
            }
        }
        sort_chat_list(&mut chats);
        Ok(chats)
    }

    /// Live chat list.  Each delivery is the full filtered list, re-sorted
    /// exactly as [`Self::list_chats_for_user`] returns it.
    pub fn listen_chats_for_user(&self, user: &UserId) -> ChatFeed {
        let query = Query::collection(COLLECTION_CHATS).filter(Filter::ArrayContains(
            "participants".into(),
            Value::from(user.as_str()),
        ));
        let mut sub = self.store.subscribe(query);
        let user = user.clone();
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            while let Some(item) = sub.recv().await {
                let out = item.map_err(ChatError::from).and_then(|snapshot| {
                    let mut chats = Vec::with_capacity(snapshot.documents.len());
                    for doc in &snapshot.documents {
                        let chat = Chat::from_document(doc)?;
                        if !chat.is_cleared_by(&user) {
                            chats.push(chat);
                        }
                    }
                    sort_chat_list(&mut chats);
                    Ok(chats)
                });
                if tx.send(out).is_err() {
                    break;
                }
            }
        });
        Feed::new(rx, task)
    }

    /// Live view of one chat's messages visible to `viewer`, ascending by
    /// timestamp.
    pub fn listen_messages(&self, chat_id: &ChatId, viewer: &UserId) -> MessageFeed {
        let query = Query::collection(COLLECTION_MESSAGES).filter(Filter::FieldEq(
            "chat_id".into(),
            Value::from(chat_id.as_str()),
        ));
        let mut sub = self.store.subscribe(query);
        let viewer = viewer.clone();
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            while let Some(item) = sub.recv().await {
                let out = item.map_err(ChatError::from).and_then(|snapshot| {
                    let mut messages = Vec::with_capacity(snapshot.documents.len());
                    for doc in &snapshot.documents {
                        let message = Message::from_document(doc)?;
                        if message.is_visible_to(&viewer) {
                            messages.push(message);
                        }
                    }
                    messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
                    Ok(messages)
                });
                if tx.send(out).is_err() {
                    break;
                }
            }
        });
        Feed::new(rx, task)
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    /// Prefix search over user emails, excluding the requester.
    ///
    /// Matching follows the store's collation: case-sensitive and
    /// unnormalized, so `Ana@…` does not match a search for `ana`.  Known
    /// limitation, kept deliberately.
    pub async fn search_users_by_email_prefix(
        &self,
        requester: &UserId,
        prefix: &str,
        limit: Option<u32>,
    ) -> Result<Vec<User>> {
        let limit = limit.unwrap_or(self.config.user_search_limit) as usize;
        // One extra row in case the requester occupies a slot.
        let query = Query::collection(COLLECTION_USERS)
            .filter(Filter::Prefix("email".into(), prefix.to_string()))
            .order_by("email", Direction::Ascending)
            .limit(limit + 1);

        let docs = self.timed(self.store.query(&query)).await?;
        let mut users = Vec::with_capacity(docs.len());
        for doc in &docs {
            let user = User::from_document(doc)?;
            if &user.id != requester {
                users.push(user);
            }
        }
        users.truncate(limit);
        Ok(users)
    }

    /// Fetch a user profile by uid.
    pub async fn get_user(&self, user: &UserId) -> Result<User> {
        let query = Query::collection(COLLECTION_USERS).filter(Filter::FieldEq(
            "uid".into(),
            Value::from(user.as_str()),
        ));
        let docs = self.timed(self.store.query(&query)).await?;
        match docs.first() {
            Some(doc) => Ok(User::from_document(doc)?),
            None => Err(ChatError::UserNotFound(user.clone())),
        }
    }

    /// Create or refresh a user profile.
    pub async fn upsert_user(&self, user: &User) -> Result<()> {
        let query = Query::collection(COLLECTION_USERS).filter(Filter::FieldEq(
            "uid".into(),
            Value::from(user.id.as_str()),
        ));
        let docs = self.timed(self.store.query(&query)).await?;
        match docs.first() {
            Some(doc) => {
                let mut updates = vec![FieldUpdate::set("email", user.email.as_str())];
                updates.push(match &user.display_name {
                    Some(name) => FieldUpdate::set("display_name", name.as_str()),
                    None => FieldUpdate::delete("display_name"),
                });
                self.timed(self.store.update(COLLECTION_USERS, &doc.id, &updates))
                    .await?;
            }
            None => {
                self.timed(self.store.create(COLLECTION_USERS, user.to_fields()))
                    .await?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn timed<T>(&self, fut: impl Future<Output = palaver_store::Result<T>>) -> Result<T> {
        match self.config.op_timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => Ok(result?),
                Err(_) => Err(ChatError::Timeout),
            },
            None => Ok(fut.await?),
        }
    }

    /// Linear scan over the first participant's chats for an exact
    /// participant-set match.  Chat counts per user are small; an
    /// index-backed equality query would be preferable at scale.
    async fn find_chat_by_participants(&self, normalized: &[UserId]) -> Result<Option<Chat>> {
        let query = Query::collection(COLLECTION_CHATS).filter(Filter::ArrayContains(
            "participants".into(),
            Value::from(normalized[0].as_str()),
        ));
        let docs = self.timed(self.store.query(&query)).await?;

        let wanted: BTreeSet<&UserId> = normalized.iter().collect();
        for doc in &docs {
            let chat = Chat::from_document(doc)?;
            let members: BTreeSet<&UserId> = chat.participants.iter().collect();
            if members == wanted {
                return Ok(Some(chat));
            }
        }
        Ok(None)
    }

    /// Drop the clear marks for `users` and restore their view of the
    /// chat's existing history.
    async fn restore_participants(&self, chat: &Chat, users: &[UserId]) -> Result<()> {
        let marks: Vec<FieldUpdate> = users
            .iter()
            .map(|u| FieldUpdate::delete(format!("cleared_by.{u}")))
            .collect();
        self.timed(self.store.update(COLLECTION_CHATS, chat.id.as_str(), &marks))
            .await?;

        for user in users {
            self.set_chat_visibility(&chat.id, user, true).await?;
        }
        info!(chat = %chat.id, restored = users.len(), "cleared participants restored");
        Ok(())
    }

    /// Bulk visibility pass over a chat's messages, persisting only the
    /// ones whose `visible_to` actually changed.
    async fn set_chat_visibility(
        &self,
        chat_id: &ChatId,
        user: &UserId,
        visible: bool,
    ) -> Result<()> {
        let messages = self.fetch_chat_messages(chat_id).await?;
        let mut changed = 0usize;
        for message in &messages {
            if let Some(next) = visibility::apply_visibility(&message.visible_to, user, visible) {
                let update = FieldUpdate::set(
                    "visible_to",
                    Value::Array(next.iter().map(|u| Value::from(u.as_str())).collect()),
                );
                self.timed(self.store.update(
                    COLLECTION_MESSAGES,
                    message.id.as_str(),
                    &[update],
                ))
                .await?;
                changed += 1;
            }
        }
        debug!(chat = %chat_id, user = %user.short(), visible, changed, "visibility pass");
        Ok(())
    }

    async fn fetch_chat_messages(&self, chat_id: &ChatId) -> Result<Vec<Message>> {
        let query = Query::collection(COLLECTION_MESSAGES).filter(Filter::FieldEq(
            "chat_id".into(),
            Value::from(chat_id.as_str()),
        ));
        let docs = self.timed(self.store.query(&query)).await?;
        docs.iter()
            .map(|doc| Message::from_document(doc).map_err(ChatError::from))
            .collect()
    }
}

/// Most recent activity first; chats that never saw a message sort last.
fn sort_chat_list(chats: &mut [Chat]) {
    chats.sort_by(|a, b| {
        let a_time = a.last_message_time.unwrap_or(DateTime::<Utc>::MIN_UTC);
        let b_time = b.last_message_time.unwrap_or(DateTime::<Utc>::MIN_UTC);
        b_time.cmp(&a_time)
    });
}

fn normalize_participants(participants: &[UserId]) -> Result<Vec<UserId>> {
    let mut normalized = participants.to_vec();
    normalized.sort();
    normalized.dedup();
    if normalized.len() < 2 {
        return Err(ChatError::TooFewParticipants);
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use palaver_store::MemoryStore;

    fn repo() -> ChatRepository<MemoryStore> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
        ChatRepository::new(Arc::new(MemoryStore::new()))
    }

    fn uid(s: &str) -> UserId {
        UserId::new(s)
    }

    fn pair() -> Vec<UserId> {
        vec![uid("alice"), uid("bob")]
    }

    async fn send(
        repo: &ChatRepository<MemoryStore>,
        chat: &ChatId,
        from: &str,
        content: &str,
    ) -> MessageId {
        repo.send_message(chat, &uid(from), content, MessageKind::Text)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn chat_identity_ignores_participant_order() {
        let repo = repo();
        let id1 = repo
            .create_or_restore_chat(&[uid("alice"), uid("bob")])
            .await
            .unwrap();
        let id2 = repo
            .create_or_restore_chat(&[uid("bob"), uid("alice")])
            .await
            .unwrap();
        assert_eq!(id1, id2);
    }

    #[tokio::test]
    async fn chat_identity_dedups_participants() {
        let repo = repo();
        let id1 = repo.create_or_restore_chat(&pair()).await.unwrap();
        let id2 = repo
            .create_or_restore_chat(&[uid("bob"), uid("alice"), uid("bob")])
            .await
            .unwrap();
        assert_eq!(id1, id2);
    }

    #[tokio::test]
    async fn different_sets_get_different_chats() {
        let repo = repo();
        let ab = repo.create_or_restore_chat(&pair()).await.unwrap();
        let abc = repo
            .create_or_restore_chat(&[uid("alice"), uid("bob"), uid("carol")])
            .await
            .unwrap();
        assert_ne!(ab, abc);
    }

    #[tokio::test]
    async fn single_participant_is_rejected() {
        let repo = repo();
        let err = repo
            .create_or_restore_chat(&[uid("alice"), uid("alice")])
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::TooFewParticipants));
    }

    #[tokio::test]
    async fn send_and_list_basic_flow() {
        let repo = repo();
        let chat = repo.create_or_restore_chat(&pair()).await.unwrap();
        send(&repo, &chat, "alice", "hi").await;

        let messages = repo
            .list_messages(&chat, MessageOrder::Ascending, None, Some(&uid("bob")))
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "hi");
        assert!(messages[0].is_visible_to(&uid("alice")));
        assert!(messages[0].is_visible_to(&uid("bob")));
    }

    #[tokio::test]
    async fn send_updates_preview_cache() {
        let repo = repo();
        let chat = repo.create_or_restore_chat(&pair()).await.unwrap();
        send(&repo, &chat, "alice", "first").await;
        send(&repo, &chat, "bob", "second").await;

        let chat = repo.get_chat(&chat).await.unwrap();
        assert_eq!(chat.last_message.as_deref(), Some("second"));
        assert_eq!(chat.last_message_sender, Some(uid("bob")));
        assert!(chat.last_message_time.is_some());
    }

    #[tokio::test]
    async fn send_to_missing_chat_is_not_found() {
        let repo = repo();
        let err = repo
            .send_message(&ChatId::new("ghost"), &uid("alice"), "hi", MessageKind::Text)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::ChatNotFound(_)));
    }

    #[tokio::test]
    async fn non_participant_cannot_send_or_clear() {
        let repo = repo();
        let chat = repo.create_or_restore_chat(&pair()).await.unwrap();

        let err = repo
            .send_message(&chat, &uid("mallory"), "hi", MessageKind::Text)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotAParticipant { .. }));

        let err = repo
            .clear_chat_for_user(&chat, &uid("mallory"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotAParticipant { .. }));
    }

    #[tokio::test]
    async fn messages_sent_after_clear_exclude_the_clearer() {
        let repo = repo();
        let chat = repo.create_or_restore_chat(&pair()).await.unwrap();
        send(&repo, &chat, "alice", "hi").await;

        repo.clear_chat_for_user(&chat, &uid("bob")).await.unwrap();
        send(&repo, &chat, "alice", "are you there?").await;

        let bobs = repo
            .list_messages(&chat, MessageOrder::Ascending, None, Some(&uid("bob")))
            .await
            .unwrap();
        assert!(bobs.is_empty());

        let alices = repo
            .list_messages(&chat, MessageOrder::Ascending, None, Some(&uid("alice")))
            .await
            .unwrap();
        assert_eq!(alices.len(), 2);
    }

    #[tokio::test]
    async fn listing_excludes_cleared_chats() {
        let repo = repo();
        let chat = repo.create_or_restore_chat(&pair()).await.unwrap();
        send(&repo, &chat, "alice", "hi").await;

        assert_eq!(repo.list_chats_for_user(&uid("bob")).await.unwrap().len(), 1);

        repo.clear_chat_for_user(&chat, &uid("bob")).await.unwrap();
        assert!(repo.list_chats_for_user(&uid("bob")).await.unwrap().is_empty());
        // Alice still sees it.
        assert_eq!(
            repo.list_chats_for_user(&uid("alice")).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn create_or_restore_reuses_and_restores_cleared_chat() {
        let repo = repo();
        let chat = repo.create_or_restore_chat(&pair()).await.unwrap();
        send(&repo, &chat, "alice", "m1").await;
        send(&repo, &chat, "bob", "m2").await;

        repo.clear_chat_for_user(&chat, &uid("bob")).await.unwrap();

        let restored = repo.create_or_restore_chat(&pair()).await.unwrap();
        assert_eq!(restored, chat);

        let record = repo.get_chat(&chat).await.unwrap();
        assert!(record.cleared_by.is_empty());

        let bobs = repo
            .list_messages(&chat, MessageOrder::Ascending, None, Some(&uid("bob")))
            .await
            .unwrap();
        assert_eq!(bobs.len(), 2);
    }

    #[tokio::test]
    async fn sending_restores_the_cleared_sender() {
        let repo = repo();
        let chat = repo.create_or_restore_chat(&pair()).await.unwrap();
        send(&repo, &chat, "alice", "hi").await;

        repo.clear_chat_for_user(&chat, &uid("bob")).await.unwrap();
        send(&repo, &chat, "alice", "are you there?").await;

        // Bob re-engages by sending; his history comes back and the chat
        // reappears in his list.
        send(&repo, &chat, "bob", "back now").await;

        let bobs = repo
            .list_messages(&chat, MessageOrder::Ascending, None, Some(&uid("bob")))
            .await
            .unwrap();
        let contents: Vec<_> = bobs.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["hi", "are you there?", "back now"]);

        let chats = repo.list_chats_for_user(&uid("bob")).await.unwrap();
        assert_eq!(chats.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_clears_both_land() {
        let repo = repo();
        let chat = repo.create_or_restore_chat(&pair()).await.unwrap();
        send(&repo, &chat, "alice", "hi").await;

        let alice = uid("alice");
        let bob = uid("bob");
        let (a, b) = tokio::join!(
            repo.clear_chat_for_user(&chat, &alice),
            repo.clear_chat_for_user(&chat, &bob)
        );
        a.unwrap();
        b.unwrap();

        let record = repo.get_chat(&chat).await.unwrap();
        assert!(record.cleared_by.contains_key(&uid("alice")));
        assert!(record.cleared_by.contains_key(&uid("bob")));
    }

    #[tokio::test]
    async fn clear_is_idempotent() {
        let repo = repo();
        let chat = repo.create_or_restore_chat(&pair()).await.unwrap();
        send(&repo, &chat, "alice", "hi").await;

        repo.clear_chat_for_user(&chat, &uid("bob")).await.unwrap();
        repo.clear_chat_for_user(&chat, &uid("bob")).await.unwrap();

        let record = repo.get_chat(&chat).await.unwrap();
        assert_eq!(record.cleared_by.len(), 1);
    }

    #[tokio::test]
    async fn chat_list_orders_by_recent_activity() {
        let repo = repo();
        let errand = repo
            .create_or_restore_chat(&[uid("alice"), uid("bob")])
            .await
            .unwrap();
        let idle = repo
            .create_or_restore_chat(&[uid("alice"), uid("carol")])
            .await
            .unwrap();
        let busy = repo
            .create_or_restore_chat(&[uid("alice"), uid("dave")])
            .await
            .unwrap();

        send(&repo, &errand, "alice", "one").await;
        send(&repo, &busy, "alice", "two").await;

        let chats = repo.list_chats_for_user(&uid("alice")).await.unwrap();
        let ids: Vec<_> = chats.iter().map(|c| c.id.clone()).collect();
        assert_eq!(ids, vec![busy, errand, idle]);
    }

    #[tokio::test]
    async fn indexed_and_fallback_paging_agree() {
        let plain = repo();
        let indexed = ChatRepository::new(Arc::new({
            let store = MemoryStore::new();
            store.register_index(COLLECTION_MESSAGES, "chat_id", "timestamp");
            store
        }));

        for repo in [&plain, &indexed] {
            let chat = repo.create_or_restore_chat(&pair()).await.unwrap();
            for content in ["a", "b", "c", "d"] {
                send(repo, &chat, "alice", content).await;
            }

            let page = repo
                .list_messages(&chat, MessageOrder::Descending, Some(2), None)
                .await
                .unwrap();
            let contents: Vec<_> = page.iter().map(|m| m.content.as_str()).collect();
            assert_eq!(contents, vec!["d", "c"]);
        }
    }

    #[tokio::test]
    async fn group_chat_carries_its_name() {
        let repo = repo();
        let trip = repo
            .create_group_chat("trip planning", &[uid("alice"), uid("bob"), uid("carol")])
            .await
            .unwrap();

        let chat = repo.get_chat(&trip).await.unwrap();
        assert_eq!(chat.chat_name.as_deref(), Some("trip planning"));
        assert_eq!(chat.participants.len(), 3);
    }

    #[tokio::test]
    async fn chat_feed_tracks_clears_and_activity() {
        let repo = repo();
        let mut feed = repo.listen_chats_for_user(&uid("bob"));
        assert!(feed.recv().await.unwrap().unwrap().is_empty());

        let chat = repo.create_or_restore_chat(&pair()).await.unwrap();
        // Drain snapshots until the chat shows up.
        loop {
            let chats = feed.recv().await.unwrap().unwrap();
            if chats.len() == 1 {
                break;
            }
        }

        repo.clear_chat_for_user(&chat, &uid("bob")).await.unwrap();
        loop {
            let chats = feed.recv().await.unwrap().unwrap();
            if chats.is_empty() {
                break;
            }
        }
    }

    #[tokio::test]
    async fn message_feed_filters_by_visibility() {
        let repo = repo();
        let chat = repo.create_or_restore_chat(&pair()).await.unwrap();
        send(&repo, &chat, "alice", "hi").await;
        repo.clear_chat_for_user(&chat, &uid("bob")).await.unwrap();
        send(&repo, &chat, "alice", "hidden from bob").await;

        let mut feed = repo.listen_messages(&chat, &uid("bob"));
        let messages = feed.recv().await.unwrap().unwrap();
        assert!(messages.is_empty());

        let mut feed = repo.listen_messages(&chat, &uid("alice"));
        let messages = feed.recv().await.unwrap().unwrap();
        let contents: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["hi", "hidden from bob"]);
    }

    #[tokio::test]
    async fn unsubscribing_one_feed_leaves_others_running() {
        let repo = repo();
        let chat = repo.create_or_restore_chat(&pair()).await.unwrap();

        let alice_feed = repo.listen_messages(&chat, &uid("alice"));
        let mut bob_feed = repo.listen_messages(&chat, &uid("bob"));
        bob_feed.recv().await.unwrap().unwrap();
        alice_feed.unsubscribe();

        send(&repo, &chat, "alice", "still flowing").await;
        loop {
            let messages = bob_feed.recv().await.unwrap().unwrap();
            if messages.len() == 1 {
                break;
            }
        }
    }

    #[tokio::test]
    async fn email_prefix_search_is_case_sensitive_and_excludes_requester() {
        let repo = repo();
        for (user, email) in [
            ("u-ana", "ana@example.com"),
            ("u-anatole", "anatole@example.com"),
            ("u-Andre", "Andre@example.com"),
            ("u-bob", "bob@example.com"),
        ] {
            repo.upsert_user(&User {
                id: uid(user),
                email: email.into(),
                display_name: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        }

        let found = repo
            .search_users_by_email_prefix(&uid("u-ana"), "an", None)
            .await
            .unwrap();
        let emails: Vec<_> = found.iter().map(|u| u.email.as_str()).collect();
        // "Andre@…" does not match: matching is case-sensitive; the
        // requester's own row is dropped.
        assert_eq!(emails, vec!["anatole@example.com"]);
    }

    #[tokio::test]
    async fn upsert_then_get_user_round_trips() {
        let repo = repo();
        let mut user = User {
            id: uid("u-1"),
            email: "one@example.com".into(),
            display_name: None,
            created_at: Utc::now(),
        };
        repo.upsert_user(&user).await.unwrap();

        user.display_name = Some("One".into());
        repo.upsert_user(&user).await.unwrap();

        let fetched = repo.get_user(&uid("u-1")).await.unwrap();
        assert_eq!(fetched.display_name.as_deref(), Some("One"));
        assert_eq!(fetched.email, "one@example.com");

        let err = repo.get_user(&uid("u-2")).await.unwrap_err();
        assert!(matches!(err, ChatError::UserNotFound(_)));
    }

    #[tokio::test]
    async fn message_search_respects_visibility() {
        let repo = repo();
        let chat = repo.create_or_restore_chat(&pair()).await.unwrap();
        send(&repo, &chat, "alice", "Lunch tomorrow?").await;
        repo.clear_chat_for_user(&chat, &uid("bob")).await.unwrap();
        send(&repo, &chat, "alice", "lunch is off").await;

        let bobs = repo.search_messages(&uid("bob"), "lunch", None).await.unwrap();
        assert!(bobs.is_empty());

        let alices = repo
            .search_messages(&uid("alice"), "lunch", None)
            .await
            .unwrap();
        assert_eq!(alices.len(), 2);
        // Newest first.
        assert_eq!(alices[0].content, "lunch is off");
    }
}
