//! In-memory message reactions: at most one reaction per user per message.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use palaver_shared::{MessageId, UserId};

/// Emoji → users who reacted with it.  Empty buckets are never kept.
pub type ReactionSet = BTreeMap<String, BTreeSet<UserId>>;

/// Session-owned reaction state for the messages on screen.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReactionBoard {
    by_message: BTreeMap<MessageId, ReactionSet>,
}

impl ReactionBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle `user`'s reaction on a message.
    ///
    /// Re-reacting with the current emoji removes it; any other emoji
    /// replaces whatever the user had.  The whole transition is one
    /// mutation of the reaction set, so no observer ever sees the user in
    /// two buckets.
    pub fn react(&mut self, message: &MessageId, emoji: &str, user: &UserId) {
        let buckets = self.by_message.entry(message.clone()).or_default();
        let had_same = buckets
            .get(emoji)
            .is_some_and(|users| users.contains(user));

        for users in buckets.values_mut() {
            users.remove(user);
        }
        if !had_same {
            buckets
                .entry(emoji.to_string())
                .or_default()
                .insert(user.clone());
        }

        buckets.retain(|_, users| !users.is_empty());
        if buckets.is_empty() {
            self.by_message.remove(message);
        }
    }

    pub fn reactions(&self, message: &MessageId) -> Option<&ReactionSet> {
        self.by_message.get(message)
    }

    /// Per-emoji counts for UI badges.
    pub fn counts(&self, message: &MessageId) -> BTreeMap<&str, usize> {
        self.by_message
            .get(message)
            .map(|buckets| {
                buckets
                    .iter()
                    .map(|(emoji, users)| (emoji.as_str(), users.len()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The emoji `user` currently has on the message, if any.
    pub fn user_reaction(&self, message: &MessageId, user: &UserId) -> Option<&str> {
        self.by_message.get(message).and_then(|buckets| {
            buckets
                .iter()
                .find(|(_, users)| users.contains(user))
                .map(|(emoji, _)| emoji.as_str())
        })
    }
}
