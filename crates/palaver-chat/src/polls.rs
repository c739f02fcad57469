//! In-memory poll state with vote-toggle semantics.
//!
//! Polls are session-local in this slice; nothing here touches the store.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use palaver_shared::{PollId, UserId};

use crate::error::{ChatError, Result};

/// A poll attached to a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Poll {
    pub id: PollId,
    pub question: String,
    /// Ordered option labels; votes reference them by index.
    pub options: Vec<String>,
    pub allow_multiple: bool,
    /// Option index → voters.  Empty voter sets are pruned.
    pub votes: BTreeMap<usize, BTreeSet<UserId>>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

impl Poll {
    pub fn new(
        question: impl Into<String>,
        options: Vec<String>,
        allow_multiple: bool,
        created_by: UserId,
    ) -> Self {
        Self {
            id: PollId::new(),
            question: question.into(),
            options,
            allow_multiple,
            votes: BTreeMap::new(),
            created_by,
            created_at: Utc::now(),
        }
    }

    /// Toggle `voter`'s vote on `option`.
    ///
    /// Multiple-choice polls toggle that option alone.  Single-choice
    /// polls first withdraw the voter everywhere, then cast the new vote
    /// unless `option` was their previous choice, so a second tap
    /// un-votes instead of reassigning.
    pub fn vote(&mut self, option: usize, voter: &UserId) -> Result<()> {
        if option >= self.options.len() {
            return Err(ChatError::InvalidOption {
                index: option,
                count: self.options.len(),
            });
        }

        if self.allow_multiple {
            let voters = self.votes.entry(option).or_default();
            if !voters.remove(voter) {
                voters.insert(voter.clone());
            }
        } else {
            let previous_choice = self
                .votes
                .get(&option)
                .is_some_and(|voters| voters.contains(voter));
            for voters in self.votes.values_mut() {
                voters.remove(voter);
            }
            if !previous_choice {
                self.votes.entry(option).or_default().insert(voter.clone());
            }
        }

        self.votes.retain(|_, voters| !voters.is_empty());
        Ok(())
    }

    /// Number of votes on one option.
    pub fn tally(&self, option: usize) -> usize {
        self.votes.get(&option).map_or(0, BTreeSet::len)
    }

    pub fn has_voted(&self, voter: &UserId) -> bool {
        self.votes.values().any(|voters| voters.contains(voter))
    }
}

/// Session-owned registry of open polls.
///
/// Owned by [`crate::SessionState`] rather than living in ambient global
/// state, so poll bookkeeping begins and ends with the session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollBoard {
    polls: BTreeMap<PollId, Poll>,
}

impl PollBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_poll(
        &mut self,
        question: impl Into<String>,
        options: Vec<String>,
        allow_multiple: bool,
        created_by: &UserId,
    ) -> PollId {
        let poll = Poll::new(question, options, allow_multiple, created_by.clone());
        let id = poll.id.clone();
        self.polls.insert(id.clone(), poll);
        id
    }

    /// Toggle a vote on a registered poll and return its new state.
    pub fn vote(&mut self, poll: &PollId, option: usize, voter: &UserId) -> Result<&Poll> {
        let entry = self
            .polls
            .get_mut(poll)
            .ok_or_else(|| ChatError::PollNotFound(poll.clone()))?;
        entry.vote(option, voter)?;
        Ok(entry)
    }

    pub fn poll(&self, id: &PollId) -> Option<&Poll> {
        self.polls.get(id)
    }

    pub fn polls(&self) -> impl Iterator<Item = &Poll> {
        self.polls.values()
    }

    /// Drop a poll, returning its final state.
    pub fn close_poll(&mut self, id: &PollId) -> Option<Poll> {
        self.polls.remove(id)
    }
}
