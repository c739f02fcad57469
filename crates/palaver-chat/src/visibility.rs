//! Pure visibility logic: which participants a message is computed for and
//! how per-user hide/show transforms a message's `visible_to` set.
//!
//! No I/O happens here; the repository applies these functions and persists
//! only the sets that actually changed.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use palaver_shared::UserId;

/// Participants who have not currently cleared the chat.  New messages are
/// visible to exactly this set.
pub fn active_participants(
    participants: &[UserId],
    cleared_by: &BTreeMap<UserId, DateTime<Utc>>,
) -> Vec<UserId> {
    participants
        .iter()
        .filter(|p| !cleared_by.contains_key(*p))
        .cloned()
        .collect()
}

/// Transform a `visible_to` set for one user.
///
/// Returns `None` when the set is already in the requested state, so bulk
/// passes can skip redundant writes.
pub fn apply_visibility(
    visible_to: &BTreeSet<UserId>,
    user: &UserId,
    visible: bool,
) -> Option<BTreeSet<UserId>> {
    if visible_to.contains(user) == visible {
        return None;
    }
    let mut next = visible_to.clone();
    if visible {
        next.insert(user.clone());
    } else {
        next.remove(user);
    }
    Some(next)
}
