//! Per-session chat state.
//!
//! [`SessionState`] is created when a user signs in and dropped when the
//! session ends, taking its poll and reaction bookkeeping with it.  Holding
//! this state in an owned struct (instead of process-wide statics) keeps
//! every user's transient UI state scoped to their own session.

use palaver_shared::UserId;

use crate::polls::PollBoard;
use crate::reactions::ReactionBoard;

/// Transient state owned by one signed-in session.
#[derive(Debug, Clone)]
pub struct SessionState {
    /// The signed-in user.
    pub user: UserId,
    /// Open polls created or seen during this session.
    pub polls: PollBoard,
    /// Reaction state for the messages on screen.
    pub reactions: ReactionBoard,
}

impl SessionState {
    pub fn new(user: UserId) -> Self {
        Self {
            user,
            polls: PollBoard::new(),
            reactions: ReactionBoard::new(),
        }
    }
}
