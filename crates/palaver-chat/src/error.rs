use thiserror::Error;

use palaver_shared::{ChatId, PollId, UserId};
use palaver_store::StoreError;

/// Errors surfaced by the chat core.
#[derive(Error, Debug)]
pub enum ChatError {
    /// The chat id does not resolve to a conversation.
    #[error("Chat not found: {0}")]
    ChatNotFound(ChatId),

    /// No profile exists for the user id.
    #[error("User not found: {0}")]
    UserNotFound(UserId),

    /// The acting user is not a participant of the chat.  Rejected before
    /// any write.
    #[error("User {user} is not a participant of chat {chat}")]
    NotAParticipant { chat: ChatId, user: UserId },

    /// A conversation needs at least two distinct participants.
    #[error("A chat needs at least two distinct participants")]
    TooFewParticipants,

    /// The poll id does not resolve to an open poll.
    #[error("Poll not found: {0}")]
    PollNotFound(PollId),

    /// A vote addressed an option index the poll does not have.
    #[error("Option {index} is out of range for a poll with {count} options")]
    InvalidOption { index: usize, count: usize },

    /// A store round-trip exceeded the configured deadline.  Safe to
    /// retry; note that retrying a timed-out send may duplicate the
    /// message (there is no idempotency key).
    #[error("Store operation timed out")]
    Timeout,

    /// Underlying store failure.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl ChatError {
    /// Whether retrying the same logical operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ChatError::Timeout => true,
            ChatError::Store(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ChatError>;
