//! # palaver-chat
//!
//! The chat synchronization core exposed to UI screens: conversation
//! lifecycle and message persistence over a document store, per-user
//! visibility semantics ("clearing" a chat hides it for one participant
//! without deleting the shared history), live chat-list and message feeds,
//! and session-local poll/reaction state.
//!
//! The store behind [`ChatRepository`] is anything implementing
//! `palaver_store::DocumentStore`; tests run against the in-process
//! `MemoryStore`.

pub mod config;
pub mod feed;
pub mod polls;
pub mod reactions;
pub mod repository;
pub mod session;
pub mod visibility;

mod error;

pub use config::RepositoryConfig;
pub use error::{ChatError, Result};
pub use feed::{ChatFeed, Feed, MessageFeed};
pub use polls::{Poll, PollBoard};
pub use reactions::{ReactionBoard, ReactionSet};
pub use repository::{ChatRepository, MessageOrder};
pub use session::SessionState;
