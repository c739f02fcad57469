//! # palaver-shared
//!
//! Typed identifiers and constants shared by every Palaver crate.

pub mod constants;
pub mod types;

pub use types::{ChatId, MessageId, PollId, UserId};
