//! # palaver-store
//!
//! The document-store boundary of Palaver.
//!
//! Chats, messages and user profiles live in a multi-tenant document
//! database.  This crate defines the [`DocumentStore`] trait capturing the
//! capabilities the chat core consumes (auto-id creation, reads, partial
//! field updates, filtered queries with an index-miss fallback, and live
//! full-snapshot subscriptions), the typed domain models with a validating
//! mapping layer, and [`MemoryStore`], the in-process backend used by tests
//! and local tooling.

pub mod document;
pub mod memory;
pub mod models;
pub mod store;

mod error;

pub use document::{Document, FieldOp, FieldUpdate, Fields};
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use models::{Chat, Message, MessageKind, User};
pub use store::{Direction, DocumentStore, Filter, OrderBy, Query, Snapshot, Subscription};
