//! The document-store boundary: queries, live subscriptions and the
//! [`DocumentStore`] trait every backend implements.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde_json::Value;
use tokio::sync::mpsc;

use crate::document::{Document, FieldUpdate, Fields};
use crate::error::Result;

// ---------------------------------------------------------------------------
// Query model
// ---------------------------------------------------------------------------

/// A single query predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Field equals the value.
    FieldEq(String, Value),
    /// Array-valued field contains the value.
    ArrayContains(String, Value),
    /// String-valued field starts with the prefix (range filter).
    Prefix(String, String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub path: String,
    pub direction: Direction,
}

/// A query against one collection.
///
/// Built with the fluent helpers:
///
/// ```ignore
/// let q = Query::collection(COLLECTION_MESSAGES)
///     .filter(Filter::FieldEq("chat_id".into(), json!("c1")))
///     .order_by("timestamp", Direction::Ascending)
///     .limit(50);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: name.into(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, path: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            path: path.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Copy of this query without the ordering clause, for the
    /// missing-index fallback path.
    pub fn unordered(&self) -> Self {
        Self {
            order_by: None,
            ..self.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

/// One full delivery of a subscribed query's result set.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Store mutation counter at the time the snapshot was taken.
    pub revision: u64,
    pub documents: Vec<Document>,
}

/// Receiving half of a live query.
///
/// Each received item is either a full [`Snapshot`] of the query's current
/// result set or an in-band error; errors never silently end the stream, so
/// consumers can tell "subscription failed" from "subscription closed".
///
/// Delivery is revision-monotonic: a snapshot older than one already
/// yielded is discarded here rather than handed to the consumer.
///
/// Dropping the handle (or calling [`Subscription::unsubscribe`]) cancels
/// the subscription.  A snapshot already in flight when cancellation starts
/// may still be buffered, but nothing is ever yielded after `unsubscribe`
/// returns.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Result<Snapshot>>,
    last_revision: Option<u64>,
}

impl Subscription {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<Result<Snapshot>>) -> Self {
        Self {
            rx,
            last_revision: None,
        }
    }

    /// Wait for the next snapshot or error.  Returns `None` once the store
    /// side has dropped the subscription (e.g. store shutdown).
    pub async fn recv(&mut self) -> Option<Result<Snapshot>> {
        while let Some(item) = self.rx.recv().await {
            match item {
                Ok(snapshot) => {
                    if self.is_stale(snapshot.revision) {
                        continue;
                    }
                    self.last_revision = Some(snapshot.revision);
                    return Some(Ok(snapshot));
                }
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }

    /// Cancel the subscription.
    pub fn unsubscribe(mut self) {
        self.rx.close();
    }

    fn is_stale(&self, revision: u64) -> bool {
        self.last_revision.is_some_and(|last| revision <= last)
    }
}

impl futures::Stream for Subscription {
    type Item = Result<Snapshot>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match this.rx.poll_recv(cx) {
                Poll::Ready(Some(Ok(snapshot))) => {
                    if this.is_stale(snapshot.revision) {
                        continue;
                    }
                    this.last_revision = Some(snapshot.revision);
                    return Poll::Ready(Some(Ok(snapshot)));
                }
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// The capabilities Palaver needs from a document database.
///
/// This is the full surface consumed by the chat core; a production backend
/// wraps the vendor SDK behind it and [`crate::MemoryStore`] provides the
/// in-process implementation used by tests and local tooling.
pub trait DocumentStore: Send + Sync + 'static {
    /// Create a document with a store-assigned id and return it.
    fn create(
        &self,
        collection: &str,
        fields: Fields,
    ) -> impl Future<Output = Result<Document>> + Send;

    /// Fetch a single document by id.
    fn get(&self, collection: &str, id: &str) -> impl Future<Output = Result<Document>> + Send;

    /// Partially update a document.  Only the addressed fields (or map
    /// keys, for dotted paths) are touched.
    fn update(
        &self,
        collection: &str,
        id: &str,
        updates: &[FieldUpdate],
    ) -> impl Future<Output = Result<()>> + Send;

    /// Run a query and return the matching documents.
    fn query(&self, query: &Query) -> impl Future<Output = Result<Vec<Document>>> + Send;

    /// Subscribe to a query's live result set.
    fn subscribe(&self, query: Query) -> Subscription;
}
