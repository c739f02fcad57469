//! In-process [`DocumentStore`] backend.
//!
//! State lives behind a single mutex: collections of documents, a global
//! mutation counter, and the list of live query watchers.  Every mutation
//! bumps the counter and fans a fresh snapshot out to the watchers of the
//! touched collection; watchers whose receiver is gone are pruned on the
//! spot.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::document::{self, Document, FieldUpdate, Fields};
use crate::error::{Result, StoreError};
use crate::store::{Direction, DocumentStore, Filter, Query, Snapshot, Subscription};

#[derive(Debug)]
struct StoredDoc {
    revision: u64,
    fields: Fields,
}

#[derive(Debug)]
struct Watcher {
    query: Query,
    tx: mpsc::UnboundedSender<Result<Snapshot>>,
}

#[derive(Debug, Default)]
struct Inner {
    collections: HashMap<String, BTreeMap<String, StoredDoc>>,
    revision: u64,
    watchers: Vec<Watcher>,
    /// Registered composite indexes: (collection, filter path, order path).
    composite_indexes: HashSet<(String, String, String)>,
}

/// In-memory document store with live subscriptions.
///
/// Cloning is cheap; clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a composite index so queries filtering on `filter_path` and
    /// ordering on `order_path` take the server-ordered path instead of
    /// failing with [`StoreError::MissingIndex`].
    pub fn register_index(&self, collection: &str, filter_path: &str, order_path: &str) {
        let mut inner = self.lock();
        inner.composite_indexes.insert((
            collection.to_string(),
            filter_path.to_string(),
            order_path.to_string(),
        ));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Mutations complete before the lock is released, so a poisoned
        // guard still holds consistent state.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Inner {
    fn run_query(&self, query: &Query) -> Result<Vec<Document>> {
        if let Some(order) = &query.order_by {
            for filter in &query.filters {
                let filter_path = filter_path(filter);
                if filter_path != order.path
                    && !self.composite_indexes.contains(&(
                        query.collection.clone(),
                        filter_path.to_string(),
                        order.path.clone(),
                    ))
                {
                    return Err(StoreError::MissingIndex(format!(
                        "{} filtered on `{}` ordered on `{}`",
                        query.collection, filter_path, order.path
                    )));
                }
            }
        }

        let mut matches: Vec<Document> = self
            .collections
            .get(&query.collection)
            .into_iter()
            .flat_map(|docs| docs.iter())
            .filter(|(_, doc)| query.filters.iter().all(|f| matches_filter(&doc.fields, f)))
            .map(|(id, doc)| Document {
                id: id.clone(),
                revision: doc.revision,
                fields: doc.fields.clone(),
            })
            .collect();

        if let Some(order) = &query.order_by {
            matches.sort_by(|a, b| {
                let ord = compare_values(a.get(&order.path), b.get(&order.path));
                match order.direction {
                    Direction::Ascending => ord,
                    Direction::Descending => ord.reverse(),
                }
            });
        }

        if let Some(limit) = query.limit {
            matches.truncate(limit);
        }

        Ok(matches)
    }

    /// Push fresh snapshots to every watcher of `collection`, dropping
    /// watchers whose receiving side is gone.
    fn notify(&mut self, collection: &str) {
        let revision = self.revision;
        let mut results: Vec<Option<Result<Vec<Document>>>> = self
            .watchers
            .iter()
            .map(|w| {
                (w.query.collection == collection).then(|| self.run_query(&w.query))
            })
            .collect();

        let mut results = results.drain(..);
        self.watchers.retain(|w| match results.next().flatten() {
            None => true,
            Some(result) => {
                let item = result.map(|documents| Snapshot {
                    revision,
                    documents,
                });
                w.tx.send(item).is_ok()
            }
        });
    }
}

impl DocumentStore for MemoryStore {
    async fn create(&self, collection: &str, fields: Fields) -> Result<Document> {
        let id = Uuid::new_v4().to_string();
        let mut inner = self.lock();
        inner.revision += 1;
        let revision = inner.revision;
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(
                id.clone(),
                StoredDoc {
                    revision,
                    fields: fields.clone(),
                },
            );
        debug!(collection, id = %id, revision, "document created");
        inner.notify(collection);
        Ok(Document {
            id,
            revision,
            fields,
        })
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Document> {
        let inner = self.lock();
        let doc = inner
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .ok_or(StoreError::NotFound)?;
        Ok(Document {
            id: id.to_string(),
            revision: doc.revision,
            fields: doc.fields.clone(),
        })
    }

    async fn update(&self, collection: &str, id: &str, updates: &[FieldUpdate]) -> Result<()> {
        let mut inner = self.lock();
        inner.revision += 1;
        let revision = inner.revision;
        let doc = inner
            .collections
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
            .ok_or(StoreError::NotFound)?;
        for update in updates {
            document::apply(&mut doc.fields, update);
        }
        doc.revision = revision;
        debug!(collection, id, revision, n = updates.len(), "document updated");
        inner.notify(collection);
        Ok(())
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>> {
        self.lock().run_query(query)
    }

    fn subscribe(&self, query: Query) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        let initial = inner.run_query(&query).map(|documents| Snapshot {
            revision: inner.revision,
            documents,
        });
        // The receiver is still in scope, so the send cannot fail.
        let _ = tx.send(initial);
        inner.watchers.push(Watcher { query, tx });
        Subscription::new(rx)
    }
}

fn filter_path(filter: &Filter) -> &str {
    match filter {
        Filter::FieldEq(path, _) => path,
        Filter::ArrayContains(path, _) => path,
        Filter::Prefix(path, _) => path,
    }
}

fn matches_filter(fields: &Fields, filter: &Filter) -> bool {
    match filter {
        Filter::FieldEq(path, value) => document::resolve(fields, path) == Some(value),
        Filter::ArrayContains(path, value) => document::resolve(fields, path)
            .and_then(Value::as_array)
            .is_some_and(|items| items.contains(value)),
        Filter::Prefix(path, prefix) => document::resolve(fields, path)
            .and_then(Value::as_str)
            .is_some_and(|s| s.starts_with(prefix.as_str())),
    }
}

/// Total order over optional field values: a missing field sorts before
/// everything, then by type rank, then by value.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => compare_value(a, b),
    }
}

fn compare_value(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(pairs: &[(&str, Value)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn create_get_round_trip() {
        let store = MemoryStore::new();
        let doc = store
            .create("chats", fields(&[("name", json!("general"))]))
            .await
            .unwrap();

        let fetched = store.get("chats", &doc.id).await.unwrap();
        assert_eq!(fetched.fields.get("name"), Some(&json!("general")));
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store.get("chats", "nope").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn update_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .update("chats", "nope", &[FieldUpdate::set("x", 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn array_contains_and_eq_filters() {
        let store = MemoryStore::new();
        store
            .create(
                "chats",
                fields(&[("participants", json!(["alice", "bob"]))]),
            )
            .await
            .unwrap();
        store
            .create(
                "chats",
                fields(&[("participants", json!(["bob", "carol"]))]),
            )
            .await
            .unwrap();

        let q = Query::collection("chats").filter(Filter::ArrayContains(
            "participants".into(),
            json!("alice"),
        ));
        assert_eq!(store.query(&q).await.unwrap().len(), 1);

        let q = Query::collection("chats").filter(Filter::ArrayContains(
            "participants".into(),
            json!("bob"),
        ));
        assert_eq!(store.query(&q).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn prefix_filter_with_same_field_order_needs_no_index() {
        let store = MemoryStore::new();
        for email in ["ana@x.io", "anatole@x.io", "bob@x.io"] {
            store
                .create("users", fields(&[("email", json!(email))]))
                .await
                .unwrap();
        }

        let q = Query::collection("users")
            .filter(Filter::Prefix("email".into(), "ana".into()))
            .order_by("email", Direction::Ascending);
        let docs = store.query(&q).await.unwrap();
        let emails: Vec<_> = docs
            .iter()
            .map(|d| d.get("email").unwrap().as_str().unwrap())
            .collect();
        assert_eq!(emails, vec!["ana@x.io", "anatole@x.io"]);
    }

    #[tokio::test]
    async fn cross_field_order_requires_composite_index() {
        let store = MemoryStore::new();
        store
            .create(
                "messages",
                fields(&[("chat_id", json!("c1")), ("timestamp", json!("t1"))]),
            )
            .await
            .unwrap();

        let q = Query::collection("messages")
            .filter(Filter::FieldEq("chat_id".into(), json!("c1")))
            .order_by("timestamp", Direction::Ascending);
        let err = store.query(&q).await.unwrap_err();
        assert!(matches!(err, StoreError::MissingIndex(_)));

        store.register_index("messages", "chat_id", "timestamp");
        assert_eq!(store.query(&q).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn descending_order_puts_missing_fields_last() {
        let store = MemoryStore::new();
        store
            .create("chats", fields(&[("last_message_time", json!("t2"))]))
            .await
            .unwrap();
        store.create("chats", Fields::new()).await.unwrap();
        store
            .create("chats", fields(&[("last_message_time", json!("t9"))]))
            .await
            .unwrap();

        let q = Query::collection("chats").order_by("last_message_time", Direction::Descending);
        let docs = store.query(&q).await.unwrap();
        assert_eq!(docs[0].get("last_message_time"), Some(&json!("t9")));
        assert_eq!(docs[1].get("last_message_time"), Some(&json!("t2")));
        assert!(docs[2].get("last_message_time").is_none());
    }

    #[tokio::test]
    async fn subscription_sees_initial_and_updated_snapshots() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe(Query::collection("chats"));

        let first = sub.recv().await.unwrap().unwrap();
        assert!(first.documents.is_empty());

        store.create("chats", Fields::new()).await.unwrap();
        let second = sub.recv().await.unwrap().unwrap();
        assert_eq!(second.documents.len(), 1);
        assert!(second.revision > first.revision);
    }

    #[tokio::test]
    async fn subscription_ignores_other_collections() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe(Query::collection("chats"));
        sub.recv().await.unwrap().unwrap();

        store.create("users", Fields::new()).await.unwrap();
        store.create("chats", Fields::new()).await.unwrap();

        // The next delivery is the chats change, not the users one.
        let snap = sub.recv().await.unwrap().unwrap();
        assert_eq!(snap.documents.len(), 1);
    }

    #[tokio::test]
    async fn dropped_subscriber_is_pruned() {
        let store = MemoryStore::new();
        let sub = store.subscribe(Query::collection("chats"));
        drop(sub);

        store.create("chats", Fields::new()).await.unwrap();
        assert_eq!(store.lock().watchers.len(), 0);
    }
}
