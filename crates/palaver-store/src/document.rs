//! Raw document representation and partial-update patches.
//!
//! Documents are flat field maps keyed by name.  A field path may contain a
//! single `.` to address one key inside a map-valued field, so concurrent
//! writers updating different keys of the same map never overwrite each
//! other.

use serde_json::Value;

/// The field map of a document.
pub type Fields = serde_json::Map<String, Value>;

/// A document as stored: id, last-write revision and its fields.
///
/// `revision` is the store's global mutation counter at the time of the
/// document's last write.  Subscription snapshots carry the counter too,
/// which is what consumers use to discard stale deliveries.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub revision: u64,
    pub fields: Fields,
}

impl Document {
    /// Look up a field by path.  A dotted path (`cleared_by.alice`)
    /// descends one level into a map-valued field.
    pub fn get(&self, path: &str) -> Option<&Value> {
        resolve(&self.fields, path)
    }
}

/// Resolve a (possibly dotted) field path against a field map.
pub(crate) fn resolve<'a>(fields: &'a Fields, path: &str) -> Option<&'a Value> {
    match path.split_once('.') {
        None => fields.get(path),
        Some((field, key)) => fields.get(field)?.as_object()?.get(key),
    }
}

/// What to do with a single field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    /// Write the value, creating the field (and, for dotted paths, the
    /// containing map) if absent.
    Set(Value),
    /// Remove the field or map key.  Removing something absent is a no-op.
    Delete,
}

/// One entry of a partial update.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldUpdate {
    pub path: String,
    pub op: FieldOp,
}

impl FieldUpdate {
    pub fn set(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            path: path.into(),
            op: FieldOp::Set(value.into()),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            op: FieldOp::Delete,
        }
    }
}

/// Apply one update in place.
pub(crate) fn apply(fields: &mut Fields, update: &FieldUpdate) {
    match update.path.split_once('.') {
        None => match &update.op {
            FieldOp::Set(value) => {
                fields.insert(update.path.clone(), value.clone());
            }
            FieldOp::Delete => {
                fields.remove(&update.path);
            }
        },
        Some((field, key)) => {
            match &update.op {
                FieldOp::Set(value) => {
                    let entry = fields
                        .entry(field.to_string())
                        .or_insert_with(|| Value::Object(serde_json::Map::new()));
                    if let Value::Object(map) = entry {
                        map.insert(key.to_string(), value.clone());
                    }
                }
                FieldOp::Delete => {
                    if let Some(Value::Object(map)) = fields.get_mut(field) {
                        map.remove(key);
                    }
                }
            }
        }
    }
}
