//! Core types for the publication engine.

use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A 12-byte composite identifier: 4 bytes of timestamp seconds, 4 bytes
/// of process id, 4 bytes of per-process counter.
///
/// Equality is structural, so two identifiers built from the same hex
/// string compare equal regardless of where they were constructed.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub [u8; 12]);

/// Per-process counter for generated identifiers.
static OBJECT_ID_COUNTER: AtomicU32 = AtomicU32::new(0);

impl ObjectId {
    /// Generate a fresh identifier.
    pub fn new() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards")
            .as_secs() as u32;
        let pid = std::process::id();
        let count = OBJECT_ID_COUNTER.fetch_add(1, Ordering::Relaxed);

        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(&secs.to_be_bytes());
        bytes[4..8].copy_from_slice(&pid.to_be_bytes());
        bytes[8..12].copy_from_slice(&count.to_be_bytes());
        ObjectId(bytes)
    }

    /// Convert to a 24-character hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from a 24-character hex string.
    pub fn from_hex(s: &str) -> std::result::Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 12] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(ObjectId(arr))
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Unique identifier for a document.
///
/// Identifiers are opaque comparable values. A string id and an object
/// id built from the same hex characters are distinct identifiers.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DocumentId {
    String(String),
    Int(i64),
    ObjectId(ObjectId),
}

impl fmt::Debug for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentId::String(s) => write!(f, "DocumentId({:?})", s),
            DocumentId::Int(n) => write!(f, "DocumentId({})", n),
            DocumentId::ObjectId(oid) => write!(f, "DocumentId({})", oid),
        }
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentId::String(s) => write!(f, "{}", s),
            DocumentId::Int(n) => write!(f, "{}", n),
            DocumentId::ObjectId(oid) => write!(f, "{}", oid),
        }
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        DocumentId::String(s.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        DocumentId::String(s)
    }
}

impl From<i64> for DocumentId {
    fn from(n: i64) -> Self {
        DocumentId::Int(n)
    }
}

impl From<ObjectId> for DocumentId {
    fn from(oid: ObjectId) -> Self {
        DocumentId::ObjectId(oid)
    }
}

/// Position in the global mutation order (assigned by the store).
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Sequence(pub u64);

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seq({})", self.0)
    }
}

impl Sequence {
    pub fn next(self) -> Self {
        Sequence(self.0 + 1)
    }
}

/// A structured record with a unique identifier.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Unique identifier (caller-supplied or generated).
    pub id: DocumentId,

    /// Field name to value mapping. The identifier is not a field.
    pub fields: Map<String, Value>,
}

impl Document {
    /// Create an empty document with the given identifier.
    pub fn new(id: impl Into<DocumentId>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    /// Create a document from a JSON object value.
    pub fn from_json(id: impl Into<DocumentId>, value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Ok(Self {
                id: id.into(),
                fields,
            }),
            other => Err(StoreError::InvalidDocument(format!(
                "expected a JSON object, got {}",
                other
            ))),
        }
    }

    /// Create a document with a generated identifier.
    pub fn generate(value: Value) -> Result<Self> {
        Self::from_json(ObjectId::new(), value)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }
}

/// A single field-level update operation applied by [`Mutation::apply`].
///
/// Mirrors the update-operator documents of document databases: partial
/// field assignment, numeric increment, field removal, and whole-document
/// replacement.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Mutation {
    /// Assign the given fields, leaving others untouched.
    Set(Map<String, Value>),

    /// Add a numeric delta to each given field. Missing fields are
    /// created with the delta as their value; non-numeric fields fail.
    Inc(Map<String, Value>),

    /// Remove the given fields. Absent fields are ignored.
    Unset(Vec<String>),

    /// Replace the entire field set. The identifier is preserved.
    Replace(Map<String, Value>),
}

impl Mutation {
    /// Apply this mutation to a document in place.
    ///
    /// On error the document may be partially modified; the store applies
    /// mutations to a copy and commits only on success.
    pub fn apply(&self, doc: &mut Document) -> Result<()> {
        match self {
            Mutation::Set(fields) => {
                for (name, value) in fields {
                    doc.fields.insert(name.clone(), value.clone());
                }
                Ok(())
            }

            Mutation::Inc(deltas) => {
                for (name, delta) in deltas {
                    if !delta.is_number() {
                        return Err(StoreError::InvalidMutation(format!(
                            "increment delta for field '{}' is not a number",
                            name
                        )));
                    }
                    let next = match doc.fields.get(name) {
                        None => delta.clone(),
                        Some(current) => add_numbers(current, delta).ok_or_else(|| {
                            StoreError::InvalidMutation(format!(
                                "cannot increment non-numeric field '{}'",
                                name
                            ))
                        })?,
                    };
                    doc.fields.insert(name.clone(), next);
                }
                Ok(())
            }

            Mutation::Unset(names) => {
                for name in names {
                    doc.fields.remove(name);
                }
                Ok(())
            }

            Mutation::Replace(fields) => {
                doc.fields = fields.clone();
                Ok(())
            }
        }
    }
}

/// Add two JSON numbers, staying integral when both sides are integral.
fn add_numbers(a: &Value, b: &Value) -> Option<Value> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(xi), Some(yi)) = (x.as_i64(), y.as_i64()) {
                return Some(Value::from(xi.wrapping_add(yi)));
            }
            let sum = x.as_f64()? + y.as_f64()?;
            serde_json::Number::from_f64(sum).map(Value::Number)
        }
        _ => None,
    }
}

/// The kind of mutation a change record describes.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Change {
    /// A document was inserted.
    Inserted { document: Document },

    /// A document was updated. Carries both versions so consumers can
    /// evaluate filters against each without re-reading the store.
    Updated { old: Document, new: Document },

    /// A document was removed. Carries the last known version.
    Removed { document: Document },
}

impl Change {
    /// The identifier of the affected document.
    pub fn id(&self) -> &DocumentId {
        match self {
            Change::Inserted { document } => &document.id,
            Change::Updated { new, .. } => &new.id,
            Change::Removed { document } => &document.id,
        }
    }
}

/// An immutable record of one committed store mutation.
///
/// Created by the store at the moment of mutation and shared read-only
/// with every feed consumer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Monotonically increasing, assigned in mutation order.
    pub sequence: Sequence,

    pub change: Change,
}
