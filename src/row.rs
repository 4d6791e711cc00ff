//! The stored unit and its codec. One row holds one field of one record:
//! partition key = record id, row key = field name, value = JSON-encoded
//! scalar, type tag = enough information to reverse the encoding. The
//! backend stamps every row with an opaque revision that changes on each
//! write; the codec only carries it, never interprets it.

use crate::StoreError;
use chrono::{DateTime, SecondsFormat, Utc};

/// Hard backend cap on a single encoded property value (64 KB).
pub const MAX_PROPERTY_BYTES: usize = 64 * 1024;

/// Scalar types a record field may have. The tag is stored next to the value
/// so rows stay decodable without the record type at hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Text,
    Int,
    Bool,
    Timestamp,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Text => "text",
            ValueKind::Int => "int",
            ValueKind::Bool => "bool",
            ValueKind::Timestamp => "timestamp",
        }
    }

    pub fn parse(tag: &str) -> Option<ValueKind> {
        match tag {
            "text" => Some(ValueKind::Text),
            "int" => Some(ValueKind::Int),
            "bool" => Some(ValueKind::Bool),
            "timestamp" => Some(ValueKind::Timestamp),
            _ => None,
        }
    }
}

/// One typed field value in transit between a record and its row.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Int(i64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
}

impl FieldValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            FieldValue::Text(_) => ValueKind::Text,
            FieldValue::Int(_) => ValueKind::Int,
            FieldValue::Bool(_) => ValueKind::Bool,
            FieldValue::Timestamp(_) => ValueKind::Timestamp,
        }
    }

    /// The value an absent (explicitly null) row decodes to.
    pub fn zero(kind: ValueKind) -> FieldValue {
        match kind {
            ValueKind::Text => FieldValue::Text(String::new()),
            ValueKind::Int => FieldValue::Int(0),
            ValueKind::Bool => FieldValue::Bool(false),
            ValueKind::Timestamp => FieldValue::Timestamp(DateTime::<Utc>::UNIX_EPOCH),
        }
    }
}

/// Backend-assigned per-row version stamp. Opaque everywhere above the
/// backend; compared only for equality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision(String);

impl Revision {
    pub fn new(stamp: impl Into<String>) -> Self {
        Revision(stamp.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The atomic stored unit. `revision` is `None` until the backend has stamped
/// the row, i.e. on rows built for writing.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub partition_key: String,
    pub row_key: String,
    pub type_tag: String,
    pub value: Option<String>,
    pub revision: Option<Revision>,
}

/// One write against a row, optionally guarded by the revision the writer
/// last observed. Without a precondition the write is unconditional.
#[derive(Debug, Clone)]
pub struct RowOp {
    pub row: Row,
    pub precondition: Option<Revision>,
}

/// Serializes one field into a row op. `prior` is the revision recorded for
/// this field at read time; fields never read (fresh records) pass `None` and
/// write unconditionally.
pub fn encode_field(
    partition_key: &str,
    name: &str,
    value: &FieldValue,
    prior: Option<&Revision>,
) -> Result<RowOp, StoreError> {
    let encoded = match value {
        FieldValue::Text(s) => serde_json::to_string(s),
        FieldValue::Int(i) => serde_json::to_string(i),
        FieldValue::Bool(b) => serde_json::to_string(b),
        FieldValue::Timestamp(ts) => {
            serde_json::to_string(&ts.to_rfc3339_opts(SecondsFormat::Nanos, true))
        }
    }
    .map_err(|e| StoreError::TypeMismatch {
        row_key: name.to_string(),
        tag: value.kind().as_str().to_string(),
        reason: e.to_string(),
    })?;

    if encoded.len() > MAX_PROPERTY_BYTES {
        return Err(StoreError::PropertyTooLarge {
            row_key: name.to_string(),
            size: encoded.len(),
            limit: MAX_PROPERTY_BYTES,
        });
    }

    Ok(RowOp {
        row: Row {
            partition_key: partition_key.to_string(),
            row_key: name.to_string(),
            type_tag: value.kind().as_str().to_string(),
            value: Some(encoded),
            revision: None,
        },
        precondition: prior.cloned(),
    })
}

/// Inverse of [`encode_field`]. An absent or explicitly null value yields the
/// zero value of the tagged kind; an unresolvable tag is a `TypeMismatch`.
pub fn decode_field(row: &Row) -> Result<(String, FieldValue), StoreError> {
    let kind = ValueKind::parse(&row.type_tag).ok_or_else(|| StoreError::TypeMismatch {
        row_key: row.row_key.clone(),
        tag: row.type_tag.clone(),
        reason: "unknown type tag".to_string(),
    })?;

    let mismatch = |reason: String| StoreError::TypeMismatch {
        row_key: row.row_key.clone(),
        tag: row.type_tag.clone(),
        reason,
    };

    let value = match row.value.as_deref() {
        None | Some("null") => FieldValue::zero(kind),
        Some(text) => match kind {
            ValueKind::Text => FieldValue::Text(
                serde_json::from_str::<String>(text).map_err(|e| mismatch(e.to_string()))?,
            ),
            ValueKind::Int => FieldValue::Int(
                serde_json::from_str::<i64>(text).map_err(|e| mismatch(e.to_string()))?,
            ),
            ValueKind::Bool => FieldValue::Bool(
                serde_json::from_str::<bool>(text).map_err(|e| mismatch(e.to_string()))?,
            ),
            ValueKind::Timestamp => {
                let raw =
                    serde_json::from_str::<String>(text).map_err(|e| mismatch(e.to_string()))?;
                let parsed = DateTime::parse_from_rfc3339(&raw)
                    .map_err(|e| mismatch(e.to_string()))?;
                FieldValue::Timestamp(parsed.with_timezone(&Utc))
            }
        },
    };

    Ok((row.row_key.clone(), value))
}
