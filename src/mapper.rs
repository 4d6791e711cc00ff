//! Decomposition and reconstruction of whole records. `decompose` fans a
//! record out into one row op per declared field plus the reserved `id` row;
//! `compose` folds a same-partition row group back into a record, tolerating
//! rows that no longer match the type (dropped fields, retyped fields,
//! foreign writers).

use crate::record::{Record, VersionTag};
use crate::row::{decode_field, encode_field, FieldValue, Row, RowOp, ValueKind};
use crate::StoreError;
use std::collections::HashMap;

/// Row key of the presence marker every record writes alongside its fields.
/// A partition is a live record exactly when this row (or any field row)
/// exists; records with no payload fields still occupy their partition.
const ID_ROW: &str = "id";

/// Splits `record` into row ops under its own id, guarding each field with
/// the revision its version tag recorded at read time.
pub fn decompose<R: Record>(record: &R) -> Result<(String, Vec<RowOp>), StoreError> {
    decompose_as(record, record.id(), record.version())
}

/// Splits `record` under an explicit partition key and version tag. Fresh
/// creates pass a generated id and an empty tag, which makes every row write
/// unconditional.
pub fn decompose_as<R: Record>(
    record: &R,
    partition_key: &str,
    tag: &VersionTag,
) -> Result<(String, Vec<RowOp>), StoreError> {
    let fields = R::fields();
    let mut ops = Vec::with_capacity(fields.len() + 1);
    ops.push(encode_field(
        partition_key,
        ID_ROW,
        &FieldValue::Text(partition_key.to_string()),
        None,
    )?);
    for field in fields {
        debug_assert!(field.name != ID_ROW, "`id` is reserved for the store");
        let value = (field.get)(record);
        ops.push(encode_field(
            partition_key,
            field.name,
            &value,
            tag.revision_of(field.name),
        )?);
    }
    Ok((partition_key.to_string(), ops))
}

/// Rebuilds a record of type `R` from one partition's rows. Rows whose key
/// does not name a declared field, or whose type tag no longer matches the
/// declared kind, are skipped so old data stays readable under newer types.
/// An empty row group means the record does not exist.
pub fn compose<R: Record>(partition_key: &str, rows: &[Row]) -> Result<R, StoreError> {
    if rows.is_empty() {
        return Err(StoreError::NotFound {
            id: partition_key.to_string(),
        });
    }

    let by_key: HashMap<&str, &Row> = rows.iter().map(|r| (r.row_key.as_str(), r)).collect();
    let mut record = R::seeded(partition_key);
    let mut tag = VersionTag::default();

    for field in R::fields() {
        let Some(row) = by_key.get(field.name).copied() else {
            continue;
        };
        if ValueKind::parse(&row.type_tag) != Some(field.kind) {
            continue;
        }
        let (_, value) = decode_field(row)?;
        (field.set)(&mut record, value);
        if let Some(revision) = &row.revision {
            tag.record(field.name, revision.clone());
        }
    }

    record.set_version(tag);
    Ok(record)
}
