//! The record contract. Instead of runtime reflection, every record type
//! registers a static field-descriptor table: one [`FieldDef`] per persisted
//! field, carrying the field name, its scalar kind and a getter/setter pair.
//! The row keys `id` and `version_tag` are reserved for the store itself and
//! must not appear in the table.

use crate::row::{FieldValue, Revision, ValueKind};
use std::fmt;

/// Describes how a single field of `R` is read and written.
pub struct FieldDef<R> {
    pub name: &'static str,
    pub kind: ValueKind,
    pub get: fn(&R) -> FieldValue,
    pub set: fn(&mut R, FieldValue),
}

/// A persistable record: a stable id, an opaque version tag and a static
/// descriptor table over its remaining scalar fields.
pub trait Record: Clone + Send + Sync + 'static {
    /// Logical table name this type is stored under.
    fn table() -> &'static str;

    /// Descriptor table in field declaration order. The order fixes the
    /// serialization order of the version tag, so it must be stable.
    fn fields() -> &'static [FieldDef<Self>];

    /// Partition identifier, stable for the record's lifetime.
    fn id(&self) -> &str;

    fn version(&self) -> &VersionTag;

    fn set_version(&mut self, tag: VersionTag);

    /// A blank record carrying only the given id; composition assigns the
    /// remaining fields on top of it.
    fn seeded(id: &str) -> Self;
}

/// Record-level concurrency token: the per-field revisions observed at read
/// time, keyed by field name and kept in field declaration order. Callers
/// carry it around unchanged and must never interpret it; the string form
/// produced by `Display` exists only for logging and diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionTag {
    entries: Vec<(String, Revision)>,
}

impl VersionTag {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// The revision recorded for `field`, if that field was present when the
    /// record was read.
    pub fn revision_of(&self, field: &str) -> Option<&Revision> {
        self.entries
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, rev)| rev)
    }

    pub(crate) fn record(&mut self, field: &str, revision: Revision) {
        match self.entries.iter_mut().find(|(name, _)| name == field) {
            Some(entry) => entry.1 = revision,
            None => self.entries.push((field.to_string(), revision)),
        }
    }
}

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, rev)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            write!(f, "{}:{}", name, rev.as_str())?;
        }
        Ok(())
    }
}
