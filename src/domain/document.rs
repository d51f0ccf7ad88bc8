//! Document entities
//!
//! Tenant documents as the migration sees them, plus the per-document
//! update operations the driver hands to the store.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Prefix under which discovered payload paths are addressed in update maps
pub const DATA_FIELD_PREFIX: &str = "data";

/// Opaque, totally ordered document identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for DocumentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Tri-state migration marker.
///
/// Any value other than `Unset` excludes the document from later scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationMarker {
    #[default]
    Unset,
    /// Processed, nothing needed rewriting (`false`)
    Unchanged,
    /// Processed, at least one URL rewritten (`true`)
    Rewritten,
}

impl MigrationMarker {
    pub const fn is_set(self) -> bool {
        !matches!(self, Self::Unset)
    }

    pub const fn from_changed(changed: bool) -> Self {
        if changed { Self::Rewritten } else { Self::Unchanged }
    }

    /// Storage representation: `None` / `Some(false)` / `Some(true)`
    pub const fn as_flag(self) -> Option<bool> {
        match self {
            Self::Unset => None,
            Self::Unchanged => Some(false),
            Self::Rewritten => Some(true),
        }
    }

    pub const fn from_flag(flag: Option<bool>) -> Self {
        match flag {
            None => Self::Unset,
            Some(false) => Self::Unchanged,
            Some(true) => Self::Rewritten,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub tenant_id: String,
    pub data: Option<Value>,
    #[serde(default)]
    pub migrated: MigrationMarker,
}

impl Document {
    pub fn new(id: impl Into<DocumentId>, tenant_id: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            tenant_id: tenant_id.into(),
            data: Some(data),
            migrated: MigrationMarker::Unset,
        }
    }

    /// A payload worth walking: present and not JSON null
    pub fn populated_payload(&self) -> Option<&Value> {
        self.data.as_ref().filter(|v| !v.is_null())
    }
}

/// A legacy URL found inside a document payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredUrl {
    /// Dot-joined field/index segments relative to the payload root
    pub path: String,
    pub url: String,
}

/// A discovered URL whose rewrite differs from the original
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteResult {
    pub path: String,
    pub new_url: String,
}

/// Partial update for a single document: changed payload fields plus the marker stamp
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOperation {
    pub id: DocumentId,
    /// Keys are `data.<path>`
    pub set_fields: BTreeMap<String, String>,
    pub marker: MigrationMarker,
}

impl UpdateOperation {
    pub fn new(id: DocumentId) -> Self {
        Self {
            id,
            set_fields: BTreeMap::new(),
            marker: MigrationMarker::Unchanged,
        }
    }

    pub fn set_payload_field(&mut self, path: &str, value: String) {
        let field = if path.is_empty() {
            DATA_FIELD_PREFIX.to_string()
        } else {
            format!("{DATA_FIELD_PREFIX}.{path}")
        };
        self.set_fields.insert(field, value);
        self.marker = MigrationMarker::Rewritten;
    }

    pub fn changed(&self) -> bool {
        !self.set_fields.is_empty()
    }
}

/// Scan window for one page of unmigrated documents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanFilter {
    pub tenant_id: String,
    /// Exclusive lower bound on the id; `None` starts from the beginning
    pub after: Option<DocumentId>,
    pub limit: usize,
}

/// Apply a `data.<path>` field update to a payload.
///
/// Returns `false` when the path does not resolve to an existing string leaf's
/// parent (the payload is left untouched in that case).
pub fn apply_field_update(payload: &mut Value, field: &str, new_value: &str) -> bool {
    if field == DATA_FIELD_PREFIX {
        *payload = Value::String(new_value.to_string());
        return true;
    }
    let Some(path) = field
        .strip_prefix(DATA_FIELD_PREFIX)
        .and_then(|rest| rest.strip_prefix('.'))
    else {
        return false;
    };

    let mut segments = path.split('.').peekable();
    let mut current = payload;
    while let Some(segment) = segments.next() {
        let is_last = segments.peek().is_none();
        let next = match current {
            Value::Object(map) => map.get_mut(segment),
            Value::Array(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|index| items.get_mut(index)),
            _ => None,
        };
        let Some(next) = next else {
            return false;
        };
        if is_last {
            *next = Value::String(new_value.to_string());
            return true;
        }
        current = next;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn marker_flag_round_trip() {
        for marker in [
            MigrationMarker::Unset,
            MigrationMarker::Unchanged,
            MigrationMarker::Rewritten,
        ] {
            assert_eq!(MigrationMarker::from_flag(marker.as_flag()), marker);
        }
        assert!(!MigrationMarker::Unset.is_set());
        assert!(MigrationMarker::Unchanged.is_set());
    }

    #[test]
    fn update_operation_tracks_marker() {
        let mut op = UpdateOperation::new(DocumentId::new("a"));
        assert_eq!(op.marker, MigrationMarker::Unchanged);
        op.set_payload_field("items.0.src", "https://x".into());
        assert_eq!(op.marker, MigrationMarker::Rewritten);
        assert_eq!(op.set_fields["data.items.0.src"], "https://x");
    }

    #[test]
    fn applies_nested_array_and_object_paths() {
        let mut payload = json!({"a": [{"b": "old"}, "plain"], "c": {"d": "old"}});
        assert!(apply_field_update(&mut payload, "data.a.0.b", "new"));
        assert!(apply_field_update(&mut payload, "data.c.d", "new2"));
        assert_eq!(payload, json!({"a": [{"b": "new"}, "plain"], "c": {"d": "new2"}}));
    }

    #[test]
    fn replaces_root_string_payload() {
        let mut op = UpdateOperation::new(DocumentId::new("a"));
        op.set_payload_field("", "new".into());
        let mut payload = json!("old");
        assert!(apply_field_update(&mut payload, "data", &op.set_fields["data"]));
        assert_eq!(payload, json!("new"));
    }

    #[test]
    fn rejects_unknown_paths() {
        let mut payload = json!({"a": ["x"]});
        assert!(!apply_field_update(&mut payload, "data.a.5", "y"));
        assert!(!apply_field_update(&mut payload, "data.missing", "y"));
        assert!(!apply_field_update(&mut payload, "other.a.0", "y"));
        assert_eq!(payload, json!({"a": ["x"]}));
    }

    #[test]
    fn null_payload_is_not_populated() {
        let mut doc = Document::new("1", "t", Value::Null);
        assert!(doc.populated_payload().is_none());
        doc.data = None;
        assert!(doc.populated_payload().is_none());
    }
}
