//! Project data model shared by the remote client and the session engine.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The working copy: file path → file content.
///
/// A `BTreeMap` so two file sets with the same entries compare and serialize
/// identically regardless of the order they were built in.
pub type FileSystem = BTreeMap<String, String>;

/// Identity and descriptive data for a project, as returned by the store.
///
/// Always replaced wholesale; the session never patches individual fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMeta {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub files: FileSystem,
    pub created_at: u64,
    pub updated_at: u64,
    /// Store-assigned revision, bumped on every accepted file write.
    #[serde(default)]
    pub version: u64,
}

impl ProjectMeta {
    /// A listing entry without the file contents.
    #[must_use]
    pub fn summary(&self) -> ProjectSummary {
        ProjectSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            file_count: self.files.len(),
            updated_at: self.updated_at,
        }
    }
}

/// Lightweight entry for the cached project list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub file_count: usize,
    pub updated_at: u64,
}

/// Request body for creating a project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProject {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub files: FileSystem,
}

/// Result of a conditional file write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum SaveOutcome {
    /// The write was accepted; `version` is the new revision.
    Saved { version: u64 },
    /// The store's revision no longer matches the expected one.
    Conflict { remote_version: u64 },
}

/// Version-control state of a project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GitStatus {
    pub initialized: bool,
    pub branch: String,
    pub changed_files: Vec<String>,
    pub ahead: u32,
}

/// Persisted AI context for a project.
///
/// The store keeps an open-ended JSON object; `save_context` merges the
/// top-level keys of a patch into it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectContext(pub serde_json::Map<String, serde_json::Value>);

impl ProjectContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shallow merge: every top-level key in `patch` replaces ours. A `null`
    /// value removes the key.
    pub fn merge(&mut self, patch: &ProjectContext) {
        for (key, value) in &patch.0 {
            if value.is_null() {
                self.0.remove(key);
            } else {
                self.0.insert(key.clone(), value.clone());
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.0.insert(key.into(), value);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Build a [`FileSystem`] from `(path, content)` pairs.
pub fn file_system<I, P, C>(entries: I) -> FileSystem
where
    I: IntoIterator<Item = (P, C)>,
    P: Into<String>,
    C: Into<String>,
{
    entries
        .into_iter()
        .map(|(p, c)| (p.into(), c.into()))
        .collect()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn context_merge_replaces_and_removes_keys() {
        let mut ctx = ProjectContext::new();
        ctx.insert("summary", json!("old"));
        ctx.insert("notes", json!(["a"]));

        let mut patch = ProjectContext::new();
        patch.insert("summary", json!("new"));
        patch.insert("notes", serde_json::Value::Null);
        patch.insert("goal", json!("ship"));
        ctx.merge(&patch);

        assert_eq!(ctx.get("summary"), Some(&json!("new")));
        assert!(ctx.get("notes").is_none());
        assert_eq!(ctx.get("goal"), Some(&json!("ship")));
    }

    #[test]
    fn file_system_equality_ignores_insertion_order() {
        let a = file_system([("a.txt", "1"), ("b.txt", "2")]);
        let b = file_system([("b.txt", "2"), ("a.txt", "1")]);
        assert_eq!(a, b);
    }

    #[test]
    fn project_meta_deserializes_with_missing_optional_fields() {
        let meta: ProjectMeta = serde_json::from_value(json!({
            "id": "p1",
            "name": "Demo",
            "createdAt": 1,
            "updatedAt": 2
        }))
        .unwrap();
        assert_eq!(meta.version, 0);
        assert!(meta.files.is_empty());
        assert_eq!(meta.summary().file_count, 0);
    }

    #[test]
    fn save_outcome_is_tagged() {
        let v = serde_json::to_value(SaveOutcome::Conflict { remote_version: 4 }).unwrap();
        assert_eq!(v, json!({ "kind": "conflict", "remoteVersion": 4 }));
    }
}
