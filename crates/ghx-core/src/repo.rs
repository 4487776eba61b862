//! Repository data types returned by the reader.
//!
//! Field names follow the GitHub REST API wire format so the same types
//! decode responses and serialize results.

use serde::{Deserialize, Serialize};

/// Identifies the remote repository and branch a session operates against.
///
/// Immutable once attached to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryBinding {
    pub owner: String,
    pub name: String,
    pub base_branch: String,
}

impl RepositoryBinding {
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        base_branch: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            base_branch: base_branch.into(),
        }
    }

    /// Returns `owner/name`.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// Repository metadata, as much of it as the reader needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryInfo {
    pub full_name: String,
    pub default_branch: String,
    #[serde(default)]
    pub private: bool,
}

/// One branch from a branch listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchInfo {
    pub name: String,
    pub commit: BranchCommit,
    #[serde(default)]
    pub protected: bool,
}

/// Head commit of a branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchCommit {
    pub sha: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Kind of object a tree entry points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Blob,
    Tree,
    /// Submodule pointer.
    Commit,
}

/// One node in a tree snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub path: String,
    pub mode: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub sha: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl TreeEntry {
    /// Number of `/`-separated segments in the path.
    pub fn depth(&self) -> usize {
        self.path.split('/').filter(|s| !s.is_empty()).count()
    }
}

/// Result of a tree fetch.
///
/// When `truncated` is true the entry list is partial and must never be
/// treated as a complete listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeResult {
    pub sha: String,
    pub entries: Vec<TreeEntry>,
    pub truncated: bool,
}

/// One decoded file.
///
/// `size` is the decoded byte length and never exceeds the per-file cap the
/// file was read under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContent {
    pub path: String,
    pub content: String,
    pub encoding: String,
    pub size: u64,
    pub sha: String,
}

/// Raw tree response.
#[derive(Debug, Deserialize)]
pub(crate) struct RawTree {
    pub sha: String,
    #[serde(default)]
    pub tree: Vec<TreeEntry>,
    #[serde(default)]
    pub truncated: bool,
}

/// Raw contents response for a single object.
#[derive(Debug, Deserialize)]
pub(crate) struct RawContent {
    #[serde(rename = "type")]
    pub kind: String,
    pub path: String,
    pub sha: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_should_deserialize_tree_entry_from_wire_format() {
        let entry: TreeEntry = serde_json::from_value(json!({
            "path": "src/lib.rs",
            "mode": "100644",
            "type": "blob",
            "sha": "abc123",
            "size": 42,
            "url": "https://api.github.com/repos/o/r/git/blobs/abc123"
        }))
        .expect("should deserialize");

        assert_eq!(entry.kind, EntryKind::Blob);
        assert_eq!(entry.size, Some(42));
        assert_eq!(entry.depth(), 2);
    }

    #[test]
    fn test_should_deserialize_submodule_entry_without_size() {
        let entry: TreeEntry = serde_json::from_value(json!({
            "path": "vendor/dep",
            "mode": "160000",
            "type": "commit",
            "sha": "def456"
        }))
        .expect("should deserialize");

        assert_eq!(entry.kind, EntryKind::Commit);
        assert!(entry.size.is_none());
        assert!(entry.url.is_none());
    }

    #[test]
    fn test_should_serialize_binding_in_camel_case() {
        let binding = RepositoryBinding::new("octo", "hello", "main");
        let value = serde_json::to_value(&binding).expect("should serialize");
        assert_eq!(value["baseBranch"], "main");
        assert_eq!(binding.full_name(), "octo/hello");
    }

    #[test]
    fn test_should_deserialize_branch_listing() {
        let branches: Vec<BranchInfo> = serde_json::from_value(json!([
            {"name": "main", "commit": {"sha": "aaa", "url": "u"}, "protected": true},
            {"name": "dev", "commit": {"sha": "bbb"}}
        ]))
        .expect("should deserialize");

        assert_eq!(branches.len(), 2);
        assert!(branches[0].protected);
        assert!(!branches[1].protected);
        assert_eq!(branches[1].commit.sha, "bbb");
    }
}
