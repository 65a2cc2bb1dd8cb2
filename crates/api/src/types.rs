//! API response types.

use serde::{Deserialize, Serialize};

/// Kind of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirentKind {
    File,
    Dir,
}

/// One entry of a repository directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dirent {
    /// Content object id.
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: DirentKind,
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub mtime: i64,
}

impl Dirent {
    pub fn is_dir(&self) -> bool {
        self.kind == DirentKind::Dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_listing() {
        let json = r#"[
            {"id":"0000000000000000000000000000000000000000","type":"dir","name":"photos","mtime":1700000000},
            {"id":"a1b2","type":"file","name":"notes.txt","size":42,"mtime":1700000001}
        ]"#;
        let entries: Vec<Dirent> = serde_json::from_str(json).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_dir());
        assert_eq!(entries[0].size, 0);
        assert!(!entries[1].is_dir());
        assert_eq!(entries[1].size, 42);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let json = r#"{"type":"symlink","name":"x"}"#;
        assert!(serde_json::from_str::<Dirent>(json).is_err());
    }
}
