use dashmap::DashMap;

use crate::error::{ErrorCode, ProbeError, ProbeResult};
use crate::ids::TestId;

/// In-memory, process-local filesystem (the JIMFS-equivalent staging area,
/// §4.5). Every test owns an isolated subtree rooted at `/<testId>/`; no
/// path outside that prefix is reachable through a test's handle.
#[derive(Default)]
pub struct StagingFs {
    files: DashMap<String, Vec<u8>>,
}

fn normalize(path: &str) -> String {
    let mut out = String::from("/");
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        out.push_str(segment);
        out.push('/');
    }
    out.pop();
    if out.is_empty() {
        "/".to_string()
    } else {
        out
    }
}

impl StagingFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the root marker for a test's subtree. Fails if the subtree
    /// already exists — creating it twice is a programming error (§4.5).
    pub fn create_test_root(&self, test_id: TestId) -> ProbeResult<()> {
        let root = test_id.staging_root();
        let marker = format!("{root}/.root");
        if self.files.contains_key(&marker) {
            return Err(ProbeError::new(
                ErrorCode::Storage,
                format!("staging subtree for test {test_id} already exists"),
            ));
        }
        self.files.insert(marker, Vec::new());
        Ok(())
    }

    pub fn write_file(&self, path: &str, contents: Vec<u8>) {
        self.files.insert(normalize(path), contents);
    }

    pub fn read_file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.get(&normalize(path)).map(|v| v.clone())
    }

    pub fn exists(&self, path: &str) -> bool {
        self.files.contains_key(&normalize(path))
    }

    /// True iff any stored path starts with `prefix/` — used to check that a
    /// directory such as `features/` is non-empty without listing a real dir.
    pub fn dir_nonempty(&self, prefix: &str) -> bool {
        let prefix = format!("{}/", normalize(prefix));
        self.files
            .iter()
            .any(|entry| entry.key() != &prefix.trim_end_matches('/') && entry.key().starts_with(&prefix))
    }

    pub fn list_under(&self, prefix: &str) -> Vec<String> {
        let prefix = format!("{}/", normalize(prefix));
        self.files
            .iter()
            .map(|e| e.key().clone())
            .filter(|k| k.starts_with(&prefix) && !k.ends_with("/.root"))
            .collect()
    }

    /// Deletes every path under a test's subtree. Called unconditionally at
    /// `ShuttingDown` entry, regardless of how the test ended (invariant 5).
    pub fn remove_subtree(&self, test_id: TestId) {
        let root = format!("{}/", test_id.staging_root());
        self.files.retain(|key, _| !key.starts_with(&root));
    }
}

/// Serializes a staging path as a URI that preserves filesystem identity
/// across module boundaries (§4.5): `mem://staging/<path>`.
pub fn to_uri(path: &str) -> String {
    format!("mem://staging{}", normalize(path))
}

/// Parses a staging URI back to a path. Rejects anything not produced by
/// `to_uri` rather than falling back to default-filesystem parsing.
pub fn from_uri(uri: &str) -> ProbeResult<String> {
    uri.strip_prefix("mem://staging")
        .map(normalize)
        .ok_or_else(|| ProbeError::new(ErrorCode::Storage, format!("not a staging URI: {uri}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creating_existing_root_fails() {
        let fs = StagingFs::new();
        let id = TestId::new();
        fs.create_test_root(id).unwrap();
        assert!(fs.create_test_root(id).is_err());
    }

    #[test]
    fn write_read_roundtrip() {
        let fs = StagingFs::new();
        fs.write_file("/t/features/basic.feature", b"Feature: x".to_vec());
        assert_eq!(
            fs.read_file("t/features/basic.feature").unwrap(),
            b"Feature: x"
        );
    }

    #[test]
    fn dir_nonempty_detects_children() {
        let fs = StagingFs::new();
        assert!(!fs.dir_nonempty("/t/features"));
        fs.write_file("/t/features/basic.feature", b"x".to_vec());
        assert!(fs.dir_nonempty("/t/features"));
    }

    #[test]
    fn remove_subtree_purges_only_that_test() {
        let fs = StagingFs::new();
        let a = TestId::new();
        let b = TestId::new();
        fs.write_file(&format!("{}/features/x.feature", a.staging_root()), b"1".to_vec());
        fs.write_file(&format!("{}/features/y.feature", b.staging_root()), b"2".to_vec());
        fs.remove_subtree(a);
        assert!(!fs.exists(&format!("{}/features/x.feature", a.staging_root())));
        assert!(fs.exists(&format!("{}/features/y.feature", b.staging_root())));
    }

    #[test]
    fn uri_roundtrip() {
        let uri = to_uri("/t/evidence");
        assert_eq!(from_uri(&uri).unwrap(), "/t/evidence");
        assert!(from_uri("file:///t/evidence").is_err());
    }
}
