use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;

use crate::config::StorageProviderKind;
use crate::error::{ErrorCode, ProbeError, ProbeResult};
use crate::ids::TestId;
use crate::model::StorageDirective;

use super::directive::parse_topic_directives;
use super::staging::StagingFs;

/// Per-provider object-store adapter contract. Production adapters for
/// S3/Azure Blob/GCS are out of scope for the core (§1); this trait is the
/// seam a real adapter plugs into. The HTTP-based implementation below
/// speaks a minimal list/get/put protocol suitable for the `local` provider
/// and for exercising the pipeline against a test double.
#[async_trait]
trait ObjectStoreBackend: Send + Sync {
    async fn fetch_all(&self, bucket_uri: &str) -> ProbeResult<Vec<(String, Vec<u8>)>>;
    async fn upload_all(&self, bucket_uri: &str, files: Vec<(String, Vec<u8>)>) -> ProbeResult<()>;
}

/// `local` provider: bucket URIs are plain filesystem paths or `file://`
/// URIs, read directly off the host disk. Used for local development and
/// integration tests without a cloud dependency.
struct LocalBackend;

#[async_trait]
impl ObjectStoreBackend for LocalBackend {
    async fn fetch_all(&self, bucket_uri: &str) -> ProbeResult<Vec<(String, Vec<u8>)>> {
        let root = bucket_uri.strip_prefix("file://").unwrap_or(bucket_uri);
        let root = Path::new(root);
        let mut out = Vec::new();
        walk(root, root, &mut out).map_err(|err| {
            ProbeError::new(
                ErrorCode::Storage,
                format!("local fetch from `{bucket_uri}` failed: {err}"),
            )
        })?;
        Ok(out)
    }

    async fn upload_all(&self, bucket_uri: &str, files: Vec<(String, Vec<u8>)>) -> ProbeResult<()> {
        let root = bucket_uri.strip_prefix("file://").unwrap_or(bucket_uri);
        for (rel, bytes) in files {
            let dest = Path::new(root).join(&rel);
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent).map_err(|err| {
                    ProbeError::new(ErrorCode::Storage, format!("evidence upload failed: {err}"))
                })?;
            }
            std::fs::write(&dest, bytes).map_err(|err| {
                ProbeError::new(ErrorCode::Storage, format!("evidence upload failed: {err}"))
            })?;
        }
        Ok(())
    }
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<(String, Vec<u8>)>) -> std::io::Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            walk(root, &path, out)?;
        } else {
            let rel = path.strip_prefix(root).unwrap_or(&path);
            out.push((
                rel.to_string_lossy().replace('\\', "/"),
                std::fs::read(&path)?,
            ));
        }
    }
    Ok(())
}

/// `aws` / `azure` / `gcp` providers: the SDK-specific multi-part transfer
/// mechanics (§4.5 "Provider-native streaming") live in the real adapter;
/// here the contract is reduced to a generic HTTP list/get/put surface so
/// the pipeline above it is exercised identically regardless of backend.
struct HttpBackend {
    client: Client,
}

#[async_trait]
impl ObjectStoreBackend for HttpBackend {
    async fn fetch_all(&self, bucket_uri: &str) -> ProbeResult<Vec<(String, Vec<u8>)>> {
        let list_url = format!("{}/_list", bucket_uri.trim_end_matches('/'));
        let paths: Vec<String> = self
            .client
            .get(&list_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|err| ProbeError::new(ErrorCode::Storage, format!("object listing failed: {err}")))?
            .json()
            .await
            .map_err(|err| ProbeError::new(ErrorCode::Storage, format!("object listing response invalid: {err}")))?;

        let mut out = Vec::with_capacity(paths.len());
        for path in paths {
            let url = format!("{}/{}", bucket_uri.trim_end_matches('/'), path);
            let bytes = self
                .client
                .get(&url)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|err| ProbeError::new(ErrorCode::Storage, format!("object fetch `{path}` failed: {err}")))?
                .bytes()
                .await
                .map_err(|err| ProbeError::new(ErrorCode::Storage, format!("object fetch `{path}` failed: {err}")))?;
            out.push((path, bytes.to_vec()));
        }
        Ok(out)
    }

    async fn upload_all(&self, bucket_uri: &str, files: Vec<(String, Vec<u8>)>) -> ProbeResult<()> {
        for (rel, bytes) in files {
            let url = format!("{}/{}", bucket_uri.trim_end_matches('/'), rel);
            self.client
                .put(&url)
                .body(bytes)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|err| ProbeError::new(ErrorCode::Storage, format!("evidence upload `{rel}` failed: {err}")))?;
        }
        Ok(())
    }
}

/// Storage pipeline entry point: fetches a test's payload into the staging
/// filesystem, validates it, and later streams evidence back out (§4.5).
pub struct StorageClient {
    fs: Arc<StagingFs>,
    backend: Arc<dyn ObjectStoreBackend>,
    topic_directive_file_name: String,
}

impl StorageClient {
    pub fn new(
        provider: StorageProviderKind,
        fs: Arc<StagingFs>,
        http: Client,
        topic_directive_file_name: String,
    ) -> Self {
        let backend: Arc<dyn ObjectStoreBackend> = match provider {
            StorageProviderKind::Local => Arc::new(LocalBackend),
            StorageProviderKind::Aws | StorageProviderKind::Azure | StorageProviderKind::Gcp => {
                Arc::new(HttpBackend { client: http })
            }
        };
        Self {
            fs,
            backend,
            topic_directive_file_name,
        }
    }

    /// Fetch contract (§4.5): copy the bucket into `/<testId>/`, then
    /// validate `features/` and the topic directive file.
    pub async fn fetch(&self, test_id: TestId, bucket_uri: &str) -> ProbeResult<StorageDirective> {
        self.fs.create_test_root(test_id)?;
        let root = test_id.staging_root();

        for (path, bytes) in self.backend.fetch_all(bucket_uri).await? {
            self.fs.write_file(&format!("{root}/{path}"), bytes);
        }

        let features_dir = format!("{root}/features");
        if !self.fs.dir_nonempty(&features_dir) {
            return Err(ProbeError::new(
                ErrorCode::Storage,
                "features/ directory is missing or empty",
            ));
        }

        let directive_path = format!("{root}/{}", self.topic_directive_file_name);
        let yaml = self.fs.read_file(&directive_path).ok_or_else(|| {
            ProbeError::new(
                ErrorCode::Storage,
                format!("missing topic directive file `{}`", self.topic_directive_file_name),
            )
        })?;
        let topic_directives = parse_topic_directives(&yaml)?;

        let evidence_dir = format!("{root}/evidence");
        self.fs.write_file(&format!("{evidence_dir}/.keep"), Vec::new());

        Ok(StorageDirective {
            workspace_root: features_dir,
            evidence_dir,
            topic_directives,
            source_bucket: bucket_uri.to_string(),
        })
    }

    /// Upload contract (§4.5): stream evidence back, then purge the
    /// staging subtree unconditionally. Upload failure never blocks cleanup.
    pub async fn upload(&self, test_id: TestId, bucket_uri: &str, evidence_dir: &str) -> ProbeResult<()> {
        let files: Vec<(String, Vec<u8>)> = self
            .fs
            .list_under(evidence_dir)
            .into_iter()
            .filter(|p| !p.ends_with("/.keep"))
            .filter_map(|path| {
                let rel = path
                    .strip_prefix(&format!("{}/", test_id.staging_root()))
                    .unwrap_or(&path)
                    .to_string();
                self.fs.read_file(&path).map(|bytes| (rel, bytes))
            })
            .collect();

        let upload_result = self.backend.upload_all(bucket_uri, files).await;
        if let Err(ref err) = upload_result {
            tracing::warn!(%test_id, error = %err.message, "evidence upload failed; cleaning up staging subtree anyway");
        }
        self.fs.remove_subtree(test_id);
        upload_result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn fetch_validates_features_and_directive() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("features")).unwrap();
        std::fs::write(dir.path().join("features/basic.feature"), "Feature: x").unwrap();
        std::fs::write(
            dir.path().join("test-config.yaml"),
            "topics:\n  - topic: orders\n    role: producer\n    clientPrincipal: svc\n",
        )
        .unwrap();

        let client = StorageClient::new(
            StorageProviderKind::Local,
            Arc::new(StagingFs::new()),
            Client::new(),
            "test-config.yaml".to_string(),
        );
        let test_id = TestId::new();
        let directive = client
            .fetch(test_id, &format!("file://{}", dir.path().display()))
            .await
            .unwrap();
        assert_eq!(directive.topic_directives.len(), 1);
    }

    #[tokio::test]
    async fn fetch_fails_when_features_missing() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("test-config.yaml"),
            "topics: []\n",
        )
        .unwrap();
        let client = StorageClient::new(
            StorageProviderKind::Local,
            Arc::new(StagingFs::new()),
            Client::new(),
            "test-config.yaml".to_string(),
        );
        let err = client
            .fetch(TestId::new(), &format!("file://{}", dir.path().display()))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Storage);
    }
}
