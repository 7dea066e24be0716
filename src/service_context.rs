use std::sync::Arc;

use crate::error::ProbeResult;
use crate::model::{SecurityDirective, StorageDirective, TopicDirective};

/// Cross-cutting capabilities handed to the lifecycle controller and its
/// children as a bundle of curried function values (§4.7), not as service
/// objects. Keeps the controller free of compile-time dependencies on any
/// particular storage/vault backend; tests construct a stub bundle directly
/// instead of mocking trait objects.
#[derive(Clone)]
pub struct ServiceFunctionContext {
    pub fetch_from_storage: FetchFromStorage,
    pub upload_to_storage: UploadToStorage,
    pub fetch_security_directives: FetchSecurityDirectives,
}

pub type FetchFromStorage = Arc<
    dyn Fn(crate::ids::TestId, String) -> BoxFuture<ProbeResult<StorageDirective>> + Send + Sync,
>;

pub type UploadToStorage = Arc<
    dyn Fn(crate::ids::TestId, String, String) -> BoxFuture<ProbeResult<()>> + Send + Sync,
>;

pub type FetchSecurityDirectives = Arc<
    dyn Fn(Vec<TopicDirective>) -> BoxFuture<ProbeResult<Vec<SecurityDirective>>> + Send + Sync,
>;

pub type BoxFuture<T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send>>;

impl ServiceFunctionContext {
    /// Wires the real storage and vault pipelines into a callable bundle.
    pub fn live(
        storage: Arc<crate::storage::provider::StorageClient>,
        vault: Arc<crate::vault::VaultClient>,
    ) -> Self {
        let fetch_storage = storage.clone();
        let upload_storage = storage;
        let vault_client = vault;

        Self {
            fetch_from_storage: Arc::new(move |test_id, bucket| {
                let client = fetch_storage.clone();
                Box::pin(async move { client.fetch(test_id, &bucket).await })
            }),
            upload_to_storage: Arc::new(move |test_id, bucket, evidence_dir| {
                let client = upload_storage.clone();
                Box::pin(async move { client.upload(test_id, &bucket, &evidence_dir).await })
            }),
            fetch_security_directives: Arc::new(move |directives| {
                let client = vault_client.clone();
                Box::pin(async move { client.resolve_all(directives).await })
            }),
        }
    }
}

#[cfg(test)]
pub fn stub() -> ServiceFunctionContext {
    ServiceFunctionContext {
        fetch_from_storage: Arc::new(|_test_id, _bucket| {
            Box::pin(async {
                Ok(StorageDirective {
                    workspace_root: "/stub/features".to_string(),
                    evidence_dir: "/stub/evidence".to_string(),
                    topic_directives: Vec::new(),
                    source_bucket: "mem://stub".to_string(),
                })
            })
        }),
        upload_to_storage: Arc::new(|_test_id, _bucket, _evidence_dir| Box::pin(async { Ok(()) })),
        fetch_security_directives: Arc::new(|_directives| Box::pin(async { Ok(Vec::new()) })),
    }
}
