use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use test_probe::config::{Config, StorageProviderKind, VaultProviderKind};
use test_probe::kafka::StreamIndex;
use test_probe::model::{SecurityProtocol, StorageDirective};
use test_probe::queue_controller::QueueController;
use test_probe::routes::api_routes;
use test_probe::service_context::ServiceFunctionContext;
use test_probe::storage::StagingFs;

fn test_config() -> Arc<Config> {
    Arc::new(Config {
        bind_address: "0.0.0.0".to_string(),
        bind_port: 8080,
        setup_state_timeout: Duration::from_secs(60),
        loading_state_timeout: Duration::from_secs(60),
        completed_state_timeout: Duration::from_secs(60),
        exception_state_timeout: Duration::from_secs(60),
        supervision_max_restarts: 3,
        supervision_restart_time_range: Duration::from_secs(60),
        kafka_bootstrap_servers: "localhost:9092".to_string(),
        kafka_schema_registry_url: "https://registry.invalid".to_string(),
        kafka_oauth_token_endpoint: String::new(),
        kafka_oauth_client_scope: None,
        kafka_security_protocol: SecurityProtocol::Plaintext,
        storage_provider: StorageProviderKind::Local,
        storage_topic_directive_file_name: "test-config.yaml".to_string(),
        vault_provider: VaultProviderKind::Aws,
        vault_function_arn: String::new(),
        vault_invoke_url: String::new(),
        vault_function_url: String::new(),
        vault_function_key: String::new(),
        vault_rosetta_mapping_path: "rosetta-mapping.yaml".to_string(),
        vault_request_params: HashMap::new(),
        cucumber_glue_packages: vec!["steps".to_string()],
        breaker_max_failures: 5,
        breaker_call_timeout: Duration::from_secs(5),
        breaker_reset_timeout: Duration::from_secs(30),
    })
}

fn stub_service_ctx() -> ServiceFunctionContext {
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

fn app() -> axum::Router {
    let queue = Arc::new(QueueController::new(
        test_config(),
        stub_service_ctx(),
        Arc::new(StagingFs::new()),
        Arc::new(StreamIndex::new()),
    ));
    api_routes(queue)
}

#[tokio::test]
async fn initialize_then_status_over_http() {
    let app = app();
    let response = app
        .clone()
        .oneshot(Request::builder().method("POST").uri("/api/tests").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let test_id = parsed["test_id"].as_str().unwrap().to_string();

    tokio::time::sleep(Duration::from_millis(20)).await;

    let response = app
        .oneshot(Request::builder().uri(format!("/api/tests/{test_id}/status")).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed["state"], "setup");
}

#[tokio::test]
async fn status_for_unknown_test_is_404() {
    let app = app();
    let unknown = uuid::Uuid::new_v4();
    let response = app
        .oneshot(Request::builder().uri(format!("/api/tests/{unknown}/status")).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
