use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Router};
use axum_prometheus::PrometheusMetricLayer;
use reqwest::Client;
use tracing_subscriber::{fmt, EnvFilter};

use test_probe::config::{Config, VaultProviderKind};
use test_probe::kafka::StreamIndex;
use test_probe::queue_controller::QueueController;
use test_probe::routes::api_routes;
use test_probe::service_context::ServiceFunctionContext;
use test_probe::storage::{StagingFs, StorageClient};
use test_probe::vault::provider::{AwsLambdaInvoker, AzureFunctionInvoker, GcpCloudFunctionInvoker, VaultInvoker};
use test_probe::vault::rosetta::RosettaMapping;
use test_probe::vault::VaultClient;

async fn root() -> &'static str {
    "probe service"
}

fn load_rosetta_mapping(path: &str) -> anyhow::Result<RosettaMapping> {
    let raw = std::fs::read_to_string(path)
        .map_err(|err| anyhow::anyhow!("failed to read rosetta mapping file `{path}`: {err}"))?;
    if path.ends_with(".json") {
        Ok(serde_json::from_str(&raw)?)
    } else {
        Ok(serde_yaml::from_str(&raw)?)
    }
}

fn build_vault_invoker(config: &Config) -> Arc<dyn VaultInvoker> {
    match config.vault_provider {
        VaultProviderKind::Aws => Arc::new(AwsLambdaInvoker::new(
            config.vault_function_arn.clone(),
            config.vault_invoke_url.clone(),
        )),
        VaultProviderKind::Azure => Arc::new(AzureFunctionInvoker::new(
            config.vault_function_url.clone(),
            config.vault_function_key.clone(),
        )),
        VaultProviderKind::Gcp => Arc::new(GcpCloudFunctionInvoker::new(config.vault_function_url.clone())),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt().with_env_filter(EnvFilter::from_default_env()).json().init();

    dotenvy::dotenv().ok();

    let config = Arc::new(Config::from_env()?);
    let mapping = load_rosetta_mapping(&config.vault_rosetta_mapping_path)?;

    let staging = Arc::new(StagingFs::new());
    let streams = Arc::new(StreamIndex::new());

    let storage = Arc::new(StorageClient::new(
        config.storage_provider,
        staging.clone(),
        Client::new(),
        config.storage_topic_directive_file_name.clone(),
    ));
    let vault = Arc::new(VaultClient::new(
        build_vault_invoker(&config),
        mapping,
        config.vault_request_params.clone(),
        config.kafka_oauth_token_endpoint.clone(),
        config.kafka_oauth_client_scope.clone(),
        config.kafka_security_protocol,
    ));

    let service_ctx = ServiceFunctionContext::live(storage, vault);
    let queue = Arc::new(QueueController::new(config.clone(), service_ctx, staging, streams));

    let (prometheus_layer, metrics_handle) = PrometheusMetricLayer::pair();
    let app = Router::new()
        .route("/", get(root))
        .route("/metrics", get(move || async move { metrics_handle.render() }))
        .merge(api_routes(queue))
        .layer(prometheus_layer);

    let addr: SocketAddr = format!("{}:{}", config.bind_address, config.bind_port)
        .parse()
        .map_err(|error| Box::new(error) as Box<dyn std::error::Error>)?;
    tracing::info!(%addr, "listening for incoming connections");
    axum::Server::bind(&addr).serve(app.into_make_service()).await?;

    Ok(())
}
