use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::error::{ErrorCode, ProbeError, ProbeResult};

/// Invokes the cloud vault function for one `(topic, role, principal)`
/// triple (§4.4 step 2). Every provider relies on cloud-native workload
/// identity; no application-level secret is ever held by this layer.
#[async_trait]
pub trait VaultInvoker: Send + Sync {
    async fn invoke(&self, request: Value) -> ProbeResult<Value>;
}

/// AWS: invokes a Lambda by ARN. The SDK default credential chain (instance
/// role, IRSA, environment) is assumed to be configured by the runtime
/// environment; this adapter's contract stops at "send request body, return
/// response body" per §1's out-of-scope note on per-provider SDK adapters.
pub struct AwsLambdaInvoker {
    pub function_arn: String,
    pub invoke_url: String,
    client: Client,
}

impl AwsLambdaInvoker {
    pub fn new(function_arn: String, invoke_url: String) -> Self {
        Self {
            function_arn,
            invoke_url,
            client: Client::builder().timeout(Duration::from_secs(25)).build().expect("client build"),
        }
    }
}

#[async_trait]
impl VaultInvoker for AwsLambdaInvoker {
    async fn invoke(&self, request: Value) -> ProbeResult<Value> {
        let response = self
            .client
            .post(&self.invoke_url)
            .header("X-Amz-Invocation-Type", "RequestResponse")
            .json(&request)
            .send()
            .await
            .map_err(|err| ProbeError::new(ErrorCode::Vault, format!("lambda `{}` invocation failed: {err}", self.function_arn)))?
            .error_for_status()
            .map_err(|err| ProbeError::new(ErrorCode::Vault, format!("lambda `{}` returned an error: {err}", self.function_arn)))?;
        response
            .json()
            .await
            .map_err(|err| ProbeError::new(ErrorCode::Vault, format!("lambda response was not valid JSON: {err}")))
    }
}

/// Azure: HTTPS POST to a function URL. The function key is infrastructure
/// config carried in the `x-functions-key` header, not an application secret.
pub struct AzureFunctionInvoker {
    pub function_url: String,
    pub function_key: String,
    client: Client,
}

impl AzureFunctionInvoker {
    pub fn new(function_url: String, function_key: String) -> Self {
        Self {
            function_url,
            function_key,
            client: Client::builder().timeout(Duration::from_secs(25)).build().expect("client build"),
        }
    }
}

#[async_trait]
impl VaultInvoker for AzureFunctionInvoker {
    async fn invoke(&self, request: Value) -> ProbeResult<Value> {
        let response = self
            .client
            .post(&self.function_url)
            .header("x-functions-key", &self.function_key)
            .json(&request)
            .send()
            .await
            .map_err(|err| ProbeError::new(ErrorCode::Vault, format!("azure function invocation failed: {err}")))?
            .error_for_status()
            .map_err(|err| ProbeError::new(ErrorCode::Vault, format!("azure function returned an error: {err}")))?;
        response
            .json()
            .await
            .map_err(|err| ProbeError::new(ErrorCode::Vault, format!("azure function response was not valid JSON: {err}")))
    }
}

/// GCP: HTTPS POST to a Cloud Function URL. Access is controlled at the
/// network/IAM layer; no application secret is attached to the request.
pub struct GcpCloudFunctionInvoker {
    pub function_url: String,
    client: Client,
}

impl GcpCloudFunctionInvoker {
    pub fn new(function_url: String) -> Self {
        Self {
            function_url,
            client: Client::builder().timeout(Duration::from_secs(25)).build().expect("client build"),
        }
    }
}

#[async_trait]
impl VaultInvoker for GcpCloudFunctionInvoker {
    async fn invoke(&self, request: Value) -> ProbeResult<Value> {
        let response = self
            .client
            .post(&self.function_url)
            .json(&request)
            .send()
            .await
            .map_err(|err| ProbeError::new(ErrorCode::Vault, format!("cloud function invocation failed: {err}")))?
            .error_for_status()
            .map_err(|err| ProbeError::new(ErrorCode::Vault, format!("cloud function returned an error: {err}")))?;
        response
            .json()
            .await
            .map_err(|err| ProbeError::new(ErrorCode::Vault, format!("cloud function response was not valid JSON: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    #[tokio::test]
    async fn lambda_invoker_posts_request_invocation_type_header() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/invoke")
                    .header("X-Amz-Invocation-Type", "RequestResponse")
                    .json_body(json!({"topic": "orders"}));
                then.status(200).json_body(json!({"id": "abc", "secret": "xyz"}));
            })
            .await;

        let invoker = AwsLambdaInvoker::new("arn:aws:lambda:test".to_string(), server.url("/invoke"));
        let response = invoker.invoke(json!({"topic": "orders"})).await.unwrap();

        mock.assert_async().await;
        assert_eq!(response["id"], "abc");
    }

    #[tokio::test]
    async fn lambda_invoker_surfaces_http_errors_as_vault_errors() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/invoke");
                then.status(500);
            })
            .await;

        let invoker = AwsLambdaInvoker::new("arn:aws:lambda:test".to_string(), server.url("/invoke"));
        let err = invoker.invoke(json!({})).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Vault);
    }

    #[tokio::test]
    async fn azure_invoker_sends_function_key_header() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/fn").header("x-functions-key", "secret-key");
                then.status(200).json_body(json!({"id": "abc", "secret": "xyz"}));
            })
            .await;

        let invoker = AzureFunctionInvoker::new(server.url("/fn"), "secret-key".to_string());
        invoker.invoke(json!({})).await.unwrap();
        mock.assert_async().await;
    }
}
