use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};

use crate::circuit_breaker::CircuitBreaker;
use crate::config::Config;
use crate::error::{ErrorCode, ProbeError, ProbeResult};
use crate::ids::TestId;
use crate::kafka::StreamIndex;
use crate::lifecycle::{LifecycleHandle, LifecycleMessage, QueueNotification, StatusResponse};
use crate::service_context::ServiceFunctionContext;
use crate::storage::StagingFs;

/// Last-seen state the queue controller tracks per test purely from the
/// notification stream (§4.2's `QueueStatus` aggregate view) — never by
/// reaching back into a lifecycle controller's own data.
#[derive(Debug, Clone)]
struct TrackedTest {
    last_state: String,
    error: Option<String>,
}

/// External front door (§4.2): mints test ids, spawns and death-watches one
/// lifecycle controller per test, and serializes its own dispatch behind a
/// per-target circuit breaker.
pub struct QueueController {
    handles: DashMap<TestId, LifecycleHandle>,
    tracked: Arc<DashMap<TestId, TrackedTest>>,
    breaker: CircuitBreaker,
    service_ctx: ServiceFunctionContext,
    config: Arc<Config>,
    staging: Arc<StagingFs>,
    streams: Arc<StreamIndex>,
}

pub struct InitializeTestResponse {
    pub test_id: TestId,
}

pub struct StartTestResponse {
    pub accepted: bool,
    pub message: String,
}

pub struct CancelTestResponse {
    pub cancelled: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct QueueStatusEntry {
    pub test_id: TestId,
    pub state: String,
    pub error: Option<String>,
}

impl QueueController {
    pub fn new(
        config: Arc<Config>,
        service_ctx: ServiceFunctionContext,
        staging: Arc<StagingFs>,
        streams: Arc<StreamIndex>,
    ) -> Self {
        let breaker = CircuitBreaker::new(
            config.breaker_max_failures,
            config.breaker_call_timeout,
            config.breaker_reset_timeout,
        );
        Self {
            handles: DashMap::new(),
            tracked: Arc::new(DashMap::new()),
            breaker,
            service_ctx,
            config,
            staging,
            streams,
        }
    }

    /// Mints a fresh id, spawns a lifecycle controller, forwards
    /// `Initialize`, and awaits its reply (§4.2).
    pub async fn initialize_test(&self) -> ProbeResult<InitializeTestResponse> {
        let test_id = TestId::new();
        let (notify_tx, notify_rx) = mpsc::channel(32);
        let handle = LifecycleHandle::spawn(
            test_id,
            notify_tx,
            self.service_ctx.clone(),
            self.config.clone(),
            self.staging.clone(),
            self.streams.clone(),
        );
        self.spawn_notification_sink(test_id, handle.tx.clone(), notify_rx);

        let (reply_tx, reply_rx) = oneshot::channel();
        handle
            .tx
            .send(LifecycleMessage::Initialize { reply: reply_tx })
            .await
            .map_err(|_| ProbeError::new(ErrorCode::Internal, "lifecycle controller mailbox closed"))?;
        self.handles.insert(test_id, handle);

        self.breaker
            .call(async {
                reply_rx
                    .await
                    .map(|_| ())
                    .map_err(|_| ProbeError::new(ErrorCode::Internal, "lifecycle controller dropped before reply"))
            })
            .await?;

        Ok(InitializeTestResponse { test_id })
    }

    pub async fn start_test(
        &self,
        test_id: TestId,
        bucket: String,
        test_type: Option<String>,
    ) -> ProbeResult<StartTestResponse> {
        let tx = self.mailbox(test_id)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(LifecycleMessage::Start { bucket, test_type, reply: reply_tx })
            .await
            .map_err(|_| self.gone(test_id))?;

        let response = self
            .breaker
            .call(async {
                reply_rx
                    .await
                    .map_err(|_| ProbeError::new(ErrorCode::Internal, "lifecycle controller dropped before reply"))
            })
            .await?;
        Ok(StartTestResponse { accepted: response.accepted, message: response.message })
    }

    pub async fn status(&self, test_id: TestId) -> ProbeResult<StatusResponse> {
        let tx = self.mailbox(test_id)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(LifecycleMessage::GetStatus { reply: reply_tx })
            .await
            .map_err(|_| self.gone(test_id))?;

        self.breaker
            .call(async {
                reply_rx
                    .await
                    .map_err(|_| ProbeError::new(ErrorCode::Internal, "lifecycle controller dropped before reply"))
            })
            .await
    }

    pub async fn cancel(&self, test_id: TestId) -> ProbeResult<CancelTestResponse> {
        let tx = self.mailbox(test_id)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(LifecycleMessage::Cancel { reply: reply_tx })
            .await
            .map_err(|_| self.gone(test_id))?;

        let response = self
            .breaker
            .call(async {
                reply_rx
                    .await
                    .map_err(|_| ProbeError::new(ErrorCode::Internal, "lifecycle controller dropped before reply"))
            })
            .await?;
        Ok(CancelTestResponse { cancelled: response.cancelled, reason: response.reason })
    }

    /// Aggregate view (§4.2): every known test and its last-seen state when
    /// `test_id` is `None`, a single entry otherwise.
    pub fn queue_status(&self, test_id: Option<TestId>) -> ProbeResult<Vec<QueueStatusEntry>> {
        match test_id {
            Some(id) => {
                let entry = self
                    .tracked
                    .get(&id)
                    .ok_or_else(|| ProbeError::not_found(format!("test {id} is not known to the queue")))?;
                Ok(vec![QueueStatusEntry { test_id: id, state: entry.last_state.clone(), error: entry.error.clone() }])
            }
            None => Ok(self
                .tracked
                .iter()
                .map(|e| QueueStatusEntry { test_id: *e.key(), state: e.last_state.clone(), error: e.error.clone() })
                .collect()),
        }
    }

    fn mailbox(&self, test_id: TestId) -> ProbeResult<mpsc::Sender<LifecycleMessage>> {
        self.handles
            .get(&test_id)
            .map(|entry| entry.tx.clone())
            .ok_or_else(|| ProbeError::not_found(format!("test {test_id} is not known to the queue")))
    }

    fn gone(&self, test_id: TestId) -> ProbeError {
        self.handles.remove(&test_id);
        ProbeError::new(ErrorCode::ServiceUnavailable, format!("test {test_id}'s lifecycle controller is gone"))
            .with_retry_after_ms(0)
    }

    /// Also the only sender of `StartTesting` (§4.1): the queue controller,
    /// not the client, drives `Loaded -> Testing` the moment it observes
    /// `TestLoaded`, since §6 exposes no client-facing "start testing" op.
    fn spawn_notification_sink(
        &self,
        test_id: TestId,
        mailbox: mpsc::Sender<LifecycleMessage>,
        mut notify_rx: mpsc::Receiver<QueueNotification>,
    ) {
        let tracked = self.tracked.clone();
        tokio::spawn(async move {
            while let Some(notification) = notify_rx.recv().await {
                let state_label = notification.state_label().to_string();
                let error = match &notification {
                    QueueNotification::TestException(_, err) => Some(err.clone()),
                    _ => None,
                };
                tracked.insert(test_id, TrackedTest { last_state: state_label, error });

                if matches!(notification, QueueNotification::TestLoaded(_)) {
                    let _ = mailbox.send(LifecycleMessage::StartTesting).await;
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

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
            kafka_security_protocol: crate::model::SecurityProtocol::Plaintext,
            storage_provider: crate::config::StorageProviderKind::Local,
            storage_topic_directive_file_name: "test-config.yaml".to_string(),
            vault_provider: crate::config::VaultProviderKind::Aws,
            vault_function_arn: String::new(),
            vault_invoke_url: String::new(),
            vault_function_url: String::new(),
            vault_function_key: String::new(),
            vault_rosetta_mapping_path: "rosetta-mapping.yaml".to_string(),
            vault_request_params: std::collections::HashMap::new(),
            cucumber_glue_packages: vec!["steps".to_string()],
            breaker_max_failures: 2,
            breaker_call_timeout: Duration::from_secs(5),
            breaker_reset_timeout: Duration::from_secs(30),
        })
    }

    fn test_controller() -> QueueController {
        QueueController::new(
            test_config(),
            crate::service_context::stub(),
            Arc::new(StagingFs::new()),
            Arc::new(StreamIndex::new()),
        )
    }

    #[tokio::test]
    async fn initialize_then_status_round_trip() {
        let controller = test_controller();
        let response = controller.initialize_test().await.unwrap();

        // the notification sink runs on its own spawned task; give it a
        // moment to observe the Setup notification before asserting.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let status = controller.status(response.test_id).await.unwrap();
        assert_eq!(status.state, crate::lifecycle::LifecycleState::Setup);

        let entries = controller.queue_status(Some(response.test_id)).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].state, "Setup");
        assert!(entries[0].error.is_none());
    }

    #[tokio::test]
    async fn status_for_unknown_test_is_not_found() {
        let controller = test_controller();
        let err = controller.status(TestId::new()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn queue_status_for_unknown_test_is_not_found() {
        let controller = test_controller();
        let err = controller.queue_status(Some(TestId::new())).unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn cancel_during_setup_shuts_down_and_is_reflected_in_queue_status() {
        let controller = test_controller();
        let response = controller.initialize_test().await.unwrap();

        let cancelled = controller.cancel(response.test_id).await.unwrap();
        assert!(cancelled.cancelled);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let entries = controller.queue_status(Some(response.test_id)).unwrap();
        assert_eq!(entries[0].state, "ShuttingDown");
    }

    #[tokio::test]
    async fn dispatch_to_gone_test_removes_its_handle() {
        let controller = test_controller();
        let response = controller.initialize_test().await.unwrap();
        controller.cancel(response.test_id).await.unwrap();

        // let the actor's own task finish tearing itself down.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = controller.start_test(response.test_id, "mem://stub".to_string(), None).await.unwrap_err();
        assert!(matches!(err.code, ErrorCode::NotFound | ErrorCode::ServiceUnavailable));
        assert!(controller.mailbox(response.test_id).is_err());
    }
}
