use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::{ErrorCode, ProbeError};
use crate::ids::TestId;
use crate::kafka::StreamIndex;
use crate::model::LifecycleData;
use crate::service_context::ServiceFunctionContext;
use crate::storage::StagingFs;

use super::messages::{
    CancelResponse, ChildKind, InitializeResponse, LifecycleMessage, QueueNotification,
    StartResponse, StatusResponse,
};
use super::state::LifecycleState;
use super::timers::TimerHandle;

const EXPECTED_CHILDREN: u8 = 5;

/// Owns one test's lifecycle from acceptance through cleanup (§4.1). Exactly
/// one instance per accepted test, spawned and death-watched by the queue
/// controller.
pub struct LifecycleActor {
    test_id: TestId,
    state: LifecycleState,
    data: LifecycleData,
    stopped: bool,

    queue_tx: mpsc::Sender<QueueNotification>,
    self_tx: mpsc::Sender<LifecycleMessage>,
    self_rx: mpsc::Receiver<LifecycleMessage>,

    service_ctx: ServiceFunctionContext,
    config: Arc<Config>,
    staging: Arc<StagingFs>,
    streams: Arc<StreamIndex>,

    timer: TimerHandle,
    ready_children: u8,

    pending_initialize_reply: Option<oneshot::Sender<InitializeResponse>>,
    pending_start_reply: Option<oneshot::Sender<StartResponse>>,
    pending_cancel_reply: Option<oneshot::Sender<CancelResponse>>,
}

/// Cheap handle a queue controller keeps per test: a mailbox sender plus
/// the actor's `JoinHandle` for death-watch (§4.2's `Gone` semantics).
pub struct LifecycleHandle {
    pub tx: mpsc::Sender<LifecycleMessage>,
    pub task: JoinHandle<()>,
}

impl LifecycleHandle {
    pub fn spawn(
        test_id: TestId,
        queue_tx: mpsc::Sender<QueueNotification>,
        service_ctx: ServiceFunctionContext,
        config: Arc<Config>,
        staging: Arc<StagingFs>,
        streams: Arc<StreamIndex>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(64);
        let actor = LifecycleActor {
            test_id,
            state: LifecycleState::Setup,
            data: LifecycleData::new(test_id),
            stopped: false,
            queue_tx,
            self_tx: tx.clone(),
            self_rx: rx,
            service_ctx,
            config,
            staging,
            streams,
            timer: TimerHandle::none(),
            ready_children: 0,
            pending_initialize_reply: None,
            pending_start_reply: None,
            pending_cancel_reply: None,
        };
        let task = tokio::spawn(actor.run());
        Self { tx, task }
    }
}

impl LifecycleActor {
    async fn run(mut self) {
        while let Some(message) = self.self_rx.recv().await {
            self.handle(message).await;
            if self.stopped {
                break;
            }
        }
    }

    async fn handle(&mut self, message: LifecycleMessage) {
        use LifecycleMessage::*;
        match (self.state, message) {
            (_, Initialize { reply }) => {
                self.pending_initialize_reply = Some(reply);
                self.transition(LifecycleState::Setup).await;
            }
            (LifecycleState::Setup, Start { bucket, test_type, reply }) => {
                self.data.bucket = Some(bucket);
                self.data.test_type = test_type;
                self.pending_start_reply = Some(reply);
                self.transition(LifecycleState::Loading).await;
            }
            (LifecycleState::Setup | LifecycleState::Loading | LifecycleState::Loaded, Cancel { reply }) => {
                self.pending_cancel_reply = Some(reply);
                self.transition(LifecycleState::ShuttingDown).await;
            }
            (LifecycleState::Testing, Cancel { reply }) => {
                let _ = reply.send(CancelResponse {
                    cancelled: false,
                    reason: Some("Cannot cancel, test is currently executing".to_string()),
                });
            }
            (state, Cancel { reply }) => {
                let _ = reply.send(CancelResponse {
                    cancelled: false,
                    reason: Some(format!("Cannot cancel, test is in state {state}")),
                });
            }
            (_, GetStatus { reply }) => {
                let _ = reply.send(self.status_response());
            }
            (LifecycleState::Loaded, StartTesting) => {
                self.transition(LifecycleState::Testing).await;
            }
            (LifecycleState::Loading, StorageFetched(directive)) => {
                self.data.storage_directive = Some(directive.clone());
                self.ready_children += 1;
                self.spawn_vault_fetch(directive.topic_directives.clone());
                self.spawn_gherkin_ready_check();
                self.maybe_advance_to_loaded().await;
            }
            (LifecycleState::Loading, SecurityFetched(directives)) => {
                self.data.security_directives = directives;
                self.ready_children += 1;
                self.spawn_streaming();
                self.maybe_advance_to_loaded().await;
            }
            (LifecycleState::Loading, ChildReady(_)) => {
                self.ready_children += 1;
                self.maybe_advance_to_loaded().await;
            }
            (LifecycleState::Testing, TestComplete(result)) => {
                self.data.test_result = Some(result);
                self.spawn_upload();
            }
            (LifecycleState::Testing, UploadComplete) => {
                self.data.ended_at = Some(chrono::Utc::now());
                self.transition(LifecycleState::Completed).await;
            }
            (LifecycleState::Testing, ChildException(err)) => {
                self.data.error = Some(err.message);
                self.spawn_best_effort_upload();
                self.transition(LifecycleState::Exception).await;
            }
            (LifecycleState::Loading, ChildException(err)) => {
                self.data.error = Some(err.message);
                self.transition(LifecycleState::Exception).await;
            }
            (_, TimerExpired) => {
                self.transition(LifecycleState::ShuttingDown).await;
            }
            (_, Continue(state)) => {
                self.enter(state).await;
            }
            (state, ChildException(err)) => {
                tracing::warn!(%state, error = %err.message, "child exception ignored: not legal in this state");
            }
            (state, _) => {
                tracing::debug!(%state, "message ignored: not legal in this state");
            }
        }
    }

    /// Step 1 of the continuation discipline (§4.1): acknowledge the
    /// trigger, switch the declared next state, enqueue the self-message
    /// that performs the entry side effects. Never runs side effects
    /// directly.
    async fn transition(&mut self, next: LifecycleState) {
        self.state = next;
        let _ = self.self_tx.send(LifecycleMessage::Continue(next)).await;
    }

    async fn maybe_advance_to_loaded(&mut self) {
        if self.ready_children >= EXPECTED_CHILDREN {
            self.transition(LifecycleState::Loaded).await;
        }
    }

    /// Step 2 of the continuation discipline: entry side effects for the
    /// destination state, always running after the state switch and after
    /// the triggering message was acknowledged.
    async fn enter(&mut self, state: LifecycleState) {
        self.timer.cancel();
        match state {
            LifecycleState::Setup => {
                self.timer.install(self.config.setup_state_timeout, self.self_tx.clone());
                if let Some(reply) = self.pending_initialize_reply.take() {
                    let _ = reply.send(InitializeResponse);
                }
                self.notify(QueueNotification::TestInitialized(self.test_id)).await;
            }
            LifecycleState::Loading => {
                self.ready_children = 0;
                self.timer.install(self.config.loading_state_timeout, self.self_tx.clone());
                self.spawn_storage_fetch();
                if let Some(reply) = self.pending_start_reply.take() {
                    let _ = reply.send(StartResponse { accepted: true, message: "loading".to_string() });
                }
                self.notify(QueueNotification::TestLoading(self.test_id)).await;
            }
            LifecycleState::Loaded => {
                self.notify(QueueNotification::TestLoaded(self.test_id)).await;
            }
            LifecycleState::Testing => {
                self.data.started_at = Some(chrono::Utc::now());
                self.spawn_gherkin_run();
                self.notify(QueueNotification::TestStarted(self.test_id)).await;
            }
            LifecycleState::Completed => {
                self.timer.install(self.config.completed_state_timeout, self.self_tx.clone());
                self.notify(QueueNotification::TestCompleted(self.test_id)).await;
            }
            LifecycleState::Exception => {
                self.timer.install(self.config.exception_state_timeout, self.self_tx.clone());
                let message = self.data.error.clone().unwrap_or_else(|| "unknown error".to_string());
                self.notify(QueueNotification::TestException(self.test_id, message)).await;
            }
            LifecycleState::ShuttingDown => {
                self.notify(QueueNotification::TestStopping(self.test_id)).await;
                if let Some(reply) = self.pending_cancel_reply.take() {
                    let _ = reply.send(CancelResponse { cancelled: true, reason: None });
                }
                for supervisor in self.streams.remove_all_for_test(self.test_id) {
                    supervisor.shutdown().await;
                }
                self.staging.remove_subtree(self.test_id);
                self.stopped = true;
            }
        }
    }

    async fn notify(&self, notification: QueueNotification) {
        let _ = self.queue_tx.send(notification).await;
    }

    fn status_response(&self) -> StatusResponse {
        StatusResponse {
            state: self.state,
            bucket: self.data.bucket.clone(),
            test_type: self.data.test_type.clone(),
            started_at: self.data.started_at,
            ended_at: self.data.ended_at,
            success: self.data.test_result.as_ref().map(|r| r.success()),
            error: self.data.error.clone(),
        }
    }

    fn spawn_storage_fetch(&self) {
        let service_ctx = self.service_ctx.clone();
        let self_tx = self.self_tx.clone();
        let test_id = self.test_id;
        let bucket = self.data.bucket.clone().unwrap_or_default();
        tokio::spawn(async move {
            let result = (service_ctx.fetch_from_storage)(test_id, bucket).await;
            let message = match result {
                Ok(directive) => LifecycleMessage::StorageFetched(directive),
                Err(err) => LifecycleMessage::ChildException(err),
            };
            let _ = self_tx.send(message).await;
        });
    }

    fn spawn_vault_fetch(&self, topic_directives: Vec<crate::model::TopicDirective>) {
        let service_ctx = self.service_ctx.clone();
        let self_tx = self.self_tx.clone();
        tokio::spawn(async move {
            let result = (service_ctx.fetch_security_directives)(topic_directives).await;
            let message = match result {
                Ok(directives) => LifecycleMessage::SecurityFetched(directives),
                Err(err) => LifecycleMessage::ChildException(err),
            };
            let _ = self_tx.send(message).await;
        });
    }

    fn spawn_gherkin_ready_check(&self) {
        let self_tx = self.self_tx.clone();
        tokio::spawn(async move {
            let _ = self_tx.send(LifecycleMessage::ChildReady(ChildKind::Gherkin)).await;
        });
    }

    fn spawn_streaming(&self) {
        let test_id = self.test_id;
        let config = self.config.clone();
        let streams = self.streams.clone();
        let self_tx = self.self_tx.clone();
        let directives = self
            .data
            .storage_directive
            .as_ref()
            .map(|d| d.topic_directives.clone())
            .unwrap_or_default();
        let security = self.data.security_directives.clone();

        tokio::spawn(async move {
            for directive in &directives {
                let matching = security.iter().find(|s| s.topic == directive.topic && s.role == directive.role);
                let bootstrap = directive
                    .bootstrap_servers
                    .clone()
                    .unwrap_or_else(|| config.kafka_bootstrap_servers.clone());
                match crate::kafka::StreamSupervisor::from_directive(test_id, directive, &bootstrap, matching) {
                    Ok(supervisor) => streams.insert(test_id, directive.topic.clone(), supervisor),
                    Err(err) => {
                        let _ = self_tx.send(LifecycleMessage::ChildException(err)).await;
                        return;
                    }
                }
            }
            let _ = self_tx.send(LifecycleMessage::ChildReady(ChildKind::ProducerSupervisor)).await;
            let _ = self_tx.send(LifecycleMessage::ChildReady(ChildKind::ConsumerSupervisor)).await;
        });
    }

    fn spawn_gherkin_run(&self) {
        let test_id = self.test_id;
        let staging = self.staging.clone();
        let streams = self.streams.clone();
        let self_tx = self.self_tx.clone();
        let features_root = self
            .data
            .storage_directive
            .as_ref()
            .map(|d| d.workspace_root.clone())
            .unwrap_or_default();
        tokio::spawn(async move {
            let result = crate::gherkin_bridge::GherkinBridge::run(test_id, staging, streams, &features_root).await;
            let message = match result {
                Ok(test_result) => LifecycleMessage::TestComplete(test_result),
                Err(err) => LifecycleMessage::ChildException(err),
            };
            let _ = self_tx.send(message).await;
        });
    }

    fn spawn_upload(&self) {
        let Some(directive) = self.data.storage_directive.clone() else {
            let err = ProbeError::new(ErrorCode::Storage, "upload requested with no storage directive");
            let self_tx = self.self_tx.clone();
            tokio::spawn(async move {
                let _ = self_tx.send(LifecycleMessage::ChildException(err)).await;
            });
            return;
        };
        let service_ctx = self.service_ctx.clone();
        let self_tx = self.self_tx.clone();
        let test_id = self.test_id;
        let bucket = self.data.bucket.clone().unwrap_or_default();
        tokio::spawn(async move {
            let result = (service_ctx.upload_to_storage)(test_id, bucket, directive.evidence_dir).await;
            let message = match result {
                Ok(()) => LifecycleMessage::UploadComplete,
                Err(err) => LifecycleMessage::ChildException(err),
            };
            let _ = self_tx.send(message).await;
        });
    }

    /// Open question resolved (§9): evidence upload is attempted,
    /// best-effort, on the error path too. Its outcome never blocks or
    /// redirects the Exception transition already underway.
    fn spawn_best_effort_upload(&self) {
        let (Some(directive), Some(bucket)) = (self.data.storage_directive.clone(), self.data.bucket.clone()) else {
            return;
        };
        let service_ctx = self.service_ctx.clone();
        let test_id = self.test_id;
        tokio::spawn(async move {
            if let Err(err) = (service_ctx.upload_to_storage)(test_id, bucket, directive.evidence_dir).await {
                tracing::warn!(%test_id, error = %err.message, "best-effort evidence upload on error path failed");
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
            setup_state_timeout: Duration::from_millis(50),
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
            breaker_max_failures: 5,
            breaker_call_timeout: Duration::from_secs(25),
            breaker_reset_timeout: Duration::from_secs(30),
        })
    }

    fn spawn_test_actor() -> (TestId, mpsc::Receiver<QueueNotification>, LifecycleHandle) {
        let test_id = TestId::new();
        let (queue_tx, queue_rx) = mpsc::channel(32);
        let handle = LifecycleHandle::spawn(
            test_id,
            queue_tx,
            crate::service_context::stub(),
            test_config(),
            Arc::new(StagingFs::new()),
            Arc::new(StreamIndex::new()),
        );
        (test_id, queue_rx, handle)
    }

    #[tokio::test]
    async fn initialize_then_cancel_during_setup_never_spawns_children() {
        let (_test_id, mut queue_rx, handle) = spawn_test_actor();

        let (init_tx, init_rx) = oneshot::channel();
        handle.tx.send(LifecycleMessage::Initialize { reply: init_tx }).await.unwrap();
        init_rx.await.unwrap();
        assert!(matches!(queue_rx.recv().await.unwrap(), QueueNotification::TestInitialized(_)));

        let (cancel_tx, cancel_rx) = oneshot::channel();
        handle.tx.send(LifecycleMessage::Cancel { reply: cancel_tx }).await.unwrap();
        let response = cancel_rx.await.unwrap();
        assert!(response.cancelled);
        assert!(matches!(queue_rx.recv().await.unwrap(), QueueNotification::TestStopping(_)));

        let _ = handle.task.await;
    }

    #[tokio::test]
    async fn setup_timer_expiry_shuts_down() {
        let (_test_id, mut queue_rx, handle) = spawn_test_actor();
        let (init_tx, init_rx) = oneshot::channel();
        handle.tx.send(LifecycleMessage::Initialize { reply: init_tx }).await.unwrap();
        init_rx.await.unwrap();
        assert!(matches!(queue_rx.recv().await.unwrap(), QueueNotification::TestInitialized(_)));
        assert!(matches!(queue_rx.recv().await.unwrap(), QueueNotification::TestStopping(_)));
        let _ = handle.task.await;
    }

    #[tokio::test]
    async fn cancel_while_testing_is_refused() {
        let (_test_id, mut queue_rx, handle) = spawn_test_actor();
        let (init_tx, init_rx) = oneshot::channel();
        handle.tx.send(LifecycleMessage::Initialize { reply: init_tx }).await.unwrap();
        init_rx.await.unwrap();
        assert!(matches!(queue_rx.recv().await.unwrap(), QueueNotification::TestInitialized(_)));

        let (start_tx, start_rx) = oneshot::channel();
        handle
            .tx
            .send(LifecycleMessage::Start { bucket: "mem://stub".to_string(), test_type: None, reply: start_tx })
            .await
            .unwrap();
        start_rx.await.unwrap();
        assert!(matches!(queue_rx.recv().await.unwrap(), QueueNotification::TestLoading(_)));
        assert!(matches!(queue_rx.recv().await.unwrap(), QueueNotification::TestLoaded(_)));

        handle.tx.send(LifecycleMessage::StartTesting).await.unwrap();
        assert!(matches!(queue_rx.recv().await.unwrap(), QueueNotification::TestStarted(_)));

        let (cancel_tx, cancel_rx) = oneshot::channel();
        handle.tx.send(LifecycleMessage::Cancel { reply: cancel_tx }).await.unwrap();
        let response = cancel_rx.await.unwrap();
        assert!(!response.cancelled);
        assert_eq!(response.reason.as_deref(), Some("Cannot cancel, test is currently executing"));

        let (status_tx, status_rx) = oneshot::channel();
        handle.tx.send(LifecycleMessage::GetStatus { reply: status_tx }).await.unwrap();
        assert!(matches!(status_rx.await.unwrap().state, LifecycleState::Testing));
    }
}
