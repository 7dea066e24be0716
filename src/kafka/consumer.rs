use std::collections::HashMap;
use std::time::Duration;

use futures_util::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, ConsumerContext, StreamConsumer};
use rdkafka::message::{Headers, Message};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{ErrorCode, ProbeError, ProbeResult};
use crate::ids::TestId;
use crate::model::{EventFilter, SecurityDirective, SecurityProtocol};

use super::cloud_event::CloudEvent;
use super::oauth::OAuthTokenContext;
use super::registry::{EventRegistry, RegisterOutcome, RegisteredEvent};

impl ConsumerContext for OAuthTokenContext {}

const COMMIT_BATCH_SIZE: usize = 20;
const REGISTRY_ASK_TIMEOUT: Duration = Duration::from_secs(5);

pub enum RegistryCommand {
    Store {
        correlation_id: String,
        event: RegisteredEvent,
        reply: oneshot::Sender<RegisterOutcome>,
    },
    Get {
        correlation_id: String,
        reply: oneshot::Sender<Option<RegisteredEvent>>,
    },
}

/// Owns the registry's single mutator mailbox (§5 shared-resource policy):
/// only this task ever touches the `EventRegistry`.
pub struct RegistryActor {
    tx: mpsc::Sender<RegistryCommand>,
    task: JoinHandle<()>,
}

impl RegistryActor {
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::channel::<RegistryCommand>(256);
        let task = tokio::spawn(async move {
            let registry = EventRegistry::new();
            while let Some(command) = rx.recv().await {
                match command {
                    RegistryCommand::Store { correlation_id, event, reply } => {
                        let outcome = registry.register(correlation_id, event);
                        let _ = reply.send(outcome);
                    }
                    RegistryCommand::Get { correlation_id, reply } => {
                        let _ = reply.send(registry.get(&correlation_id));
                    }
                }
            }
        });
        Self { tx, task }
    }

    pub fn handle(&self) -> mpsc::Sender<RegistryCommand> {
        self.tx.clone()
    }

    pub async fn shutdown(self) {
        drop(self.tx);
        let _ = self.task.await;
    }
}

async fn ask_store(
    registry_tx: &mpsc::Sender<RegistryCommand>,
    correlation_id: String,
    event: RegisteredEvent,
) -> Option<RegisterOutcome> {
    let (reply_tx, reply_rx) = oneshot::channel();
    if registry_tx
        .send(RegistryCommand::Store { correlation_id, event, reply: reply_tx })
        .await
        .is_err()
    {
        return None;
    }
    tokio::time::timeout(REGISTRY_ASK_TIMEOUT, reply_rx).await.ok()?.ok()
}

fn header_map(message: &rdkafka::message::BorrowedMessage<'_>) -> HashMap<String, String> {
    let mut out = HashMap::new();
    if let Some(headers) = message.headers() {
        for header in headers.iter() {
            if let Some(value) = header.value {
                out.insert(header.key.to_string(), String::from_utf8_lossy(value).into_owned());
            }
        }
    }
    out
}

/// One consumer stream per consumer topic (§4.3.2): at-least-once w.r.t.
/// the registry, poison-pill tolerant, batched offset commits.
pub struct ConsumerStream {
    task: JoinHandle<()>,
}

impl ConsumerStream {
    pub fn spawn(
        test_id: TestId,
        topic: String,
        bootstrap_servers: &str,
        security: Option<&SecurityDirective>,
        filters: Vec<EventFilter>,
        registry_tx: mpsc::Sender<RegistryCommand>,
    ) -> ProbeResult<Self> {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", bootstrap_servers)
            .set("group.id", test_id.consumer_group())
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("isolation.level", "read_committed");

        let mut context = OAuthTokenContext::disabled();
        match security.map(|s| (s.security_protocol, &s.jaas_config)) {
            Some((SecurityProtocol::SaslSsl, jaas)) => {
                config
                    .set("security.protocol", "SASL_SSL")
                    .set("sasl.mechanism", "OAUTHBEARER");
                if let Some(parsed) = OAuthTokenContext::from_jaas(jaas) {
                    context = parsed;
                }
            }
            _ => {
                config.set("security.protocol", "PLAINTEXT");
            }
        }

        let consumer: StreamConsumer<OAuthTokenContext> = config
            .create_with_context(context)
            .map_err(|err| ProbeError::new(ErrorCode::Consumer, format!("consumer for `{topic}` failed to start: {err}")))?;
        consumer
            .subscribe(&[topic.as_str()])
            .map_err(|err| ProbeError::new(ErrorCode::Consumer, format!("subscribe to `{topic}` failed: {err}")))?;

        let task = tokio::spawn(async move {
            let mut stream = consumer.stream();
            let mut since_commit = 0usize;

            while let Some(message) = stream.next().await {
                let message = match message {
                    Ok(m) => m,
                    Err(err) => {
                        tracing::warn!(%topic, error = %err, "consumer stream error; resuming");
                        continue;
                    }
                };

                let decoded = message.key().map(CloudEvent::from_key_bytes);
                match decoded {
                    Some(Ok(event)) => {
                        let matched = filters
                            .iter()
                            .any(|f| event.matches_filter(&f.event_type, &f.payload_version));
                        if matched {
                            let registered = RegisteredEvent {
                                key: message.key().unwrap_or_default().to_vec(),
                                value: message.payload().unwrap_or_default().to_vec(),
                                headers: header_map(&message),
                            };
                            if ask_store(&registry_tx, event.correlationid.clone(), registered).await.is_none() {
                                tracing::warn!(%topic, correlation_id = %event.correlationid, "registry ack timed out; committing offset anyway");
                            }
                        } else {
                            tracing::debug!(%topic, event_type = %event.event_type, "event filtered out");
                        }
                    }
                    Some(Err(err)) => {
                        tracing::warn!(%topic, error = %err.message, "poison pill: failed to decode record key");
                    }
                    None => {
                        tracing::warn!(%topic, "record had no key; treated as poison pill");
                    }
                }

                if let Err(err) = consumer.store_offset_from_message(&message) {
                    tracing::warn!(%topic, error = %err, "failed to mark offset for commit");
                }
                since_commit += 1;
                if since_commit >= COMMIT_BATCH_SIZE {
                    if let Err(err) = consumer.commit_consumer_state(CommitMode::Async) {
                        tracing::warn!(%topic, error = %err, "batched commit failed");
                    }
                    since_commit = 0;
                }
            }
        });

        Ok(Self { task })
    }

    pub async fn shutdown(self) {
        self.task.abort();
        let _ = self.task.await;
    }

    /// Whether the consume loop has already ended, by shutdown or
    /// otherwise. Lets a supervisor poll for an unexpected exit without
    /// owning the task handle itself.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registry_actor_first_write_wins() {
        let actor = RegistryActor::spawn();
        let handle = actor.handle();

        let (tx1, rx1) = oneshot::channel();
        handle
            .send(RegistryCommand::Store {
                correlation_id: "c1".to_string(),
                event: RegisteredEvent { key: b"k".to_vec(), value: b"first".to_vec(), headers: HashMap::new() },
                reply: tx1,
            })
            .await
            .unwrap();
        assert!(matches!(rx1.await.unwrap(), RegisterOutcome::Stored));

        let (tx2, rx2) = oneshot::channel();
        handle
            .send(RegistryCommand::Store {
                correlation_id: "c1".to_string(),
                event: RegisteredEvent { key: b"k".to_vec(), value: b"second".to_vec(), headers: HashMap::new() },
                reply: tx2,
            })
            .await
            .unwrap();
        assert!(matches!(rx2.await.unwrap(), RegisterOutcome::AlreadyPresent));

        let (tx3, rx3) = oneshot::channel();
        handle
            .send(RegistryCommand::Get { correlation_id: "c1".to_string(), reply: tx3 })
            .await
            .unwrap();
        assert_eq!(rx3.await.unwrap().unwrap().value, b"first");

        actor.shutdown().await;
    }
}
