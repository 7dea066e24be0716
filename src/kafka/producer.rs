use std::collections::HashMap;
use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{DeliveryResult, FutureProducer, FutureRecord, ProducerContext};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{ErrorCode, ProbeError, ProbeResult};
use crate::model::{SecurityDirective, SecurityProtocol};

use super::oauth::OAuthTokenContext;

const QUEUE_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    Dropped,
    QueueFull,
}

pub struct ProduceRequest {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub headers: HashMap<String, String>,
}

impl ProducerContext for OAuthTokenContext {
    type DeliveryOpaque = ();

    fn delivery(&self, _delivery_result: &DeliveryResult, _delivery_opaque: Self::DeliveryOpaque) {}
}

/// One producer stream per producer topic (§4.3.1). Accepts `Produce`
/// requests onto a bounded internal queue with backpressure; acks are
/// per-enqueue, durability comes from idempotent writes + `acks=all` at the
/// protocol level.
pub struct ProducerStream {
    tx: mpsc::Sender<ProduceRequest>,
    drain_task: JoinHandle<()>,
}

impl ProducerStream {
    pub fn spawn(
        topic: String,
        bootstrap_servers: &str,
        security: Option<&SecurityDirective>,
    ) -> ProbeResult<Self> {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", bootstrap_servers)
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .set("message.send.max.retries", "2147483647")
            .set("compression.type", "snappy");

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

        let producer: FutureProducer<OAuthTokenContext> = config
            .create_with_context(context)
            .map_err(|err| ProbeError::new(ErrorCode::Producer, format!("producer for `{topic}` failed to start: {err}")))?;

        let (tx, mut rx) = mpsc::channel::<ProduceRequest>(QUEUE_CAPACITY);
        let drain_topic = topic.clone();
        let drain_task = tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let mut headers = OwnedHeaders::new();
                for (key, value) in &request.headers {
                    headers = headers.insert(Header { key, value: Some(value.as_bytes()) });
                }
                let record = FutureRecord::to(&drain_topic)
                    .key(&request.key)
                    .payload(&request.value)
                    .headers(headers);
                if let Err((err, _)) = producer.send(record, Duration::from_secs(30)).await {
                    tracing::warn!(topic = %drain_topic, error = %err, "kafka send failed after enqueue ack");
                }
            }
        });

        Ok(Self { tx, drain_task })
    }

    /// Non-blocking enqueue (§4.3.1): `Enqueued` on success, `QueueFull`
    /// when the bounded queue is saturated, `Dropped` when the stream has
    /// already shut down.
    pub fn produce(&self, key: Vec<u8>, value: Vec<u8>, headers: HashMap<String, String>) -> EnqueueOutcome {
        match self.tx.try_send(ProduceRequest { key, value, headers }) {
            Ok(()) => EnqueueOutcome::Enqueued,
            Err(mpsc::error::TrySendError::Full(_)) => EnqueueOutcome::QueueFull,
            Err(mpsc::error::TrySendError::Closed(_)) => EnqueueOutcome::Dropped,
        }
    }

    /// Completes the queue and stops accepting new enqueues (§4.3.1 shutdown).
    pub async fn shutdown(self) {
        drop(self.tx);
        let _ = self.drain_task.await;
    }

    /// Whether the drain task has already ended, by shutdown or otherwise.
    /// Lets a supervisor poll for an unexpected exit without owning the
    /// task handle itself.
    pub fn is_finished(&self) -> bool {
        self.drain_task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_queue_reports_queue_full() {
        let (tx, _rx) = mpsc::channel::<ProduceRequest>(1);
        tx.try_send(ProduceRequest {
            key: vec![],
            value: vec![],
            headers: HashMap::new(),
        })
        .unwrap();
        let result = tx.try_send(ProduceRequest {
            key: vec![],
            value: vec![],
            headers: HashMap::new(),
        });
        assert!(matches!(result, Err(mpsc::error::TrySendError::Full(_))));
    }

    #[test]
    fn closed_channel_reports_dropped() {
        let (tx, rx) = mpsc::channel::<ProduceRequest>(1);
        drop(rx);
        let result = tx.try_send(ProduceRequest {
            key: vec![],
            value: vec![],
            headers: HashMap::new(),
        });
        assert!(matches!(result, Err(mpsc::error::TrySendError::Closed(_))));
    }
}
