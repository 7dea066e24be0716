use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::ProbeResult;
use crate::ids::TestId;
use crate::model::{EventFilter, Role, SecurityDirective, TopicDirective};

use super::consumer::{ConsumerStream, RegistryActor, RegistryCommand};
use super::producer::ProducerStream;
use super::registry::RegisteredEvent;

const MAX_RESTARTS_PER_WINDOW: u32 = 3;
const RESTART_WINDOW: Duration = Duration::from_secs(60);
const WATCHDOG_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Tracks restart attempts in a sliding window (§4.4): recoverable (I/O)
/// failures restart the stream, up to the window budget; anything else
/// stops the stream for good.
struct RestartBudget {
    attempts: VecDeque<Instant>,
}

impl RestartBudget {
    fn new() -> Self {
        Self { attempts: VecDeque::new() }
    }

    fn allow(&mut self, now: Instant) -> bool {
        while let Some(front) = self.attempts.front() {
            if now.duration_since(*front) > RESTART_WINDOW {
                self.attempts.pop_front();
            } else {
                break;
            }
        }
        if self.attempts.len() as u32 >= MAX_RESTARTS_PER_WINDOW {
            false
        } else {
            self.attempts.push_back(now);
            true
        }
    }
}

/// Everything needed to recreate a stream from scratch, held by the
/// watchdog task so a respawn never has to reach back into caller state.
enum Spec {
    Producer {
        topic: String,
        bootstrap_servers: String,
        security: Option<SecurityDirective>,
    },
    Consumer {
        test_id: TestId,
        topic: String,
        bootstrap_servers: String,
        security: Option<SecurityDirective>,
        filters: Vec<EventFilter>,
        registry: mpsc::Sender<RegistryCommand>,
    },
}

impl Spec {
    fn topic(&self) -> &str {
        match self {
            Self::Producer { topic, .. } | Self::Consumer { topic, .. } => topic,
        }
    }

    fn respawn(&self) -> ProbeResult<Inner> {
        match self {
            Self::Producer { topic, bootstrap_servers, security } => {
                let stream = ProducerStream::spawn(topic.clone(), bootstrap_servers, security.as_ref())?;
                Ok(Inner::Producer(stream))
            }
            Self::Consumer { test_id, topic, bootstrap_servers, security, filters, registry } => {
                let stream = ConsumerStream::spawn(
                    *test_id,
                    topic.clone(),
                    bootstrap_servers,
                    security.as_ref(),
                    filters.clone(),
                    registry.clone(),
                )?;
                Ok(Inner::Consumer { stream })
            }
        }
    }
}

enum Inner {
    Producer(ProducerStream),
    Consumer { stream: ConsumerStream },
}

impl Inner {
    fn is_finished(&self) -> bool {
        match self {
            Self::Producer(stream) => stream.is_finished(),
            Self::Consumer { stream } => stream.is_finished(),
        }
    }
}

/// Polls the live stream for an unexpected exit and respawns it from `spec`
/// while `RestartBudget` allows (§4.3.3, §4.4): a stream that dies on its
/// own is assumed recoverable until the window's restart budget runs out,
/// at which point it is left down for the caller to observe via
/// `StreamSupervisor::lookup`/`produce` failing from then on.
fn spawn_watchdog(inner: Arc<Mutex<Option<Inner>>>, spec: Spec, shutting_down: Arc<AtomicBool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut budget = RestartBudget::new();
        let mut ticker = tokio::time::interval(WATCHDOG_POLL_INTERVAL);
        loop {
            ticker.tick().await;
            if shutting_down.load(Ordering::Acquire) {
                return;
            }

            let finished = match inner.lock().unwrap().as_ref() {
                Some(current) => current.is_finished(),
                None => return,
            };
            if !finished {
                continue;
            }
            if shutting_down.load(Ordering::Acquire) {
                return;
            }

            if !budget.allow(Instant::now()) {
                tracing::error!(topic = %spec.topic(), "restart budget exhausted; stream stays down");
                return;
            }

            match spec.respawn() {
                Ok(restarted) => {
                    tracing::warn!(topic = %spec.topic(), "stream exited unexpectedly; restarted");
                    *inner.lock().unwrap() = Some(restarted);
                }
                Err(err) => {
                    tracing::error!(topic = %spec.topic(), error = %err, "failed to restart stream");
                    return;
                }
            }
        }
    })
}

/// Owns exactly one producer or consumer stream for one `(testId, topic)`
/// pair and restarts it on recoverable failure (§4.3, §4.4). Held inside
/// the stream index so Gherkin steps can reach it.
pub struct StreamSupervisor {
    inner: Arc<Mutex<Option<Inner>>>,
    registry_actor: Option<RegistryActor>,
    registry: Option<mpsc::Sender<RegistryCommand>>,
    shutting_down: Arc<AtomicBool>,
    watchdog: JoinHandle<()>,
}

impl StreamSupervisor {
    pub fn spawn_producer(
        topic: String,
        bootstrap_servers: &str,
        security: Option<&SecurityDirective>,
    ) -> ProbeResult<Self> {
        let stream = ProducerStream::spawn(topic.clone(), bootstrap_servers, security)?;
        let inner = Arc::new(Mutex::new(Some(Inner::Producer(stream))));
        let shutting_down = Arc::new(AtomicBool::new(false));
        let spec = Spec::Producer {
            topic,
            bootstrap_servers: bootstrap_servers.to_string(),
            security: security.cloned(),
        };
        let watchdog = spawn_watchdog(inner.clone(), spec, shutting_down.clone());
        Ok(Self { inner, registry_actor: None, registry: None, shutting_down, watchdog })
    }

    pub fn spawn_consumer(
        test_id: TestId,
        topic: String,
        bootstrap_servers: &str,
        security: Option<&SecurityDirective>,
        filters: Vec<EventFilter>,
    ) -> ProbeResult<Self> {
        let registry_actor = RegistryActor::spawn();
        let registry_tx = registry_actor.handle();
        let stream = ConsumerStream::spawn(
            test_id,
            topic.clone(),
            bootstrap_servers,
            security,
            filters.clone(),
            registry_tx.clone(),
        )?;
        let inner = Arc::new(Mutex::new(Some(Inner::Consumer { stream })));
        let shutting_down = Arc::new(AtomicBool::new(false));
        let spec = Spec::Consumer {
            test_id,
            topic,
            bootstrap_servers: bootstrap_servers.to_string(),
            security: security.cloned(),
            filters,
            registry: registry_tx.clone(),
        };
        let watchdog = spawn_watchdog(inner.clone(), spec, shutting_down.clone());
        Ok(Self {
            inner,
            registry_actor: Some(registry_actor),
            registry: Some(registry_tx),
            shutting_down,
            watchdog,
        })
    }

    pub fn from_directive(
        test_id: TestId,
        directive: &TopicDirective,
        bootstrap_servers: &str,
        security: Option<&SecurityDirective>,
    ) -> ProbeResult<Self> {
        match directive.role {
            Role::Producer => {
                Self::spawn_producer(directive.topic.clone(), bootstrap_servers, security)
            }
            Role::Consumer => Self::spawn_consumer(
                test_id,
                directive.topic.clone(),
                bootstrap_servers,
                security,
                directive.event_filters.clone(),
            ),
        }
    }

    pub fn produce(&self, key: Vec<u8>, value: Vec<u8>) -> bool {
        match self.inner.lock().unwrap().as_ref() {
            Some(Inner::Producer(stream)) => {
                matches!(
                    stream.produce(key, value, Default::default()),
                    super::producer::EnqueueOutcome::Enqueued
                )
            }
            _ => false,
        }
    }

    pub async fn lookup(&self, correlation_id: &str) -> Option<RegisteredEvent> {
        let registry = self.registry.as_ref()?;
        let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
        registry
            .send(RegistryCommand::Get { correlation_id: correlation_id.to_string(), reply: reply_tx })
            .await
            .ok()?;
        reply_rx.await.ok()?
    }

    pub async fn shutdown(self) {
        self.shutting_down.store(true, Ordering::Release);
        self.watchdog.abort();
        let _ = self.watchdog.await;

        let inner = self.inner.lock().unwrap().take();
        if let Some(inner) = inner {
            match inner {
                Inner::Producer(stream) => stream.shutdown().await,
                Inner::Consumer { stream } => stream.shutdown().await,
            }
        }
        if let Some(registry_actor) = self.registry_actor {
            registry_actor.shutdown().await;
        }
    }
}
