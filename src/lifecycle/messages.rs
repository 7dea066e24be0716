use tokio::sync::oneshot;

use crate::error::ProbeError;
use crate::ids::TestId;
use crate::model::{SecurityDirective, StorageDirective, TestResult};

use super::state::LifecycleState;

#[derive(Debug)]
pub struct InitializeResponse;

#[derive(Debug)]
pub struct StartResponse {
    pub accepted: bool,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct CancelResponse {
    pub cancelled: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct StatusResponse {
    pub state: LifecycleState,
    pub bucket: Option<String>,
    pub test_type: Option<String>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
    pub success: Option<bool>,
    pub error: Option<String>,
}

/// One of the five children the controller supervises; carried on
/// `ChildReady` rather than five distinct message types (§9 design notes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildKind {
    Storage,
    Vault,
    Gherkin,
    ProducerSupervisor,
    ConsumerSupervisor,
}

/// Everything the lifecycle actor's mailbox accepts: external requests,
/// child-originated events, and the `Trn<State>` self-message that drives
/// the continuation discipline described in §4.1.
pub enum LifecycleMessage {
    Initialize { reply: oneshot::Sender<InitializeResponse> },
    Start { bucket: String, test_type: Option<String>, reply: oneshot::Sender<StartResponse> },
    StartTesting,
    Cancel { reply: oneshot::Sender<CancelResponse> },
    GetStatus { reply: oneshot::Sender<StatusResponse> },
    StorageFetched(StorageDirective),
    SecurityFetched(Vec<SecurityDirective>),
    ChildReady(ChildKind),
    TestComplete(TestResult),
    UploadComplete,
    ChildException(ProbeError),
    Continue(LifecycleState),
    TimerExpired,
}

/// Observable side effect the controller emits toward the queue controller
/// (§4.1's "notify queue" entries). The queue controller's `QueueStatus`
/// view is built entirely from this stream.
#[derive(Debug, Clone)]
pub enum QueueNotification {
    TestInitialized(TestId),
    TestLoading(TestId),
    TestLoaded(TestId),
    TestStarted(TestId),
    TestCompleted(TestId),
    TestException(TestId, String),
    TestStopping(TestId),
}

impl QueueNotification {
    pub fn test_id(&self) -> TestId {
        match self {
            Self::TestInitialized(id)
            | Self::TestLoading(id)
            | Self::TestLoaded(id)
            | Self::TestStarted(id)
            | Self::TestCompleted(id)
            | Self::TestException(id, _)
            | Self::TestStopping(id) => *id,
        }
    }

    pub fn state_label(&self) -> &'static str {
        match self {
            Self::TestInitialized(_) => "Setup",
            Self::TestLoading(_) => "Loading",
            Self::TestLoaded(_) => "Loaded",
            Self::TestStarted(_) => "Testing",
            Self::TestCompleted(_) => "Completed",
            Self::TestException(..) => "Exception",
            Self::TestStopping(_) => "ShuttingDown",
        }
    }
}
