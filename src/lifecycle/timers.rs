use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::messages::LifecycleMessage;

/// A single named poison-pill timer. Per §9's design note, this is kept as
/// one generic handle rather than one type per state — every expiry is
/// handled identically by the actor (immediate transition to
/// `ShuttingDown`), so the timer itself doesn't need to carry which state
/// armed it.
#[derive(Default)]
pub struct TimerHandle {
    task: Option<JoinHandle<()>>,
}

impl TimerHandle {
    pub fn none() -> Self {
        Self { task: None }
    }

    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn install(&mut self, duration: Duration, self_tx: mpsc::Sender<LifecycleMessage>) {
        self.cancel();
        self.task = Some(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = self_tx.send(LifecycleMessage::TimerExpired).await;
        }));
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
