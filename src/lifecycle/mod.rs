pub mod actor;
pub mod messages;
pub mod state;
mod timers;

pub use actor::{LifecycleActor, LifecycleHandle};
pub use messages::{CancelResponse, LifecycleMessage, QueueNotification, StartResponse, StatusResponse};
pub use state::LifecycleState;
