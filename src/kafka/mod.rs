pub mod cloud_event;
pub mod consumer;
pub mod dsl;
mod oauth;
pub mod producer;
pub mod registry;
pub mod supervisor;

pub use cloud_event::CloudEvent;
pub use dsl::StreamIndex;
pub use registry::RegisteredEvent;
pub use supervisor::StreamSupervisor;
