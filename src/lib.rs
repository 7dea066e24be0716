pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod gherkin_bridge;
pub mod gherkin_steps;
pub mod ids;
pub mod kafka;
pub mod lifecycle;
pub mod model;
pub mod queue_controller;
pub mod redaction;
pub mod routes;
pub mod service_context;
pub mod storage;
pub mod types_api;
pub mod vault;
