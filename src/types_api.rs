use serde::{Deserialize, Serialize};

use crate::ids::TestId;
use crate::lifecycle::LifecycleState;

#[derive(Debug, Serialize)]
pub struct InitializeTestResponse {
    pub test_id: TestId,
}

#[derive(Debug, Deserialize)]
pub struct StartTestRequest {
    pub bucket: String,
    #[serde(default)]
    pub test_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StartTestResponse {
    pub accepted: bool,
    pub test_type: Option<String>,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct StatusApiResponse {
    pub state: LifecycleState,
    pub bucket: Option<String>,
    pub test_type: Option<String>,
    pub start_time: Option<chrono::DateTime<chrono::Utc>>,
    pub end_time: Option<chrono::DateTime<chrono::Utc>>,
    pub success: Option<bool>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CancelTestApiResponse {
    pub cancelled: bool,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct QueueStatusQuery {
    #[serde(default)]
    pub test_id: Option<TestId>,
}

#[derive(Debug, Serialize)]
pub struct QueueStatusEntryApi {
    pub test_id: TestId,
    pub state: String,
    pub error: Option<String>,
}
