use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Globally unique, opaque identifier for one accepted test run.
///
/// Minted once by the queue controller when an `initializeTest` request
/// arrives; used as the correlation key across logs, actor names, and the
/// staging filesystem subtree (`/<test_id>/`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TestId(Uuid);

impl TestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Consumer group id for this test's Kafka consumer streams.
    pub fn consumer_group(&self) -> String {
        format!("test-{}", self.0)
    }

    /// Root path of this test's subtree in the staging filesystem.
    pub fn staging_root(&self) -> String {
        format!("/{}", self.0)
    }
}

impl Default for TestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TestId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}
