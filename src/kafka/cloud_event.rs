use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, ProbeError, ProbeResult};

/// Message-key shape carried alongside every Kafka record (§3). Extra
/// attributes are kept in a sorted map so two constructions of the same
/// logical event serialize byte-identical, which is what guarantees a
/// correlation id always lands on the same partition (§8 round-trip
/// properties).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudEvent {
    pub id: String,
    pub source: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub payloadversion: String,
    pub correlationid: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl CloudEvent {
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        event_type: impl Into<String>,
        payloadversion: impl Into<String>,
        correlationid: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            event_type: event_type.into(),
            payloadversion: payloadversion.into(),
            correlationid: correlationid.into(),
            extra: BTreeMap::new(),
        }
    }

    /// Deterministic, normalized encoding: `serde_json`'s map serialization
    /// is already insertion-order based, so `extra` is kept as a `BTreeMap`
    /// and top-level fields are declared in a fixed order above.
    pub fn to_key_bytes(&self) -> ProbeResult<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|err| ProbeError::new(ErrorCode::Consumer, format!("CloudEvent encode failed: {err}")))
    }

    pub fn from_key_bytes(bytes: &[u8]) -> ProbeResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|err| ProbeError::new(ErrorCode::Consumer, format!("CloudEvent decode failed: {err}")))
    }

    pub fn matches_filter(&self, event_type: &str, payload_version: &str) -> bool {
        self.event_type == event_type && self.payloadversion == payload_version
    }
}
