use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::ids::TestId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Producer,
    Consumer,
}

/// A single (eventType, payloadVersion) filter entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventFilter {
    #[serde(rename = "key")]
    pub event_type: String,
    #[serde(rename = "value")]
    pub payload_version: String,
}

/// Per-topic configuration as read from the topic directive YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicDirective {
    pub topic: String,
    pub role: Role,
    #[serde(rename = "clientPrincipal")]
    pub client_principal: String,
    #[serde(rename = "eventFilters", default)]
    pub event_filters: Vec<EventFilter>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(rename = "bootstrapServers", default)]
    pub bootstrap_servers: Option<String>,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum DirectiveValidationError {
    #[error("duplicate topics: {0}")]
    DuplicateTopics(String),
    #[error("topic `{0}`: empty topic name")]
    EmptyTopic(String),
    #[error("topic `{topic}`: invalid bootstrap server entry `{entry}`: {reason}")]
    InvalidBootstrapServer {
        topic: String,
        entry: String,
        reason: String,
    },
}

/// Validates the invariants in §3: unique topic names, and a well-formed
/// `host:port[,host:port...]` bootstrap server list when present.
pub fn validate_topic_directives(
    directives: &[TopicDirective],
) -> Result<(), Vec<DirectiveValidationError>> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    let mut duplicates = HashSet::new();

    for directive in directives {
        if directive.topic.trim().is_empty() {
            errors.push(DirectiveValidationError::EmptyTopic(directive.topic.clone()));
        }
        if !seen.insert(directive.topic.clone()) {
            duplicates.insert(directive.topic.clone());
        }
        if let Some(servers) = &directive.bootstrap_servers {
            for entry in servers.split(',') {
                if let Err(reason) = validate_bootstrap_entry(entry) {
                    errors.push(DirectiveValidationError::InvalidBootstrapServer {
                        topic: directive.topic.clone(),
                        entry: entry.to_string(),
                        reason,
                    });
                }
            }
        }
    }

    if !duplicates.is_empty() {
        let mut names: Vec<_> = duplicates.into_iter().collect();
        names.sort();
        errors.push(DirectiveValidationError::DuplicateTopics(names.join(", ")));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_bootstrap_entry(entry: &str) -> Result<(), String> {
    let entry = entry.trim();
    let (host, port) = entry
        .rsplit_once(':')
        .ok_or_else(|| "missing port".to_string())?;
    if host.is_empty() || host.starts_with('-') {
        return Err(format!("hostname `{host}` must not start with a hyphen"));
    }
    let port: u32 = port.parse().map_err(|_| format!("port `{port}` is not numeric"))?;
    if port == 0 || port > 65535 {
        return Err(format!("port `{port}` out of range [1,65535]"));
    }
    Ok(())
}

/// Manifest produced by the storage fetch step; read-only after creation.
#[derive(Debug, Clone)]
pub struct StorageDirective {
    pub workspace_root: String,
    pub evidence_dir: String,
    pub topic_directives: Vec<TopicDirective>,
    pub source_bucket: String,
}

/// Product of Rosetta-mapping a vault response. Never logged verbatim.
#[derive(Clone, Serialize, Deserialize)]
pub struct VaultCredentials {
    pub topic: String,
    pub role: Role,
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for VaultCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultCredentials")
            .field("topic", &self.topic)
            .field("role", &self.role)
            .field("client_id", &"<redacted>")
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityProtocol {
    SaslSsl,
    Plaintext,
}

/// Streaming-layer credential shape, constructed by the framework from a
/// `VaultCredentials` plus framework configuration. Never user-mapped.
#[derive(Clone)]
pub struct SecurityDirective {
    pub topic: String,
    pub role: Role,
    pub security_protocol: SecurityProtocol,
    pub jaas_config: String,
}

impl std::fmt::Debug for SecurityDirective {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityDirective")
            .field("topic", &self.topic)
            .field("role", &self.role)
            .field("security_protocol", &self.security_protocol)
            .field("jaas_config", &"<redacted>")
            .finish()
    }
}

/// Result produced by the Gherkin executor bridge, once per test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub scenario_count: u32,
    pub scenarios_passed: u32,
    pub scenarios_failed: u32,
    pub duration_ms: u64,
}

impl TestResult {
    pub fn success(&self) -> bool {
        self.scenarios_failed == 0 && self.scenario_count > 0
    }
}

/// Per-test state owned by the lifecycle controller. Mutated only by the
/// controller in response to messages; never shared across threads directly.
#[derive(Debug, Clone)]
pub struct LifecycleData {
    pub test_id: TestId,
    pub bucket: Option<String>,
    pub test_type: Option<String>,
    pub storage_directive: Option<StorageDirective>,
    pub security_directives: Vec<SecurityDirective>,
    pub test_result: Option<TestResult>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
    pub error: Option<String>,
}

impl LifecycleData {
    pub fn new(test_id: TestId) -> Self {
        Self {
            test_id,
            bucket: None,
            test_type: None,
            storage_directive: None,
            security_directives: Vec::new(),
            test_result: None,
            started_at: None,
            ended_at: None,
            error: None,
        }
    }
}
