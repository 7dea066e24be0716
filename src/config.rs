use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::model::SecurityProtocol;

/// Cloud vault function backend (§4.4 step 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultProviderKind {
    Aws,
    Azure,
    Gcp,
}

impl VaultProviderKind {
    fn parse(value: &str) -> Result<Self> {
        Ok(match value {
            "aws" => Self::Aws,
            "azure" => Self::Azure,
            "gcp" => Self::Gcp,
            other => bail!("vault.provider: unknown provider `{other}`"),
        })
    }
}

/// Object-storage provider backing the staging pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageProviderKind {
    Local,
    Aws,
    Azure,
    Gcp,
}

impl StorageProviderKind {
    fn parse(value: &str) -> Result<Self> {
        Ok(match value {
            "local" => Self::Local,
            "aws" => Self::Aws,
            "azure" => Self::Azure,
            "gcp" => Self::Gcp,
            other => bail!("storage.provider: unknown provider `{other}`"),
        })
    }
}

/// Fully validated configuration surface (§6 table plus ambient additions).
/// Built once at startup; never mutated afterward.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    pub bind_port: u16,

    pub setup_state_timeout: Duration,
    pub loading_state_timeout: Duration,
    pub completed_state_timeout: Duration,
    pub exception_state_timeout: Duration,

    pub supervision_max_restarts: u32,
    pub supervision_restart_time_range: Duration,

    pub kafka_bootstrap_servers: String,
    pub kafka_schema_registry_url: String,
    pub kafka_oauth_token_endpoint: String,
    pub kafka_oauth_client_scope: Option<String>,
    pub kafka_security_protocol: SecurityProtocol,

    pub storage_provider: StorageProviderKind,
    pub storage_topic_directive_file_name: String,

    pub vault_provider: VaultProviderKind,
    pub vault_function_arn: String,
    pub vault_invoke_url: String,
    pub vault_function_url: String,
    pub vault_function_key: String,
    pub vault_rosetta_mapping_path: String,
    pub vault_request_params: HashMap<String, String>,

    pub cucumber_glue_packages: Vec<String>,

    pub breaker_max_failures: u32,
    pub breaker_call_timeout: Duration,
    pub breaker_reset_timeout: Duration,
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn required(key: &str) -> Result<String> {
    env_var(key).with_context(|| format!("missing required configuration key `{key}`"))
}

fn with_default(key: &str, default: &str) -> String {
    env_var(key).unwrap_or_else(|| default.to_string())
}

fn parse_duration_secs(key: &str, default_secs: u64) -> Result<Duration> {
    let raw = with_default(key, &default_secs.to_string());
    let secs: u64 = raw
        .parse()
        .with_context(|| format!("{key}: `{raw}` is not a valid duration in seconds"))?;
    Ok(Duration::from_secs(secs))
}

fn parse_u32(key: &str, default: u32) -> Result<u32> {
    let raw = with_default(key, &default.to_string());
    raw.parse()
        .with_context(|| format!("{key}: `{raw}` is not a valid integer"))
}

fn parse_kv_list(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| pair.trim().split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

fn parse_port(key: &str, default: u16) -> Result<u16> {
    let raw = with_default(key, &default.to_string());
    let port: u32 = raw
        .parse()
        .with_context(|| format!("{key}: `{raw}` is not a valid integer"))?;
    if port == 0 || port > 65535 {
        bail!("{key}: port `{port}` out of range [1,65535]");
    }
    Ok(port as u16)
}

impl Config {
    /// Loads and validates configuration from the process environment,
    /// failing fast on missing required keys, invalid durations/integers,
    /// out-of-range ports, an improperly-scoped schema-registry URL, and
    /// cross-field contradictions.
    pub fn from_env() -> Result<Self> {
        let kafka_schema_registry_url = required("KAFKA_SCHEMA_REGISTRY_URL")?;
        if !kafka_schema_registry_url.starts_with("http://")
            && !kafka_schema_registry_url.starts_with("https://")
        {
            bail!("kafka.schema-registry-url must start with http:// or https://");
        }

        let storage_provider =
            StorageProviderKind::parse(&with_default("STORAGE_PROVIDER", "local"))?;

        let kafka_security_protocol = match with_default("PROBE_ENV", "local").as_str() {
            "production" => SecurityProtocol::SaslSsl,
            _ => SecurityProtocol::Plaintext,
        };

        let completed_state_timeout = parse_duration_secs("TEST_EXECUTION_COMPLETED_STATE_TIMEOUT", 60)?;
        if let Some(raw) = env_var("TEST_EXECUTION_MAX_TEST_DURATION") {
            let max_duration: u64 = raw
                .parse()
                .with_context(|| "TEST_EXECUTION_MAX_TEST_DURATION is not a valid duration in seconds")?;
            if completed_state_timeout.as_secs() >= max_duration {
                bail!(
                    "test-execution.completed-state-timeout ({}s) must be less than test-execution.max-test-duration ({max_duration}s)",
                    completed_state_timeout.as_secs()
                );
            }
        }

        let cucumber_glue_packages = with_default("CUCUMBER_GLUE_PACKAGES", "steps")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let vault_provider = VaultProviderKind::parse(&with_default("VAULT_PROVIDER", "aws"))?;
        let vault_request_params = parse_kv_list(&with_default("VAULT_REQUEST_PARAMS", ""));

        Ok(Self {
            bind_address: with_default("PROBE_BIND_ADDRESS", "0.0.0.0"),
            bind_port: parse_port("PROBE_BIND_PORT", 8080)?,

            setup_state_timeout: parse_duration_secs("TEST_EXECUTION_SETUP_STATE_TIMEOUT", 60)?,
            loading_state_timeout: parse_duration_secs("TEST_EXECUTION_LOADING_STATE_TIMEOUT", 60)?,
            completed_state_timeout,
            exception_state_timeout: parse_duration_secs("TEST_EXECUTION_EXCEPTION_STATE_TIMEOUT", 60)?,

            supervision_max_restarts: parse_u32("SUPERVISION_MAX_RESTARTS", 3)?,
            supervision_restart_time_range: parse_duration_secs("SUPERVISION_RESTART_TIME_RANGE", 60)?,

            kafka_bootstrap_servers: with_default("KAFKA_BOOTSTRAP_SERVERS", "localhost:9092"),
            kafka_schema_registry_url,
            kafka_oauth_token_endpoint: with_default("KAFKA_OAUTH_TOKEN_ENDPOINT", ""),
            kafka_oauth_client_scope: env_var("KAFKA_OAUTH_CLIENT_SCOPE"),
            kafka_security_protocol,

            storage_provider,
            storage_topic_directive_file_name: with_default(
                "STORAGE_TOPIC_DIRECTIVE_FILE_NAME",
                "test-config.yaml",
            ),

            vault_provider,
            vault_function_arn: with_default("VAULT_FUNCTION_ARN", ""),
            vault_invoke_url: with_default("VAULT_INVOKE_URL", ""),
            vault_function_url: with_default("VAULT_FUNCTION_URL", ""),
            vault_function_key: with_default("VAULT_FUNCTION_KEY", ""),
            vault_rosetta_mapping_path: with_default("VAULT_ROSETTA_MAPPING_PATH", "rosetta-mapping.yaml"),
            vault_request_params,

            cucumber_glue_packages,

            breaker_max_failures: parse_u32("QUEUE_BREAKER_MAX_FAILURES", 5)?,
            breaker_call_timeout: parse_duration_secs("QUEUE_BREAKER_CALL_TIMEOUT", 25)?,
            breaker_reset_timeout: parse_duration_secs("QUEUE_BREAKER_RESET_TIMEOUT", 30)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for key in [
            "KAFKA_SCHEMA_REGISTRY_URL",
            "STORAGE_PROVIDER",
            "TEST_EXECUTION_COMPLETED_STATE_TIMEOUT",
            "TEST_EXECUTION_MAX_TEST_DURATION",
            "PROBE_BIND_PORT",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn fails_fast_on_missing_schema_registry_url() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("KAFKA_SCHEMA_REGISTRY_URL"));
    }

    #[test]
    fn rejects_schema_registry_url_without_scheme() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("KAFKA_SCHEMA_REGISTRY_URL", "registry.internal:8081");
        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("http"));
        std::env::remove_var("KAFKA_SCHEMA_REGISTRY_URL");
    }

    #[test]
    fn rejects_completed_timeout_not_less_than_max_duration() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("KAFKA_SCHEMA_REGISTRY_URL", "https://registry.internal:8081");
        std::env::set_var("TEST_EXECUTION_COMPLETED_STATE_TIMEOUT", "120");
        std::env::set_var("TEST_EXECUTION_MAX_TEST_DURATION", "60");
        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("must be less than"));
        clear_env();
    }

    #[test]
    fn rejects_out_of_range_port() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("KAFKA_SCHEMA_REGISTRY_URL", "https://registry.internal:8081");
        std::env::set_var("PROBE_BIND_PORT", "99999");
        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("out of range"));
        clear_env();
    }
}
