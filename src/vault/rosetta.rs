use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{ErrorCode, ProbeError, ProbeResult};
use crate::model::{Role, TopicDirective};

static REQUEST_PARAM_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^request-params\.[A-Za-z0-9._-]+$").unwrap());

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{([^}]+)\}\}").unwrap());

/// Chainable response transformation applied after a JSONPath extraction
/// (§4.4 step 3).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum Transformation {
    #[serde(rename = "base64Decode")]
    Base64Decode,
    #[serde(rename = "base64Encode")]
    Base64Encode,
    #[serde(rename = "concat")]
    Concat { value: String },
    #[serde(rename = "prefix")]
    Prefix { value: String },
    #[serde(rename = "suffix")]
    Suffix { value: String },
    #[serde(rename = "toUpper")]
    ToUpper,
    #[serde(rename = "toLower")]
    ToLower,
    #[serde(rename = "default")]
    Default { value: String },
}

impl Transformation {
    fn apply(&self, input: String) -> ProbeResult<String> {
        use base64::{engine::general_purpose::STANDARD, Engine as _};
        Ok(match self {
            Transformation::Base64Decode => {
                let decoded = STANDARD.decode(input.as_bytes()).map_err(|err| {
                    ProbeError::new(ErrorCode::Mapping, format!("base64Decode failed: {err}"))
                })?;
                String::from_utf8(decoded).map_err(|err| {
                    ProbeError::new(ErrorCode::Mapping, format!("base64Decode produced invalid utf-8: {err}"))
                })?
            }
            Transformation::Base64Encode => STANDARD.encode(input.as_bytes()),
            Transformation::Concat { value } => format!("{input}{value}"),
            Transformation::Prefix { value } => format!("{value}{input}"),
            Transformation::Suffix { value } => format!("{input}{value}"),
            Transformation::ToUpper => input.to_uppercase(),
            Transformation::ToLower => input.to_lowercase(),
            Transformation::Default { value } => {
                if input.is_empty() {
                    value.clone()
                } else {
                    input
                }
            }
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldMapping {
    pub target_field: String,
    pub source_path: String,
    #[serde(default)]
    pub transformations: Vec<Transformation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RosettaMapping {
    #[serde(default)]
    pub request_template: Option<Value>,
    pub mappings: Vec<FieldMapping>,
}

/// Renders the vault request body template (§4.4 step 1). Every bad
/// placeholder reference is accumulated and reported together, never
/// fail-fast (invariant 10).
pub fn render_request_template(
    template: &Value,
    request_params: &HashMap<String, String>,
    directive: &TopicDirective,
) -> ProbeResult<Value> {
    let mut errors = Vec::new();
    let rendered = render_value(template, request_params, directive, &mut errors);
    if errors.is_empty() {
        Ok(rendered)
    } else {
        Err(ProbeError::new(ErrorCode::Mapping, errors.join("; ")))
    }
}

fn render_value(
    value: &Value,
    request_params: &HashMap<String, String>,
    directive: &TopicDirective,
    errors: &mut Vec<String>,
) -> Value {
    match value {
        Value::String(s) => Value::String(render_string(s, request_params, directive, errors)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| render_value(item, request_params, directive, errors))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_value(v, request_params, directive, errors)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn render_string(
    template: &str,
    request_params: &HashMap<String, String>,
    directive: &TopicDirective,
    errors: &mut Vec<String>,
) -> String {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for caps in PLACEHOLDER.captures_iter(template) {
        let whole = caps.get(0).unwrap();
        out.push_str(&template[last..whole.start()]);
        last = whole.end();
        let expr = caps.get(1).unwrap().as_str().trim();

        if let Some(path) = expr.strip_prefix("$^") {
            if !REQUEST_PARAM_PATH.is_match(path) {
                errors.push(format!(
                    "invalid config path reference `{{{{${{^{path}}}}}}}`: must match ^request-params\\.[A-Za-z0-9._-]+$"
                ));
                continue;
            }
            let key = path.strip_prefix("request-params.").unwrap_or(path);
            match request_params.get(key) {
                Some(v) => out.push_str(v),
                None => errors.push(format!("request-params.{key} is not configured")),
            }
        } else if let Some(key) = expr.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
            match directive.metadata.get(key) {
                Some(v) => out.push_str(v),
                None => {
                    let available: Vec<_> = directive.metadata.keys().cloned().collect();
                    errors.push(format!(
                        "metadata key `{key}` not found; available keys: [{}]",
                        available.join(", ")
                    ));
                }
            }
        } else {
            match expr {
                "topic" => out.push_str(&directive.topic),
                "role" => out.push_str(match directive.role {
                    Role::Producer => "producer",
                    Role::Consumer => "consumer",
                }),
                "clientPrincipal" => out.push_str(&directive.client_principal),
                other => errors.push(format!(
                    "unknown field reference `{{{{{other}}}}}`; expected one of [topic, role, clientPrincipal]"
                )),
            }
        }
    }
    out.push_str(&template[last..]);
    out
}

fn extract_jsonpath(response: &Value, path: &str) -> ProbeResult<Value> {
    let mut results = jsonpath_lib::select(response, path)
        .map_err(|err| ProbeError::new(ErrorCode::Mapping, format!("invalid JSONPath `{path}`: {err}")))?;
    results
        .pop()
        .cloned()
        .ok_or_else(|| ProbeError::new(ErrorCode::Mapping, format!("JSONPath `{path}` matched nothing")))
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Applies a Rosetta mapping to a vault response, producing the internal
/// `{clientId, clientSecret}` pair required to build `VaultCredentials`.
pub fn apply_mapping(mapping: &RosettaMapping, response: &Value) -> ProbeResult<HashMap<String, String>> {
    let mut out = HashMap::new();
    let mut errors = Vec::new();

    for field in &mapping.mappings {
        let extracted = match extract_jsonpath(response, &field.source_path) {
            Ok(v) => v,
            Err(err) => {
                errors.push(err.message);
                continue;
            }
        };
        let mut current = value_to_string(&extracted);
        let mut failed = false;
        for transform in &field.transformations {
            match transform.apply(current.clone()) {
                Ok(next) => current = next,
                Err(err) => {
                    errors.push(err.message);
                    failed = true;
                    break;
                }
            }
        }
        if !failed {
            out.insert(field.target_field.clone(), current);
        }
    }

    if errors.is_empty() {
        Ok(out)
    } else {
        Err(ProbeError::new(ErrorCode::Mapping, errors.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap as Map;

    fn directive() -> TopicDirective {
        TopicDirective {
            topic: "orders".to_string(),
            role: Role::Producer,
            client_principal: "svc-orders".to_string(),
            event_filters: Vec::new(),
            metadata: Map::from([("env".to_string(), "staging".to_string())]),
            bootstrap_servers: None,
        }
    }

    #[test]
    fn renders_metadata_and_field_placeholders() {
        let template = json!({"principal": "{{clientPrincipal}}", "env": "{{'env'}}"});
        let rendered =
            render_request_template(&template, &Map::new(), &directive()).unwrap();
        assert_eq!(rendered["principal"], "svc-orders");
        assert_eq!(rendered["env"], "staging");
    }

    #[test]
    fn rejects_request_params_outside_namespace() {
        let template = json!({"x": "{{$^secrets.other}}"});
        let err = render_request_template(&template, &Map::new(), &directive()).unwrap_err();
        assert!(err.message.contains("invalid config path"));
    }

    #[test]
    fn missing_metadata_key_lists_available_keys() {
        let template = json!({"x": "{{'missing-key'}}"});
        let err = render_request_template(&template, &Map::new(), &directive()).unwrap_err();
        assert!(err.message.contains("missing-key"));
        assert!(err.message.contains("env"));
    }

    #[test]
    fn applies_chained_transformations() {
        let mapping = RosettaMapping {
            request_template: None,
            mappings: vec![FieldMapping {
                target_field: "clientSecret".to_string(),
                source_path: "$.secret".to_string(),
                transformations: vec![Transformation::Base64Decode, Transformation::ToUpper],
            }],
        };
        let response = json!({"secret": base64::Engine::encode(&base64::engine::general_purpose::STANDARD, "hunter2")});
        let out = apply_mapping(&mapping, &response).unwrap();
        assert_eq!(out["clientSecret"], "HUNTER2");
    }

    #[test]
    fn accumulates_errors_across_fields() {
        let mapping = RosettaMapping {
            request_template: None,
            mappings: vec![
                FieldMapping {
                    target_field: "clientId".to_string(),
                    source_path: "$.missing".to_string(),
                    transformations: Vec::new(),
                },
                FieldMapping {
                    target_field: "clientSecret".to_string(),
                    source_path: "$.alsoMissing".to_string(),
                    transformations: Vec::new(),
                },
            ],
        };
        let err = apply_mapping(&mapping, &json!({})).unwrap_err();
        assert!(err.message.contains("missing"));
        assert!(err.message.contains("alsoMissing"));
    }
}
