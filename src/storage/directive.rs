use serde::Deserialize;

use crate::error::{ErrorCode, ProbeError, ProbeResult};
use crate::model::{validate_topic_directives, TopicDirective};

#[derive(Deserialize)]
struct TopicDirectiveFile {
    topics: Vec<TopicDirective>,
}

/// Parses and validates the topic-directive YAML (§6 schema, §3 invariants).
/// Parse errors and validation errors both surface as `ErrorCode::Validation`
/// so the lifecycle controller treats them uniformly as a load failure.
pub fn parse_topic_directives(yaml: &[u8]) -> ProbeResult<Vec<TopicDirective>> {
    let file: TopicDirectiveFile = serde_yaml::from_slice(yaml).map_err(|err| {
        ProbeError::new(
            ErrorCode::Validation,
            format!("topic directive file is not valid YAML: {err}"),
        )
    })?;

    validate_topic_directives(&file.topics).map_err(|errors| {
        let message = errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        ProbeError::new(ErrorCode::Validation, message)
    })?;

    Ok(file.topics)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_directive_file() {
        let yaml = br#"
topics:
  - topic: orders
    role: producer
    clientPrincipal: svc-orders
    eventFilters: []
  - topic: orders-replies
    role: consumer
    clientPrincipal: svc-orders
    eventFilters:
      - key: OrderCreated
        value: v1
"#;
        let directives = parse_topic_directives(yaml).unwrap();
        assert_eq!(directives.len(), 2);
        assert_eq!(directives[1].event_filters[0].event_type, "OrderCreated");
    }

    #[test]
    fn rejects_duplicate_topics_from_yaml() {
        let yaml = br#"
topics:
  - topic: orders
    role: producer
    clientPrincipal: a
  - topic: orders
    role: consumer
    clientPrincipal: b
"#;
        let err = parse_topic_directives(yaml).unwrap_err();
        assert!(err.message.contains("duplicate topics: orders"));
    }

    #[test]
    fn rejects_malformed_yaml() {
        let err = parse_topic_directives(b"not: [valid").unwrap_err();
        assert_eq!(err.code, ErrorCode::Validation);
    }
}
