pub mod jaas;
pub mod provider;
pub mod rosetta;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::error::ProbeResult;
use crate::model::{Role, SecurityDirective, SecurityProtocol, TopicDirective, VaultCredentials};

use jaas::build_security_directive;
use provider::VaultInvoker;
use rosetta::{apply_mapping, render_request_template, RosettaMapping};

/// Drives the three-stage credential pipeline (§4.4) for every
/// `TopicDirective` in a test's manifest: build the request, invoke the
/// provider function, map the response, build the JAAS string.
pub struct VaultClient {
    invoker: Arc<dyn VaultInvoker>,
    mapping: RosettaMapping,
    request_params: HashMap<String, String>,
    token_endpoint: String,
    scope: Option<String>,
    security_protocol: SecurityProtocol,
}

impl VaultClient {
    pub fn new(
        invoker: Arc<dyn VaultInvoker>,
        mapping: RosettaMapping,
        request_params: HashMap<String, String>,
        token_endpoint: String,
        scope: Option<String>,
        security_protocol: SecurityProtocol,
    ) -> Self {
        Self {
            invoker,
            mapping,
            request_params,
            token_endpoint,
            scope,
            security_protocol,
        }
    }

    async fn resolve_one(&self, directive: &TopicDirective) -> ProbeResult<SecurityDirective> {
        let request_body = match &self.mapping.request_template {
            Some(template) => render_request_template(template, &self.request_params, directive)?,
            None => json!({
                "topic": directive.topic,
                "role": match directive.role { Role::Producer => "producer", Role::Consumer => "consumer" },
                "clientPrincipal": directive.client_principal,
            }),
        };

        let response: Value = self.invoker.invoke(request_body).await?;
        let fields = apply_mapping(&self.mapping, &response)?;

        let credentials = VaultCredentials {
            topic: directive.topic.clone(),
            role: directive.role,
            client_id: fields.get("clientId").cloned().unwrap_or_default(),
            client_secret: fields.get("clientSecret").cloned().unwrap_or_default(),
        };

        Ok(build_security_directive(
            &credentials,
            &self.token_endpoint,
            self.scope.as_deref(),
            self.security_protocol,
        ))
    }

    /// Resolves credentials for every directive in a test's manifest. A
    /// single failure surfaces immediately as a vault exception (§4.4 error
    /// semantics) — the lifecycle controller treats the whole batch as one
    /// child operation.
    pub async fn resolve_all(&self, directives: Vec<TopicDirective>) -> ProbeResult<Vec<SecurityDirective>> {
        let mut out = Vec::with_capacity(directives.len());
        for directive in &directives {
            out.push(self.resolve_one(directive).await?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap as Map;

    struct StubInvoker {
        response: Value,
    }

    #[async_trait]
    impl VaultInvoker for StubInvoker {
        async fn invoke(&self, _request: Value) -> ProbeResult<Value> {
            Ok(self.response.clone())
        }
    }

    fn directive() -> TopicDirective {
        TopicDirective {
            topic: "orders".to_string(),
            role: Role::Producer,
            client_principal: "svc".to_string(),
            event_filters: Vec::new(),
            metadata: Map::new(),
            bootstrap_servers: None,
        }
    }

    #[tokio::test]
    async fn resolves_credentials_into_security_directive() {
        let mapping = RosettaMapping {
            request_template: None,
            mappings: vec![
                rosetta::FieldMapping {
                    target_field: "clientId".to_string(),
                    source_path: "$.id".to_string(),
                    transformations: Vec::new(),
                },
                rosetta::FieldMapping {
                    target_field: "clientSecret".to_string(),
                    source_path: "$.secret".to_string(),
                    transformations: Vec::new(),
                },
            ],
        };
        let invoker = Arc::new(StubInvoker {
            response: json!({"id": "abc", "secret": "xyz"}),
        });
        let client = VaultClient::new(
            invoker,
            mapping,
            Map::new(),
            "https://token".to_string(),
            None,
            SecurityProtocol::Plaintext,
        );
        let directives = client.resolve_all(vec![directive()]).await.unwrap();
        assert_eq!(directives.len(), 1);
        assert_eq!(directives[0].topic, "orders");
        assert!(directives[0].jaas_config.contains(r#"oauth.client.id="abc""#));
    }
}
