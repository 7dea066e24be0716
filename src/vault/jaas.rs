use crate::model::{Role, SecurityDirective, SecurityProtocol, VaultCredentials};

/// Builds the OAUTHBEARER JAAS login-module string (§4.4 step 3).
/// `tokenEndpoint` and `scope` always come from framework config, never
/// from the vault response.
pub fn build_jaas_config(credentials: &VaultCredentials, token_endpoint: &str, scope: Option<&str>) -> String {
    let mut out = format!(
        "org.apache.kafka.common.security.oauthbearer.OAuthBearerLoginModule required \
         oauth.client.id=\"{}\" oauth.client.secret=\"{}\" oauth.token.endpoint.uri=\"{}\"",
        credentials.client_id, credentials.client_secret, token_endpoint
    );
    if let Some(scope) = scope {
        out.push_str(&format!(" oauth.scope=\"{scope}\""));
    }
    out.push(';');
    out
}

/// Combines credentials and the framework-constructed JAAS string into the
/// streaming-layer directive. §3 invariant: exactly one `SecurityDirective`
/// per `(topic, role)` pair.
pub fn build_security_directive(
    credentials: &VaultCredentials,
    token_endpoint: &str,
    scope: Option<&str>,
    security_protocol: SecurityProtocol,
) -> SecurityDirective {
    SecurityDirective {
        topic: credentials.topic.clone(),
        role: credentials.role,
        security_protocol,
        jaas_config: build_jaas_config(credentials, token_endpoint, scope),
    }
}
