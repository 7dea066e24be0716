use rdkafka::client::{ClientContext, OAuthToken};

/// Generates OAUTHBEARER tokens on demand for librdkafka's refresh
/// callback; librdkafka schedules the next refresh at half the returned
/// lifetime on its own (§4.3.1). Credentials are recovered from the
/// JAAS-supplied client id/secret; `token_endpoint`/`scope` are framework
/// config, never vault-provided. Shared between producer and consumer
/// streams since both need the same OAUTHBEARER mechanism.
pub struct OAuthTokenContext {
    pub token_endpoint: String,
    pub client_id: String,
    pub client_secret: String,
    pub scope: Option<String>,
    pub http: reqwest::Client,
}

impl OAuthTokenContext {
    pub fn disabled() -> Self {
        Self {
            token_endpoint: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            scope: None,
            http: reqwest::Client::new(),
        }
    }

    pub fn from_jaas(jaas: &str) -> Option<Self> {
        let fields = parse_jaas_fields(jaas)?;
        Some(Self {
            token_endpoint: fields.token_endpoint,
            client_id: fields.client_id,
            client_secret: fields.client_secret,
            scope: fields.scope,
            http: reqwest::Client::new(),
        })
    }
}

impl ClientContext for OAuthTokenContext {
    const ENABLE_REFRESH_OAUTH_TOKEN: bool = true;

    fn generate_oauth_token(
        &self,
        _oauthbearer_config: Option<&str>,
    ) -> Result<OAuthToken, Box<dyn std::error::Error>> {
        let mut form = vec![
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        if let Some(scope) = &self.scope {
            form.push(("scope", scope.as_str()));
        }
        let body: serde_json::Value = tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                self.http
                    .post(&self.token_endpoint)
                    .form(&form)
                    .send()
                    .await?
                    .error_for_status()?
                    .json()
                    .await
            })
        })?;
        let token = body["access_token"].as_str().unwrap_or_default().to_string();
        let lifetime_ms = body["expires_in"].as_i64().unwrap_or(3600) * 1000;
        Ok(OAuthToken {
            token,
            principal_name: self.client_id.clone(),
            lifetime_ms,
        })
    }
}

struct JaasFields {
    client_id: String,
    client_secret: String,
    token_endpoint: String,
    scope: Option<String>,
}

fn parse_jaas_fields(jaas: &str) -> Option<JaasFields> {
    use once_cell::sync::Lazy;
    use regex::Regex;
    static FIELD: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r#"oauth\.(client\.id|client\.secret|token\.endpoint\.uri|scope)="([^"]*)""#).unwrap()
    });

    let mut client_id = None;
    let mut client_secret = None;
    let mut token_endpoint = None;
    let mut scope = None;
    for caps in FIELD.captures_iter(jaas) {
        match &caps[1] {
            "client.id" => client_id = Some(caps[2].to_string()),
            "client.secret" => client_secret = Some(caps[2].to_string()),
            "token.endpoint.uri" => token_endpoint = Some(caps[2].to_string()),
            "scope" => scope = Some(caps[2].to_string()),
            _ => {}
        }
    }
    Some(JaasFields {
        client_id: client_id?,
        client_secret: client_secret?,
        token_endpoint: token_endpoint?,
        scope,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_fields_from_jaas_string() {
        let jaas = r#"org.apache.kafka.common.security.oauthbearer.OAuthBearerLoginModule required oauth.client.id="abc" oauth.client.secret="xyz" oauth.token.endpoint.uri="https://token" oauth.scope="kafka.read";"#;
        let context = OAuthTokenContext::from_jaas(jaas).unwrap();
        assert_eq!(context.client_id, "abc");
        assert_eq!(context.client_secret, "xyz");
        assert_eq!(context.token_endpoint, "https://token");
        assert_eq!(context.scope.as_deref(), Some("kafka.read"));
    }

    #[test]
    fn missing_required_field_returns_none() {
        let jaas = r#"OAuthBearerLoginModule required oauth.client.id="abc";"#;
        assert!(OAuthTokenContext::from_jaas(jaas).is_none());
    }
}
