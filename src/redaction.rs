use once_cell::sync::Lazy;
use regex::Regex;

/// Patterns matching credential material that must never reach a log line
/// or error payload (§7, §8 invariant 9): JAAS login-module strings, bearer
/// tokens, and any `oauth.client.secret="..."` / `oauth.client.id="..."`
/// fragment.
static PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r#"oauth\.client\.secret="[^"]*""#).unwrap(),
        Regex::new(r#"oauth\.client\.id="[^"]*""#).unwrap(),
        Regex::new(r"(?i)bearer\s+[A-Za-z0-9\-_.]+").unwrap(),
        Regex::new(r"OAuthBearerLoginModule required[^;]*;").unwrap(),
    ]
});

/// Substitutes credential material in `text` with `<redacted>` markers.
/// Idempotent and safe to call on text that contains nothing sensitive.
pub fn redact(text: &str) -> String {
    let mut out = text.to_string();
    for pattern in PATTERNS.iter() {
        out = pattern.replace_all(&out, "<redacted>").into_owned();
    }
    out
}

/// Hashes credential material so two occurrences of the same secret can be
/// correlated in logs without ever emitting the secret itself.
pub fn fingerprint(secret: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(secret.as_bytes());
    hex::encode(&digest[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_jaas_client_secret() {
        let jaas = r#"org.apache.kafka.common.security.oauthbearer.OAuthBearerLoginModule required oauth.client.id="abc" oauth.client.secret="xyz" oauth.token.endpoint.uri="https://x";"#;
        let redacted = redact(jaas);
        assert!(!redacted.contains("xyz"));
        assert!(!redacted.contains("abc"));
    }

    #[test]
    fn redacts_bearer_tokens() {
        let msg = "request failed: Authorization: Bearer abc123.def456";
        let redacted = redact(msg);
        assert!(!redacted.contains("abc123.def456"));
    }

    #[test]
    fn leaves_ordinary_text_untouched() {
        let msg = "missing metadata key: expected one of [clientId, region]";
        assert_eq!(redact(msg), msg);
    }

    #[test]
    fn fingerprint_is_deterministic_and_not_reversible() {
        let a = fingerprint("super-secret");
        let b = fingerprint("super-secret");
        assert_eq!(a, b);
        assert!(!a.contains("super-secret"));
    }
}
