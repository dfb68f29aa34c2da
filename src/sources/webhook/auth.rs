//! Webhook authentication (spec §4.7-§4.9): `none`, `bearer`, or `basic`.
//! All secret comparisons are constant-time to prevent timing oracles
//! (spec §9) — both the bearer token and, for Basic, the username and any
//! non-bcrypt password.

use axum::http::HeaderMap;
use base64::Engine;
use subtle::ConstantTimeEq;

#[derive(Debug, Clone)]
pub struct BasicAuthConfig {
    pub username: String,
    /// Either a bcrypt hash (`$2a`/`$2b`/`$2y` prefixed) or a bare
    /// plaintext string. The dual mode exists for migration (spec §9);
    /// new deployments should configure a bcrypt hash.
    pub password_hash: String,
}

#[derive(Debug, Clone)]
pub enum WebhookAuth {
    None,
    Bearer { token: String },
    Basic(BasicAuthConfig),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthVerdict {
    Allowed,
    /// Missing credentials and a rejected credential both collapse to a
    /// single 401 at the HTTP layer (spec §4.7) — kept as two variants
    /// here only so tests can distinguish the two code paths.
    MissingCredentials,
    Rejected,
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && a.as_bytes().ct_eq(b.as_bytes()).into()
}

fn is_bcrypt_hash(s: &str) -> bool {
    s.starts_with("$2a$") || s.starts_with("$2b$") || s.starts_with("$2y$")
}

fn verify_password(password: &str, password_hash: &str) -> bool {
    if is_bcrypt_hash(password_hash) {
        bcrypt::verify(password, password_hash).unwrap_or(false)
    } else {
        constant_time_eq(password, password_hash)
    }
}

fn bearer_token_from(headers: &HeaderMap) -> Option<&str> {
    headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?.strip_prefix("Bearer ")
}

fn basic_credentials_from(headers: &HeaderMap) -> Option<(String, String)> {
    let header = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

/// Verifies the request's `Authorization` header against `auth`.
/// `WebhookAuth::None` admits every request without inspecting headers.
pub fn verify(auth: &WebhookAuth, headers: &HeaderMap) -> AuthVerdict {
    match auth {
        WebhookAuth::None => AuthVerdict::Allowed,
        WebhookAuth::Bearer { token } => {
            let Some(presented) = bearer_token_from(headers) else {
                return AuthVerdict::MissingCredentials;
            };
            if constant_time_eq(presented, token) {
                AuthVerdict::Allowed
            } else {
                AuthVerdict::Rejected
            }
        }
        WebhookAuth::Basic(config) => {
            let Some((username, password)) = basic_credentials_from(headers) else {
                return AuthVerdict::MissingCredentials;
            };
            if !constant_time_eq(&username, &config.username) {
                return AuthVerdict::Rejected;
            }
            if verify_password(&password, &config.password_hash) {
                AuthVerdict::Allowed
            } else {
                AuthVerdict::Rejected
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with_basic(username: &str, password: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"));
        headers.insert(axum::http::header::AUTHORIZATION, format!("Basic {encoded}").parse().unwrap());
        headers
    }

    fn headers_with_bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, format!("Bearer {token}").parse().unwrap());
        headers
    }

    #[test]
    fn none_allows_every_request() {
        assert_eq!(verify(&WebhookAuth::None, &HeaderMap::new()), AuthVerdict::Allowed);
    }

    #[test]
    fn bearer_accepts_matching_token() {
        let auth = WebhookAuth::Bearer { token: "s3cret".into() };
        assert_eq!(verify(&auth, &headers_with_bearer("s3cret")), AuthVerdict::Allowed);
    }

    #[test]
    fn bearer_rejects_wrong_token() {
        let auth = WebhookAuth::Bearer { token: "s3cret".into() };
        assert_eq!(verify(&auth, &headers_with_bearer("wrong")), AuthVerdict::Rejected);
    }

    #[test]
    fn bearer_missing_header_is_missing_credentials() {
        let auth = WebhookAuth::Bearer { token: "s3cret".into() };
        assert_eq!(verify(&auth, &HeaderMap::new()), AuthVerdict::MissingCredentials);
    }

    #[test]
    fn basic_missing_header_is_missing_credentials() {
        let auth = WebhookAuth::Basic(BasicAuthConfig { username: "zen".into(), password_hash: bcrypt::hash("secret", 4).unwrap() });
        assert_eq!(verify(&auth, &HeaderMap::new()), AuthVerdict::MissingCredentials);
    }

    #[test]
    fn basic_bcrypt_hash_accepts_correct_password() {
        let auth = WebhookAuth::Basic(BasicAuthConfig { username: "zen".into(), password_hash: bcrypt::hash("secret", 4).unwrap() });
        assert_eq!(verify(&auth, &headers_with_basic("zen", "secret")), AuthVerdict::Allowed);
    }

    #[test]
    fn basic_bcrypt_hash_rejects_wrong_password() {
        let auth = WebhookAuth::Basic(BasicAuthConfig { username: "zen".into(), password_hash: bcrypt::hash("secret", 4).unwrap() });
        assert_eq!(verify(&auth, &headers_with_basic("zen", "wrong")), AuthVerdict::Rejected);
    }

    #[test]
    fn basic_plaintext_migration_mode_accepts_matching_string() {
        let auth = WebhookAuth::Basic(BasicAuthConfig { username: "zen".into(), password_hash: "plain-secret".into() });
        assert_eq!(verify(&auth, &headers_with_basic("zen", "plain-secret")), AuthVerdict::Allowed);
    }

    #[test]
    fn basic_plaintext_migration_mode_rejects_wrong_string() {
        let auth = WebhookAuth::Basic(BasicAuthConfig { username: "zen".into(), password_hash: "plain-secret".into() });
        assert_eq!(verify(&auth, &headers_with_basic("zen", "wrong")), AuthVerdict::Rejected);
    }

    #[test]
    fn basic_wrong_username_is_rejected() {
        let auth = WebhookAuth::Basic(BasicAuthConfig { username: "zen".into(), password_hash: bcrypt::hash("secret", 4).unwrap() });
        assert_eq!(verify(&auth, &headers_with_basic("other", "secret")), AuthVerdict::Rejected);
    }
}
