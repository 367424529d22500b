use axum::http::{header, HeaderMap};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::SecurityConfig;

/// Header carrying the session/API credential
pub const AUTH_TOKEN_HEADER: &str = "x-auth-token";

/// Body field carrying the nested action token
pub const ACTION_TOKEN_FIELD: &str = "request";

/// Claims of the outer credential
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(rename = "isWebsiteKey", default)]
    pub is_website_key: bool,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn new(user_id: impl Into<String>, username: Option<String>, is_website_key: bool, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            username,
            is_website_key,
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
        }
    }
}

/// Claims of a short-lived action token. Anything beyond `iat`/`exp` is
/// carried through to handlers untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl ActionClaims {
    pub fn issued_at(iat: DateTime<Utc>) -> Self {
        Self {
            iat: Some(iat.timestamp()),
            exp: None,
            payload: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustClass {
    WebsiteSession { origin: String },
    ApiKey,
}

/// Per-request caller identity, never persisted
#[derive(Debug, Clone)]
pub struct Identity {
    pub subject_id: String,
    pub username: Option<String>,
    pub trust: TrustClass,
    pub action: Option<ActionClaims>,
}

/// Whether an endpoint insists on a fresh action token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionPolicy {
    Optional,
    Required,
}

#[derive(Debug, Error, PartialEq)]
pub enum AuthError {
    #[error("No token, authorization denied")]
    MissingToken,

    #[error("Token has expired")]
    Expired,

    #[error("Token is not valid")]
    InvalidToken,

    #[error("Origin '{0}' is not allowed for website sessions")]
    OriginNotAllowed(String),

    #[error("Invalid action token")]
    InvalidActionToken,

    #[error("Stale or invalid timestamp in action token")]
    StaleActionToken,

    #[error("Action token has already been used")]
    ReplayedActionToken,

    #[error("This operation requires an action token")]
    ActionTokenRequired,

    #[error("Token signing is not configured")]
    NotConfigured,

    #[error("Token generation error: {0}")]
    TokenGeneration(String),
}

impl AuthError {
    /// 403 rather than 401: the caller is known but the request is refused
    pub fn is_forbidden(&self) -> bool {
        matches!(
            self,
            AuthError::OriginNotAllowed(_)
                | AuthError::InvalidActionToken
                | AuthError::StaleActionToken
                | AuthError::ReplayedActionToken
                | AuthError::ActionTokenRequired
        )
    }
}

/// Sign any claim set with HS256
pub fn encode_token<T: Serialize>(claims: &T, secret: &str) -> Result<String, AuthError> {
    if secret.is_empty() {
        return Err(AuthError::NotConfigured);
    }
    encode(&Header::new(Algorithm::HS256), claims, &EncodingKey::from_secret(secret.as_bytes()))
        .map_err(|e| AuthError::TokenGeneration(e.to_string()))
}

/// Credential from `x-auth-token`, falling back to `Authorization: Bearer`
pub fn credential_from_headers(headers: &HeaderMap) -> Option<String> {
    let direct = headers
        .get(AUTH_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(token) = direct {
        return Some(token.to_string());
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Remembers the digests of accepted action tokens until their freshness
/// window has passed. `capacity` is a soft bound: only expired entries are
/// ever dropped, so a live token stays rejected even when the cache overflows.
pub struct ReplayGuard {
    seen: Mutex<LruCache<[u8; 32], i64>>,
    capacity: usize,
}

impl ReplayGuard {
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: Mutex::new(LruCache::unbounded()),
            capacity: capacity.max(1),
        }
    }

    /// Record `token` as used until `expires_at`; fails if it already is
    pub fn claim(&self, token: &str, now: i64, expires_at: i64) -> Result<(), AuthError> {
        let digest: [u8; 32] = Sha256::digest(token.as_bytes()).into();
        let mut seen = self.seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(&until) = seen.peek(&digest) {
            if until >= now {
                return Err(AuthError::ReplayedActionToken);
            }
        }
        seen.put(digest, expires_at);

        if seen.len() > self.capacity {
            Self::purge_expired(&mut seen, now);
            if seen.len() > self.capacity {
                warn!(
                    "Replay cache over capacity ({} > {}): every entry is still live",
                    seen.len(),
                    self.capacity
                );
            }
        }
        Ok(())
    }

    fn purge_expired(seen: &mut LruCache<[u8; 32], i64>, now: i64) {
        let expired: Vec<[u8; 32]> = seen
            .iter()
            .filter(|&(_, &until)| until < now)
            .map(|(digest, _)| *digest)
            .collect();
        for digest in expired {
            seen.pop(&digest);
        }
    }
}

/// Verifies credentials and action tokens for every protected request
pub struct AccessGate {
    decoding: DecodingKey,
    website_origins: Vec<String>,
    window_secs: i64,
    replay: Option<ReplayGuard>,
}

impl AccessGate {
    pub fn new(security: &SecurityConfig) -> Result<Self, AuthError> {
        if security.jwt_secret.is_empty() {
            return Err(AuthError::NotConfigured);
        }
        Ok(Self {
            decoding: DecodingKey::from_secret(security.jwt_secret.as_bytes()),
            website_origins: security.website_origins.clone(),
            window_secs: security.action_token_window_secs,
            replay: security
                .action_token_single_use
                .then(|| ReplayGuard::new(security.replay_cache_capacity)),
        })
    }

    /// Verify the outer credential and classify the caller
    pub fn authenticate(&self, token: Option<&str>, origin: Option<&str>) -> Result<Identity, AuthError> {
        let token = token.ok_or(AuthError::MissingToken)?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        let claims = decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken,
            })?
            .claims;

        let trust = if claims.is_website_key {
            let origin = origin.unwrap_or_default();
            if !self.website_origins.iter().any(|allowed| allowed == origin) {
                warn!("Website session for {} rejected from origin '{}'", claims.user_id, origin);
                return Err(AuthError::OriginNotAllowed(origin.to_string()));
            }
            TrustClass::WebsiteSession {
                origin: origin.to_string(),
            }
        } else {
            TrustClass::ApiKey
        };

        debug!("Authenticated {} as {:?}", claims.user_id, trust);
        Ok(Identity {
            subject_id: claims.user_id,
            username: claims.username,
            trust,
            action: None,
        })
    }

    /// Verify a nested action token against `now`: signature, expiry if
    /// present, an `iat` inside the freshness window, and first use
    pub fn verify_action(&self, token: &str, now: DateTime<Utc>) -> Result<ActionClaims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.required_spec_claims.clear();

        let claims = decode::<ActionClaims>(token, &self.decoding, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::StaleActionToken,
                _ => AuthError::InvalidActionToken,
            })?
            .claims;

        let now = now.timestamp();
        let iat = claims.iat.ok_or(AuthError::StaleActionToken)?;
        let age = now - iat;
        if age < 0 || age > self.window_secs {
            debug!("Action token rejected, age {}s", age);
            return Err(AuthError::StaleActionToken);
        }

        if let Some(replay) = &self.replay {
            replay.claim(token, now, iat + self.window_secs)?;
        }
        Ok(claims)
    }

    /// Apply the endpoint's action policy to an authenticated identity
    pub fn authorize_action(
        &self,
        identity: &mut Identity,
        token: Option<&str>,
        policy: ActionPolicy,
        now: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        match (token, policy) {
            (Some(token), _) => {
                identity.action = Some(self.verify_action(token, now)?);
                Ok(())
            }
            (None, ActionPolicy::Optional) => Ok(()),
            (None, ActionPolicy::Required) => Err(AuthError::ActionTokenRequired),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const SECRET: &str = "test-secret";

    fn security() -> SecurityConfig {
        SecurityConfig {
            jwt_secret: SECRET.to_string(),
            website_origins: vec!["https://app.example.com".to_string()],
            action_token_window_secs: 300,
            action_token_single_use: true,
            replay_cache_capacity: 16,
            enable_cors: false,
            cors_origins: vec![],
        }
    }

    fn gate() -> AccessGate {
        AccessGate::new(&security()).unwrap()
    }

    fn token(is_website_key: bool) -> String {
        let claims = Claims::new("u-1", Some("ada".to_string()), is_website_key, Duration::hours(1));
        encode_token(&claims, SECRET).unwrap()
    }

    fn action_token(iat: DateTime<Utc>) -> String {
        encode_token(&ActionClaims::issued_at(iat), SECRET).unwrap()
    }

    #[test]
    fn api_keys_skip_origin_checks() {
        let identity = gate().authenticate(Some(&token(false)), None).unwrap();
        assert_eq!(identity.trust, TrustClass::ApiKey);
        assert_eq!(identity.subject_id, "u-1");
        assert_eq!(identity.username.as_deref(), Some("ada"));
    }

    #[test]
    fn website_sessions_require_an_allowed_origin() {
        let gate = gate();
        let identity = gate
            .authenticate(Some(&token(true)), Some("https://app.example.com"))
            .unwrap();
        assert_eq!(
            identity.trust,
            TrustClass::WebsiteSession {
                origin: "https://app.example.com".to_string()
            }
        );

        let err = gate.authenticate(Some(&token(true)), Some("https://evil.example")).unwrap_err();
        assert!(err.is_forbidden());
        assert!(matches!(gate.authenticate(Some(&token(true)), None), Err(AuthError::OriginNotAllowed(_))));
    }

    #[test]
    fn rejects_missing_expired_and_forged_tokens() {
        let gate = gate();
        assert_eq!(gate.authenticate(None, None).unwrap_err(), AuthError::MissingToken);

        let mut expired = Claims::new("u-1", None, false, Duration::hours(1));
        expired.exp = Utc::now().timestamp() - 10;
        let expired = encode_token(&expired, SECRET).unwrap();
        assert_eq!(gate.authenticate(Some(&expired), None).unwrap_err(), AuthError::Expired);

        let forged = encode_token(&Claims::new("u-1", None, false, Duration::hours(1)), "other").unwrap();
        assert_eq!(gate.authenticate(Some(&forged), None).unwrap_err(), AuthError::InvalidToken);
    }

    #[test]
    fn action_token_freshness_window() {
        let gate = gate();
        let now = Utc::now();

        assert!(gate.verify_action(&action_token(now - Duration::seconds(299)), now).is_ok());
        assert_eq!(
            gate.verify_action(&action_token(now - Duration::seconds(301)), now),
            Err(AuthError::StaleActionToken)
        );
        assert_eq!(
            gate.verify_action(&action_token(now + Duration::seconds(5)), now),
            Err(AuthError::StaleActionToken)
        );

        let no_iat = encode_token(&serde_json::json!({ "op": "drop" }), SECRET).unwrap();
        assert_eq!(gate.verify_action(&no_iat, now), Err(AuthError::StaleActionToken));
    }

    #[test]
    fn action_tokens_are_single_use() {
        let gate = gate();
        let now = Utc::now();
        let token = action_token(now);

        assert!(gate.verify_action(&token, now).is_ok());
        assert_eq!(gate.verify_action(&token, now), Err(AuthError::ReplayedActionToken));

        let mut reusable = security();
        reusable.action_token_single_use = false;
        let gate = AccessGate::new(&reusable).unwrap();
        assert!(gate.verify_action(&token, now).is_ok());
        assert!(gate.verify_action(&token, now).is_ok());
    }

    #[test]
    fn replay_cache_overflow_keeps_live_tokens() {
        let guard = ReplayGuard::new(2);
        for token in ["a", "b", "c"] {
            guard.claim(token, 1_000, 1_300).unwrap();
        }
        assert_eq!(guard.claim("a", 1_100, 1_400), Err(AuthError::ReplayedActionToken));
        assert_eq!(guard.seen.lock().unwrap().len(), 3);

        // Once their windows pass, entries are purged on the next overflow
        guard.claim("d", 1_301, 1_601).unwrap();
        assert_eq!(guard.seen.lock().unwrap().len(), 1);
        guard.claim("a", 1_302, 1_602).unwrap();
    }

    #[test]
    fn action_payload_is_preserved() {
        let now = Utc::now();
        let mut claims = ActionClaims::issued_at(now);
        claims.payload.insert("op".to_string(), Value::String("drop".to_string()));
        let token = encode_token(&claims, SECRET).unwrap();

        let verified = gate().verify_action(&token, now).unwrap();
        assert_eq!(verified.payload.get("op"), Some(&Value::String("drop".to_string())));
    }

    #[test]
    fn required_policy_needs_a_token() {
        let gate = gate();
        let mut identity = gate.authenticate(Some(&token(false)), None).unwrap();
        assert_eq!(
            gate.authorize_action(&mut identity, None, ActionPolicy::Required, Utc::now()),
            Err(AuthError::ActionTokenRequired)
        );
        assert!(gate
            .authorize_action(&mut identity, None, ActionPolicy::Optional, Utc::now())
            .is_ok());
    }

    #[test]
    fn reads_credentials_from_either_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(credential_from_headers(&headers).as_deref(), Some("abc"));

        headers.insert(AUTH_TOKEN_HEADER, HeaderValue::from_static("xyz"));
        assert_eq!(credential_from_headers(&headers).as_deref(), Some("xyz"));
    }
}
