//! Authenticated, retrying HTTP transport.
//!
//! One `Transport` exists per outbound channel, because a proxy is a
//! property of the underlying `reqwest::Client`. Every call returns a
//! `ResponseEnvelope` whose body has already been through the normalizer.
//!
//! Retry policy:
//! - success codes (default 200/201/204) return immediately;
//! - 401 returns immediately with a challenge-normalized body;
//! - 403 carrying `x-csrf-token` stores the token and retries at once,
//!   without a backoff sleep, consuming one attempt;
//! - anything else (other statuses, network errors) backs off
//!   `200ms + step * 100ms + jitter` and retries until attempts run out.

pub mod endpoints;
pub mod normalizer;

use rand::Rng;
use reqwest::header::{HeaderMap, ACCEPT, COOKIE};
use reqwest::{Client, Method};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::types::{Channel, SniperError, TransportError};
use normalizer::{NormalizedBody, CHALLENGE_SUFFIX};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) resale-sniper/0.1";
const ACCEPT_VALUE: &str = "application/json, text/plain, */*";

/// Cookie carrying the account credential.
pub const CREDENTIAL_COOKIE: &str = ".ROBLOSECURITY";
/// Anti-forgery header, both sent and received.
pub const CSRF_HEADER: &str = "x-csrf-token";

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_SUCCESS_CODES: [u16; 3] = [200, 201, 204];

const REQUEST_TIMEOUT_SECS: u64 = 30;
const BASE_BACKOFF_MS: u64 = 200;
const BACKOFF_STEP_MS: u64 = 100;
const BACKOFF_JITTER_MS: u64 = 50;

/// Longest raw-text excerpt kept in error messages.
const ERROR_EXCERPT_CHARS: usize = 200;

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Receives anti-forgery tokens learned from responses.
pub trait TokenSink: Send + Sync {
    fn store_csrf_token(&self, token: &str);
}

/// A single logical call, possibly executed over several attempts.
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    pub cookie: Option<SecretString>,
    pub csrf_token: Option<String>,
    pub max_attempts: u32,
    pub success_codes: Vec<u16>,
    pub token_sink: Option<Arc<dyn TokenSink>>,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            cookie: None,
            csrf_token: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            success_codes: DEFAULT_SUCCESS_CODES.to_vec(),
            token_sink: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn cookie(mut self, cookie: &SecretString) -> Self {
        self.cookie = Some(cookie.clone());
        self
    }

    pub fn csrf_token(mut self, token: Option<String>) -> Self {
        self.csrf_token = token;
        self
    }

    pub fn attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn success_codes(mut self, codes: &[u16]) -> Self {
        self.success_codes = codes.to_vec();
        self
    }

    pub fn token_sink(mut self, sink: Arc<dyn TokenSink>) -> Self {
        self.token_sink = Some(sink);
        self
    }
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// Headers the sniper cares about, plus the full map.
#[derive(Debug, Clone, Default)]
pub struct ResponseHeaders {
    pub csrf_token: Option<String>,
    pub challenge_id: Option<String>,
    pub challenge_type: Option<String>,
    pub challenge_metadata: Option<String>,
    pub raw: HeaderMap,
}

impl ResponseHeaders {
    fn from_map(map: &HeaderMap) -> Self {
        let get = |name: &str| {
            map.get(name)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        Self {
            csrf_token: get(CSRF_HEADER),
            challenge_id: get("rblx-challenge-id"),
            challenge_type: get("rblx-challenge-type"),
            challenge_metadata: get("rblx-challenge-metadata"),
            raw: map.clone(),
        }
    }
}

/// Completed call: status, headers, normalized body and raw text.
#[derive(Debug, Clone)]
pub struct ResponseEnvelope {
    pub url: String,
    pub status: u16,
    pub headers: ResponseHeaders,
    /// `None` when the body was empty, not JSON, or malformed for its endpoint.
    pub body: Option<NormalizedBody>,
    pub text: String,
    /// Attempts consumed, including token-rotation retries.
    pub attempts: u32,
}

impl ResponseEnvelope {
    /// 401: an out-of-band verification challenge is required.
    pub fn is_challenge(&self) -> bool {
        self.status == 401
    }

    /// The normalized body, or the reason it cannot be used.
    pub fn into_body(self) -> Result<NormalizedBody, SniperError> {
        if self.is_challenge() {
            return Err(SniperError::ChallengeRequired { endpoint: self.url });
        }
        self.body
            .ok_or(SniperError::UnusableBody { endpoint: self.url })
    }

    /// Short excerpt of the raw text for logs and error messages.
    pub fn excerpt(&self) -> Option<String> {
        if self.text.trim().is_empty() {
            None
        } else {
            Some(excerpt(&self.text, ERROR_EXCERPT_CHARS))
        }
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Outcome of one attempt.
enum Attempt {
    Done(ResponseEnvelope),
    TokenRotated(String),
    Failed(String),
}

/// HTTP executor bound to one channel.
pub struct Transport {
    http: Client,
    channel: Channel,
}

impl Transport {
    pub fn new(channel: Channel) -> Result<Self, TransportError> {
        let mut builder = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(USER_AGENT);

        builder = match channel.proxy_url() {
            Some(url) => {
                let proxy = reqwest::Proxy::all(url)
                    .map_err(|e| TransportError::Client(format!("invalid proxy {channel}: {e}")))?;
                builder.proxy(proxy)
            }
            None => builder.no_proxy(),
        };

        let http = builder
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;

        Ok(Self { http, channel })
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Execute `req`, retrying per the module policy.
    pub async fn send(&self, mut req: ApiRequest) -> Result<ResponseEnvelope, TransportError> {
        let max_attempts = req.max_attempts.max(1);
        let mut last_error = String::from("no attempt made");
        let mut backoff_step: u32 = 0;

        for attempt in 1..=max_attempts {
            match self.attempt_once(&req, attempt).await {
                Attempt::Done(envelope) => {
                    if let (Some(token), Some(sink)) =
                        (envelope.headers.csrf_token.as_deref(), req.token_sink.as_ref())
                    {
                        sink.store_csrf_token(token);
                    }
                    return Ok(envelope);
                }
                Attempt::TokenRotated(token) => {
                    debug!(
                        url = %req.url,
                        channel = %self.channel,
                        attempt,
                        "Anti-forgery token rotated, retrying immediately"
                    );
                    if let Some(sink) = req.token_sink.as_ref() {
                        sink.store_csrf_token(&token);
                    }
                    req.csrf_token = Some(token);
                    last_error = format!("HTTP 403 with rotated token on attempt {attempt}");
                    continue;
                }
                Attempt::Failed(reason) => {
                    warn!(
                        method = %req.method,
                        url = %req.url,
                        channel = %self.channel,
                        attempt,
                        max_attempts,
                        error = %reason,
                        "Request attempt failed"
                    );
                    last_error = reason;
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(backoff_delay(backoff_step)).await;
                backoff_step += 1;
            }
        }

        Err(TransportError::Exhausted {
            method: req.method.to_string(),
            url: req.url,
            attempts: max_attempts,
            last: last_error,
        })
    }

    async fn attempt_once(&self, req: &ApiRequest, attempt: u32) -> Attempt {
        let mut builder = self
            .http
            .request(req.method.clone(), &req.url)
            .header(ACCEPT, ACCEPT_VALUE);

        for (name, value) in &req.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(cookie) = &req.cookie {
            builder = builder.header(
                COOKIE,
                format!("{CREDENTIAL_COOKIE}={}", cookie.expose_secret()),
            );
        }
        if let Some(token) = &req.csrf_token {
            builder = builder.header(CSRF_HEADER, token.as_str());
        }
        if let Some(body) = &req.body {
            builder = builder.json(body);
        }

        let resp = match builder.send().await {
            Ok(resp) => resp,
            Err(e) => return Attempt::Failed(format!("network error: {e}")),
        };

        let status = resp.status().as_u16();
        let headers = ResponseHeaders::from_map(resp.headers());

        if status == 403 && !req.success_codes.contains(&403) {
            if let Some(token) = headers.csrf_token.clone() {
                return Attempt::TokenRotated(token);
            }
        }

        let is_success = req.success_codes.contains(&status);
        if !is_success && status != 401 {
            let text = resp.text().await.unwrap_or_default();
            return Attempt::Failed(format!(
                "HTTP {status}: {}",
                excerpt(&text, ERROR_EXCERPT_CHARS)
            ));
        }

        let bytes = match resp.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => return Attempt::Failed(format!("failed to read body: {e}")),
        };
        let (json, text) = parse_body(&bytes);

        let normalize_as = if is_success {
            req.url.clone()
        } else {
            challenge_endpoint(&req.url)
        };

        Attempt::Done(ResponseEnvelope {
            url: req.url.clone(),
            status,
            headers,
            body: normalizer::normalize(&normalize_as, json),
            text,
            attempts: attempt,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Parse a body as JSON: raw bytes first, then BOM-stripped trimmed text,
/// else `null`.
fn parse_body(bytes: &[u8]) -> (Value, String) {
    let text = String::from_utf8_lossy(bytes).into_owned();
    let json = serde_json::from_slice(bytes)
        .or_else(|_| serde_json::from_str(text.trim_start_matches('\u{feff}').trim()))
        .unwrap_or(Value::Null);
    (json, text)
}

/// Endpoint used to normalize a 401 body.
fn challenge_endpoint(url: &str) -> String {
    let path = url.split(|c: char| c == '?' || c == '#').next().unwrap_or(url);
    format!("{}{CHALLENGE_SUFFIX}", path.trim_end_matches('/'))
}

fn backoff_delay(step: u32) -> Duration {
    let jitter = rand::thread_rng().gen_range(0..BACKOFF_JITTER_MS);
    Duration::from_millis(BASE_BACKOFF_MS + u64::from(step) * BACKOFF_STEP_MS + jitter)
}

/// First `max_chars` characters, with an ellipsis when truncated.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        trimmed.to_string()
    } else {
        let head: String = trimmed.chars().take(max_chars).collect();
        format!("{head}...")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_body_fast_path() {
        let (json, text) = parse_body(br#"{"a": 1}"#);
        assert_eq!(json, json!({"a": 1}));
        assert_eq!(text, r#"{"a": 1}"#);
    }

    #[test]
    fn test_parse_body_bom_fallback() {
        let (json, _) = parse_body("\u{feff}  [1, 2]  ".as_bytes());
        assert_eq!(json, json!([1, 2]));
    }

    #[test]
    fn test_parse_body_garbage_is_null() {
        let (json, text) = parse_body(b"<html>nope</html>");
        assert!(json.is_null());
        assert_eq!(text, "<html>nope</html>");

        let (json, _) = parse_body(b"");
        assert!(json.is_null());
    }

    #[test]
    fn test_challenge_endpoint_drops_query() {
        assert_eq!(
            challenge_endpoint("https://h/marketplace-sales/v1/item/x/resellers?limit=1"),
            "https://h/marketplace-sales/v1/item/x/resellers/challenges/authenticator/verify"
        );
        assert_eq!(
            normalizer::EndpointKind::classify(&challenge_endpoint("https://h/v1/items/details")),
            normalizer::EndpointKind::Challenge
        );
    }

    #[test]
    fn test_backoff_grows_with_step() {
        for step in 0..4u32 {
            let d = backoff_delay(step).as_millis() as u64;
            let floor = BASE_BACKOFF_MS + u64::from(step) * BACKOFF_STEP_MS;
            assert!(d >= floor && d < floor + BACKOFF_JITTER_MS, "step {step}: {d}ms");
        }
    }

    #[test]
    fn test_excerpt_truncates_on_char_boundary() {
        assert_eq!(excerpt("  short  ", 10), "short");
        let long = "é".repeat(300);
        let ex = excerpt(&long, 200);
        assert!(ex.ends_with("..."));
        assert_eq!(ex.chars().count(), 203);
    }

    #[test]
    fn test_request_builder_defaults() {
        let req = ApiRequest::post("https://h/x").attempts(0);
        assert_eq!(req.max_attempts, 1);
        assert_eq!(req.success_codes, vec![200, 201, 204]);
        assert!(req.csrf_token.is_none());
        assert_eq!(req.method, Method::POST);
    }

    #[test]
    fn test_envelope_into_body() {
        let env = ResponseEnvelope {
            url: "https://h/v1/users/authenticated".into(),
            status: 401,
            headers: ResponseHeaders::default(),
            body: None,
            text: String::new(),
            attempts: 1,
        };
        assert!(matches!(
            env.clone().into_body(),
            Err(SniperError::ChallengeRequired { .. })
        ));

        let env = ResponseEnvelope { status: 200, ..env };
        assert!(matches!(env.into_body(), Err(SniperError::UnusableBody { .. })));
    }

    #[test]
    fn test_local_transport_builds() {
        let t = Transport::new(Channel::Local).unwrap();
        assert_eq!(t.channel(), &Channel::Local);
    }

    #[test]
    fn test_invalid_proxy_rejected() {
        let err = Transport::new(Channel::Proxy("::not a url::".into()));
        assert!(matches!(err, Err(TransportError::Client(_))));
    }
}
