//! Transport retry policy and anti-forgery token handling against a
//! scripted local server.

mod common;

use secrecy::SecretString;
use std::sync::{Arc, Mutex};

use common::{Scripted, ScriptedServer};
use resale_sniper::auth::AuthSession;
use resale_sniper::http::endpoints::Endpoints;
use resale_sniper::http::normalizer::NormalizedBody;
use resale_sniper::http::{ApiRequest, TokenSink, Transport};
use resale_sniper::types::{Channel, SniperError, TransportError};

#[derive(Default)]
struct RecordingSink {
    tokens: Mutex<Vec<String>>,
}

impl TokenSink for RecordingSink {
    fn store_csrf_token(&self, token: &str) {
        self.tokens.lock().unwrap().push(token.to_string());
    }
}

fn transport() -> Transport {
    Transport::new(Channel::Local).unwrap()
}

#[tokio::test]
async fn test_network_error_then_success() {
    let server = ScriptedServer::start(vec![
        Scripted::Hangup,
        Scripted::status(200, r#"{"id": 42, "name": "buyer"}"#),
    ])
    .await;

    let req = ApiRequest::get(server.url("/v1/users/authenticated")).attempts(2);
    let envelope = transport().send(req).await.unwrap();

    assert_eq!(envelope.status, 200);
    assert_eq!(envelope.attempts, 2);
    assert_eq!(server.requests().len(), 2);
    let Some(NormalizedBody::Identity(info)) = envelope.body else {
        panic!("expected identity body");
    };
    assert_eq!(info.id, Some(42));
}

#[tokio::test]
async fn test_403_rotates_token_and_retries() {
    let server = ScriptedServer::start(vec![
        Scripted::with_header(403, "x-csrf-token", "fresh", ""),
        Scripted::status(200, r#"{"purchased": true}"#),
    ])
    .await;

    let sink = Arc::new(RecordingSink::default());
    let req = ApiRequest::post(server.url("/marketplace-sales/v1/item/c1/purchase-resale"))
        .csrf_token(Some("stale".into()))
        .token_sink(Arc::clone(&sink) as Arc<dyn TokenSink>)
        .json(serde_json::json!({"expectedPrice": 10}))
        .attempts(2);

    let envelope = transport().send(req).await.unwrap();
    assert_eq!(envelope.status, 200);
    assert_eq!(envelope.attempts, 2);

    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].header("x-csrf-token"), Some("stale"));
    assert_eq!(requests[1].header("x-csrf-token"), Some("fresh"));
    assert!(requests[1].body.contains("expectedPrice"));
    assert_eq!(*sink.tokens.lock().unwrap(), vec!["fresh".to_string()]);
}

#[tokio::test]
async fn test_401_is_returned_without_retry() {
    let server = ScriptedServer::start(vec![
        Scripted::status(401, r#"{"verificationToken": "v-1"}"#),
        Scripted::status(200, "{}"),
    ])
    .await;

    let req = ApiRequest::post(server.url("/marketplace-sales/v1/item/c1/purchase-resale"))
        .attempts(3);
    let envelope = transport().send(req).await.unwrap();

    assert_eq!(envelope.status, 401);
    assert_eq!(envelope.attempts, 1);
    assert_eq!(server.requests().len(), 1);
    assert!(envelope.is_challenge());
    match &envelope.body {
        Some(NormalizedBody::Challenge(info)) => {
            assert_eq!(info.verification_token.as_deref(), Some("v-1"))
        }
        other => panic!("expected challenge body, got {other:?}"),
    }
    assert!(matches!(
        envelope.into_body(),
        Err(SniperError::ChallengeRequired { .. })
    ));
}

#[tokio::test]
async fn test_server_errors_exhaust_attempts() {
    let server = ScriptedServer::start(vec![
        Scripted::status(500, "boom"),
        Scripted::status(500, "boom again"),
    ])
    .await;

    let req = ApiRequest::get(server.url("/v1/users/1/currency")).attempts(2);
    let err = transport().send(req).await.unwrap_err();

    match err {
        TransportError::Exhausted { attempts, last, .. } => {
            assert_eq!(attempts, 2);
            assert!(last.contains("HTTP 500"), "last error was {last}");
            assert!(last.contains("boom again"));
        }
        other => panic!("expected exhausted, got {other:?}"),
    }
    assert_eq!(server.requests().len(), 2);
}

#[tokio::test]
async fn test_non_json_body_is_unusable_but_kept_as_text() {
    let server = ScriptedServer::start(vec![Scripted::status(200, "<html>maintenance</html>")]).await;

    let req = ApiRequest::post(server.url("/v1/catalog/items/details"));
    let envelope = transport().send(req).await.unwrap();

    assert_eq!(envelope.status, 200);
    assert!(envelope.body.is_none());
    assert_eq!(envelope.excerpt().as_deref(), Some("<html>maintenance</html>"));
}

#[tokio::test]
async fn test_cookie_header_carries_credential() {
    let server = ScriptedServer::start(vec![Scripted::status(200, r#"{"robux": 5}"#)]).await;

    let cookie = SecretString::new("secret-value".to_string());
    let req = ApiRequest::get(server.url("/v1/users/1/currency")).cookie(&cookie);
    transport().send(req).await.unwrap();

    let requests = server.requests();
    assert_eq!(requests[0].method, "GET");
    assert_eq!(
        requests[0].header("cookie"),
        Some(".ROBLOSECURITY=secret-value")
    );
}

#[tokio::test]
async fn test_session_token_bootstrapped_once() {
    let server = ScriptedServer::start(vec![Scripted::with_header(
        403,
        "x-csrf-token",
        "boot-token",
        r#"{"errors": [{"message": "Token Validation Failed"}]}"#,
    )])
    .await;

    let session = AuthSession::new(
        SecretString::new("secret".to_string()),
        Arc::new(transport()),
        Arc::new(Endpoints::single_host(&server.base)),
    );

    assert_eq!(session.csrf_token().await.as_deref(), Some("boot-token"));
    assert_eq!(session.csrf_token().await.as_deref(), Some("boot-token"));

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].path, "/v2/logout");
}
