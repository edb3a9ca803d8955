//! Buy executor.
//!
//! Submits a `BuyOrder` to the resale purchase endpoint and classifies the
//! answer as bought, pending or rejected. A purchase is never retried here;
//! the next poll cycle re-evaluates from a fresh quote.

use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::auth::AuthSession;
use crate::http::endpoints::Endpoints;
use crate::http::normalizer::NormalizedBody;
use crate::http::{excerpt, ApiRequest, ResponseEnvelope, TokenSink, Transport};
use crate::telemetry::{Severity, Telemetry};
use crate::types::{BuyOrder, PurchaseOutcome, SniperError};

/// Longest raw-text excerpt used as a rejection reason.
const REASON_EXCERPT_CHARS: usize = 200;

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum BuyOutcome {
    Bought(PurchaseOutcome),
    /// Accepted but not settled. Counted as a failed buy.
    Pending(PurchaseOutcome),
    Rejected(String),
}

impl BuyOutcome {
    pub fn is_bought(&self) -> bool {
        matches!(self, BuyOutcome::Bought(_))
    }

    /// The rejection as a domain error, for callers that propagate.
    pub fn into_result(self) -> Result<PurchaseOutcome, SniperError> {
        match self {
            BuyOutcome::Bought(outcome) => Ok(outcome),
            BuyOutcome::Pending(_) => Err(SniperError::BuyRejected("purchase pending".into())),
            BuyOutcome::Rejected(reason) => Err(SniperError::BuyRejected(reason)),
        }
    }
}

/// Classify a completed purchase call.
pub fn classify_response(envelope: ResponseEnvelope) -> BuyOutcome {
    let raw_reason = envelope.excerpt();
    let endpoint = envelope.url.clone();

    match envelope.into_body() {
        Ok(NormalizedBody::Purchase(outcome)) if outcome.purchased => BuyOutcome::Bought(outcome),
        Ok(NormalizedBody::Purchase(outcome)) if outcome.pending => BuyOutcome::Pending(outcome),
        Ok(NormalizedBody::Purchase(outcome)) => {
            let reason = outcome
                .error_message
                .clone()
                .filter(|m| !m.trim().is_empty())
                .or_else(|| outcome.purchase_result.as_ref().and_then(error_from_json))
                .or(raw_reason)
                .unwrap_or_else(|| "unknown".to_string());
            BuyOutcome::Rejected(reason)
        }
        Ok(NormalizedBody::Raw(value)) => BuyOutcome::Rejected(
            error_from_json(&value)
                .or(raw_reason)
                .unwrap_or_else(|| "unknown".to_string()),
        ),
        Ok(_) => BuyOutcome::Rejected(
            SniperError::UnusableBody { endpoint }.to_string(),
        ),
        Err(e @ SniperError::ChallengeRequired { .. }) => BuyOutcome::Rejected(e.to_string()),
        Err(_) => BuyOutcome::Rejected(raw_reason.unwrap_or_else(|| "unknown".to_string())),
    }
}

/// Known error fields: `errorMessage`, `error_message`, `message`,
/// `errors[0].message`.
pub fn error_from_json(value: &Value) -> Option<String> {
    ["errorMessage", "error_message", "message"]
        .iter()
        .filter_map(|k| value.get(*k).and_then(Value::as_str))
        .chain(
            value
                .get("errors")
                .and_then(|e| e.get(0))
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str),
        )
        .map(str::trim)
        .find(|m| !m.is_empty())
        .map(str::to_string)
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct BuyExecutor {
    transport: Arc<Transport>,
    session: Arc<AuthSession>,
    endpoints: Arc<Endpoints>,
    telemetry: Arc<Telemetry>,
}

impl BuyExecutor {
    pub fn new(
        transport: Arc<Transport>,
        session: Arc<AuthSession>,
        endpoints: Arc<Endpoints>,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            transport,
            session,
            endpoints,
            telemetry,
        }
    }

    /// Submit one order. Counters and events are updated here.
    pub async fn execute(&self, order: &BuyOrder) -> BuyOutcome {
        let url = self.endpoints.purchase_resale(&order.collectible_item_id);
        self.telemetry
            .log_event(
                Severity::Info,
                format!(
                    "Buy attempt for {} expecting {} R$",
                    order.collectible_item_id, order.expected_price
                ),
            )
            .await;

        let payload = match serde_json::to_value(order) {
            Ok(payload) => payload,
            Err(e) => {
                return self
                    .finish(order, BuyOutcome::Rejected(format!("unserializable order: {e}")))
                    .await
            }
        };

        let token = self.session.csrf_token().await;
        let sink: Arc<dyn TokenSink> = Arc::clone(&self.session) as Arc<dyn TokenSink>;
        let req = ApiRequest::post(url)
            .cookie(self.session.cookie())
            .csrf_token(token)
            .token_sink(sink)
            .json(payload);

        let started = Instant::now();
        let outcome = match self.transport.send(req).await {
            Ok(envelope) => {
                self.telemetry.add_requests(1).await;
                info!(
                    collectible_item_id = %order.collectible_item_id,
                    status = envelope.status,
                    latency_ms = started.elapsed().as_millis() as u64,
                    "Purchase response received"
                );
                classify_response(envelope)
            }
            Err(e) => BuyOutcome::Rejected(format!(
                "network: {}",
                excerpt(&e.to_string(), REASON_EXCERPT_CHARS)
            )),
        };

        self.finish(order, outcome).await
    }

    async fn finish(&self, order: &BuyOrder, outcome: BuyOutcome) -> BuyOutcome {
        match &outcome {
            BuyOutcome::Bought(_) => {
                self.telemetry.add_bought(1).await;
                self.telemetry
                    .log_event(
                        Severity::Success,
                        format!(
                            "Bought {} for {} R$",
                            order.collectible_item_id, order.expected_price
                        ),
                    )
                    .await;
            }
            BuyOutcome::Pending(_) => {
                self.telemetry.add_failed(1).await;
                self.telemetry
                    .log_event(
                        Severity::Warning,
                        format!(
                            "Purchase of {} is pending, not counted as bought",
                            order.collectible_item_id
                        ),
                    )
                    .await;
            }
            BuyOutcome::Rejected(reason) => {
                self.telemetry.add_failed(1).await;
                warn!(
                    collectible_item_id = %order.collectible_item_id,
                    expected_price = order.expected_price,
                    reason = %reason,
                    "Purchase rejected"
                );
                self.telemetry
                    .log_event(
                        Severity::Warning,
                        format!("Not bought {}: {reason}", order.collectible_item_id),
                    )
                    .await;
            }
        }
        outcome
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
