//! Account monitor: keeps the session identity loaded and the balance
//! current for telemetry.

use anyhow::{Context, Result};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

use super::sleep_or_shutdown;
use crate::auth::AuthSession;
use crate::config::PollingConfig;
use crate::http::endpoints::Endpoints;
use crate::http::normalizer::NormalizedBody;
use crate::http::{ApiRequest, Transport};
use crate::telemetry::{Severity, Telemetry};

const CURRENCY_ATTEMPTS: u32 = 3;

/// Balance from a currency response: `robux`, else `balance`; numbers or
/// numeric strings; a bare number is accepted too.
pub fn parse_balance(body: &Value) -> Option<u64> {
    let as_balance = |v: &Value| match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    if let Some(balance) = as_balance(body) {
        return Some(balance);
    }
    ["robux", "balance"]
        .iter()
        .find_map(|k| body.get(*k).and_then(as_balance))
}

pub struct AccountMonitor {
    session: Arc<AuthSession>,
    transport: Arc<Transport>,
    endpoints: Arc<Endpoints>,
    telemetry: Arc<Telemetry>,
    polling: PollingConfig,
}

impl AccountMonitor {
    pub fn new(
        session: Arc<AuthSession>,
        transport: Arc<Transport>,
        endpoints: Arc<Endpoints>,
        telemetry: Arc<Telemetry>,
        polling: PollingConfig,
    ) -> Self {
        Self {
            session,
            transport,
            endpoints,
            telemetry,
            polling,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("Account monitor started");
        loop {
            let pause = match self.refresh_once().await {
                Ok(_) => self.polling.account_refresh(),
                Err(e) => {
                    self.telemetry
                        .log_event(Severity::Error, format!("Account monitor error: {e:#}"))
                        .await;
                    self.polling.account_error_backoff()
                }
            };
            if sleep_or_shutdown(pause, &mut shutdown).await {
                break;
            }
        }
        info!("Account monitor stopped");
    }

    /// Load the identity if missing, then fetch the balance.
    pub async fn refresh_once(&self) -> Result<Option<u64>> {
        if !self.session.is_identified() {
            let identity = self
                .session
                .populate_identity()
                .await
                .context("Failed to load account identity")?;
            if let Some(name) = &identity.name {
                self.telemetry
                    .log_event(Severity::Success, format!("Logged in as {name}"))
                    .await;
                self.telemetry.set_account(Some(name.clone()), None).await;
            }
        }

        let Some(user_id) = self.session.user_id() else {
            return Ok(None);
        };

        let req = ApiRequest::get(self.endpoints.currency(user_id))
            .cookie(self.session.cookie())
            .attempts(CURRENCY_ATTEMPTS);
        let envelope = self
            .transport
            .send(req)
            .await
            .context("Balance request failed")?;
        self.telemetry.add_requests(1).await;

        let balance = match &envelope.body {
            Some(NormalizedBody::Raw(value)) => parse_balance(value),
            _ => None,
        };
        match balance {
            Some(balance) => {
                debug!(balance, "Balance updated");
                self.telemetry.set_account(None, Some(balance)).await;
            }
            None => {
                self.telemetry
                    .log_event(Severity::Warning, "Balance response had no usable figure")
                    .await;
            }
        }
        Ok(balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_balance_variants() {
        assert_eq!(parse_balance(&json!({"robux": 1500})), Some(1500));
        assert_eq!(parse_balance(&json!({"balance": "42"})), Some(42));
        assert_eq!(parse_balance(&json!({"robux": 0, "balance": 9})), Some(0));
        assert_eq!(parse_balance(&json!(77)), Some(77));
        assert_eq!(parse_balance(&json!({"other": 1})), None);
        assert_eq!(parse_balance(&json!({"robux": "n/a"})), None);
    }
}
