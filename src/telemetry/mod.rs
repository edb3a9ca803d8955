//! Runtime telemetry shared by workers, the account monitor and the
//! dashboard.
//!
//! Each field group sits behind its own `tokio::sync::RwLock` so a burst of
//! event logging never blocks counter updates. Events are mirrored into
//! `tracing` at the matching level.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tracing::{error, info, warn};

use crate::engine::sleep_or_shutdown;
use crate::types::Channel;

/// Most recent events kept.
pub const MAX_EVENTS: usize = 2000;
/// Most recent activity rows kept.
pub const MAX_ACTIVITY: usize = 200;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Success => write!(f, "success"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub message: String,
}

/// One evaluated opportunity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityRow {
    pub timestamp: DateTime<Utc>,
    pub item_id: u64,
    pub price: u64,
    pub base_value: u64,
    pub percent_off: f64,
    pub channel: String,
    pub note: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChannelHealth {
    pub ok: bool,
    pub latency_ms: Option<u64>,
    pub last_error: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    pub requests: u64,
    pub checked: u64,
    pub bought: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AccountSnapshot {
    pub user_name: Option<String>,
    pub balance: Option<u64>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Point-in-time copy for rendering.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySnapshot {
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
    pub counters: Counters,
    pub account: AccountSnapshot,
    pub channels: BTreeMap<String, ChannelHealth>,
}

// ---------------------------------------------------------------------------
// Telemetry
// ---------------------------------------------------------------------------

pub struct Telemetry {
    started_at: DateTime<Utc>,
    counters: RwLock<Counters>,
    events: RwLock<VecDeque<EventRecord>>,
    activity: RwLock<VecDeque<ActivityRow>>,
    channels: RwLock<BTreeMap<String, ChannelHealth>>,
    account: RwLock<AccountSnapshot>,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl Telemetry {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            counters: RwLock::new(Counters::default()),
            events: RwLock::new(VecDeque::with_capacity(MAX_EVENTS)),
            activity: RwLock::new(VecDeque::with_capacity(MAX_ACTIVITY)),
            channels: RwLock::new(BTreeMap::new()),
            account: RwLock::new(AccountSnapshot::default()),
        }
    }

    // ---- events ------------------------------------------------------------

    pub async fn log_event(&self, severity: Severity, message: impl Into<String>) {
        let message = message.into();
        match severity {
            Severity::Info | Severity::Success => info!(%severity, "{message}"),
            Severity::Warning => warn!("{message}"),
            Severity::Error => error!("{message}"),
        }

        let mut events = self.events.write().await;
        if events.len() >= MAX_EVENTS {
            events.pop_front();
        }
        events.push_back(EventRecord {
            timestamp: Utc::now(),
            severity,
            message,
        });
    }

    /// Newest first.
    pub async fn recent_events(&self, limit: usize) -> Vec<EventRecord> {
        self.events.read().await.iter().rev().take(limit).cloned().collect()
    }

    // ---- counters ----------------------------------------------------------

    pub async fn add_requests(&self, n: u64) {
        self.counters.write().await.requests += n;
    }

    pub async fn add_checked(&self, n: u64) {
        self.counters.write().await.checked += n;
    }

    pub async fn add_bought(&self, n: u64) {
        self.counters.write().await.bought += n;
    }

    pub async fn add_failed(&self, n: u64) {
        self.counters.write().await.failed += n;
    }

    pub async fn counters(&self) -> Counters {
        *self.counters.read().await
    }

    // ---- channels ----------------------------------------------------------

    /// Record the result of one call made over `channel`.
    pub async fn record_channel(
        &self,
        channel: &Channel,
        latency: Option<Duration>,
        error: Option<String>,
    ) {
        let mut channels = self.channels.write().await;
        let health = channels.entry(channel.to_string()).or_default();
        health.ok = error.is_none();
        health.last_seen = Some(Utc::now());
        if let Some(latency) = latency {
            health.latency_ms = Some(latency.as_millis() as u64);
        }
        if error.is_some() {
            health.last_error = error;
        }
    }

    pub async fn channels(&self) -> BTreeMap<String, ChannelHealth> {
        self.channels.read().await.clone()
    }

    // ---- activity ----------------------------------------------------------

    pub async fn record_activity(&self, row: ActivityRow) {
        let mut activity = self.activity.write().await;
        if activity.len() >= MAX_ACTIVITY {
            activity.pop_front();
        }
        activity.push_back(row);
    }

    /// Newest first.
    pub async fn recent_activity(&self, limit: usize) -> Vec<ActivityRow> {
        self.activity.read().await.iter().rev().take(limit).cloned().collect()
    }

    // ---- account -----------------------------------------------------------

    pub async fn set_account(&self, user_name: Option<String>, balance: Option<u64>) {
        let mut account = self.account.write().await;
        if user_name.is_some() {
            account.user_name = user_name;
        }
        if balance.is_some() {
            account.balance = balance;
        }
        account.updated_at = Some(Utc::now());
    }

    pub async fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds(),
            counters: self.counters().await,
            account: self.account.read().await.clone(),
            channels: self.channels().await,
        }
    }
}

// ---------------------------------------------------------------------------
// Reporter
// ---------------------------------------------------------------------------

/// Emit one summary log line every `interval` until shutdown.
pub async fn run_summary_loop(
    telemetry: Arc<Telemetry>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if sleep_or_shutdown(interval, &mut shutdown).await {
            break;
        }

        let snap = telemetry.snapshot().await;
        let healthy = snap.channels.values().filter(|c| c.ok).count();
        info!(
            uptime_secs = snap.uptime_secs,
            requests = snap.counters.requests,
            checked = snap.counters.checked,
            bought = snap.counters.bought,
            failed = snap.counters.failed,
            channels_ok = healthy,
            channels = snap.channels.len(),
            balance = ?snap.account.balance,
            "Sniper summary"
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
