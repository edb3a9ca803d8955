//! Dashboard API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<DashboardState>`.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::telemetry::{
    AccountSnapshot, ActivityRow, ChannelHealth, Counters, EventRecord, Telemetry,
};

const DEFAULT_LIMIT: usize = 50;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct DashboardState {
    pub telemetry: Arc<Telemetry>,
    pub mode: &'static str,
    pub watch_list_len: usize,
}

impl DashboardState {
    pub fn new(telemetry: Arc<Telemetry>, mode: &'static str, watch_list_len: usize) -> Self {
        Self {
            telemetry,
            mode,
            watch_list_len,
        }
    }
}

pub type AppState = Arc<DashboardState>;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub mode: &'static str,
    pub watch_list_len: usize,
    pub uptime_secs: i64,
    pub counters: Counters,
    pub account: AccountSnapshot,
    pub channels_total: usize,
    pub channels_ok: usize,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

impl LimitQuery {
    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT)
    }
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let snap = state.telemetry.snapshot().await;
    Json(StatusResponse {
        mode: state.mode,
        watch_list_len: state.watch_list_len,
        uptime_secs: snap.uptime_secs,
        counters: snap.counters,
        account: snap.account,
        channels_total: snap.channels.len(),
        channels_ok: snap.channels.values().filter(|c| c.ok).count(),
    })
}

/// GET /api/activity?limit=N
pub async fn get_activity(
    State(state): State<AppState>,
    Query(q): Query<LimitQuery>,
) -> Json<Vec<ActivityRow>> {
    Json(state.telemetry.recent_activity(q.limit()).await)
}

/// GET /api/channels
pub async fn get_channels(State(state): State<AppState>) -> Json<BTreeMap<String, ChannelHealth>> {
    Json(state.telemetry.channels().await)
}

/// GET /api/events?limit=N
pub async fn get_events(
    State(state): State<AppState>,
    Query(q): Query<LimitQuery>,
) -> Json<Vec<EventRecord>> {
    Json(state.telemetry.recent_events(q.limit()).await)
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}
