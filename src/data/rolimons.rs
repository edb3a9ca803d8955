//! Rolimons valuation and deal-activity provider.
//!
//! API: `https://www.rolimons.com/itemapi/itemdetails`
//! Shape: `{"items": {"<id>": [name, acronym, rap, value, default_value,
//!         demand, trend, projected, hyped, rare, ...]}}`, `-1` meaning
//!         "none".
//!
//! API: `https://api.rolimons.com/market/v1/dealactivity`
//! Shape: `{"activities": [[timestamp, kind, item_id, price, ...], ...]}`
//!
//! Auth: None required.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{DealFeed, ValuationSource};
use crate::http::endpoints::Endpoints;
use crate::http::normalizer::NormalizedBody;
use crate::http::{ApiRequest, Transport};
use crate::types::{DealActivity, ValuationRecord, ValuationTable};

/// Valuations are re-fetched at most this often.
pub const VALUATION_TTL: Duration = Duration::from_secs(600);

/// Item entries shorter than this are skipped.
const MIN_ENTRY_LEN: usize = 10;

const RAP_INDEX: usize = 2;
const VALUE_INDEX: usize = 4;
const PROJECTED_INDEX: usize = 7;

const ACTIVITY_TS_INDEX: usize = 0;
const ACTIVITY_ITEM_INDEX: usize = 2;
const ACTIVITY_PRICE_INDEX: usize = 3;

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// `-1` (and anything non-positive or non-numeric) reads as 0.
fn figure(entry: &[Value], index: usize) -> u64 {
    entry
        .get(index)
        .and_then(Value::as_i64)
        .filter(|v| *v > 0)
        .map(|v| v as u64)
        .unwrap_or(0)
}

/// Parse the item-details payload into a valuation table.
pub fn parse_item_details(body: &Value) -> Result<ValuationTable> {
    let items = body
        .get("items")
        .and_then(Value::as_object)
        .ok_or_else(|| anyhow!("Valuation payload has no items object"))?;

    let mut table = ValuationTable::with_capacity(items.len());
    for (id, entry) in items {
        let Ok(item_id) = id.parse::<u64>() else {
            continue;
        };
        let Some(entry) = entry.as_array().filter(|e| e.len() >= MIN_ENTRY_LEN) else {
            continue;
        };
        let projected = entry
            .get(PROJECTED_INDEX)
            .map(|v| v.as_i64() != Some(-1))
            .unwrap_or(false);

        table.insert(
            item_id,
            ValuationRecord {
                value: figure(entry, VALUE_INDEX),
                rap: figure(entry, RAP_INDEX),
                projected,
            },
        );
    }
    Ok(table)
}

/// Parse the deal-activity payload. Rows without a usable item id are
/// dropped.
pub fn parse_activities(body: &Value) -> Vec<DealActivity> {
    let Some(rows) = body.get("activities").and_then(Value::as_array) else {
        return Vec::new();
    };

    rows.iter()
        .filter_map(Value::as_array)
        .filter_map(|row| {
            let timestamp = row.get(ACTIVITY_TS_INDEX).and_then(Value::as_i64)?;
            let item_id = match row.get(ACTIVITY_ITEM_INDEX)? {
                Value::Number(n) => n.as_u64()?,
                Value::String(s) => s.trim().parse().ok()?,
                _ => return None,
            };
            let price = row
                .get(ACTIVITY_PRICE_INDEX)
                .and_then(Value::as_i64)
                .filter(|p| *p >= 0)
                .map(|p| p as u64);
            Some(DealActivity {
                timestamp,
                item_id,
                price,
            })
        })
        .collect()
}

async fn fetch_raw(transport: &Transport, url: String) -> Result<Option<Value>> {
    let envelope = transport
        .send(ApiRequest::get(url.clone()))
        .await
        .with_context(|| format!("Request to {url} failed"))?;
    Ok(match envelope.body {
        Some(NormalizedBody::Raw(value)) => Some(value),
        _ => None,
    })
}

// ---------------------------------------------------------------------------
// Valuations
// ---------------------------------------------------------------------------

struct CachedTable {
    fetched_at: Instant,
    table: Arc<ValuationTable>,
}

/// Cached Rolimons valuations.
///
/// The cache mutex is held across a refresh, so concurrent callers wait for
/// one fetch instead of issuing their own. A failed refresh serves the
/// previous table.
pub struct RolimonsValuations {
    transport: Arc<Transport>,
    endpoints: Arc<Endpoints>,
    ttl: Duration,
    cache: Mutex<Option<CachedTable>>,
}

impl RolimonsValuations {
    pub fn new(transport: Arc<Transport>, endpoints: Arc<Endpoints>) -> Self {
        Self::with_ttl(transport, endpoints, VALUATION_TTL)
    }

    pub fn with_ttl(transport: Arc<Transport>, endpoints: Arc<Endpoints>, ttl: Duration) -> Self {
        Self {
            transport,
            endpoints,
            ttl,
            cache: Mutex::new(None),
        }
    }

    async fn fetch(&self) -> Result<ValuationTable> {
        let body = fetch_raw(&self.transport, self.endpoints.valuations())
            .await?
            .ok_or_else(|| anyhow!("Valuation response was empty or not JSON"))?;
        parse_item_details(&body)
    }
}

#[async_trait]
impl ValuationSource for RolimonsValuations {
    async fn valuations(&self) -> Result<Arc<ValuationTable>> {
        let mut cache = self.cache.lock().await;

        if let Some(cached) = cache.as_ref() {
            if cached.fetched_at.elapsed() < self.ttl {
                return Ok(Arc::clone(&cached.table));
            }
        }

        match self.fetch().await {
            Ok(table) if !table.is_empty() => {
                info!(items = table.len(), "Valuations refreshed");
                let table = Arc::new(table);
                *cache = Some(CachedTable {
                    fetched_at: Instant::now(),
                    table: Arc::clone(&table),
                });
                Ok(table)
            }
            result => {
                let reason = match result {
                    Ok(_) => "empty valuation table".to_string(),
                    Err(e) => format!("{e:#}"),
                };
                match cache.as_ref() {
                    Some(cached) => {
                        warn!(error = %reason, "Valuation refresh failed, serving stale data");
                        Ok(Arc::clone(&cached.table))
                    }
                    None => Err(anyhow!("Valuations unavailable: {reason}")),
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Deal feed
// ---------------------------------------------------------------------------

/// Most activities held for a retry. The oldest are dropped beyond this.
const MAX_REQUEUED: usize = 500;

/// Rolimons deal activity, filtered to activities newer than the newest
/// one previously returned.
pub struct RolimonsDealFeed {
    transport: Arc<Transport>,
    endpoints: Arc<Endpoints>,
    state: Mutex<FeedState>,
}

impl RolimonsDealFeed {
    pub fn new(transport: Arc<Transport>, endpoints: Arc<Endpoints>) -> Self {
        Self {
            transport,
            endpoints,
            state: Mutex::new(FeedState::default()),
        }
    }
}

#[derive(Debug, Default)]
struct FeedState {
    last_seen: Option<i64>,
    requeued: Vec<DealActivity>,
}

impl FeedState {
    /// Requeued activities first, then fetched ones newer than `last_seen`.
    /// Advances `last_seen`.
    fn take(&mut self, fetched: Vec<DealActivity>) -> Vec<DealActivity> {
        let mut out = std::mem::take(&mut self.requeued);
        out.extend(take_new(fetched, &mut self.last_seen));
        out
    }

    fn requeue(&mut self, activities: Vec<DealActivity>) {
        self.requeued.extend(activities);
        if self.requeued.len() > MAX_REQUEUED {
            let excess = self.requeued.len() - MAX_REQUEUED;
            self.requeued.drain(..excess);
        }
    }
}

/// Keep activities newer than `last_seen` and advance it.
fn take_new(activities: Vec<DealActivity>, last_seen: &mut Option<i64>) -> Vec<DealActivity> {
    let fresh: Vec<DealActivity> = activities
        .into_iter()
        .filter(|a| last_seen.map_or(true, |seen| a.timestamp > seen))
        .collect();
    if let Some(newest) = fresh.iter().map(|a| a.timestamp).max() {
        *last_seen = Some(newest);
    }
    fresh
}

#[async_trait]
impl DealFeed for RolimonsDealFeed {
    async fn poll(&self) -> Result<Vec<DealActivity>> {
        let mut state = self.state.lock().await;

        let fetched = match fetch_raw(&self.transport, self.endpoints.deal_activity()).await? {
            Some(body) => parse_activities(&body),
            None => {
                debug!("Deal activity response unusable");
                Vec::new()
            }
        };

        let fresh = state.take(fetched);
        debug!(new = fresh.len(), last_seen = ?state.last_seen, "Deal activity polled");
        Ok(fresh)
    }

    async fn requeue(&self, activities: Vec<DealActivity>) {
        if activities.is_empty() {
            return;
        }
        debug!(count = activities.len(), "Deal activity requeued");
        self.state.lock().await.requeue(activities);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(rap: i64, value: i64, projected: i64) -> Value {
        json!(["Name", "", rap, value, value, -1, -1, projected, -1, -1])
    }

    #[test]
    fn test_parse_item_details_indices() {
        let body = json!({
            "success": true,
            "items": {
                "12345": ["Sparkle Time", "", 1000, -1, -1, -1, -1, -1, -1, -1],
                "777": entry(2000, 5000, -1),
                "888": entry(300, 400, 1),
            }
        });
        let table = parse_item_details(&body).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(
            table[&12345],
            ValuationRecord {
                value: 0,
                rap: 1000,
                projected: false
            }
        );
        assert_eq!(table[&777].value, 5000);
        assert!(table[&888].projected);
    }

    #[test]
    fn test_parse_item_details_value_is_index_four() {
        let body = json!({"items": {"1": ["n", "", 10, 20, 30, -1, -1, -1, -1, -1]}});
        let table = parse_item_details(&body).unwrap();
        assert_eq!(table[&1].rap, 10);
        assert_eq!(table[&1].value, 30);
    }

    #[test]
    fn test_parse_item_details_skips_bad_entries() {
        let body = json!({
            "items": {
                "short": [1, 2, 3],
                "abc": entry(1, 1, -1),
                "5": [1, 2, 3],
                "6": "not a list",
                "7": entry(50, -1, -1),
            }
        });
        let table = parse_item_details(&body).unwrap();
        assert_eq!(table.len(), 1);
        assert!(table.contains_key(&7));
    }

    #[test]
    fn test_parse_item_details_requires_items() {
        assert!(parse_item_details(&json!({"success": false})).is_err());
    }

    #[test]
    fn test_parse_activities() {
        let body = json!({
            "activities": [
                [1700000000, 0, 12345, 600],
                [1700000005, 1, "777", null],
                [1700000006, 0, "bogus", 1],
                "not a row",
                [1700000007, 0, 888, -1],
            ]
        });
        let acts = parse_activities(&body);
        assert_eq!(acts.len(), 3);
        assert_eq!(
            acts[0],
            DealActivity {
                timestamp: 1700000000,
                item_id: 12345,
                price: Some(600)
            }
        );
        assert_eq!(acts[1].item_id, 777);
        assert_eq!(acts[1].price, None);
        assert_eq!(acts[2].price, None);
        assert!(parse_activities(&json!({})).is_empty());
    }

    #[test]
    fn test_take_new_filters_seen_activities() {
        let act = |ts| DealActivity {
            timestamp: ts,
            item_id: ts as u64,
            price: None,
        };
        let mut last_seen = None;

        let first = take_new(vec![act(1), act(3), act(2)], &mut last_seen);
        assert_eq!(first.len(), 3);
        assert_eq!(last_seen, Some(3));

        let second = take_new(vec![act(2), act(3), act(4)], &mut last_seen);
        assert_eq!(second, vec![act(4)]);
        assert_eq!(last_seen, Some(4));

        assert!(take_new(vec![act(4)], &mut last_seen).is_empty());
        assert_eq!(last_seen, Some(4));
    }

    #[test]
    fn test_requeued_activities_come_back_once() {
        let act = |ts| DealActivity {
            timestamp: ts,
            item_id: ts as u64,
            price: None,
        };
        let mut state = FeedState::default();

        let first = state.take(vec![act(1), act(2)]);
        assert_eq!(first.len(), 2);
        state.requeue(first);

        // requeued entries are returned even though last_seen moved past them
        let second = state.take(vec![act(2), act(3)]);
        assert_eq!(second, vec![act(1), act(2), act(3)]);
        assert_eq!(state.last_seen, Some(3));

        assert!(state.take(vec![act(3)]).is_empty());
    }

    #[test]
    fn test_requeue_is_bounded() {
        let mut state = FeedState::default();
        let acts: Vec<DealActivity> = (0..MAX_REQUEUED as i64 + 10)
            .map(|ts| DealActivity {
                timestamp: ts,
                item_id: 1,
                price: None,
            })
            .collect();
        state.requeue(acts);
        assert_eq!(state.requeued.len(), MAX_REQUEUED);
        assert_eq!(state.requeued[0].timestamp, 10);
    }

    #[tokio::test]
    async fn test_unreachable_source_without_cache_errors() {
        let transport = Arc::new(Transport::new(crate::types::Channel::Local).unwrap());
        let source = RolimonsValuations::new(
            transport,
            Arc::new(Endpoints::single_host("http://127.0.0.1:1")),
        );
        assert!(source.valuations().await.is_err());
    }
}
