//! Core engine: the watch → evaluate → quote → buy pipeline.
//!
//! One `PollingWorker` runs per outbound channel. Workers share a single
//! `SniperContext`: the session, the valuation source, the watch mode, the
//! buy executor and the claim set that keeps two workers off the same item.

pub mod executor;
pub mod monitor;
pub mod sampler;
pub mod worker;

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;

use crate::auth::AuthSession;
use crate::config::PollingConfig;
use crate::data::{DealFeed, ValuationSource};
use crate::http::endpoints::Endpoints;
use crate::strategy::DealStrategy;
use crate::telemetry::Telemetry;
use executor::BuyExecutor;
use sampler::ItemSampler;

// ---------------------------------------------------------------------------
// Shared context
// ---------------------------------------------------------------------------

/// Where a worker gets its candidate items from. Fixed at start-up.
#[derive(Clone)]
pub enum WatchMode {
    /// Poll the configured watch-list through the sampler.
    Listed(Arc<ItemSampler>),
    /// Follow the site-wide deal-activity feed.
    DealFeed(Arc<dyn DealFeed>),
}

impl WatchMode {
    pub fn name(&self) -> &'static str {
        match self {
            WatchMode::Listed(_) => "listed",
            WatchMode::DealFeed(_) => "deal-feed",
        }
    }
}

/// Everything the workers share.
pub struct SniperContext {
    pub strategy: DealStrategy,
    pub polling: PollingConfig,
    pub session: Arc<AuthSession>,
    pub endpoints: Arc<Endpoints>,
    pub valuations: Arc<dyn ValuationSource>,
    pub mode: WatchMode,
    pub telemetry: Arc<Telemetry>,
    pub executor: BuyExecutor,
    pub claims: ClaimSet,
}

// ---------------------------------------------------------------------------
// Claims
// ---------------------------------------------------------------------------

/// Item ids currently being quoted or bought by some worker.
#[derive(Debug, Default)]
pub struct ClaimSet {
    claimed: Mutex<HashSet<u64>>,
}

impl ClaimSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `item_id`, or `None` if another worker holds it. The claim is
    /// released when the guard drops.
    pub fn try_claim(&self, item_id: u64) -> Option<ClaimGuard<'_>> {
        let inserted = self
            .claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(item_id);
        if inserted {
            Some(ClaimGuard { set: self, item_id })
        } else {
            None
        }
    }

    pub fn is_claimed(&self, item_id: u64) -> bool {
        self.claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&item_id)
    }
}

#[derive(Debug)]
pub struct ClaimGuard<'a> {
    set: &'a ClaimSet,
    item_id: u64,
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        self.set
            .claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.item_id);
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Sleep for `duration` unless shutdown is signalled first.
/// Returns `true` when the caller should stop.
pub(crate) async fn sleep_or_shutdown(
    duration: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        changed = shutdown.changed() => {
            // A dropped sender also means stop.
            if changed.is_err() {
                return true;
            }
        }
    }
    *shutdown.borrow()
}
