//! Per-channel polling worker.
//!
//! Each cycle fetches item batches (watch-list or deal feed), screens every
//! item against its valuation, fetches a live quote for the survivors and
//! submits a purchase when the quote still clears the global floor.

use anyhow::{anyhow, Result};
use chrono::Utc;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{sleep_or_shutdown, SniperContext, WatchMode};
use crate::http::endpoints::item_details_payload;
use crate::http::normalizer::NormalizedBody;
use crate::http::{ApiRequest, TokenSink, Transport};
use crate::strategy::eligibility::{base_value, Discount, Rejection, Verdict};
use crate::telemetry::{ActivityRow, Severity};
use crate::types::{BuyOrder, DealActivity, Item, ResaleOffer, SniperError, ValuationTable};

/// Attempts for an item-details batch.
const BATCH_ATTEMPTS: u32 = 3;
/// Attempts for a live resale quote.
const QUOTE_ATTEMPTS: u32 = 4;

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// What happened to one item in a cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Unvalued,
    Ineligible(Rejection),
    AlreadyClaimed,
    NoIdentity,
    QuoteUnavailable,
    FilteredAtQuote(Rejection),
    Bought { price: u64 },
    BuyFailed(String),
}

impl fmt::Display for ItemOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemOutcome::Unvalued => write!(f, "no valuation"),
            ItemOutcome::Ineligible(r) => write!(f, "ineligible: {r}"),
            ItemOutcome::AlreadyClaimed => write!(f, "already claimed or attempted this cycle"),
            ItemOutcome::NoIdentity => write!(f, "account identity not loaded"),
            ItemOutcome::QuoteUnavailable => write!(f, "live quote unavailable"),
            ItemOutcome::FilteredAtQuote(r) => write!(f, "filtered at live quote: {r}"),
            ItemOutcome::Bought { price } => write!(f, "bought at {price} R$"),
            ItemOutcome::BuyFailed(reason) => write!(f, "buy failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemReport {
    pub item_id: u64,
    pub outcome: ItemOutcome,
}

/// Result of one cycle: per-item reports and how long to idle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleSummary {
    pub reports: Vec<ItemReport>,
    pub pause: Duration,
}

impl ItemOutcome {
    /// Severity of the telemetry event for this outcome. `None` when the
    /// buy executor already reported it.
    fn event_severity(&self) -> Option<Severity> {
        match self {
            ItemOutcome::Unvalued
            | ItemOutcome::Ineligible(_)
            | ItemOutcome::AlreadyClaimed
            | ItemOutcome::FilteredAtQuote(_) => Some(Severity::Info),
            ItemOutcome::NoIdentity | ItemOutcome::QuoteUnavailable => Some(Severity::Warning),
            ItemOutcome::Bought { .. } | ItemOutcome::BuyFailed(_) => None,
        }
    }
}

impl CycleSummary {
    pub fn bought(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| matches!(r.outcome, ItemOutcome::Bought { .. }))
            .count()
    }
}

/// Item ids from the feed worth fetching: valued, not projected, positive
/// rap. Order of first appearance, no duplicates.
pub fn deal_candidates(activities: &[DealActivity], valuations: &ValuationTable) -> Vec<u64> {
    let mut seen = HashSet::new();
    activities
        .iter()
        .map(|a| a.item_id)
        .filter(|id| {
            valuations
                .get(id)
                .is_some_and(|v| !v.projected && v.rap > 0)
        })
        .filter(|id| seen.insert(*id))
        .collect()
}

/// Item ids that passed screening in the current cycle. Shared by every
/// batch of a cycle so an item is quoted and bought at most once per cycle.
#[derive(Debug, Default)]
pub struct CycleLedger {
    attempted: Mutex<HashSet<u64>>,
}

impl CycleLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an attempt on `item_id`. `false` if it was already attempted.
    pub fn first_attempt(&self, item_id: u64) -> bool {
        self.attempted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(item_id)
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

pub struct PollingWorker {
    ctx: Arc<SniperContext>,
    transport: Arc<Transport>,
}

impl PollingWorker {
    pub fn new(ctx: Arc<SniperContext>, transport: Arc<Transport>) -> Self {
        Self { ctx, transport }
    }

    fn channel_name(&self) -> String {
        self.transport.channel().to_string()
    }

    /// Loop until shutdown. Errors are logged and the loop backs off.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let channel = self.channel_name();
        info!(%channel, mode = self.ctx.mode.name(), "Polling worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let pause = match self.run_cycle().await {
                Ok(summary) => {
                    if summary.bought() > 0 {
                        info!(%channel, bought = summary.bought(), "Cycle bought items");
                    }
                    summary.pause
                }
                Err(e) => {
                    self.ctx
                        .telemetry
                        .log_event(Severity::Error, format!("Cycle failed on {channel}: {e:#}"))
                        .await;
                    self.ctx.polling.error_backoff()
                }
            };

            if sleep_or_shutdown(pause, &mut shutdown).await {
                break;
            }
        }

        info!(%channel, "Polling worker stopped");
    }

    /// One pass: fetch, screen, quote, buy.
    pub async fn run_cycle(&self) -> Result<CycleSummary> {
        match &self.ctx.mode {
            WatchMode::Listed(sampler) => {
                let polling = &self.ctx.polling;
                let catalog = sampler.next_batch(polling.catalog_batch_size);
                let marketplace = sampler.next_batch(polling.marketplace_batch_size);
                let ledger = CycleLedger::new();

                let (a, b) = tokio::join!(
                    self.process_batch(
                        self.ctx.endpoints.catalog_item_details(),
                        catalog,
                        &ledger
                    ),
                    self.process_batch(
                        self.ctx.endpoints.marketplace_item_details(),
                        marketplace,
                        &ledger
                    ),
                );

                let mut reports = Vec::new();
                let mut errors = Vec::new();
                for result in [a, b] {
                    match result {
                        Ok(mut r) => reports.append(&mut r),
                        Err(e) => errors.push(e),
                    }
                }
                if errors.len() == 2 {
                    return Err(errors.remove(0));
                }
                for e in errors {
                    self.ctx
                        .telemetry
                        .log_event(Severity::Error, format!("Batch failed: {e:#}"))
                        .await;
                }

                Ok(CycleSummary {
                    reports,
                    pause: polling.idle(),
                })
            }
            WatchMode::DealFeed(feed) => {
                let activities = feed.poll().await?;
                if activities.is_empty() {
                    debug!("No new deal activity");
                    return Ok(CycleSummary {
                        reports: Vec::new(),
                        pause: self.ctx.polling.deal_empty_backoff(),
                    });
                }

                let valuations = match self.ctx.valuations.valuations().await {
                    Ok(valuations) => valuations,
                    Err(e) => {
                        feed.requeue(activities).await;
                        return Err(e);
                    }
                };
                let candidates = deal_candidates(&activities, &valuations);
                if !candidates.is_empty() {
                    self.ctx
                        .telemetry
                        .log_event(
                            Severity::Info,
                            format!("{} potential deals in the feed", candidates.len()),
                        )
                        .await;
                }

                let mut reports = Vec::new();
                let ledger = CycleLedger::new();
                let chunk = self.ctx.polling.deal_batch_size.max(1);
                for ids in candidates.chunks(chunk) {
                    let items: Vec<Item> = ids.iter().copied().map(Item::watched).collect();
                    match self
                        .process_batch(self.ctx.endpoints.catalog_item_details(), items, &ledger)
                        .await
                    {
                        Ok(mut r) => reports.append(&mut r),
                        Err(e) => {
                            self.ctx
                                .telemetry
                                .log_event(Severity::Error, format!("Deal batch failed: {e:#}"))
                                .await;
                            let retry: Vec<DealActivity> = activities
                                .iter()
                                .filter(|a| ids.contains(&a.item_id))
                                .cloned()
                                .collect();
                            feed.requeue(retry).await;
                        }
                    }
                }

                Ok(CycleSummary {
                    reports,
                    pause: self.ctx.polling.idle(),
                })
            }
        }
    }

    /// Fetch one item-details batch and evaluate every item in it.
    async fn process_batch(
        &self,
        url: String,
        items: Vec<Item>,
        ledger: &CycleLedger,
    ) -> Result<Vec<ItemReport>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let listed = self.fetch_batch(url, &items).await?;
        let valuations = self.ctx.valuations.valuations().await?;

        let mut reports = Vec::with_capacity(listed.len());
        for item in listed {
            let item_id = item.item_id;
            let outcome = self.evaluate_item(item, &valuations, ledger).await;
            reports.push(ItemReport { item_id, outcome });
        }
        Ok(reports)
    }

    async fn fetch_batch(&self, url: String, items: &[Item]) -> Result<Vec<Item>> {
        let session = &self.ctx.session;
        let sink: Arc<dyn TokenSink> = Arc::clone(session) as Arc<dyn TokenSink>;
        let req = ApiRequest::post(url.clone())
            .cookie(session.cookie())
            .csrf_token(session.csrf_token().await)
            .token_sink(sink)
            .json(item_details_payload(items))
            .attempts(BATCH_ATTEMPTS);

        debug!(batch = items.len(), %url, channel = %self.channel_name(), "Requesting batch");
        let started = Instant::now();
        let envelope = match self.transport.send(req).await {
            Ok(envelope) => envelope,
            Err(e) => {
                self.ctx
                    .telemetry
                    .record_channel(self.transport.channel(), None, Some(e.to_string()))
                    .await;
                return Err(e.into());
            }
        };
        self.ctx.telemetry.add_requests(1).await;
        self.ctx
            .telemetry
            .record_channel(self.transport.channel(), Some(started.elapsed()), None)
            .await;

        match envelope.into_body()? {
            NormalizedBody::ItemDetails(list) => Ok(list),
            _ => Err(anyhow!(SniperError::UnusableBody { endpoint: url })),
        }
    }

    /// Screen one listed item and, if it is a deal, quote and buy it.
    /// Every outcome is reported to telemetry.
    pub async fn evaluate_item(
        &self,
        item: Item,
        valuations: &ValuationTable,
        ledger: &CycleLedger,
    ) -> ItemOutcome {
        let (item_id, price) = (item.item_id, item.lowest_resale_price);
        let outcome = self.assess_item(item, valuations, ledger).await;
        if let Some(severity) = outcome.event_severity() {
            self.ctx
                .telemetry
                .log_event(severity, format!("Item {item_id} at {price} R$: {outcome}"))
                .await;
        }
        outcome
    }

    async fn assess_item(
        &self,
        mut item: Item,
        valuations: &ValuationTable,
        ledger: &CycleLedger,
    ) -> ItemOutcome {
        let ctx = &self.ctx;
        ctx.telemetry.add_checked(1).await;

        let Some(valuation) = valuations.get(&item.item_id) else {
            debug!(item_id = item.item_id, "Item has no valuation, skipping");
            return ItemOutcome::Unvalued;
        };
        let measurer = ctx
            .strategy
            .settings()
            .thresholds_for(item.item_id)
            .price_measurer;
        let base = base_value(measurer, valuation);

        let verdict = ctx
            .strategy
            .screen(item.item_id, item.lowest_resale_price, valuations);
        self.record_activity(&item, base, item.lowest_resale_price, "checked")
            .await;
        if let Verdict::Rejected(reason) = verdict {
            return ItemOutcome::Ineligible(reason);
        }

        if !ledger.first_attempt(item.item_id) {
            debug!(item_id = item.item_id, "Item already attempted this cycle");
            return ItemOutcome::AlreadyClaimed;
        }
        let Some(_claim) = ctx.claims.try_claim(item.item_id) else {
            debug!(item_id = item.item_id, "Item already claimed");
            return ItemOutcome::AlreadyClaimed;
        };
        let Some(purchaser_id) = ctx.session.user_id() else {
            warn!(item_id = item.item_id, "Deal found before account identity loaded");
            return ItemOutcome::NoIdentity;
        };

        let Some(offer) = self.live_quote(&item).await else {
            return ItemOutcome::QuoteUnavailable;
        };
        item.lowest_resale_price = offer.price;

        let live = ctx.strategy.recheck_live(item.item_id, offer.price, valuations);
        self.record_activity(&item, base, offer.price, "potential deal")
            .await;
        if let Verdict::Rejected(reason) = live {
            return ItemOutcome::FilteredAtQuote(reason);
        }

        ctx.telemetry
            .log_event(
                Severity::Info,
                format!(
                    "Potential deal: item {} base={} live={} via {}",
                    item.item_id,
                    base,
                    offer.price,
                    self.channel_name()
                ),
            )
            .await;

        let order = BuyOrder::new(&item, &offer, purchaser_id);
        match ctx.executor.execute(&order).await.into_result() {
            Ok(_) => ItemOutcome::Bought { price: offer.price },
            Err(SniperError::BuyRejected(reason)) => ItemOutcome::BuyFailed(reason),
            Err(e) => ItemOutcome::BuyFailed(e.to_string()),
        }
    }

    /// Cheapest live resale offer, over this worker's channel.
    async fn live_quote(&self, item: &Item) -> Option<ResaleOffer> {
        if item.collectible_item_id.is_empty() {
            debug!(item_id = item.item_id, "No collectible id, cannot quote");
            return None;
        }

        let url = self.ctx.endpoints.resellers(&item.collectible_item_id);
        let req = ApiRequest::get(url).attempts(QUOTE_ATTEMPTS);
        let started = Instant::now();
        let telemetry = &self.ctx.telemetry;

        let envelope = match self.transport.send(req).await {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(item_id = item.item_id, error = %e, "Resale quote failed");
                telemetry
                    .record_channel(self.transport.channel(), None, Some(e.to_string()))
                    .await;
                return None;
            }
        };
        telemetry.add_requests(1).await;
        telemetry
            .record_channel(self.transport.channel(), Some(started.elapsed()), None)
            .await;

        match envelope.into_body() {
            Ok(NormalizedBody::ResaleOffer(offer)) => Some(offer),
            Ok(_) => None,
            Err(e) => {
                debug!(item_id = item.item_id, error = %e, "Resale quote unusable");
                None
            }
        }
    }

    async fn record_activity(&self, item: &Item, base: u64, price: u64, note: &str) {
        let percent_off = Discount::measure(base, price)
            .map(|d| d.percent_off)
            .unwrap_or(0.0);
        self.ctx
            .telemetry
            .record_activity(ActivityRow {
                timestamp: Utc::now(),
                item_id: item.item_id,
                price,
                base_value: base,
                percent_off,
                channel: self.channel_name(),
                note: note.to_string(),
            })
            .await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
