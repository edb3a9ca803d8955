//! Shared types for the resale sniper.
//!
//! These types form the data model used across all modules.
//! They are kept free of I/O so that the http, strategy and engine
//! modules can depend on them without circular references.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Items
// ---------------------------------------------------------------------------

/// A collectible item as reported by the marketplace item-details endpoints.
///
/// Identity is the numeric `item_id`. The price is the last known lowest
/// resale price and is overwritten whenever a fresher quote arrives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub item_id: u64,
    /// Marketplace collectible id (a UUID string). Empty when unknown,
    /// e.g. for watch-list entries that have not been fetched yet.
    pub collectible_item_id: String,
    pub product_id: u64,
    pub lowest_resale_price: u64,
}

impl Item {
    /// A watch-list entry: only the numeric id is known up front.
    pub fn watched(item_id: u64) -> Self {
        Self {
            item_id,
            collectible_item_id: String::new(),
            product_id: 0,
            lowest_resale_price: 0,
        }
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} @ {} R$", self.item_id, self.lowest_resale_price)
    }
}

/// Valuation snapshot for one item, supplied by the valuation source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValuationRecord {
    /// Recommended value (0 when the source has none).
    pub value: u64,
    /// Recent average price.
    pub rap: u64,
    /// Speculative price behaviour. Projected items are never bought.
    pub projected: bool,
}

/// Item id → valuation.
pub type ValuationTable = HashMap<u64, ValuationRecord>;

/// One row of the site-wide deal-activity feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealActivity {
    pub timestamp: i64,
    pub item_id: u64,
    pub price: Option<u64>,
}

// ---------------------------------------------------------------------------
// Buy settings
// ---------------------------------------------------------------------------

/// Which valuation figure a discount is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceMeasurer {
    Value,
    Rap,
    /// Value, falling back to rap when the item has no value.
    #[default]
    ValueRap,
}

impl fmt::Display for PriceMeasurer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriceMeasurer::Value => write!(f, "value"),
            PriceMeasurer::Rap => write!(f, "rap"),
            PriceMeasurer::ValueRap => write!(f, "value_rap"),
        }
    }
}

/// Thresholds a listing must meet to count as a deal.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DealThresholds {
    pub price_measurer: PriceMeasurer,
    pub min_percentage_off: Option<f64>,
    pub min_robux_off: Option<i64>,
    pub max_robux_cost: Option<u64>,
}

/// Generic thresholds plus per-item overrides.
///
/// Custom entries replace the generic thresholds wholesale for their item;
/// there is no field-level merge.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BuySettings {
    #[serde(rename = "generic_settings")]
    pub generic: DealThresholds,
    /// Keyed by the item id as a string (TOML table keys are strings).
    #[serde(rename = "custom_settings")]
    pub custom: HashMap<String, DealThresholds>,
    /// Global floor re-applied against the live quote right before buying.
    pub deal_filter_min_percentage: Option<f64>,
}

impl BuySettings {
    /// Thresholds in effect for `item_id`.
    pub fn thresholds_for(&self, item_id: u64) -> &DealThresholds {
        self.custom
            .get(&item_id.to_string())
            .unwrap_or(&self.generic)
    }
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// Purchase request body for the resale purchase endpoint.
///
/// Built once per eligible opportunity and consumed by a single buy call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuyOrder {
    pub collectible_item_id: String,
    pub collectible_item_instance_id: String,
    pub collectible_product_id: String,
    pub expected_price: u64,
    pub expected_seller_id: u64,
    pub expected_purchaser_id: String,
    pub expected_purchaser_type: String,
    pub expected_currency: u32,
    pub idempotency_key: String,
}

impl BuyOrder {
    pub fn new(item: &Item, offer: &ResaleOffer, purchaser_id: u64) -> Self {
        Self {
            collectible_item_id: item.collectible_item_id.clone(),
            collectible_item_instance_id: offer.collectible_item_instance_id.clone(),
            collectible_product_id: offer.collectible_product_id.clone(),
            expected_price: offer.price,
            expected_seller_id: offer.seller_id,
            expected_purchaser_id: purchaser_id.to_string(),
            expected_purchaser_type: "User".to_string(),
            expected_currency: 1,
            idempotency_key: uuid::Uuid::new_v4().to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Normalized response payloads
// ---------------------------------------------------------------------------

/// The authenticated account behind a credential.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityInfo {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Result of a purchase call.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseOutcome {
    #[serde(default)]
    pub purchase_result: Option<serde_json::Value>,
    #[serde(default)]
    pub purchased: bool,
    #[serde(default)]
    pub pending: bool,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// The cheapest live resale offer for an item.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResaleOffer {
    pub collectible_item_instance_id: String,
    pub collectible_product_id: String,
    pub seller_id: u64,
    pub price: u64,
}

/// Body of a 401 verification challenge.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChallengeInfo {
    pub verification_token: Option<String>,
}

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

/// An outbound network path: direct, or through one proxy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    Local,
    Proxy(String),
}

impl Channel {
    pub fn from_proxy(proxy: Option<&str>) -> Self {
        match proxy {
            Some(p) if !p.trim().is_empty() => Channel::Proxy(p.trim().to_string()),
            _ => Channel::Local,
        }
    }

    pub fn proxy_url(&self) -> Option<&str> {
        match self {
            Channel::Local => None,
            Channel::Proxy(url) => Some(url),
        }
    }
}

impl fmt::Display for Channel {
    /// Proxy credentials (`user:pass@`) are never printed.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Local => write!(f, "local"),
            Channel::Proxy(url) => match url.rsplit_once('@') {
                Some((head, host)) => {
                    let scheme = head.split_once("://").map(|(s, _)| s);
                    match scheme {
                        Some(s) => write!(f, "{s}://{host}"),
                        None => write!(f, "{host}"),
                    }
                }
                None => write!(f, "{url}"),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Failure of a single Transport call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("{method} {url} failed after {attempts} attempt(s): {last}")]
    Exhausted {
        method: String,
        url: String,
        attempts: u32,
        last: String,
    },

    #[error("HTTP client error: {0}")]
    Client(String),
}

/// Domain-specific error types for the sniper.
#[derive(Debug, thiserror::Error)]
pub enum SniperError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Verification challenge required by {endpoint}")]
    ChallengeRequired { endpoint: String },

    #[error("Unusable response body from {endpoint}")]
    UnusableBody { endpoint: String },

    #[error("Purchase rejected: {0}")]
    BuyRejected(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
