//! Response normalization.
//!
//! Maps a parsed JSON body plus the endpoint it came from into one of a
//! closed set of typed variants. Dispatch is by endpoint path pattern and
//! ignores the status code. Malformed bodies decode to `None`; callers treat
//! that as "unusable, skip".

use serde_json::Value;

use crate::types::{ChallengeInfo, IdentityInfo, Item, PurchaseOutcome, ResaleOffer};

/// Normalized response body.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedBody {
    ItemDetails(Vec<Item>),
    Identity(IdentityInfo),
    Purchase(PurchaseOutcome),
    ResaleOffer(ResaleOffer),
    Challenge(ChallengeInfo),
    /// Unrecognized endpoint (or a passthrough pattern): body forwarded as-is.
    Raw(Value),
}

/// Endpoint families, in dispatch precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Challenge,
    DealActivity,
    Currency,
    ItemDetails,
    Identity,
    Purchase,
    Resellers,
    Other,
}

/// Suffix appended to an endpoint when normalizing a 401 body.
pub const CHALLENGE_SUFFIX: &str = "/challenges/authenticator/verify";

impl EndpointKind {
    pub fn classify(url: &str) -> Self {
        let path = path_of(url);

        if path.ends_with(CHALLENGE_SUFFIX) {
            EndpointKind::Challenge
        } else if path.contains("/market/v1/dealactivity") {
            EndpointKind::DealActivity
        } else if path.contains("/currency") {
            EndpointKind::Currency
        } else if path.contains("/items/details") {
            EndpointKind::ItemDetails
        } else if path.contains("/users/authenticated") {
            EndpointKind::Identity
        } else if path.ends_with("/purchase-resale") {
            EndpointKind::Purchase
        } else if path.contains("/resellers") {
            EndpointKind::Resellers
        } else {
            EndpointKind::Other
        }
    }
}

/// Strip query string and fragment.
fn path_of(url: &str) -> &str {
    let end = url.find(|c: char| c == '?' || c == '#').unwrap_or(url.len());
    url[..end].trim_end_matches('/')
}

/// Normalize `body` as returned by `url`.
pub fn normalize(url: &str, body: Value) -> Option<NormalizedBody> {
    if body.is_null() {
        return None;
    }

    match EndpointKind::classify(url) {
        EndpointKind::Challenge => decode_challenge(&body).map(NormalizedBody::Challenge),
        EndpointKind::DealActivity => {
            let has_feed = body.get("activities").is_some();
            has_feed.then_some(NormalizedBody::Raw(body))
        }
        EndpointKind::Currency => Some(NormalizedBody::Raw(body)),
        EndpointKind::ItemDetails => decode_item_details(&body).map(NormalizedBody::ItemDetails),
        EndpointKind::Identity => decode_identity(body).map(NormalizedBody::Identity),
        EndpointKind::Purchase => decode_purchase(body).map(NormalizedBody::Purchase),
        EndpointKind::Resellers => decode_offer(&body).map(NormalizedBody::ResaleOffer),
        EndpointKind::Other => Some(NormalizedBody::Raw(body)),
    }
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

/// First present, non-null field among `keys`.
fn field<'a>(obj: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find(|v| !v.is_null())
}

/// Integer from a JSON number or numeric string. `Err` when the value is
/// present but not numeric.
fn as_u64(value: Option<&Value>) -> Result<u64, ()> {
    match value {
        None => Ok(0),
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .ok_or(()),
        Some(Value::String(s)) => s.trim().parse::<u64>().map_err(|_| ()),
        Some(_) => Err(()),
    }
}

fn as_string(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

// ---------------------------------------------------------------------------
// Decoders (one per variant)
// ---------------------------------------------------------------------------

fn decode_challenge(body: &Value) -> Option<ChallengeInfo> {
    let obj = body.as_object()?;
    Some(ChallengeInfo {
        verification_token: obj
            .get("verificationToken")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

fn decode_item_details(body: &Value) -> Option<Vec<Item>> {
    let source = match body {
        Value::Object(obj) => obj.get("data")?,
        other => other,
    };
    let list = source.as_array()?;

    list.iter().map(decode_item).collect()
}

fn decode_item(entry: &Value) -> Option<Item> {
    if !entry.is_object() {
        return None;
    }

    let item_id = as_u64(field(entry, &["id", "itemId"])).ok()?;

    // Newer endpoints carry a UUID product id; only numeric ids are kept.
    let product_id = as_u64(field(entry, &["productId", "collectibleProductId"])).unwrap_or(0);

    let collectible_item_id =
        as_string(field(entry, &["collectibleItemId", "collectible_item_id"]));

    let price = match field(entry, &["lowestResalePrice"]) {
        Some(v) => Some(v),
        None => entry.get("offer").and_then(|o| field(o, &["price"])),
    };
    let lowest_resale_price = as_u64(price).ok()?;

    Some(Item {
        item_id,
        collectible_item_id,
        product_id,
        lowest_resale_price,
    })
}

fn decode_identity(body: Value) -> Option<IdentityInfo> {
    if !body.is_object() {
        return None;
    }
    serde_json::from_value(body).ok()
}

/// Both spellings of the result and error fields are seen in the wild,
/// sometimes in the same body.
fn decode_purchase(body: Value) -> Option<PurchaseOutcome> {
    if !body.is_object() {
        return None;
    }
    let flag = |key: &str| field(&body, &[key]).and_then(Value::as_bool).unwrap_or(false);
    Some(PurchaseOutcome {
        purchase_result: field(&body, &["purchaseResult", "purchasedResult"]).cloned(),
        purchased: flag("purchased"),
        pending: flag("pending"),
        error_message: field(&body, &["errorMessage", "error_message"])
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

fn decode_offer(body: &Value) -> Option<ResaleOffer> {
    let first = match body {
        Value::Array(list) => list.first()?,
        Value::Object(obj) => match obj.get("data") {
            Some(Value::Array(list)) => list.first()?,
            _ => body,
        },
        _ => return None,
    };
    if !first.is_object() {
        return None;
    }

    let seller = field(first, &["sellerId", "seller_id"])
        .or_else(|| first.get("seller").and_then(|s| field(s, &["sellerId", "seller_id"])));

    Some(ResaleOffer {
        collectible_item_instance_id: as_string(field(
            first,
            &["collectibleItemInstanceId", "collectible_item_instance_id"],
        )),
        collectible_product_id: as_string(field(
            first,
            &["collectibleProductId", "collectible_product_id"],
        )),
        seller_id: as_u64(seller).ok()?,
        price: as_u64(field(first, &["price", "rap"])).ok()?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
