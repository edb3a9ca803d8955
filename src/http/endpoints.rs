//! Marketplace and valuation endpoints.
//!
//! Hosts are grouped so tests can point every call at a local server while
//! the paths (which the normalizer dispatches on) stay fixed.

use serde_json::{json, Value};

use crate::types::Item;

const CATALOG_HOST: &str = "https://catalog.roblox.com";
const APIS_HOST: &str = "https://apis.roblox.com";
const AUTH_HOST: &str = "https://auth.roblox.com";
const USERS_HOST: &str = "https://users.roblox.com";
const ECONOMY_HOST: &str = "https://economy.roblox.com";
const ROLIMONS_HOST: &str = "https://www.rolimons.com";
const ROLIMONS_API_HOST: &str = "https://api.rolimons.com";

/// Base URLs for every external service the sniper talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub catalog: String,
    pub apis: String,
    pub auth: String,
    pub users: String,
    pub economy: String,
    pub rolimons: String,
    pub rolimons_api: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            catalog: CATALOG_HOST.to_string(),
            apis: APIS_HOST.to_string(),
            auth: AUTH_HOST.to_string(),
            users: USERS_HOST.to_string(),
            economy: ECONOMY_HOST.to_string(),
            rolimons: ROLIMONS_HOST.to_string(),
            rolimons_api: ROLIMONS_API_HOST.to_string(),
        }
    }
}

impl Endpoints {
    /// Every service on one base URL (local mock servers).
    pub fn single_host(base: &str) -> Self {
        let base = base.trim_end_matches('/').to_string();
        Self {
            catalog: base.clone(),
            apis: base.clone(),
            auth: base.clone(),
            users: base.clone(),
            economy: base.clone(),
            rolimons: base.clone(),
            rolimons_api: base,
        }
    }

    pub fn catalog_item_details(&self) -> String {
        format!("{}/v1/catalog/items/details", self.catalog)
    }

    pub fn marketplace_item_details(&self) -> String {
        format!("{}/marketplace-items/v1/items/details", self.apis)
    }

    pub fn resellers(&self, collectible_item_id: &str) -> String {
        format!(
            "{}/marketplace-sales/v1/item/{collectible_item_id}/resellers?limit=1",
            self.apis
        )
    }

    pub fn purchase_resale(&self, collectible_item_id: &str) -> String {
        format!(
            "{}/marketplace-sales/v1/item/{collectible_item_id}/purchase-resale",
            self.apis
        )
    }

    pub fn authenticated_user(&self) -> String {
        format!("{}/v1/users/authenticated", self.users)
    }

    pub fn currency(&self, user_id: u64) -> String {
        format!("{}/v1/users/{user_id}/currency", self.economy)
    }

    /// Anti-forgery bootstrap: always answers 403 with a fresh token.
    pub fn csrf_bootstrap(&self) -> String {
        format!("{}/v2/logout", self.auth)
    }

    pub fn valuations(&self) -> String {
        format!("{}/itemapi/itemdetails", self.rolimons)
    }

    pub fn deal_activity(&self) -> String {
        format!("{}/market/v1/dealactivity", self.rolimons_api)
    }
}

/// Request body for both item-details endpoints.
pub fn item_details_payload(items: &[Item]) -> Value {
    let entries: Vec<Value> = items
        .iter()
        .map(|i| json!({ "itemId": i.item_id }))
        .collect();
    json!({ "items": entries })
}
