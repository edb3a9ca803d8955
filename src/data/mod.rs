//! Market data sources.
//!
//! Defines the `ValuationSource` and `DealFeed` traits the engine reads
//! from, and the default Rolimons-backed implementations.

pub mod rolimons;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::types::{DealActivity, ValuationTable};

pub use rolimons::{RolimonsDealFeed, RolimonsValuations};

/// Item valuations (value, rap, projected flag) keyed by item id.
///
/// Implementations cache; callers may invoke this on every batch.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ValuationSource: Send + Sync {
    async fn valuations(&self) -> Result<Arc<ValuationTable>>;
}

/// Site-wide deal activity.
///
/// Each call returns only activities newer than those already returned,
/// so a feed shared between workers hands every activity out once.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DealFeed: Send + Sync {
    async fn poll(&self) -> Result<Vec<DealActivity>>;

    /// Hand back activities a worker polled but could not process. They are
    /// returned again by the next `poll`.
    async fn requeue(&self, activities: Vec<DealActivity>);
}
