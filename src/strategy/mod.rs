//! Strategy: deal screening against valuations and buy settings.

pub mod eligibility;

use tracing::debug;

use crate::types::{BuySettings, ValuationTable};
use eligibility::{base_value, Discount, Rejection, Verdict};

// ---------------------------------------------------------------------------
// Screening
// ---------------------------------------------------------------------------

/// Applies the configured buy settings to listings and live quotes.
///
/// Instantiate once and share; it holds no mutable state.
#[derive(Debug, Clone, Default)]
pub struct DealStrategy {
    settings: BuySettings,
}

impl DealStrategy {
    pub fn new(settings: BuySettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &BuySettings {
        &self.settings
    }

    /// Screen a listed price with the item's own thresholds and the global
    /// floor.
    pub fn screen(&self, item_id: u64, price: u64, valuations: &ValuationTable) -> Verdict {
        let thresholds = self.settings.thresholds_for(item_id);
        let verdict = eligibility::evaluate(
            price,
            valuations.get(&item_id),
            thresholds,
            self.settings.deal_filter_min_percentage,
        );
        if let Verdict::Rejected(reason) = &verdict {
            debug!(item_id, price, %reason, "Listing rejected");
        }
        verdict
    }

    /// Re-measure against a live quote and re-apply only the global floor.
    ///
    /// Per-item thresholds were already satisfied by the listed price; the
    /// live price only has to stay above the global minimum.
    pub fn recheck_live(
        &self,
        item_id: u64,
        live_price: u64,
        valuations: &ValuationTable,
    ) -> Verdict {
        let Some(valuation) = valuations.get(&item_id) else {
            return Verdict::Rejected(Rejection::NoValuation);
        };
        let measurer = self.settings.thresholds_for(item_id).price_measurer;
        let Some(discount) = Discount::measure(base_value(measurer, valuation), live_price)
        else {
            return Verdict::Rejected(Rejection::NoBaseValue);
        };

        match self.settings.deal_filter_min_percentage {
            Some(required) if !eligibility::passes_global_filter(&discount, Some(required)) => {
                Verdict::Rejected(Rejection::BelowGlobalFilter {
                    percent_off: discount.percent_off,
                    required,
                })
            }
            _ => Verdict::Deal(discount),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DealThresholds, PriceMeasurer, ValuationRecord};

    fn table() -> ValuationTable {
        let mut t = ValuationTable::new();
        t.insert(
            12345,
            ValuationRecord {
                value: 0,
                rap: 1000,
                projected: false,
            },
        );
        t.insert(
            777,
            ValuationRecord {
                value: 5000,
                rap: 2000,
                projected: false,
            },
        );
        t
    }

    fn settings() -> BuySettings {
        let mut s = BuySettings::default();
        s.generic.min_percentage_off = Some(20.0);
        s.custom.insert(
            "777".to_string(),
            DealThresholds {
                price_measurer: PriceMeasurer::Rap,
                min_percentage_off: Some(10.0),
                ..DealThresholds::default()
            },
        );
        s
    }

    #[test]
    fn test_screen_uses_generic_thresholds() {
        let strategy = DealStrategy::new(settings());
        assert!(strategy.screen(12345, 600, &table()).is_deal());
        assert!(!strategy.screen(12345, 900, &table()).is_deal());
        assert_eq!(
            strategy.screen(1, 10, &table()),
            Verdict::Rejected(Rejection::NoValuation)
        );
    }

    #[test]
    fn test_screen_uses_custom_thresholds() {
        let strategy = DealStrategy::new(settings());
        // measured against rap 2000, not value 5000
        let Verdict::Deal(d) = strategy.screen(777, 1700, &table()) else {
            panic!("expected deal");
        };
        assert_eq!(d.base_value, 2000);
        assert!(!strategy.screen(777, 1900, &table()).is_deal());
    }

    #[test]
    fn test_recheck_live_applies_only_global_floor() {
        let mut s = settings();
        s.deal_filter_min_percentage = Some(15.0);
        let strategy = DealStrategy::new(s);

        // 18% off fails the generic 20% but passes the 15% global floor
        assert!(strategy.recheck_live(12345, 820, &table()).is_deal());
        assert!(matches!(
            strategy.recheck_live(12345, 900, &table()),
            Verdict::Rejected(Rejection::BelowGlobalFilter { .. })
        ));
    }

    #[test]
    fn test_recheck_live_without_global_floor_accepts() {
        let strategy = DealStrategy::new(settings());
        let Verdict::Deal(d) = strategy.recheck_live(12345, 1200, &table()) else {
            panic!("expected deal");
        };
        assert!(d.percent_off < 0.0);
    }
}
