//! Deal detection.
//!
//! Compares a listing price to the item's valuation and decides whether
//! the discount clears the configured thresholds. Pure functions only.

use std::fmt;
use tracing::debug;

use crate::types::{DealThresholds, PriceMeasurer, ValuationRecord};

// ---------------------------------------------------------------------------
// Discount
// ---------------------------------------------------------------------------

/// A price measured against a valuation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Discount {
    pub base_value: u64,
    pub price: u64,
    /// `(base - price) / base * 100`. Negative when priced above base.
    pub percent_off: f64,
    /// `base - price` in currency units.
    pub absolute_off: i64,
}

impl Discount {
    /// `None` when there is no positive base value to measure against.
    pub fn measure(base_value: u64, price: u64) -> Option<Self> {
        if base_value == 0 {
            return None;
        }
        let absolute_off = base_value as i64 - price as i64;
        Some(Self {
            base_value,
            price,
            percent_off: absolute_off as f64 / base_value as f64 * 100.0,
            absolute_off,
        })
    }
}

impl fmt::Display for Discount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "base={} price={} off={:.2}% ({} R$)",
            self.base_value, self.price, self.percent_off, self.absolute_off
        )
    }
}

/// Base value for a valuation under the given measurer.
pub fn base_value(measurer: PriceMeasurer, valuation: &ValuationRecord) -> u64 {
    match measurer {
        PriceMeasurer::Value => valuation.value,
        PriceMeasurer::Rap => valuation.rap,
        PriceMeasurer::ValueRap => {
            if valuation.value > 0 {
                valuation.value
            } else {
                valuation.rap
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

/// Why a listing is not a deal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rejection {
    NoValuation,
    Projected,
    NoBaseValue,
    BelowMinPercentOff { percent_off: f64, required: f64 },
    BelowMinRobuxOff { absolute_off: i64, required: i64 },
    AboveMaxCost { price: u64, max: u64 },
    BelowGlobalFilter { percent_off: f64, required: f64 },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::NoValuation => write!(f, "no valuation"),
            Rejection::Projected => write!(f, "projected"),
            Rejection::NoBaseValue => write!(f, "no base value"),
            Rejection::BelowMinPercentOff { percent_off, required } => {
                write!(f, "{percent_off:.2}% off < {required}% minimum")
            }
            Rejection::BelowMinRobuxOff { absolute_off, required } => {
                write!(f, "{absolute_off} R$ off < {required} R$ minimum")
            }
            Rejection::AboveMaxCost { price, max } => write!(f, "price {price} > max {max}"),
            Rejection::BelowGlobalFilter { percent_off, required } => {
                write!(f, "{percent_off:.2}% off < global filter {required}%")
            }
        }
    }
}

/// Outcome of evaluating one listing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    Deal(Discount),
    Rejected(Rejection),
}

impl Verdict {
    pub fn is_deal(&self) -> bool {
        matches!(self, Verdict::Deal(_))
    }
}

/// Evaluate a listing at `price`.
///
/// `global_min_percent_off` applies on top of the item's thresholds.
pub fn evaluate(
    price: u64,
    valuation: Option<&ValuationRecord>,
    thresholds: &DealThresholds,
    global_min_percent_off: Option<f64>,
) -> Verdict {
    let Some(valuation) = valuation else {
        return Verdict::Rejected(Rejection::NoValuation);
    };
    if valuation.projected {
        return Verdict::Rejected(Rejection::Projected);
    }

    let base = base_value(thresholds.price_measurer, valuation);
    let Some(discount) = Discount::measure(base, price) else {
        return Verdict::Rejected(Rejection::NoBaseValue);
    };

    if let Some(required) = thresholds.min_percentage_off {
        if discount.percent_off < required {
            return Verdict::Rejected(Rejection::BelowMinPercentOff {
                percent_off: discount.percent_off,
                required,
            });
        }
    }
    if let Some(required) = thresholds.min_robux_off {
        if discount.absolute_off < required {
            return Verdict::Rejected(Rejection::BelowMinRobuxOff {
                absolute_off: discount.absolute_off,
                required,
            });
        }
    }
    if let Some(max) = thresholds.max_robux_cost {
        if price > max {
            return Verdict::Rejected(Rejection::AboveMaxCost { price, max });
        }
    }
    if let Some(verdict) = global_filter(&discount, global_min_percent_off) {
        return verdict;
    }

    debug!(%discount, measurer = %thresholds.price_measurer, "Deal found");
    Verdict::Deal(discount)
}

/// Re-apply only the global floor, e.g. against a live quote.
pub fn passes_global_filter(discount: &Discount, global_min_percent_off: Option<f64>) -> bool {
    global_filter(discount, global_min_percent_off).is_none()
}

fn global_filter(discount: &Discount, global_min_percent_off: Option<f64>) -> Option<Verdict> {
    let required = global_min_percent_off?;
    (discount.percent_off < required).then_some(Verdict::Rejected(Rejection::BelowGlobalFilter {
        percent_off: discount.percent_off,
        required,
    }))
}

/// Boolean form of [`evaluate`].
pub fn is_eligible(
    price: u64,
    valuation: Option<&ValuationRecord>,
    thresholds: &DealThresholds,
    global_min_percent_off: Option<f64>,
) -> bool {
    evaluate(price, valuation, thresholds, global_min_percent_off).is_deal()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn valuation(value: u64, rap: u64) -> ValuationRecord {
        ValuationRecord {
            value,
            rap,
            projected: false,
        }
    }

    fn min_pct(pct: f64) -> DealThresholds {
        DealThresholds {
            min_percentage_off: Some(pct),
            ..DealThresholds::default()
        }
    }

    #[test]
    fn test_value_rap_falls_back_to_rap() {
        // item 12345: rap 1000, no value, listed at 600
        let v = valuation(0, 1000);
        let Verdict::Deal(d) = evaluate(600, Some(&v), &min_pct(20.0), None) else {
            panic!("expected deal");
        };
        assert_eq!(d.base_value, 1000);
        assert!((d.percent_off - 40.0).abs() < 1e-9);
        assert_eq!(d.absolute_off, 400);

        assert!(!is_eligible(600, Some(&v), &min_pct(50.0), None));
    }

    #[test]
    fn test_measurer_selection() {
        let v = valuation(2000, 1000);
        assert_eq!(base_value(PriceMeasurer::Value, &v), 2000);
        assert_eq!(base_value(PriceMeasurer::Rap, &v), 1000);
        assert_eq!(base_value(PriceMeasurer::ValueRap, &v), 2000);
    }

    #[test]
    fn test_projected_always_rejected() {
        let mut v = valuation(10_000, 10_000);
        v.projected = true;
        for price in [0, 1, 500, 9_999] {
            assert_eq!(
                evaluate(price, Some(&v), &DealThresholds::default(), None),
                Verdict::Rejected(Rejection::Projected)
            );
        }
    }

    #[test]
    fn test_missing_valuation_and_zero_base() {
        assert_eq!(
            evaluate(10, None, &DealThresholds::default(), None),
            Verdict::Rejected(Rejection::NoValuation)
        );
        let thresholds = DealThresholds {
            price_measurer: PriceMeasurer::Value,
            ..DealThresholds::default()
        };
        assert_eq!(
            evaluate(10, Some(&valuation(0, 500)), &thresholds, None),
            Verdict::Rejected(Rejection::NoBaseValue)
        );
    }

    #[test]
    fn test_robux_off_and_max_cost() {
        let v = valuation(1000, 0);
        let t = DealThresholds {
            min_robux_off: Some(300),
            ..DealThresholds::default()
        };
        assert!(is_eligible(700, Some(&v), &t, None));
        assert!(matches!(
            evaluate(750, Some(&v), &t, None),
            Verdict::Rejected(Rejection::BelowMinRobuxOff { absolute_off: 250, required: 300 })
        ));

        let t = DealThresholds {
            max_robux_cost: Some(500),
            ..DealThresholds::default()
        };
        assert!(is_eligible(500, Some(&v), &t, None));
        assert!(matches!(
            evaluate(501, Some(&v), &t, None),
            Verdict::Rejected(Rejection::AboveMaxCost { price: 501, max: 500 })
        ));
    }

    #[test]
    fn test_global_filter_applies_after_thresholds() {
        let v = valuation(1000, 0);
        assert!(is_eligible(800, Some(&v), &DealThresholds::default(), None));
        assert!(matches!(
            evaluate(800, Some(&v), &DealThresholds::default(), Some(25.0)),
            Verdict::Rejected(Rejection::BelowGlobalFilter { .. })
        ));
        assert!(is_eligible(700, Some(&v), &DealThresholds::default(), Some(25.0)));
    }

    #[test]
    fn test_above_base_is_negative_discount() {
        let d = Discount::measure(100, 150).unwrap();
        assert!((d.percent_off + 50.0).abs() < 1e-9);
        assert_eq!(d.absolute_off, -50);
        assert!(!is_eligible(150, Some(&valuation(100, 0)), &min_pct(0.0), None));
    }

    #[test]
    fn test_monotonic_in_min_percent_off() {
        let v = valuation(1000, 800);
        for price in (0..=1200).step_by(37) {
            let mut was_eligible = true;
            for pct in (0..=100).step_by(5) {
                let eligible = is_eligible(price, Some(&v), &min_pct(pct as f64), None);
                assert!(
                    !(eligible && !was_eligible),
                    "price {price}: raising min to {pct}% made an item eligible again"
                );
                was_eligible = eligible;
            }
        }
    }

    #[test]
    fn test_passes_global_filter() {
        let d = Discount::measure(1000, 900).unwrap();
        assert!(passes_global_filter(&d, None));
        assert!(passes_global_filter(&d, Some(10.0)));
        assert!(!passes_global_filter(&d, Some(10.5)));
    }
}
