//! Pure, stateless ratio-curve mathematics: the target cash fraction for a
//! given (price, pivot) pair, and the signed rebalancing notional implied by
//! a balance snapshot sitting off that curve.
//!
//! Ratio math is allowed to use `f64` (no ordering-relevant equality is
//! derived from it); all price arithmetic elsewhere stays `Decimal`.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;

pub const RATIO_FLOOR: f64 = 0.0;
pub const RATIO_CEILING: f64 = 0.875;

/// Minimum quote-currency order size the exchange (and the engine's own
/// order search) will accept.
pub const MIN_NOTIONAL: Decimal = dec!(5000);

/// Minimum relative distance from the anchor a paired order must clear
/// before it is considered worth placing.
pub const PROFIT_THRESHOLD: Decimal = dec!(0.005);

/// Target cash fraction of total portfolio value at `price` given `pivot`.
/// Monotone non-increasing in `price/pivot`, clamped to `[0, 0.875]`.
pub fn ratio(price: f64, pivot: f64) -> f64 {
    let r = if price >= pivot {
        let delta = price / pivot - 1.0;
        1.0 - 0.5 * 2f64.powf(-2.0 * delta)
    } else {
        let delta = pivot / price - 1.0;
        0.5 * 2f64.powf(-delta)
    };
    r.clamp(RATIO_FLOOR, RATIO_CEILING)
}

/// Signed quote-currency notional needed to restore the ratio curve at
/// `price`: positive means buy that much, negative means sell its absolute
/// value.
pub fn volume(cash: Decimal, quantity: Decimal, price: Decimal, pivot: Decimal) -> Decimal {
    let price_f = price.to_f64().unwrap_or(0.0);
    let pivot_f = pivot.to_f64().unwrap_or(0.0);
    let r = ratio(price_f, pivot_f);

    let value = quantity * price + cash;
    value_times_ratio(value, r).map(|scaled| cash - scaled).unwrap_or(cash)
}

fn value_times_ratio(value: Decimal, r: f64) -> Option<Decimal> {
    rust_decimal::Decimal::from_f64_retain(r).map(|r_dec| value * r_dec)
}

/// Clamps `pivot` to within one octave of `anchor`, halving/doubling it as
/// needed. A no-op once `pivot` is already in range, so reapplying this to
/// its own output always returns the same value.
pub fn next_pivot(anchor: Decimal, pivot: Decimal) -> Decimal {
    if anchor >= pivot * Decimal::TWO {
        anchor / Decimal::TWO
    } else if pivot >= anchor * Decimal::TWO {
        anchor * Decimal::TWO
    } else {
        pivot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn ratio_at_pivot_is_one_half() {
        assert!((ratio(1_000.0, 1_000.0) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn ratio_is_bounded() {
        for (price, pivot) in [
            (1.0, 1_000.0),
            (1_000.0, 1.0),
            (1e9, 1.0),
            (1.0, 1e9),
            (500.0, 500.0),
        ] {
            let r = ratio(price, pivot);
            assert!((0.0..=0.875).contains(&r), "ratio({price},{pivot})={r}");
        }
    }

    #[test]
    fn ratio_is_monotone_non_increasing_in_price() {
        let pivot = 1_000.0;
        let prices = [10.0, 100.0, 500.0, 999.0, 1_000.0, 1_001.0, 5_000.0, 50_000.0];
        for window in prices.windows(2) {
            assert!(
                ratio(window[0], pivot) >= ratio(window[1], pivot),
                "ratio not monotone between {} and {}",
                window[0],
                window[1]
            );
        }
    }

    #[test]
    fn ratio_approaches_extremes() {
        assert!(ratio(0.000001, 1_000.0) > 0.87);
        assert!(ratio(1e12, 1_000.0) < 0.01);
    }

    #[test]
    fn volume_at_pivot_matches_closed_form() {
        let cash = dec!(300_000);
        let qty = dec!(300);
        let pivot = dec!(1_000);
        let v = volume(cash, qty, pivot, pivot);
        let expected = cash - (cash + qty * pivot) * dec!(0.5);
        assert_eq!(v, expected);
    }

    #[test]
    fn volume_is_zero_when_already_on_the_curve() {
        // cash=300_000, qty=300, price=pivot=1_000 -> value=600_000, ratio=0.5
        let v = volume(dec!(300_000), dec!(300), dec!(1_000), dec!(1_000));
        assert_eq!(v, Decimal::ZERO);
    }

    #[test]
    fn volume_positive_means_buy_negative_means_sell() {
        // All cash, no asset: engine should sell nothing, buy into the asset.
        let v = volume(dec!(600_000), dec!(0), dec!(1_000), dec!(1_000));
        assert!(v > Decimal::ZERO);

        // All asset, no cash: engine should sell some asset for cash.
        let v = volume(dec!(0), dec!(600), dec!(1_000), dec!(1_000));
        assert!(v < Decimal::ZERO);
    }

    #[test]
    fn next_pivot_clamps_to_one_octave() {
        assert_eq!(next_pivot(dec!(3_000), dec!(1_000)), dec!(1_500));
        assert_eq!(next_pivot(dec!(1_000), dec!(3_000)), dec!(2_000));
        assert_eq!(next_pivot(dec!(1_200), dec!(1_000)), dec!(1_000));
    }

    #[test]
    fn next_pivot_is_idempotent() {
        let anchor = dec!(3_000);
        let once = next_pivot(anchor, dec!(1_000));
        let twice = next_pivot(anchor, once);
        assert_eq!(once, twice, "reapplying the clamp to its own output must be a no-op");
    }
}
