//! Maps a price to the exchange's tick-size grid and walks it with
//! decimal-exact arithmetic (no binary floating-point drift).

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PriceGridError {
    #[error("price must be positive")]
    InvalidPrice,
}

/// ε used to shift a price down across a band boundary before computing the
/// tick to subtract in `prev`. Without the shift, `prev(100)` would use the
/// tick of the `[100, ...)` band (`0.1`) instead of the `[10, 100)` band
/// (`0.01`) that `99.99` actually lives in.
const EPSILON: Decimal = dec!(0.000001);

/// Returns the tick size for the band containing `price`.
pub fn step(price: Decimal) -> Result<Decimal, PriceGridError> {
    if price <= Decimal::ZERO {
        return Err(PriceGridError::InvalidPrice);
    }

    let tick = if price >= dec!(2_000_000) {
        dec!(1_000)
    } else if price >= dec!(1_000_000) {
        dec!(500)
    } else if price >= dec!(500_000) {
        dec!(100)
    } else if price >= dec!(100_000) {
        dec!(50)
    } else if price >= dec!(10_000) {
        dec!(10)
    } else if price >= dec!(1_000) {
        dec!(1)
    } else if price >= dec!(100) {
        dec!(0.1)
    } else if price >= dec!(10) {
        dec!(0.01)
    } else if price >= dec!(1) {
        dec!(0.001)
    } else if price >= dec!(0.1) {
        dec!(0.0001)
    } else if price >= dec!(0.01) {
        dec!(0.00001)
    } else if price >= dec!(0.001) {
        dec!(0.000001)
    } else if price >= dec!(0.0001) {
        dec!(0.0000001)
    } else {
        dec!(0.00000001)
    };

    Ok(tick)
}

/// The next valid price above `price` on the grid.
pub fn next(price: Decimal) -> Result<Decimal, PriceGridError> {
    let tick = step(price)?;
    Ok(price + tick)
}

/// The previous valid price below `price` on the grid, using the lower
/// band's tick when `price` sits exactly on a boundary.
pub fn prev(price: Decimal) -> Result<Decimal, PriceGridError> {
    if price <= Decimal::ZERO {
        return Err(PriceGridError::InvalidPrice);
    }
    let tick = step(price - EPSILON)?;
    Ok(price - tick)
}
