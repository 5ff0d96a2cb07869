//! Price arithmetic for funding-window entries and exits.
//!
//! Pure functions over `Decimal`; all venue I/O stays in the engine.

use crate::exchange::OrderSide;
use crate::utils::decimal::round_to_tick;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Bybit v5 trigger direction: order fires when price rises to the trigger.
pub const TRIGGER_ON_RISE: u8 = 1;
/// Bybit v5 trigger direction: order fires when price falls to the trigger.
pub const TRIGGER_ON_FALL: u8 = 2;

/// Entry direction implied by the funding rate.
///
/// Positive funding is paid by longs to shorts, so the base direction is Sell
/// on a positive rate and Buy otherwise. `reverse` flips the decision for the
/// momentum-style variant of the strategy.
pub fn entry_side(funding_rate: Decimal, reverse: bool) -> OrderSide {
    let base = if funding_rate > Decimal::ZERO {
        OrderSide::Sell
    } else {
        OrderSide::Buy
    };
    if reverse {
        base.opposite()
    } else {
        base
    }
}

/// Profit margin in percent applied to the captured price.
///
/// With `include_funding` the margin also covers the settled rate itself, so
/// the close order sits past the expected post-funding reversion.
pub fn profit_margin_pct(
    profit_pct: Decimal,
    funding_rate: Decimal,
    include_funding: bool,
) -> Decimal {
    if include_funding {
        profit_pct + funding_rate.abs() * dec!(100)
    } else {
        profit_pct
    }
}

/// Limit close price for a position entered on `entry_side`.
///
/// A Buy entry closes above the captured price, a Sell entry below; the
/// result is aligned to the instrument tick size.
pub fn limit_close_price(
    captured: Decimal,
    entry_side: OrderSide,
    margin_pct: Decimal,
    tick_size: Decimal,
) -> Decimal {
    let factor = margin_pct / dec!(100);
    let raw = match entry_side {
        OrderSide::Buy => captured * (Decimal::ONE + factor),
        OrderSide::Sell => captured * (Decimal::ONE - factor),
    };
    round_to_tick(raw, tick_size)
}

/// Stop-loss trigger price, mirrored on the losing side of the entry.
pub fn stop_trigger_price(
    captured: Decimal,
    entry_side: OrderSide,
    stop_loss_pct: Decimal,
    tick_size: Decimal,
) -> Decimal {
    let factor = stop_loss_pct / dec!(100);
    let raw = match entry_side {
        OrderSide::Buy => captured * (Decimal::ONE - factor),
        OrderSide::Sell => captured * (Decimal::ONE + factor),
    };
    round_to_tick(raw, tick_size)
}

/// Trigger direction for the stop-loss of a position entered on `entry_side`.
///
/// A long is stopped out on a falling price, a short on a rising one.
pub fn stop_trigger_direction(entry_side: OrderSide) -> u8 {
    match entry_side {
        OrderSide::Buy => TRIGGER_ON_FALL,
        OrderSide::Sell => TRIGGER_ON_RISE,
    }
}
