//! Pricing policy: stop/target prices, order sizing, and display metrics.
//!
//! Everything here is a pure function over `Decimal` so the engine's numbers
//! never touch floating point.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

/// Quantity precision accepted by the exchange (fractional digits).
pub const AMOUNT_PRECISION: u32 = 8;

/// Truncate an amount to the exchange's quantity precision.
pub fn quantize(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(AMOUNT_PRECISION, RoundingStrategy::ToZero)
}

/// Trailing stop price for a given market price.
pub fn stop_price(price: Decimal, trailing_stop_percent: Decimal) -> Decimal {
    price * (Decimal::ONE - trailing_stop_percent)
}

/// Limit price for a profit target.
pub fn target_price(purchase_price: Decimal, profit_percent: Decimal) -> Decimal {
    purchase_price * (Decimal::ONE + profit_percent)
}

/// Base-asset amount to sell for a profit target.
pub fn sell_amount(purchase_amount: Decimal, sell_percent: Decimal) -> Decimal {
    quantize(purchase_amount * sell_percent)
}

/// Base-asset amount to buy for a given quote spend, with slippage headroom
/// subtracted so the order survives price movement between quote and fill.
pub fn buy_amount(quote_spend: Decimal, last_price: Decimal, slippage_tolerance: Decimal) -> Decimal {
    quantize((quote_spend / last_price) * (Decimal::ONE - slippage_tolerance))
}

/// Unrealized profit of the position as a percentage. Display only.
pub fn current_profit_percent(last_price: Decimal, purchase_price: Decimal) -> Decimal {
    (last_price - purchase_price) / purchase_price * dec!(100)
}

/// Profit already guaranteed by how far the stop has ratcheted above its
/// initial value, beyond the trailing distance itself. Zero until the stop
/// has moved more than the trailing distance. Display only.
pub fn locked_in_profit_percent(
    initial_stop: Decimal,
    current_stop: Decimal,
    trailing_stop_percent: Decimal,
) -> Decimal {
    let stop_move_pct = (current_stop - initial_stop) / initial_stop * dec!(100);
    let trailing_distance_pct = trailing_stop_percent * dec!(100);

    if stop_move_pct > trailing_distance_pct {
        stop_move_pct - trailing_distance_pct
    } else {
        Decimal::ZERO
    }
}
