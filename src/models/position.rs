//! Position model: the single active trade and its trailing stop.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::trading::pricing;

/// Trailing stop state for an open position.
///
/// The current stop only ever ratchets upward; favorable price movement
/// raises it, adverse movement never lowers it.
#[derive(Debug, Clone)]
pub struct StopState {
    /// Stop price computed from the purchase price
    pub initial: Decimal,

    /// Highest stop price seen so far
    pub current: Decimal,
}

impl StopState {
    pub fn new(initial: Decimal) -> Self {
        Self {
            initial,
            current: initial,
        }
    }

    /// Raise the stop to `candidate` if it is strictly higher.
    /// Returns true when the stop moved.
    pub fn ratchet(&mut self, candidate: Decimal) -> bool {
        if candidate > self.current {
            self.current = candidate;
            true
        } else {
            false
        }
    }

    /// The stop triggers when the latest price is at or below the current
    /// stop. Boundary equality triggers.
    pub fn is_triggered(&self, last_price: Decimal) -> bool {
        last_price <= self.current
    }
}

/// The one active position owned by the trade lifecycle engine.
///
/// Created on a successful market buy, destroyed when the position exits.
/// At most one exists at any time; while it does, new signals are ignored.
#[derive(Debug, Clone)]
pub struct ActivePosition {
    /// Base asset that was bought (e.g., a newly listed token)
    pub base: String,

    /// Exchange symbol for the traded pair
    pub symbol: String,

    /// Fill price of the market buy
    pub purchase_price: Decimal,

    /// Filled base-asset amount
    pub purchase_amount: Decimal,

    /// Trailing stop state
    pub stop: StopState,

    /// Order IDs of the booked profit-target limit sells
    pub target_order_ids: Vec<String>,

    /// When the position was opened
    pub opened_at: DateTime<Utc>,
}

impl ActivePosition {
    pub fn new(
        base: String,
        symbol: String,
        purchase_price: Decimal,
        purchase_amount: Decimal,
        trailing_stop_percent: Decimal,
    ) -> Self {
        let initial_stop = pricing::stop_price(purchase_price, trailing_stop_percent);
        Self {
            base,
            symbol,
            purchase_price,
            purchase_amount,
            stop: StopState::new(initial_stop),
            target_order_ids: Vec::new(),
            opened_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_initial_stop_from_purchase_price() {
        let pos = ActivePosition::new(
            "XYZ".to_string(),
            "XYZBTC".to_string(),
            dec!(100),
            dec!(10),
            dec!(0.1),
        );
        assert_eq!(pos.stop.initial, dec!(90.0));
        assert_eq!(pos.stop.current, dec!(90.0));
    }

    #[test]
    fn test_ratchet_only_moves_up() {
        let mut stop = StopState::new(dec!(90));

        // 95 * 0.9 = 85.5, below the current stop: no move
        assert!(!stop.ratchet(dec!(85.5)));
        assert_eq!(stop.current, dec!(90));

        // 120 * 0.9 = 108: ratchets
        assert!(stop.ratchet(dec!(108)));
        assert_eq!(stop.current, dec!(108));

        // Equal candidate does not count as a move
        assert!(!stop.ratchet(dec!(108)));
        assert_eq!(stop.current, dec!(108));
    }

    #[test]
    fn test_stop_never_decreases_across_volatile_ticks() {
        let mut stop = StopState::new(dec!(90));
        let candidates = [dec!(85), dec!(108), dec!(70), dec!(107.9), dec!(110)];
        let mut high = stop.current;
        for c in candidates {
            stop.ratchet(c);
            assert!(stop.current >= high);
            high = stop.current;
        }
        assert_eq!(stop.current, dec!(110));
    }

    #[test]
    fn test_trigger_boundary_is_inclusive() {
        let stop = StopState::new(dec!(108));
        assert!(stop.is_triggered(dec!(100)));
        assert!(stop.is_triggered(dec!(108)));
        assert!(!stop.is_triggered(dec!(108.00000001)));
    }
}
