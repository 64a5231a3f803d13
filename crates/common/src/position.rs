use serde::{Deserialize, Serialize};

use crate::{OrderSide, PositionSide, Side};

/// Volumes below this are treated as zero.
const VOLUME_EPSILON: f64 = 1e-12;

/// Net exposure in one instrument.
///
/// `volume > 0` exactly when `side != Flat`; `entry_price` is the
/// volume-weighted acquisition price and is `None` while flat or while no
/// fill price has been reported yet.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub side: PositionSide,
    pub volume: f64,
    pub entry_price: Option<f64>,
}

/// What a fill did to the position.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FillOutcome {
    /// Volume taken off the previous exposure.
    pub reduced: f64,
    /// PnL of the reduced part, when both prices were known.
    pub realized_pnl: f64,
    /// The position went from non-flat to flat.
    pub closed: bool,
    /// The fill overshot the previous exposure and opened the other side.
    pub flipped: bool,
    /// A new position was started from flat (or by the flip).
    pub opened: bool,
}

impl Position {
    pub fn is_flat(&self) -> bool {
        self.side == PositionSide::Flat
    }

    /// Signed exposure: positive for Long, negative for Short.
    pub fn net_volume(&self) -> f64 {
        match self.side.as_side() {
            Some(side) => side.sign() * self.volume,
            None => 0.0,
        }
    }

    /// Apply one fill. A zero `price` means the venue did not report one.
    pub fn apply_fill(&mut self, order_side: OrderSide, volume: f64, price: f64) -> FillOutcome {
        let mut outcome = FillOutcome::default();
        if volume <= VOLUME_EPSILON {
            return outcome;
        }
        let fill_side = order_side.as_side();
        let known_price = (price > 0.0).then_some(price);

        match self.side.as_side() {
            None => {
                self.open(fill_side, volume, known_price);
                outcome.opened = true;
            }
            Some(side) if side == fill_side => {
                self.entry_price = match (self.entry_price, known_price) {
                    (Some(entry), Some(px)) => {
                        Some((entry * self.volume + px * volume) / (self.volume + volume))
                    }
                    (entry, px) => entry.or(px),
                };
                self.volume += volume;
            }
            Some(side) => {
                let reduced = volume.min(self.volume);
                if let (Some(entry), Some(px)) = (self.entry_price, known_price) {
                    outcome.realized_pnl = (px - entry) * side.sign() * reduced;
                }
                outcome.reduced = reduced;

                let overshoot = volume - self.volume;
                if overshoot > VOLUME_EPSILON {
                    self.open(fill_side, overshoot, known_price);
                    outcome.flipped = true;
                    outcome.opened = true;
                    outcome.closed = true;
                } else {
                    self.volume -= reduced;
                    if self.volume <= VOLUME_EPSILON {
                        *self = Position::default();
                        outcome.closed = true;
                    }
                }
            }
        }
        outcome
    }

    fn open(&mut self, side: Side, volume: f64, price: Option<f64>) {
        self.side = side.into();
        self.volume = volume;
        self.entry_price = price;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_invariant(p: &Position) {
        assert_eq!(p.volume > 0.0, p.side != PositionSide::Flat, "{p:?}");
    }

    #[test]
    fn first_fill_opens_position() {
        let mut p = Position::default();
        let out = p.apply_fill(OrderSide::Buy, 2.0, 100.0);
        assert!(out.opened);
        assert_eq!(p.side, PositionSide::Long);
        assert_eq!(p.volume, 2.0);
        assert_eq!(p.entry_price, Some(100.0));
        assert_invariant(&p);
    }

    #[test]
    fn same_side_add_averages_entry() {
        let mut p = Position::default();
        p.apply_fill(OrderSide::Buy, 1.0, 100.0);
        p.apply_fill(OrderSide::Buy, 3.0, 104.0);
        assert_eq!(p.volume, 4.0);
        assert_eq!(p.entry_price, Some(103.0));
    }

    #[test]
    fn reducing_fill_realizes_pnl() {
        let mut p = Position::default();
        p.apply_fill(OrderSide::Sell, 2.0, 100.0);
        let out = p.apply_fill(OrderSide::Buy, 1.0, 90.0);
        assert_eq!(out.realized_pnl, 10.0);
        assert!(!out.closed);
        assert_eq!(p.side, PositionSide::Short);
        assert_eq!(p.volume, 1.0);
    }

    #[test]
    fn full_reduce_goes_flat() {
        let mut p = Position::default();
        p.apply_fill(OrderSide::Buy, 1.0, 100.0);
        let out = p.apply_fill(OrderSide::Sell, 1.0, 95.0);
        assert!(out.closed);
        assert_eq!(out.realized_pnl, -5.0);
        assert_eq!(p, Position::default());
        assert_invariant(&p);
    }

    #[test]
    fn overshoot_flips_and_resets_entry() {
        let mut p = Position::default();
        p.apply_fill(OrderSide::Sell, 2.0, 100.0);
        let out = p.apply_fill(OrderSide::Buy, 3.0, 98.0);
        assert!(out.flipped);
        assert_eq!(out.reduced, 2.0);
        assert_eq!(out.realized_pnl, 4.0);
        assert_eq!(p.side, PositionSide::Long);
        assert_eq!(p.volume, 1.0);
        assert_eq!(p.entry_price, Some(98.0));
        assert_eq!(p.net_volume(), 1.0);
    }

    #[test]
    fn missing_price_leaves_entry_unknown_until_next_fill() {
        let mut p = Position::default();
        p.apply_fill(OrderSide::Buy, 1.0, 0.0);
        assert_eq!(p.entry_price, None);
        assert_invariant(&p);
        p.apply_fill(OrderSide::Buy, 1.0, 50.0);
        assert_eq!(p.entry_price, Some(50.0));
    }
}
