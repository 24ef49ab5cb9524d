use crate::error::LedgerError;
use core_types::OrderSide;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The sign of a position's quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Long,
    Short,
    Flat,
}

impl Direction {
    pub fn of(qty: Decimal) -> Self {
        if qty > Decimal::ZERO {
            Direction::Long
        } else if qty < Decimal::ZERO {
            Direction::Short
        } else {
            Direction::Flat
        }
    }
}

/// The accounting state of one open position. Quantity is signed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionState {
    pub qty: Decimal,
    pub avg_cost: Decimal,
    pub total_cost: Decimal,
    /// Realized PnL accumulated since this position was opened.
    pub realized_pnl: Decimal,
}

/// One executed fill, quantity as a positive magnitude plus a side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub side: OrderSide,
    pub qty: Decimal,
    pub price: Decimal,
    pub commission: Decimal,
}

impl Fill {
    /// Signed quantity: positive for a buy, negative for a sell.
    pub fn signed_qty(&self) -> Decimal {
        match self.side {
            OrderSide::Buy => self.qty,
            OrderSide::Sell => -self.qty,
        }
    }
}

/// The closing leg of a reducing, closing, or flipping fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedLeg {
    /// Units closed (positive magnitude).
    pub qty: Decimal,
    /// Commission attributed pro-rata to the closing quantity.
    pub commission: Decimal,
    /// Realized PnL for this close, net of its commission share.
    pub realized: Decimal,
}

/// What a fill did to the position it was applied against.
#[derive(Debug, Clone, PartialEq)]
pub enum TradeOutcome {
    /// No prior position (or a flat one): a new position was opened.
    Opened { state: PositionState },
    /// Same-direction fill: quantity and cost basis grew, nothing realized.
    Increased { state: PositionState },
    /// Opposing fill smaller than the position: partial close. Average cost
    /// is untouched; only quantity and realized PnL move.
    Reduced {
        state: PositionState,
        closed: ClosedLeg,
    },
    /// Opposing fill exactly consuming the position. `state.qty` is zero and
    /// `state.realized_pnl` holds the lifetime realized total for archiving.
    Closed {
        state: PositionState,
        closed: ClosedLeg,
    },
    /// Opposing fill larger than the position: the old position closes on
    /// exactly its prior quantity and the remainder opens a brand-new
    /// position at the fill price. One input fill, two trade records.
    Flipped {
        closed_state: PositionState,
        closed: ClosedLeg,
        opened_state: PositionState,
        /// Commission attributed pro-rata to the opening quantity.
        open_commission: Decimal,
    },
}

fn validate(fill: &Fill) -> Result<(), LedgerError> {
    if fill.qty <= Decimal::ZERO {
        return Err(LedgerError::NonPositiveQuantity(fill.qty));
    }
    if fill.price <= Decimal::ZERO {
        return Err(LedgerError::NonPositivePrice(fill.price));
    }
    if fill.commission < Decimal::ZERO {
        return Err(LedgerError::NegativeCommission(fill.commission));
    }
    Ok(())
}

fn open_state(signed_qty: Decimal, price: Decimal, commission: Decimal) -> PositionState {
    let total_cost = signed_qty * price + commission;
    PositionState {
        qty: signed_qty,
        avg_cost: total_cost / signed_qty,
        total_cost,
        realized_pnl: Decimal::ZERO,
    }
}

/// Realized PnL for closing `close_qty` units against `avg_cost` at `price`,
/// before commission.
fn realized_for_close(
    avg_cost: Decimal,
    price: Decimal,
    close_qty: Decimal,
    direction: Direction,
) -> Decimal {
    match direction {
        Direction::Short => (avg_cost - price) * close_qty,
        // A flat position cannot reach here; treat it as long for symmetry.
        Direction::Long | Direction::Flat => (price - avg_cost) * close_qty,
    }
}

/// Applies one fill to a position (or to nothing) and reports the transition.
///
/// This is the whole accounting engine. The caller decides what to do with
/// the outcome: persist trade records, upsert or archive cached positions,
/// subscribe valuations. Zero or negative quantity/price is an error, never
/// silently accepted.
pub fn apply_fill(
    position: Option<&PositionState>,
    fill: &Fill,
) -> Result<TradeOutcome, LedgerError> {
    validate(fill)?;

    let signed_qty = fill.signed_qty();

    let prior = match position {
        Some(state) if !state.qty.is_zero() => state,
        // No position, or a flat leftover: this fill opens fresh.
        _ => {
            return Ok(TradeOutcome::Opened {
                state: open_state(signed_qty, fill.price, fill.commission),
            });
        }
    };

    let direction = Direction::of(prior.qty);

    if direction == Direction::of(signed_qty) {
        // Same direction: accumulate cost basis across the combined quantity.
        let total_cost = prior.total_cost + signed_qty * fill.price + fill.commission;
        let qty = prior.qty + signed_qty;
        return Ok(TradeOutcome::Increased {
            state: PositionState {
                qty,
                avg_cost: total_cost / qty,
                total_cost,
                realized_pnl: prior.realized_pnl,
            },
        });
    }

    // Opposing direction: close up to the position's full quantity. The
    // commission splits pro-rata over closing vs. opening quantity; multiply
    // before dividing so exact ratios stay exact in decimal arithmetic.
    let close_qty = signed_qty.abs().min(prior.qty.abs());
    let commission_close = fill.commission * close_qty / signed_qty.abs();
    let commission_open = fill.commission - commission_close;

    let realized_close = realized_for_close(prior.avg_cost, fill.price, close_qty, direction);
    let realized_trade = realized_close - commission_close;
    let realized_total = prior.realized_pnl + realized_trade;

    let closed = ClosedLeg {
        qty: close_qty,
        commission: commission_close,
        realized: realized_trade,
    };

    let remaining_qty = prior.qty + signed_qty;

    if remaining_qty.is_zero() {
        return Ok(TradeOutcome::Closed {
            state: PositionState {
                qty: Decimal::ZERO,
                avg_cost: prior.avg_cost,
                total_cost: Decimal::ZERO,
                realized_pnl: realized_total,
            },
            closed,
        });
    }

    if Direction::of(remaining_qty) == direction {
        // Partial close: cost basis per unit is unchanged.
        return Ok(TradeOutcome::Reduced {
            state: PositionState {
                qty: remaining_qty,
                avg_cost: prior.avg_cost,
                total_cost: prior.avg_cost * remaining_qty,
                realized_pnl: realized_total,
            },
            closed,
        });
    }

    // Direction flip: the old position is consumed entirely and the excess
    // opens a new one at the fill price, carrying the opening commission.
    let closed_state = PositionState {
        qty: prior.qty,
        avg_cost: prior.avg_cost,
        total_cost: prior.total_cost,
        realized_pnl: realized_total,
    };
    let opened_state = open_state(remaining_qty, fill.price, commission_open);

    Ok(TradeOutcome::Flipped {
        closed_state,
        closed,
        opened_state,
        open_commission: commission_open,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn buy(qty: Decimal, price: Decimal, commission: Decimal) -> Fill {
        Fill {
            side: OrderSide::Buy,
            qty,
            price,
            commission,
        }
    }

    fn sell(qty: Decimal, price: Decimal, commission: Decimal) -> Fill {
        Fill {
            side: OrderSide::Sell,
            qty,
            price,
            commission,
        }
    }

    #[test]
    fn rejects_zero_quantity_and_zero_price() {
        assert_eq!(
            apply_fill(None, &buy(dec!(0), dec!(10), dec!(0))),
            Err(LedgerError::NonPositiveQuantity(dec!(0)))
        );
        assert_eq!(
            apply_fill(None, &buy(dec!(1), dec!(0), dec!(0))),
            Err(LedgerError::NonPositivePrice(dec!(0)))
        );
    }

    #[test]
    fn opening_long_includes_commission_in_cost_basis() {
        let state = match apply_fill(None, &buy(dec!(10), dec!(100), dec!(1))).unwrap() {
            TradeOutcome::Opened { state } => state,
            other => panic!("expected Opened, got {other:?}"),
        };
        assert_eq!(state.qty, dec!(10));
        assert_eq!(state.avg_cost, dec!(100.1));
        assert_eq!(state.total_cost, dec!(1001));
        assert_eq!(state.realized_pnl, dec!(0));
    }

    #[test]
    fn same_direction_adds_keep_realized_at_zero() {
        // avg_cost must stay equal to total signed cost over total signed qty
        // for any same-direction sequence.
        let mut state = match apply_fill(None, &buy(dec!(10), dec!(100), dec!(1))).unwrap() {
            TradeOutcome::Opened { state } => state,
            other => panic!("expected Opened, got {other:?}"),
        };
        for (qty, price) in [(dec!(5), dec!(110)), (dec!(20), dec!(95))] {
            state = match apply_fill(Some(&state), &buy(qty, price, dec!(1))).unwrap() {
                TradeOutcome::Increased { state } => state,
                other => panic!("expected Increased, got {other:?}"),
            };
            assert_eq!(state.realized_pnl, dec!(0));
            assert_eq!(state.avg_cost, state.total_cost / state.qty);
        }
        assert_eq!(state.qty, dec!(35));
        // 1001 + 551 + 1901 = 3453
        assert_eq!(state.total_cost, dec!(3453));
    }

    #[test]
    fn full_close_realizes_spread_minus_commission() {
        // Open long 10 @ 100 (commission 1) -> avg 100.1. Sell 10 @ 110
        // (commission 1) -> realized (110 - 100.1) * 10 - 1 = 98.
        let state = match apply_fill(None, &buy(dec!(10), dec!(100), dec!(1))).unwrap() {
            TradeOutcome::Opened { state } => state,
            other => panic!("expected Opened, got {other:?}"),
        };
        let (state, closed) = match apply_fill(Some(&state), &sell(dec!(10), dec!(110), dec!(1))).unwrap()
        {
            TradeOutcome::Closed { state, closed } => (state, closed),
            other => panic!("expected Closed, got {other:?}"),
        };
        assert_eq!(state.qty, dec!(0));
        assert_eq!(state.realized_pnl, dec!(98));
        assert_eq!(closed.qty, dec!(10));
        assert_eq!(closed.realized, dec!(98));
        assert_eq!(closed.commission, dec!(1));
    }

    #[test]
    fn partial_close_leaves_avg_cost_untouched() {
        let state = match apply_fill(None, &buy(dec!(10), dec!(100), dec!(1))).unwrap() {
            TradeOutcome::Opened { state } => state,
            other => panic!("expected Opened, got {other:?}"),
        };
        let (state, closed) = match apply_fill(Some(&state), &sell(dec!(4), dec!(105), dec!(1))).unwrap()
        {
            TradeOutcome::Reduced { state, closed } => (state, closed),
            other => panic!("expected Reduced, got {other:?}"),
        };
        assert_eq!(state.qty, dec!(6));
        assert_eq!(state.avg_cost, dec!(100.1));
        // (105 - 100.1) * 4 - 1 = 18.6
        assert_eq!(closed.realized, dec!(18.6));
        assert_eq!(state.realized_pnl, dec!(18.6));
    }

    #[test]
    fn flip_splits_commission_pro_rata_and_opens_short() {
        // Long 10 @ 100, then sell 15 @ 110 with commission 1.5: the closing
        // 10 units carry 1.0 of commission, the opening 5 carry 0.5.
        let state = match apply_fill(None, &buy(dec!(10), dec!(100), dec!(0))).unwrap() {
            TradeOutcome::Opened { state } => state,
            other => panic!("expected Opened, got {other:?}"),
        };
        let (closed_state, closed, opened_state, open_commission) =
            match apply_fill(Some(&state), &sell(dec!(15), dec!(110), dec!(1.5))).unwrap() {
                TradeOutcome::Flipped {
                    closed_state,
                    closed,
                    opened_state,
                    open_commission,
                } => (closed_state, closed, opened_state, open_commission),
                other => panic!("expected Flipped, got {other:?}"),
            };
        assert_eq!(closed.qty, dec!(10));
        assert_eq!(closed.commission, dec!(1.0));
        // (110 - 100) * 10 - 1 = 99
        assert_eq!(closed.realized, dec!(99));
        assert_eq!(closed_state.realized_pnl, dec!(99));
        assert_eq!(open_commission, dec!(0.5));
        assert_eq!(opened_state.qty, dec!(-5));
        // -5 * 110 + 0.5 = -549.5; avg = -549.5 / -5 = 109.9
        assert_eq!(opened_state.total_cost, dec!(-549.5));
        assert_eq!(opened_state.avg_cost, dec!(109.9));
        assert_eq!(opened_state.realized_pnl, dec!(0));
    }

    #[test]
    fn short_positions_realize_inverted_spread() {
        let state = match apply_fill(None, &sell(dec!(10), dec!(50), dec!(0))).unwrap() {
            TradeOutcome::Opened { state } => state,
            other => panic!("expected Opened, got {other:?}"),
        };
        assert_eq!(state.qty, dec!(-10));
        let state = match apply_fill(Some(&state), &buy(dec!(10), dec!(45), dec!(0))).unwrap() {
            TradeOutcome::Closed { state, .. } => state,
            other => panic!("expected Closed, got {other:?}"),
        };
        // (50 - 45) * 10 = 50
        assert_eq!(state.realized_pnl, dec!(50));
    }

    #[test]
    fn flat_leftover_state_opens_fresh() {
        let flat = PositionState {
            qty: Decimal::ZERO,
            avg_cost: dec!(99),
            total_cost: Decimal::ZERO,
            realized_pnl: dec!(12),
        };
        let outcome = apply_fill(Some(&flat), &buy(dec!(1), dec!(10), dec!(0))).unwrap();
        assert!(matches!(outcome, TradeOutcome::Opened { .. }));
    }
}
