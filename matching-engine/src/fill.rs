//! Fill arithmetic: compatibility test and residual computation
//!
//! All amounts are `rust_decimal` values; derived amounts are truncated
//! toward zero at [`AMOUNT_SCALE`](crate::types::AMOUNT_SCALE).

use crate::order::{Order, OrderError};
use crate::types::Amount;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FillError {
    #[error("Arithmetic overflow while {0}")]
    Overflow(&'static str),
    #[error(transparent)]
    Order(#[from] OrderError),
}

/// Result of matching one work item against one resting order.
///
/// Persisted as a single unit: both sides marked filled plus the optional child.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    /// The work item being matched, now filled
    pub taker: Order,
    /// The resting order it matched, now filled
    pub maker: Order,
    /// Unmatched remainder of whichever side was larger
    pub child: Option<Order>,
}

/// Whether `existing` can fill `current`.
///
/// Currencies must mirror each other and the resting order's offered rate
/// (`sell / buy`) must be at least the incoming required rate (`buy / sell`).
pub fn is_compatible(current: &Order, existing: &Order) -> bool {
    if existing.is_filled() || existing.id == current.id {
        return false;
    }
    if existing.buy_currency != current.sell_currency || existing.sell_currency != current.buy_currency {
        return false;
    }
    rate_satisfied(current, existing)
}

fn rate_satisfied(current: &Order, existing: &Order) -> bool {
    let (e_sell, e_buy) = (existing.sell_amount.as_decimal(), existing.buy_amount.as_decimal());
    let (c_sell, c_buy) = (current.sell_amount.as_decimal(), current.buy_amount.as_decimal());

    // e_sell / e_buy >= c_buy / c_sell, all amounts positive
    match (e_sell.checked_mul(c_sell), c_buy.checked_mul(e_buy)) {
        (Some(offered), Some(required)) => offered >= required,
        _ => match (e_sell.checked_div(e_buy), c_buy.checked_div(c_sell)) {
            (Some(offered), Some(required)) => offered >= required,
            _ => false,
        },
    }
}

/// Resolve a match between `current` and a compatible `existing` order.
pub fn resolve(current: &Order, existing: &Order, at: DateTime<Utc>) -> Result<Fill, FillError> {
    let mut taker = current.clone();
    let mut maker = existing.clone();
    taker.mark_filled(existing.id, at)?;
    maker.mark_filled(current.id, at)?;

    let wanted = current.buy_amount.as_decimal();
    let offered = existing.sell_amount.as_decimal();

    let child = if wanted < offered {
        // resting order over-supplies; remainder priced at its own rate
        let remaining_sell = offered - wanted;
        let remaining_buy = scale_by_rate(remaining_sell, existing.buy_amount, existing.sell_amount)?;
        spawn_residual(existing, Amount::truncated(remaining_buy), Amount::truncated(remaining_sell))?
    } else if wanted > offered {
        let remaining_buy = wanted - offered;
        let remaining_sell = scale_by_rate(remaining_buy, current.sell_amount, current.buy_amount)?;
        spawn_residual(current, Amount::truncated(remaining_buy), Amount::truncated(remaining_sell))?
    } else {
        None
    };

    Ok(Fill { taker, maker, child })
}

/// `value * numerator / denominator`, dividing first when the product overflows
fn scale_by_rate(value: Decimal, numerator: Amount, denominator: Amount) -> Result<Decimal, FillError> {
    let (num, den) = (numerator.as_decimal(), denominator.as_decimal());
    if let Some(product) = value.checked_mul(num) {
        return product
            .checked_div(den)
            .ok_or(FillError::Overflow("pricing residual"));
    }
    let rate = den
        .checked_div(num)
        .ok_or(FillError::Overflow("deriving rate"))?;
    value
        .checked_div(rate)
        .ok_or(FillError::Overflow("pricing residual"))
}

fn spawn_residual(parent: &Order, buy: Amount, sell: Amount) -> Result<Option<Order>, FillError> {
    if buy.is_zero() || sell.is_zero() {
        tracing::debug!(parent = %parent.id, %buy, %sell, "Dropping dust residual");
        return Ok(None);
    }
    Ok(Some(parent.spawn_child(buy, sell)?))
}
