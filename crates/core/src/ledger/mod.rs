//! Pure order-ledger rules shared by every ledger backend.
//!
//! Backends read the current product stock and order row inside their own
//! critical section, ask these functions what to do, and apply the returned
//! plan atomically. Nothing here touches storage.

use chrono::{DateTime, Duration, Utc};

use crate::domain::order::{Order, OrderStatus};
use crate::domain::product::ProductId;
use crate::errors::{DomainError, LedgerError};

pub const DEFAULT_EDIT_WINDOW_SECS: i64 = 300;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EditWindow {
    duration: Duration,
}

impl Default for EditWindow {
    fn default() -> Self {
        Self::from_secs(DEFAULT_EDIT_WINDOW_SECS)
    }
}

impl EditWindow {
    pub fn from_secs(secs: i64) -> Self {
        Self { duration: Duration::try_seconds(secs).unwrap_or(Duration::MAX) }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Inclusive at the boundary: an order exactly `duration` old is still editable.
    pub fn check(&self, order: &Order, now: DateTime<Utc>) -> Result<(), LedgerError> {
        let elapsed = now - order.created_at;
        if elapsed > self.duration {
            return Err(LedgerError::EditWindowExpired {
                order_id: order.id.clone(),
                elapsed_secs: elapsed.num_seconds(),
            });
        }
        Ok(())
    }
}

pub fn ensure_positive(quantity: u32) -> Result<(), LedgerError> {
    if quantity == 0 {
        return Err(LedgerError::InvalidQuantity);
    }
    Ok(())
}

/// Validates a reservation of `quantity` units against `available` stock.
pub fn plan_create(
    product_id: &ProductId,
    available: u32,
    quantity: u32,
) -> Result<(), LedgerError> {
    ensure_positive(quantity)?;
    if available < quantity {
        return Err(LedgerError::InsufficientStock {
            product_id: product_id.clone(),
            available,
            requested: quantity,
        });
    }
    Ok(())
}

/// Signed stock movement for a quantity change; positive means stock is consumed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModifyPlan {
    pub delta: i64,
}

impl ModifyPlan {
    pub fn stock_after(&self, available: u32) -> u32 {
        let next = i64::from(available) - self.delta;
        u32::try_from(next).unwrap_or(0)
    }
}

/// Order of checks: quantity, status, edit window, then stock. The window check
/// precedes stock so an expired order fails the same way whatever stock is left.
pub fn plan_modify(
    order: &Order,
    available: u32,
    new_quantity: u32,
    window: EditWindow,
    now: DateTime<Utc>,
) -> Result<ModifyPlan, LedgerError> {
    ensure_positive(new_quantity)?;
    if order.status == OrderStatus::Cancelled {
        return Err(LedgerError::OrderCancelled(order.id.clone()));
    }
    window.check(order, now)?;

    let delta = i64::from(new_quantity) - i64::from(order.quantity);
    if delta > 0 && i64::from(available) < delta {
        return Err(LedgerError::InsufficientStock {
            product_id: order.product_id.clone(),
            available,
            requested: u32::try_from(delta).unwrap_or(u32::MAX),
        });
    }
    Ok(ModifyPlan { delta })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelPlan {
    /// Already cancelled: succeed without touching stock.
    AlreadyCancelled,
    Restore { quantity: u32 },
}

pub fn plan_cancel(order: &Order) -> CancelPlan {
    match order.status {
        OrderStatus::Cancelled => CancelPlan::AlreadyCancelled,
        OrderStatus::Pending => CancelPlan::Restore { quantity: order.quantity },
    }
}

pub fn transition(order: &mut Order, next: OrderStatus) -> Result<(), DomainError> {
    match (order.status, next) {
        (OrderStatus::Pending, OrderStatus::Cancelled)
        | (OrderStatus::Pending, OrderStatus::Pending) => {
            order.status = next;
            Ok(())
        }
        (from, to) => Err(DomainError::InvalidOrderTransition { from, to }),
    }
}

/// `stock + pending == baseline` for one product.
pub fn conserves_stock(baseline: u32, stock: u32, pending: &[&Order]) -> bool {
    let reserved: u64 = pending
        .iter()
        .filter(|order| order.is_pending())
        .map(|order| u64::from(order.quantity))
        .sum();
    u64::from(stock) + reserved == u64::from(baseline)
}
