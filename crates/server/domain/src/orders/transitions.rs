//! Transition guards of the order lifecycle.
//!
//! Each guard inspects the current state and answers whether the requested
//! transition applies, is already applied (idempotent no-op), or conflicts.

use serde::{Deserialize, Serialize};

use crate::events::VendorDecision;
use crate::shared_kernel::DomainError;
use marketplace_shared::{LineItemStatus, OrderStatus, PaymentIntentStatus, PaymentMethod};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Apply,
    /// Already in the requested state; nothing to mutate or emit
    AlreadyApplied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineItemDecision {
    Fulfill,
    Reject,
}

impl LineItemDecision {
    pub fn target(&self) -> LineItemStatus {
        match self {
            LineItemDecision::Fulfill => LineItemStatus::Fulfilled,
            LineItemDecision::Reject => LineItemStatus::Rejected,
        }
    }
}

pub fn vendor_decision_target(decision: VendorDecision) -> OrderStatus {
    match decision {
        VendorDecision::Accept => OrderStatus::Accepted,
        VendorDecision::Reject => OrderStatus::Rejected,
    }
}

pub fn vendor_decision(
    current: OrderStatus,
    decision: VendorDecision,
) -> Result<Transition, DomainError> {
    if current == vendor_decision_target(decision) {
        return Ok(Transition::AlreadyApplied);
    }
    match current {
        OrderStatus::CreatedPending => Ok(Transition::Apply),
        other => Err(DomainError::state_conflict("decide order", other)),
    }
}

pub fn line_item_decision(
    order: OrderStatus,
    item: LineItemStatus,
    decision: LineItemDecision,
) -> Result<Transition, DomainError> {
    if item == decision.target() {
        return Ok(Transition::AlreadyApplied);
    }
    // A vendor-rejected order can still hand its lines back to inventory,
    // but nothing on it is fulfilled.
    let closed = match order {
        OrderStatus::Rejected => decision == LineItemDecision::Fulfill,
        other => other.is_final(),
    };
    if closed {
        return Err(DomainError::state_conflict("decide line item", order));
    }
    if item.is_unresolved() {
        Ok(Transition::Apply)
    } else {
        Err(DomainError::state_conflict("decide line item", item))
    }
}

pub fn cancel(current: OrderStatus) -> Result<Transition, DomainError> {
    match current {
        OrderStatus::Canceled => Ok(Transition::AlreadyApplied),
        other if other.is_final() => Err(DomainError::state_conflict("cancel order", other)),
        _ => Ok(Transition::Apply),
    }
}

pub fn nudge(current: OrderStatus) -> Result<(), DomainError> {
    if current.is_final() {
        Err(DomainError::state_conflict("nudge order", current))
    } else {
        Ok(())
    }
}

pub fn retry(current: OrderStatus) -> Result<(), DomainError> {
    match current {
        OrderStatus::Expired => Ok(()),
        other => Err(DomainError::state_conflict("retry order", other)),
    }
}

/// Agents are assigned once the vendor accepted and until pickup.
pub fn assign(current: OrderStatus) -> Result<(), DomainError> {
    match current {
        OrderStatus::Accepted | OrderStatus::ReadyForDispatch => Ok(()),
        other => Err(DomainError::state_conflict("assign agent", other)),
    }
}

pub fn pickup(current: OrderStatus) -> Result<Transition, DomainError> {
    match current {
        OrderStatus::ReadyForDispatch => Ok(Transition::Apply),
        OrderStatus::InTransit => Ok(Transition::AlreadyApplied),
        other => Err(DomainError::state_conflict("pick up order", other)),
    }
}

pub fn deliver(current: OrderStatus) -> Result<Transition, DomainError> {
    match current {
        OrderStatus::InTransit => Ok(Transition::Apply),
        OrderStatus::Delivered => Ok(Transition::AlreadyApplied),
        other => Err(DomainError::state_conflict("deliver order", other)),
    }
}

/// Cash is collected on delivery, or at dispatch for cash-on-pickup orders.
/// A payment already settled is an idempotent repeat.
pub fn cash_collection(
    current: OrderStatus,
    method: PaymentMethod,
    payment: PaymentIntentStatus,
) -> Result<Transition, DomainError> {
    let collectable = current == OrderStatus::Delivered
        || (current == OrderStatus::ReadyForDispatch && method == PaymentMethod::CashOnPickup);
    if !collectable {
        return Err(DomainError::state_conflict("collect cash", current));
    }
    match payment {
        PaymentIntentStatus::Settled => Ok(Transition::AlreadyApplied),
        status if status.is_terminal() => Err(DomainError::state_conflict(
            "collect cash",
            format!("payment {}", status),
        )),
        _ => Ok(Transition::Apply),
    }
}

pub fn confirm_payout(
    current: OrderStatus,
    payment: PaymentIntentStatus,
) -> Result<Transition, DomainError> {
    match (current, payment) {
        (OrderStatus::Closed, _) => Ok(Transition::AlreadyApplied),
        (OrderStatus::Delivered, PaymentIntentStatus::Settled) => Ok(Transition::Apply),
        (OrderStatus::Delivered, status) => Err(DomainError::state_conflict(
            "confirm payout",
            format!("payment {}", status),
        )),
        (other, _) => Err(DomainError::state_conflict("confirm payout", other)),
    }
}

pub fn expire(current: OrderStatus) -> Result<Transition, DomainError> {
    match current {
        OrderStatus::CreatedPending => Ok(Transition::Apply),
        OrderStatus::Expired => Ok(Transition::AlreadyApplied),
        other => Err(DomainError::state_conflict("expire order", other)),
    }
}
