//! Monetary rules. All amounts are integer cents.
//!
//! - every line: `0 <= discount <= quantity * unit_price`
//! - `total = subtotal - discount + delivery_fee`, never negative
//! - `balance_due = max(0, total - amount_paid)`; canceled orders owe nothing

use super::{LineItem, Order};
use crate::shared_kernel::DomainError;
use marketplace_shared::OrderStatus;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Totals {
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub delivery_fee_cents: i64,
    pub total_cents: i64,
    pub amount_paid_cents: i64,
    pub balance_due_cents: i64,
}

impl Totals {
    pub fn from_lines<'a>(
        lines: impl IntoIterator<Item = &'a LineItem>,
        delivery_fee_cents: i64,
        amount_paid_cents: i64,
    ) -> Result<Self, DomainError> {
        let mut subtotal_cents = 0i64;
        let mut discount_cents = 0i64;
        for line in lines {
            let line_subtotal = validate_line(line)?;
            subtotal_cents = subtotal_cents
                .checked_add(line_subtotal)
                .ok_or_else(|| overflow("order subtotal"))?;
            discount_cents = discount_cents
                .checked_add(line.discount_cents)
                .ok_or_else(|| overflow("order discount"))?;
        }

        let total_cents = subtotal_cents
            .checked_sub(discount_cents)
            .and_then(|net| net.checked_add(delivery_fee_cents))
            .ok_or_else(|| overflow("order total"))?;
        if total_cents < 0 {
            return Err(DomainError::Internal(format!(
                "order total would be negative ({})",
                total_cents
            )));
        }

        Ok(Self {
            subtotal_cents,
            discount_cents,
            delivery_fee_cents,
            total_cents,
            amount_paid_cents,
            balance_due_cents: balance_due(total_cents, amount_paid_cents),
        })
    }

    pub fn apply_to(&self, order: &mut Order) {
        order.subtotal_cents = self.subtotal_cents;
        order.discount_cents = self.discount_cents;
        order.delivery_fee_cents = self.delivery_fee_cents;
        order.total_cents = self.total_cents;
        order.amount_paid_cents = self.amount_paid_cents;
        order.balance_due_cents = self.balance_due_cents;
    }
}

pub fn balance_due(total_cents: i64, amount_paid_cents: i64) -> i64 {
    total_cents.saturating_sub(amount_paid_cents).max(0)
}

fn overflow(what: &str) -> DomainError {
    DomainError::InvalidArg(format!("{} exceeds the representable amount", what))
}

/// Validate a line and return its subtotal.
pub fn validate_line(line: &LineItem) -> Result<i64, DomainError> {
    if line.quantity <= 0 {
        return Err(DomainError::InvalidArg(format!(
            "line item {} quantity must be positive",
            line.id
        )));
    }
    if line.unit_price_cents < 0 {
        return Err(DomainError::InvalidArg(format!(
            "line item {} price cannot be negative",
            line.id
        )));
    }
    let subtotal_cents = line
        .subtotal_cents()
        .ok_or_else(|| overflow(&format!("line item {} subtotal", line.id)))?;
    if line.discount_cents < 0 || line.discount_cents > subtotal_cents {
        return Err(DomainError::InvalidArg(format!(
            "line item {} discount {} outside 0..={}",
            line.id, line.discount_cents, subtotal_cents
        )));
    }
    Ok(subtotal_cents)
}

/// Verify the stored totals of an order are mutually consistent.
pub fn check_order(order: &Order) -> Result<(), DomainError> {
    let consistent = order.subtotal_cents >= 0
        && order.discount_cents >= 0
        && order.discount_cents <= order.subtotal_cents
        && order.total_cents >= 0
        && order
            .subtotal_cents
            .checked_sub(order.discount_cents)
            .and_then(|net| net.checked_add(order.delivery_fee_cents))
            == Some(order.total_cents);
    if !consistent {
        return Err(DomainError::Internal(format!(
            "order {} totals are inconsistent",
            order.id
        )));
    }

    let expected_balance = if order.status == OrderStatus::Canceled {
        0
    } else {
        balance_due(order.total_cents, order.amount_paid_cents)
    };
    if order.balance_due_cents != expected_balance {
        return Err(DomainError::Internal(format!(
            "order {} balance due {} does not match {}",
            order.id, order.balance_due_cents, expected_balance
        )));
    }
    Ok(())
}
