//! Order aggregate
//!
//! An order is loaded and saved as a whole: the order row, its line items,
//! its payment intent and the delivery assignment (if any). Transition guards
//! live in [`transitions`], monetary rules in [`money`].

pub mod money;
pub mod repository;
pub mod transitions;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::Actor;
use crate::shared_kernel::DomainError;
use marketplace_shared::{
    AssignmentId, CheckoutGroupId, FulfillmentStatus, LineItemId, LineItemStatus, OrderId,
    OrderStatus, PaymentIntentId, PaymentIntentStatus, PaymentMethod, ProductId, ShippingStatus,
    StoreId, UserId,
};

pub use money::Totals;
pub use repository::{
    InventoryRepository, LedgerEntry, LedgerEntryType, LedgerRepository, OrderRepository,
};
pub use transitions::{LineItemDecision, Transition};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub checkout_group_id: CheckoutGroupId,
    pub store_id: StoreId,
    pub buyer_id: UserId,
    pub status: OrderStatus,
    pub fulfillment_status: FulfillmentStatus,
    pub shipping_status: ShippingStatus,
    pub payment_method: PaymentMethod,
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub delivery_fee_cents: i64,
    pub total_cents: i64,
    pub amount_paid_cents: i64,
    pub balance_due_cents: i64,
    /// Set on orders created by a buyer retry
    pub retried_from: Option<OrderId>,
    /// Set on an expired order once its retry was placed
    #[serde(default)]
    pub retried_as: Option<OrderId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cash_collected_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: LineItemId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: i32,
    pub unit_price_cents: i64,
    pub discount_cents: i64,
    pub status: LineItemStatus,
}

impl LineItem {
    /// `None` when `quantity * unit_price` does not fit in cents.
    pub fn subtotal_cents(&self) -> Option<i64> {
        i64::from(self.quantity).checked_mul(self.unit_price_cents)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: PaymentIntentId,
    pub order_id: OrderId,
    pub method: PaymentMethod,
    pub status: PaymentIntentStatus,
    pub amount_cents: i64,
    pub failure_reason: Option<String>,
    pub vendor_paid_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentIntent {
    /// Cash methods start `unpaid`; anything else waits on a provider as
    /// `pending`.
    pub fn initial(order_id: OrderId, method: PaymentMethod, amount_cents: i64) -> Self {
        let status = if method.is_cash() {
            PaymentIntentStatus::Unpaid
        } else {
            PaymentIntentStatus::Pending
        };
        Self {
            id: PaymentIntentId::new(),
            order_id,
            method,
            status,
            amount_cents,
            failure_reason: None,
            vendor_paid_at: None,
            updated_at: Utc::now(),
        }
    }
}

/// Delivery of an order by an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: AssignmentId,
    pub order_id: OrderId,
    pub agent_id: UserId,
    pub active: bool,
    pub assigned_at: DateTime<Utc>,
    pub picked_up_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cash_pickup_at: Option<DateTime<Utc>>,
}

impl Assignment {
    pub fn new(order_id: OrderId, agent_id: UserId) -> Self {
        Self {
            id: AssignmentId::new(),
            order_id,
            agent_id,
            active: true,
            assigned_at: Utc::now(),
            picked_up_at: None,
            delivered_at: None,
            cash_pickup_at: None,
        }
    }
}

/// Requested line for a new order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLineItem {
    pub product_id: ProductId,
    pub quantity: i32,
    pub unit_price_cents: i64,
    pub discount_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAggregate {
    pub order: Order,
    pub items: Vec<LineItem>,
    pub payment: PaymentIntent,
    pub assignment: Option<Assignment>,
}

impl OrderAggregate {
    /// Build a `created_pending` order with freshly computed totals.
    pub fn create(
        buyer_id: UserId,
        store_id: StoreId,
        checkout_group_id: CheckoutGroupId,
        payment_method: PaymentMethod,
        delivery_fee_cents: i64,
        lines: &[NewLineItem],
    ) -> Result<Self, DomainError> {
        if lines.is_empty() {
            return Err(DomainError::InvalidArg(
                "an order needs at least one line item".to_string(),
            ));
        }
        if delivery_fee_cents < 0 {
            return Err(DomainError::InvalidArg(
                "delivery fee cannot be negative".to_string(),
            ));
        }

        let order_id = OrderId::new();
        let items = lines
            .iter()
            .map(|line| {
                let item = LineItem {
                    id: LineItemId::new(),
                    order_id,
                    product_id: line.product_id,
                    quantity: line.quantity,
                    unit_price_cents: line.unit_price_cents,
                    discount_cents: line.discount_cents,
                    status: LineItemStatus::Pending,
                };
                money::validate_line(&item)?;
                Ok(item)
            })
            .collect::<Result<Vec<_>, DomainError>>()?;

        let now = Utc::now();
        let order = Order {
            id: order_id,
            checkout_group_id,
            store_id,
            buyer_id,
            status: OrderStatus::CreatedPending,
            fulfillment_status: FulfillmentStatus::Pending,
            shipping_status: ShippingStatus::Pending,
            payment_method,
            subtotal_cents: 0,
            discount_cents: 0,
            delivery_fee_cents,
            total_cents: 0,
            amount_paid_cents: 0,
            balance_due_cents: 0,
            retried_from: None,
            retried_as: None,
            created_at: now,
            updated_at: now,
            canceled_at: None,
            delivered_at: None,
            cash_collected_at: None,
            expired_at: None,
            closed_at: None,
        };

        let payment = PaymentIntent::initial(order_id, payment_method, 0);
        let mut aggregate = Self {
            order,
            items,
            payment,
            assignment: None,
        };
        aggregate.recompute_totals()?;
        Ok(aggregate)
    }

    /// A fresh `created_pending` copy of this order's lines, in a new
    /// checkout group.
    pub fn retry_copy(&self) -> Result<Self, DomainError> {
        if let Some(replacement) = self.order.retried_as {
            return Err(DomainError::Conflict(format!(
                "order {} was already retried as {}",
                self.order.id, replacement
            )));
        }
        let lines: Vec<NewLineItem> = self
            .items
            .iter()
            .filter(|item| item.status != LineItemStatus::Rejected)
            .map(|item| NewLineItem {
                product_id: item.product_id,
                quantity: item.quantity,
                unit_price_cents: item.unit_price_cents,
                discount_cents: item.discount_cents,
            })
            .collect();

        let mut copy = Self::create(
            self.order.buyer_id,
            self.order.store_id,
            CheckoutGroupId::new(),
            self.order.payment_method,
            self.order.delivery_fee_cents,
            &lines,
        )?;
        copy.order.retried_from = Some(self.order.id);
        Ok(copy)
    }

    pub fn id(&self) -> OrderId {
        self.order.id
    }

    /// Vendor actions require the actor to act for the owning store.
    pub fn authorize_vendor(&self, actor: &Actor) -> Result<(), DomainError> {
        if actor.store_id == Some(self.order.store_id) {
            Ok(())
        } else {
            Err(DomainError::Forbidden(format!(
                "actor does not act for store {}",
                self.order.store_id
            )))
        }
    }

    pub fn authorize_buyer(&self, actor: &Actor) -> Result<(), DomainError> {
        if actor.user_id == self.order.buyer_id {
            Ok(())
        } else {
            Err(DomainError::Forbidden(format!(
                "actor is not the buyer of order {}",
                self.order.id
            )))
        }
    }

    /// Agent actions require an active assignment held by the actor.
    pub fn authorize_agent(&self, actor: &Actor) -> Result<&Assignment, DomainError> {
        match &self.assignment {
            Some(assignment) if assignment.active && assignment.agent_id == actor.user_id => {
                Ok(assignment)
            }
            _ => Err(DomainError::Forbidden(format!(
                "actor holds no active assignment for order {}",
                self.order.id
            ))),
        }
    }

    pub fn item(&self, id: LineItemId) -> Option<&LineItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn item_mut(&mut self, id: LineItemId) -> Option<&mut LineItem> {
        self.items.iter_mut().find(|item| item.id == id)
    }

    pub fn rejected_count(&self) -> u32 {
        self.items
            .iter()
            .filter(|item| item.status == LineItemStatus::Rejected)
            .count() as u32
    }

    pub fn has_unresolved_items(&self) -> bool {
        self.items.iter().any(|item| item.status.is_unresolved())
    }

    /// Recompute the order totals from its non-rejected lines and keep the
    /// payment amount in step while the payment is still open. Canceled
    /// orders owe nothing.
    pub fn recompute_totals(&mut self) -> Result<(), DomainError> {
        let totals = Totals::from_lines(
            self.items
                .iter()
                .filter(|item| item.status != LineItemStatus::Rejected),
            self.order.delivery_fee_cents,
            self.order.amount_paid_cents,
        )?;
        totals.apply_to(&mut self.order);
        if self.order.status == OrderStatus::Canceled {
            self.order.balance_due_cents = 0;
        }
        if !self.payment.status.is_terminal() {
            self.payment.amount_cents = totals.total_cents;
        }
        money::check_order(&self.order)
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.order.updated_at = now;
    }
}
