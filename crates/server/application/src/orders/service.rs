//! Order lifecycle service
//!
//! Every operation follows the same shape inside one transaction: load the
//! aggregate (locking it), authorize the actor, check the transition guard,
//! mutate, save, emit. The event becomes visible exactly when the mutation
//! commits. A guard answering "already applied" returns success without
//! mutating or emitting.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use marketplace_server_domain::events::{
    Actor, CashCollected, DomainEvent, NotificationRequested, OrderCanceled, OrderCreated,
    OrderDecided, OrderDelivered, OrderExpired, OrderPaid, OrderPickedUp, OrderReadyForDispatch,
    OrderRetried, VendorDecision,
};
use marketplace_server_domain::orders::transitions::{self, LineItemDecision, Transition};
use marketplace_server_domain::orders::{
    Assignment, InventoryRepository, LedgerEntry, LedgerEntryType, LedgerRepository,
    OrderAggregate, OrderRepository,
};
use marketplace_server_domain::transaction::TxHandle;
use marketplace_server_domain::{
    truncate_message, DomainError, EventId, FulfillmentStatus, LineItemId, LineItemStatus,
    OrderId, OrderStatus, PaymentIntentStatus, ShippingStatus, UserId, MAX_ERROR_BYTES,
};

use super::commands::{CashCollectionOutcome, PlaceOrder};
use crate::outbox::EventEmitter;
use crate::transaction::TransactionRunner;

const NUDGE_REASON: &str = "buyer_nudge";
const AMOUNT_MISMATCH_REASON: &str = "amount mismatch";

struct Ports<Tx: TxHandle> {
    orders: Arc<dyn OrderRepository<Tx = Tx>>,
    inventory: Arc<dyn InventoryRepository<Tx = Tx>>,
    ledger: Arc<dyn LedgerRepository<Tx = Tx>>,
    emitter: EventEmitter<Tx>,
}

pub struct OrderLifecycleService<Tx: TxHandle> {
    runner: TransactionRunner<Tx>,
    ports: Arc<Ports<Tx>>,
}

impl<Tx: TxHandle> Clone for OrderLifecycleService<Tx> {
    fn clone(&self) -> Self {
        Self {
            runner: self.runner.clone(),
            ports: self.ports.clone(),
        }
    }
}

impl<Tx: TxHandle> OrderLifecycleService<Tx> {
    pub fn new(
        runner: TransactionRunner<Tx>,
        emitter: EventEmitter<Tx>,
        orders: Arc<dyn OrderRepository<Tx = Tx>>,
        inventory: Arc<dyn InventoryRepository<Tx = Tx>>,
        ledger: Arc<dyn LedgerRepository<Tx = Tx>>,
    ) -> Self {
        Self {
            runner,
            ports: Arc::new(Ports {
                orders,
                inventory,
                ledger,
                emitter,
            }),
        }
    }

    /// Reserve stock and create a `created_pending` order for the buyer.
    pub async fn place_order(&self, actor: Actor, command: PlaceOrder) -> Result<OrderId, DomainError> {
        let ports = self.ports.clone();
        self.runner
            .with_tx(move |tx| Box::pin(async move { ports.place_order(tx, &actor, command).await }))
            .await
    }

    pub async fn vendor_decision(
        &self,
        actor: Actor,
        order_id: OrderId,
        decision: VendorDecision,
    ) -> Result<Transition, DomainError> {
        let ports = self.ports.clone();
        self.runner
            .with_tx(move |tx| {
                Box::pin(async move { ports.vendor_decision(tx, &actor, order_id, decision).await })
            })
            .await
    }

    pub async fn line_item_decision(
        &self,
        actor: Actor,
        order_id: OrderId,
        line_item_id: LineItemId,
        decision: LineItemDecision,
    ) -> Result<Transition, DomainError> {
        let ports = self.ports.clone();
        self.runner
            .with_tx(move |tx| {
                Box::pin(async move {
                    ports
                        .line_item_decision(tx, &actor, order_id, line_item_id, decision)
                        .await
                })
            })
            .await
    }

    pub async fn cancel_order(&self, actor: Actor, order_id: OrderId) -> Result<Transition, DomainError> {
        let ports = self.ports.clone();
        self.runner
            .with_tx(move |tx| Box::pin(async move { ports.cancel_order(tx, &actor, order_id).await }))
            .await
    }

    /// Ask the store to look at the order. Repeatable; returns the id of the
    /// emitted event.
    pub async fn nudge_order(&self, actor: Actor, order_id: OrderId) -> Result<EventId, DomainError> {
        let ports = self.ports.clone();
        self.runner
            .with_tx(move |tx| Box::pin(async move { ports.nudge_order(tx, &actor, order_id).await }))
            .await
    }

    /// Re-place an expired order. Returns the id of the new order.
    pub async fn retry_order(&self, actor: Actor, order_id: OrderId) -> Result<OrderId, DomainError> {
        let ports = self.ports.clone();
        self.runner
            .with_tx(move |tx| Box::pin(async move { ports.retry_order(tx, &actor, order_id).await }))
            .await
    }

    /// Hand the order to a delivery agent. Admin or system only; a repeat
    /// for the agent already holding the order is a no-op.
    pub async fn assign_agent(
        &self,
        actor: Actor,
        order_id: OrderId,
        agent_id: UserId,
    ) -> Result<Transition, DomainError> {
        let ports = self.ports.clone();
        self.runner
            .with_tx(move |tx| {
                Box::pin(async move { ports.assign_agent(tx, &actor, order_id, agent_id).await })
            })
            .await
    }

    pub async fn agent_pickup(&self, actor: Actor, order_id: OrderId) -> Result<Transition, DomainError> {
        let ports = self.ports.clone();
        self.runner
            .with_tx(move |tx| Box::pin(async move { ports.agent_pickup(tx, &actor, order_id).await }))
            .await
    }

    pub async fn agent_deliver(&self, actor: Actor, order_id: OrderId) -> Result<Transition, DomainError> {
        let ports = self.ports.clone();
        self.runner
            .with_tx(move |tx| Box::pin(async move { ports.agent_deliver(tx, &actor, order_id).await }))
            .await
    }

    pub async fn agent_cash_collected(
        &self,
        actor: Actor,
        order_id: OrderId,
        amount_cents: i64,
    ) -> Result<CashCollectionOutcome, DomainError> {
        let ports = self.ports.clone();
        self.runner
            .with_tx(move |tx| {
                Box::pin(async move {
                    ports
                        .agent_cash_collected(tx, &actor, order_id, amount_cents)
                        .await
                })
            })
            .await
    }

    /// Pay the vendor for a delivered, settled order. Admin or system only.
    pub async fn confirm_payout(&self, actor: Actor, order_id: OrderId) -> Result<Transition, DomainError> {
        let ports = self.ports.clone();
        self.runner
            .with_tx(move |tx| Box::pin(async move { ports.confirm_payout(tx, &actor, order_id).await }))
            .await
    }

    /// Expire an order the vendor never answered. System only.
    pub async fn expire_order(&self, actor: Actor, order_id: OrderId) -> Result<Transition, DomainError> {
        let ports = self.ports.clone();
        self.runner
            .with_tx(move |tx| Box::pin(async move { ports.expire_order(tx, &actor, order_id).await }))
            .await
    }

    /// Current committed state of an order
    pub async fn get_order(&self, order_id: OrderId) -> Result<OrderAggregate, DomainError> {
        let ports = self.ports.clone();
        self.runner
            .with_tx(move |tx| Box::pin(async move { ports.load(tx, order_id).await }))
            .await
    }

    pub async fn ledger_entries(&self, order_id: OrderId) -> Result<Vec<LedgerEntry>, DomainError> {
        let ports = self.ports.clone();
        self.runner
            .with_tx(move |tx| {
                Box::pin(async move { ports.ledger.entries_for_order(tx, &order_id).await })
            })
            .await
    }
}

impl<Tx: TxHandle> Ports<Tx> {
    async fn load(&self, tx: &mut Tx, order_id: OrderId) -> Result<OrderAggregate, DomainError> {
        self.orders
            .load(tx, &order_id)
            .await?
            .ok_or_else(|| DomainError::not_found("Order", order_id))
    }

    async fn reserve_all(&self, tx: &mut Tx, aggregate: &OrderAggregate) -> Result<(), DomainError> {
        for item in &aggregate.items {
            if !self
                .inventory
                .reserve(tx, &item.product_id, item.quantity)
                .await?
            {
                return Err(DomainError::Conflict(format!(
                    "insufficient inventory for product {}",
                    item.product_id
                )));
            }
        }
        Ok(())
    }

    async fn place_order(
        &self,
        tx: &mut Tx,
        actor: &Actor,
        command: PlaceOrder,
    ) -> Result<OrderId, DomainError> {
        if !actor.has_role(Actor::ROLE_BUYER) {
            return Err(DomainError::Forbidden(
                "only buyers can place orders".to_string(),
            ));
        }
        let aggregate = OrderAggregate::create(
            actor.user_id,
            command.store_id,
            command.checkout_group_id.unwrap_or_default(),
            command.payment_method,
            command.delivery_fee_cents,
            &command.items,
        )?;
        self.reserve_all(tx, &aggregate).await?;
        self.orders.save(tx, &aggregate).await?;

        let order = &aggregate.order;
        let event = DomainEvent::for_order(
            order.id,
            OrderCreated {
                order_id: order.id,
                checkout_group_id: order.checkout_group_id,
                store_id: order.store_id,
                buyer_id: order.buyer_id,
                total_cents: order.total_cents,
                payment_method: order.payment_method,
                line_item_count: aggregate.items.len() as u32,
            }
            .into(),
        )
        .with_actor(actor)
        .occurred_at(order.created_at);
        self.emitter.emit_if_absent(tx, event).await?;

        info!(order_id = %order.id, store_id = %order.store_id, total_cents = order.total_cents, "Order placed");
        Ok(order.id)
    }

    async fn vendor_decision(
        &self,
        tx: &mut Tx,
        actor: &Actor,
        order_id: OrderId,
        decision: VendorDecision,
    ) -> Result<Transition, DomainError> {
        let mut aggregate = self.load(tx, order_id).await?;
        aggregate.authorize_vendor(actor)?;
        if transitions::vendor_decision(aggregate.order.status, decision)? == Transition::AlreadyApplied {
            return Ok(Transition::AlreadyApplied);
        }

        let now = Utc::now();
        aggregate.order.status = transitions::vendor_decision_target(decision);
        if decision == VendorDecision::Accept {
            for item in aggregate
                .items
                .iter_mut()
                .filter(|item| item.status == LineItemStatus::Pending)
            {
                item.status = LineItemStatus::Accepted;
            }
        }
        aggregate.touch(now);
        self.orders.save(tx, &aggregate).await?;

        let order = &aggregate.order;
        let event = DomainEvent::for_order(
            order.id,
            OrderDecided {
                order_id: order.id,
                store_id: order.store_id,
                buyer_id: order.buyer_id,
                decision,
            }
            .into(),
        )
        .with_actor(actor)
        .occurred_at(now);
        self.emitter.emit_if_absent(tx, event).await?;

        info!(order_id = %order.id, status = %order.status, "Vendor decided order");
        Ok(Transition::Apply)
    }

    async fn line_item_decision(
        &self,
        tx: &mut Tx,
        actor: &Actor,
        order_id: OrderId,
        line_item_id: LineItemId,
        decision: LineItemDecision,
    ) -> Result<Transition, DomainError> {
        let mut aggregate = self.load(tx, order_id).await?;
        aggregate.authorize_vendor(actor)?;
        let item = aggregate
            .item(line_item_id)
            .ok_or_else(|| DomainError::not_found("Line item", line_item_id))?;
        let (product_id, quantity) = (item.product_id, item.quantity);

        if transitions::line_item_decision(aggregate.order.status, item.status, decision)?
            == Transition::AlreadyApplied
        {
            return Ok(Transition::AlreadyApplied);
        }

        if decision == LineItemDecision::Reject {
            self.inventory.release(tx, &product_id, quantity).await?;
        }
        if let Some(item) = aggregate.item_mut(line_item_id) {
            item.status = decision.target();
        }
        aggregate.recompute_totals()?;

        let now = Utc::now();
        aggregate.touch(now);
        // Lines of a rejected order only go back to stock; the order stays put.
        let resolved = aggregate.order.status != OrderStatus::Rejected
            && !aggregate.has_unresolved_items();
        if resolved {
            let rejected_count = aggregate.rejected_count();
            aggregate.order.fulfillment_status = if rejected_count == 0 {
                FulfillmentStatus::Fulfilled
            } else {
                FulfillmentStatus::Partial
            };
            aggregate.order.status = OrderStatus::ReadyForDispatch;
        }
        self.orders.save(tx, &aggregate).await?;

        if resolved {
            let order = &aggregate.order;
            let event = DomainEvent::for_order(
                order.id,
                OrderReadyForDispatch {
                    order_id: order.id,
                    store_id: order.store_id,
                    buyer_id: order.buyer_id,
                    line_item_id,
                    rejected_count: aggregate.rejected_count(),
                    fulfillment_status: order.fulfillment_status,
                }
                .into(),
            )
            .with_actor(actor)
            .occurred_at(now);
            self.emitter.emit_if_absent(tx, event).await?;
            info!(
                order_id = %order.id,
                fulfillment_status = %order.fulfillment_status,
                "Order ready for dispatch"
            );
        }
        Ok(Transition::Apply)
    }

    async fn cancel_order(
        &self,
        tx: &mut Tx,
        actor: &Actor,
        order_id: OrderId,
    ) -> Result<Transition, DomainError> {
        let mut aggregate = self.load(tx, order_id).await?;
        aggregate.authorize_buyer(actor)?;
        if transitions::cancel(aggregate.order.status)? == Transition::AlreadyApplied {
            return Ok(Transition::AlreadyApplied);
        }

        let mut released = Vec::new();
        for item in aggregate.items.iter_mut().filter(|item| {
            item.status != LineItemStatus::Fulfilled && item.status != LineItemStatus::Rejected
        }) {
            self.inventory
                .release(tx, &item.product_id, item.quantity)
                .await?;
            item.status = LineItemStatus::Rejected;
            released.push(item.id);
        }

        let now = Utc::now();
        aggregate.order.status = OrderStatus::Canceled;
        aggregate.order.canceled_at = Some(now);
        aggregate.recompute_totals()?;
        aggregate.touch(now);
        self.orders.save(tx, &aggregate).await?;

        let order = &aggregate.order;
        let event = DomainEvent::for_order(
            order.id,
            OrderCanceled {
                order_id: order.id,
                store_id: order.store_id,
                buyer_id: order.buyer_id,
                released_line_items: released,
                canceled_at: now,
            }
            .into(),
        )
        .with_actor(actor)
        .occurred_at(now);
        self.emitter.emit_if_absent(tx, event).await?;

        info!(order_id = %order.id, "Order canceled by buyer");
        Ok(Transition::Apply)
    }

    async fn nudge_order(
        &self,
        tx: &mut Tx,
        actor: &Actor,
        order_id: OrderId,
    ) -> Result<EventId, DomainError> {
        let aggregate = self.load(tx, order_id).await?;
        aggregate.authorize_buyer(actor)?;
        transitions::nudge(aggregate.order.status)?;

        let order = &aggregate.order;
        let event = DomainEvent::for_order(
            order.id,
            NotificationRequested {
                order_id: order.id,
                store_id: order.store_id,
                buyer_id: order.buyer_id,
                reason: NUDGE_REASON.to_string(),
            }
            .into(),
        )
        .with_actor(actor);
        self.emitter.emit(tx, event).await
    }

    async fn retry_order(
        &self,
        tx: &mut Tx,
        actor: &Actor,
        order_id: OrderId,
    ) -> Result<OrderId, DomainError> {
        let mut original = self.load(tx, order_id).await?;
        original.authorize_buyer(actor)?;
        transitions::retry(original.order.status)?;

        let copy = original.retry_copy()?;
        self.reserve_all(tx, &copy).await?;
        self.orders.save(tx, &copy).await?;

        original.order.retried_as = Some(copy.id());
        original.touch(copy.order.created_at);
        self.orders.save(tx, &original).await?;

        let event = DomainEvent::for_order(
            original.id(),
            OrderRetried {
                original_order_id: original.id(),
                new_order_id: copy.id(),
                checkout_group_id: copy.order.checkout_group_id,
                buyer_id: copy.order.buyer_id,
            }
            .into(),
        )
        .with_actor(actor)
        .occurred_at(copy.order.created_at);
        self.emitter.emit(tx, event).await?;

        info!(original_order_id = %original.id(), new_order_id = %copy.id(), "Expired order retried");
        Ok(copy.id())
    }

    async fn assign_agent(
        &self,
        tx: &mut Tx,
        actor: &Actor,
        order_id: OrderId,
        agent_id: UserId,
    ) -> Result<Transition, DomainError> {
        require_operator(actor, "assign agents")?;
        let mut aggregate = self.load(tx, order_id).await?;
        if matches!(&aggregate.assignment, Some(a) if a.active && a.agent_id == agent_id) {
            return Ok(Transition::AlreadyApplied);
        }
        transitions::assign(aggregate.order.status)?;

        aggregate.assignment = Some(Assignment::new(order_id, agent_id));
        aggregate.touch(Utc::now());
        self.orders.save(tx, &aggregate).await?;

        info!(order_id = %order_id, agent_id = %agent_id, "Agent assigned");
        Ok(Transition::Apply)
    }

    async fn agent_pickup(
        &self,
        tx: &mut Tx,
        actor: &Actor,
        order_id: OrderId,
    ) -> Result<Transition, DomainError> {
        let mut aggregate = self.load(tx, order_id).await?;
        let assignment_id = aggregate.authorize_agent(actor)?.id;
        if transitions::pickup(aggregate.order.status)? == Transition::AlreadyApplied {
            return Ok(Transition::AlreadyApplied);
        }

        let now = Utc::now();
        aggregate.order.status = OrderStatus::InTransit;
        aggregate.order.shipping_status = ShippingStatus::InTransit;
        if let Some(assignment) = aggregate.assignment.as_mut() {
            assignment.picked_up_at = Some(now);
        }
        aggregate.touch(now);
        self.orders.save(tx, &aggregate).await?;

        let event = DomainEvent::for_order(
            aggregate.id(),
            OrderPickedUp {
                order_id: aggregate.id(),
                assignment_id,
                agent_id: actor.user_id,
                picked_up_at: now,
            }
            .into(),
        )
        .with_actor(actor)
        .occurred_at(now);
        self.emitter.emit_if_absent(tx, event).await?;

        info!(order_id = %aggregate.id(), agent_id = %actor.user_id, "Order picked up");
        Ok(Transition::Apply)
    }

    async fn agent_deliver(
        &self,
        tx: &mut Tx,
        actor: &Actor,
        order_id: OrderId,
    ) -> Result<Transition, DomainError> {
        let mut aggregate = self.load(tx, order_id).await?;
        let assignment_id = aggregate.authorize_agent(actor)?.id;
        if transitions::deliver(aggregate.order.status)? == Transition::AlreadyApplied {
            return Ok(Transition::AlreadyApplied);
        }

        let now = Utc::now();
        aggregate.order.status = OrderStatus::Delivered;
        aggregate.order.shipping_status = ShippingStatus::Delivered;
        aggregate.order.delivered_at = Some(now);
        if let Some(assignment) = aggregate.assignment.as_mut() {
            assignment.delivered_at = Some(now);
        }
        aggregate.touch(now);
        self.orders.save(tx, &aggregate).await?;

        let event = DomainEvent::for_order(
            aggregate.id(),
            OrderDelivered {
                order_id: aggregate.id(),
                assignment_id,
                agent_id: actor.user_id,
                buyer_id: aggregate.order.buyer_id,
                delivered_at: now,
            }
            .into(),
        )
        .with_actor(actor)
        .occurred_at(now);
        self.emitter.emit_if_absent(tx, event).await?;

        info!(order_id = %aggregate.id(), "Order delivered");
        Ok(Transition::Apply)
    }

    async fn agent_cash_collected(
        &self,
        tx: &mut Tx,
        actor: &Actor,
        order_id: OrderId,
        amount_cents: i64,
    ) -> Result<CashCollectionOutcome, DomainError> {
        let mut aggregate = self.load(tx, order_id).await?;
        aggregate.authorize_agent(actor)?;
        let guard = transitions::cash_collection(
            aggregate.order.status,
            aggregate.order.payment_method,
            aggregate.payment.status,
        )?;
        if guard == Transition::AlreadyApplied {
            return Ok(CashCollectionOutcome::AlreadyCollected);
        }

        let now = Utc::now();
        if amount_cents != aggregate.payment.amount_cents
            || amount_cents != aggregate.order.total_cents
        {
            warn!(
                order_id = %order_id,
                collected_cents = amount_cents,
                expected_cents = aggregate.payment.amount_cents,
                total_cents = aggregate.order.total_cents,
                "Collected cash does not match amount due, holding order"
            );
            aggregate.payment.status = PaymentIntentStatus::Failed;
            aggregate.payment.failure_reason =
                Some(truncate_message(AMOUNT_MISMATCH_REASON, MAX_ERROR_BYTES));
            aggregate.payment.updated_at = now;
            aggregate.order.status = OrderStatus::Hold;
            aggregate.touch(now);
            self.orders.save(tx, &aggregate).await?;
            return Ok(CashCollectionOutcome::AmountMismatch);
        }

        aggregate.payment.status = PaymentIntentStatus::Settled;
        aggregate.payment.updated_at = now;
        aggregate.order.amount_paid_cents = amount_cents;
        aggregate.order.cash_collected_at = Some(now);
        aggregate.recompute_totals()?;
        if let Some(assignment) = aggregate.assignment.as_mut() {
            assignment.cash_pickup_at = Some(now);
        }
        aggregate.touch(now);
        self.orders.save(tx, &aggregate).await?;

        let entry = LedgerEntry::new(aggregate.id(), LedgerEntryType::CashCollected, amount_cents);
        self.ledger.append(tx, &entry).await?;

        let event = DomainEvent::for_order(
            aggregate.id(),
            CashCollected {
                order_id: aggregate.id(),
                payment_intent_id: aggregate.payment.id,
                agent_id: actor.user_id,
                amount_cents,
                collected_at: now,
            }
            .into(),
        )
        .with_actor(actor)
        .occurred_at(now);
        self.emitter.emit_if_absent(tx, event).await?;

        info!(order_id = %aggregate.id(), amount_cents, "Cash collected");
        Ok(CashCollectionOutcome::Collected)
    }

    async fn confirm_payout(
        &self,
        tx: &mut Tx,
        actor: &Actor,
        order_id: OrderId,
    ) -> Result<Transition, DomainError> {
        require_operator(actor, "confirm payouts")?;
        let mut aggregate = self.load(tx, order_id).await?;
        if transitions::confirm_payout(aggregate.order.status, aggregate.payment.status)?
            == Transition::AlreadyApplied
        {
            return Ok(Transition::AlreadyApplied);
        }

        let now = Utc::now();
        aggregate.payment.status = PaymentIntentStatus::Paid;
        aggregate.payment.vendor_paid_at = Some(now);
        aggregate.payment.updated_at = now;
        aggregate.order.status = OrderStatus::Closed;
        aggregate.order.closed_at = Some(now);
        aggregate.touch(now);
        self.orders.save(tx, &aggregate).await?;

        let amount_cents = aggregate.payment.amount_cents;
        let entry = LedgerEntry::new(aggregate.id(), LedgerEntryType::VendorPayout, amount_cents);
        self.ledger.append(tx, &entry).await?;

        let event = DomainEvent::for_order(
            aggregate.id(),
            OrderPaid {
                order_id: aggregate.id(),
                payment_intent_id: aggregate.payment.id,
                store_id: aggregate.order.store_id,
                amount_cents,
                paid_at: now,
            }
            .into(),
        )
        .with_actor(actor)
        .occurred_at(now);
        self.emitter.emit_if_absent(tx, event).await?;

        info!(order_id = %aggregate.id(), amount_cents, "Vendor payout confirmed");
        Ok(Transition::Apply)
    }

    async fn expire_order(
        &self,
        tx: &mut Tx,
        actor: &Actor,
        order_id: OrderId,
    ) -> Result<Transition, DomainError> {
        if !actor.has_role(Actor::ROLE_SYSTEM) {
            return Err(DomainError::Forbidden(
                "only the system can expire orders".to_string(),
            ));
        }
        let mut aggregate = self.load(tx, order_id).await?;
        if transitions::expire(aggregate.order.status)? == Transition::AlreadyApplied {
            return Ok(Transition::AlreadyApplied);
        }

        for item in aggregate
            .items
            .iter()
            .filter(|item| item.status != LineItemStatus::Rejected)
        {
            self.inventory
                .release(tx, &item.product_id, item.quantity)
                .await?;
        }

        let now = Utc::now();
        aggregate.order.status = OrderStatus::Expired;
        aggregate.order.expired_at = Some(now);
        aggregate.touch(now);
        self.orders.save(tx, &aggregate).await?;

        let order = &aggregate.order;
        let event = DomainEvent::for_order(
            order.id,
            OrderExpired {
                order_id: order.id,
                store_id: order.store_id,
                buyer_id: order.buyer_id,
                expired_at: now,
            }
            .into(),
        )
        .with_actor(actor)
        .occurred_at(now);
        self.emitter.emit_if_absent(tx, event).await?;

        info!(order_id = %order.id, "Order expired");
        Ok(Transition::Apply)
    }
}

fn require_operator(actor: &Actor, action: &str) -> Result<(), DomainError> {
    if actor.has_role(Actor::ROLE_ADMIN) || actor.has_role(Actor::ROLE_SYSTEM) {
        Ok(())
    } else {
        Err(DomainError::Forbidden(format!(
            "role {} cannot {}",
            actor.role, action
        )))
    }
}
