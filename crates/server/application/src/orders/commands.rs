use marketplace_server_domain::orders::NewLineItem;
use marketplace_server_domain::{CheckoutGroupId, PaymentMethod, StoreId};

/// Checkout of one store's basket
#[derive(Debug, Clone)]
pub struct PlaceOrder {
    pub store_id: StoreId,
    /// Orders split from one checkout share a group; `None` starts a new one
    pub checkout_group_id: Option<CheckoutGroupId>,
    pub payment_method: PaymentMethod,
    pub delivery_fee_cents: i64,
    pub items: Vec<NewLineItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CashCollectionOutcome {
    Collected,
    /// The payment was already settled; nothing changed
    AlreadyCollected,
    /// The collected amount differs from the amount due. The payment is
    /// failed and the order put on hold.
    AmountMismatch,
}
