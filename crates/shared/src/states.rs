use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SharedError;

/// Wires `as_str`, `Display` and `FromStr` to the snake_case names stored in
/// the database and carried in event payloads.
macro_rules! state_strings {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = SharedError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(SharedError::UnknownState {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

/// Lifecycle of an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    CreatedPending,
    Accepted,
    Rejected,
    Hold,
    ReadyForDispatch,
    InTransit,
    Delivered,
    Closed,
    Canceled,
    Expired,
}

state_strings!(OrderStatus {
    CreatedPending => "created_pending",
    Accepted => "accepted",
    Rejected => "rejected",
    Hold => "hold",
    ReadyForDispatch => "ready_for_dispatch",
    InTransit => "in_transit",
    Delivered => "delivered",
    Closed => "closed",
    Canceled => "canceled",
    Expired => "expired",
});

impl OrderStatus {
    /// Statuses from which a buyer can no longer cancel or nudge.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            OrderStatus::InTransit
                | OrderStatus::Delivered
                | OrderStatus::Closed
                | OrderStatus::Canceled
                | OrderStatus::Expired
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentStatus {
    Pending,
    Partial,
    Fulfilled,
}

state_strings!(FulfillmentStatus {
    Pending => "pending",
    Partial => "partial",
    Fulfilled => "fulfilled",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShippingStatus {
    Pending,
    InTransit,
    Delivered,
}

state_strings!(ShippingStatus {
    Pending => "pending",
    InTransit => "in_transit",
    Delivered => "delivered",
});

/// Status of the payment intent attached to an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentIntentStatus {
    Unpaid,
    Pending,
    Settled,
    Paid,
    Failed,
    Rejected,
}

state_strings!(PaymentIntentStatus {
    Unpaid => "unpaid",
    Pending => "pending",
    Settled => "settled",
    Paid => "paid",
    Failed => "failed",
    Rejected => "rejected",
});

impl PaymentIntentStatus {
    /// Terminal for cash collection: no further collection is accepted.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentIntentStatus::Settled
                | PaymentIntentStatus::Paid
                | PaymentIntentStatus::Failed
                | PaymentIntentStatus::Rejected
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineItemStatus {
    Pending,
    Accepted,
    Hold,
    Fulfilled,
    Rejected,
}

state_strings!(LineItemStatus {
    Pending => "pending",
    Accepted => "accepted",
    Hold => "hold",
    Fulfilled => "fulfilled",
    Rejected => "rejected",
});

impl LineItemStatus {
    /// Items still waiting for a vendor fulfil/reject decision.
    pub fn is_unresolved(&self) -> bool {
        matches!(
            self,
            LineItemStatus::Pending | LineItemStatus::Accepted | LineItemStatus::Hold
        )
    }
}

/// How the buyer pays for an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    CashOnDelivery,
    CashOnPickup,
    Card,
    Wallet,
}

state_strings!(PaymentMethod {
    CashOnDelivery => "cash_on_delivery",
    CashOnPickup => "cash_on_pickup",
    Card => "card",
    Wallet => "wallet",
});

impl PaymentMethod {
    pub fn is_cash(&self) -> bool {
        matches!(
            self,
            PaymentMethod::CashOnDelivery | PaymentMethod::CashOnPickup
        )
    }
}
