use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Declares a UUID-backed identifier with the conversions every id in the
/// marketplace needs (generation, parsing, display, nil check).
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn from_string(s: &str) -> Option<Self> {
                Uuid::parse_str(s).ok().map(Self)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// The all-zero id is never a valid reference.
            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_id!(
    /// Order aggregate root
    OrderId
);
uuid_id!(
    /// Line item inside an order
    LineItemId
);
uuid_id!(
    /// Payment intent attached to an order
    PaymentIntentId
);
uuid_id!(
    /// Delivery assignment of an order to an agent
    AssignmentId
);
uuid_id!(
    /// Groups the orders produced by one checkout
    CheckoutGroupId
);
uuid_id!(
    /// Vendor store (tenant)
    StoreId
);
uuid_id!(
    /// Buyer, vendor staff or delivery agent
    UserId
);
uuid_id!(ProductId);
uuid_id!(
    /// Identity of one published envelope, used for broker dedup and
    /// consumer idempotency marks
    EventId
);
uuid_id!(LedgerEventId);
