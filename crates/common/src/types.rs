//! Identifier newtypes for the entities flowing through the saga.
//!
//! Orders, customers, and products are minted by upstream services and
//! arrive as opaque strings; payments, refunds, and shipments are created
//! here and get generated UUIDs.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates an identifier from a string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an identifier from an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
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

string_id! {
    /// Unique identifier for an order, assigned by the order service.
    OrderId
}

string_id! {
    /// Unique identifier for a customer account.
    CustomerId
}

string_id! {
    /// Product identifier (SKU).
    ProductId
}

uuid_id! {
    /// Unique identifier for a payment record.
    PaymentId
}

uuid_id! {
    /// Unique identifier for a refund record.
    RefundId
}

uuid_id! {
    /// Unique identifier for a shipment record.
    ShipmentId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_ids_preserve_value() {
        let order = OrderId::new("o-123");
        assert_eq!(order.as_str(), "o-123");
        assert_eq!(order.to_string(), "o-123");

        let product: ProductId = "sku-1".into();
        assert_eq!(product.as_str(), "sku-1");
    }

    #[test]
    fn uuid_ids_are_unique() {
        assert_ne!(PaymentId::new(), PaymentId::new());
        assert_ne!(RefundId::new(), RefundId::new());
        assert_ne!(ShipmentId::new(), ShipmentId::new());
    }

    #[test]
    fn uuid_id_from_uuid_preserves_value() {
        let uuid = Uuid::new_v4();
        let id = ShipmentId::from_uuid(uuid);
        assert_eq!(id.as_uuid(), uuid);
    }

    #[test]
    fn serialization_is_transparent() {
        let order = OrderId::new("o1");
        assert_eq!(serde_json::to_string(&order).unwrap(), "\"o1\"");

        let payment = PaymentId::new();
        let json = serde_json::to_string(&payment).unwrap();
        let back: PaymentId = serde_json::from_str(&json).unwrap();
        assert_eq!(payment, back);
    }
}
