//! # Domain Types
//!
//! Value types for the state the engine keeps in sync with the backend.
//!
//! ## Type Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │      Cart       │   │    Wishlist     │   │   DeviceType    │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  items[]        │   │  items[]        │   │  Ios            │       │
//! │  │  currency?      │   │                 │   │  Android        │       │
//! │  └────────┬────────┘   └────────┬────────┘   │  Web            │       │
//! │           │                     │            └─────────────────┘       │
//! │           ▼                     ▼                                       │
//! │  ┌─────────────────┐   ┌─────────────────┐                              │
//! │  │    CartItem     │   │  WishlistItem   │                              │
//! │  │  product_id     │   │  product_id     │                              │
//! │  │  variant_id?    │   │  variant_id?    │                              │
//! │  │  quantity       │   └─────────────────┘                              │
//! │  │  price?         │                                                    │
//! │  └─────────────────┘                                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Cart and wishlist are compared structurally (`PartialEq`) to decide
//! whether a committed value is a real change.

use serde::{Deserialize, Serialize};

// =============================================================================
// Cart
// =============================================================================

/// A line in the shopping cart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    /// Product identifier in the merchant catalog.
    pub product_id: String,

    /// Variant (size, color, ...) if the product has variants.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<String>,

    /// Number of units.
    pub quantity: u32,

    /// Unit price in the cart currency, as reported by the host app.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
}

impl CartItem {
    /// Creates a cart line without variant or price.
    pub fn new(product_id: impl Into<String>, quantity: u32) -> Self {
        CartItem {
            product_id: product_id.into(),
            variant_id: None,
            quantity,
            price: None,
        }
    }
}

/// The shopping cart as last committed by the host app.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    /// Cart lines, in host-app order.
    #[serde(default)]
    pub items: Vec<CartItem>,

    /// ISO 4217 currency code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

impl Cart {
    /// Creates a cart from its lines.
    pub fn new(items: Vec<CartItem>) -> Self {
        Cart {
            items,
            currency: None,
        }
    }

    /// Returns true if the cart holds no lines.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Total number of units across all lines.
    pub fn total_quantity(&self) -> u64 {
        self.items.iter().map(|i| u64::from(i.quantity)).sum()
    }
}

// =============================================================================
// Wishlist
// =============================================================================

/// A saved product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WishlistItem {
    pub product_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<String>,
}

impl WishlistItem {
    pub fn new(product_id: impl Into<String>) -> Self {
        WishlistItem {
            product_id: product_id.into(),
            variant_id: None,
        }
    }
}

/// The wishlist as last committed by the host app.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wishlist {
    #[serde(default)]
    pub items: Vec<WishlistItem>,
}

impl Wishlist {
    pub fn new(items: Vec<WishlistItem>) -> Self {
        Wishlist { items }
    }
}

// =============================================================================
// Device Type
// =============================================================================

/// Platform that issued the push token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Ios,
    Android,
    Web,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Ios => write!(f, "ios"),
            DeviceType::Android => write!(f, "android"),
            DeviceType::Web => write!(f, "web"),
        }
    }
}

impl std::str::FromStr for DeviceType {
    type Err = crate::error::ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ios" => Ok(DeviceType::Ios),
            "android" => Ok(DeviceType::Android),
            "web" => Ok(DeviceType::Web),
            other => Err(crate::error::ValidationError::InvalidFormat {
                field: "deviceType".to_string(),
                reason: format!("unknown device type '{}'", other),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cart_structural_equality() {
        let a = Cart::new(vec![CartItem::new("sku-1", 2)]);
        let b = Cart::new(vec![CartItem::new("sku-1", 2)]);
        let c = Cart::new(vec![CartItem::new("sku-1", 3)]);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(c.total_quantity(), 3);
    }

    #[test]
    fn test_cart_json_shape() {
        let cart = Cart::new(vec![CartItem::new("sku-1", 1)]);
        let json = serde_json::to_value(&cart).unwrap();
        assert_eq!(json["items"][0]["productId"], "sku-1");
        assert!(json["items"][0].get("variantId").is_none());
    }

    #[test]
    fn test_device_type_parsing() {
        assert_eq!("iOS".parse::<DeviceType>().unwrap(), DeviceType::Ios);
        assert_eq!("android".parse::<DeviceType>().unwrap(), DeviceType::Android);
        assert!("symbian".parse::<DeviceType>().is_err());
    }
}
