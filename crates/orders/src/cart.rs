use serde::{Deserialize, Serialize};

use fmshop_core::{Money, ProductId, ValueObject};

use crate::error::OrderError;

/// A requested line: product and quantity, no price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// Validated cart: non-empty, every quantity positive, one line per product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cart {
    items: Vec<CartItem>,
}

impl Cart {
    /// Validate raw cart lines.
    ///
    /// Repeated products are merged into the first line that names them, so
    /// each product maps to exactly one reservation later on.
    pub fn new(items: impl IntoIterator<Item = CartItem>) -> Result<Self, OrderError> {
        let mut merged: Vec<CartItem> = Vec::new();

        for item in items {
            if item.quantity == 0 {
                return Err(OrderError::InvalidQuantity(item.product_id));
            }
            match merged.iter_mut().find(|m| m.product_id == item.product_id) {
                Some(existing) => {
                    existing.quantity = existing
                        .quantity
                        .checked_add(item.quantity)
                        .ok_or(OrderError::InvalidQuantity(item.product_id))?;
                }
                None => merged.push(item),
            }
        }

        if merged.is_empty() {
            return Err(OrderError::EmptyCart);
        }
        Ok(Self { items: merged })
    }

    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    pub fn product_ids(&self) -> impl Iterator<Item = ProductId> + '_ {
        self.items.iter().map(|i| i.product_id)
    }
}

/// Catalog data captured at order-creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub product_id: ProductId,
    pub name: String,
    pub price: Money,
    pub unit: String,
}

/// Delivery details copied onto the order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingInfo {
    pub recipient_name: Option<String>,
    pub recipient_phone: Option<String>,
    pub shipping_address: Option<String>,
    pub shipping_city: Option<String>,
    pub shipping_province: Option<String>,
    pub shipping_postal_code: Option<String>,
}

impl ValueObject for ShippingInfo {}

impl ShippingInfo {
    /// Fill a missing recipient from the user's name and a missing address
    /// from the user's location. Explicit values win.
    pub fn with_defaults(mut self, full_name: Option<&str>, location: Option<&str>) -> Self {
        if blank(&self.recipient_name) {
            self.recipient_name = full_name.map(str::to_owned);
        }
        if blank(&self.shipping_address) {
            self.shipping_address = location.map(str::to_owned);
        }
        self
    }
}

fn blank(field: &Option<String>) -> bool {
    field.as_deref().is_none_or(|s| s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(product_id: ProductId, quantity: u32) -> CartItem {
        CartItem {
            product_id,
            quantity,
        }
    }

    #[test]
    fn empty_cart_is_rejected() {
        assert_eq!(Cart::new(Vec::new()), Err(OrderError::EmptyCart));
    }

    #[test]
    fn zero_quantity_is_rejected() {
        let a = ProductId::new();
        let b = ProductId::new();
        let err = Cart::new([item(a, 1), item(b, 0)]).unwrap_err();
        assert_eq!(err, OrderError::InvalidQuantity(b));
    }

    #[test]
    fn repeated_products_are_merged_in_order() {
        let a = ProductId::new();
        let b = ProductId::new();
        let cart = Cart::new([item(a, 1), item(b, 2), item(a, 3)]).unwrap();

        assert_eq!(cart.items(), &[item(a, 4), item(b, 2)]);
    }

    #[test]
    fn merge_overflow_is_invalid_quantity() {
        let a = ProductId::new();
        let err = Cart::new([item(a, u32::MAX), item(a, 1)]).unwrap_err();
        assert_eq!(err, OrderError::InvalidQuantity(a));
    }

    #[test]
    fn shipping_defaults_fill_only_missing_fields() {
        let shipping = ShippingInfo {
            recipient_name: Some("  ".into()),
            shipping_address: Some("12 Ly Thuong Kiet".into()),
            ..ShippingInfo::default()
        }
        .with_defaults(Some("Nguyen Van A"), Some("Ha Noi"));

        assert_eq!(shipping.recipient_name.as_deref(), Some("Nguyen Van A"));
        assert_eq!(shipping.shipping_address.as_deref(), Some("12 Ly Thuong Kiet"));
    }
}
