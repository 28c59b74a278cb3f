use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fmshop_core::{Money, OrderId, UserId};
use fmshop_infra::ledger::LedgerCheck;
use fmshop_inventory::{InventoryRecord, InventoryTransaction};
use fmshop_orders::{CartItem, Order, OrderItem, OrderStatus, ShippingInfo};
use fmshop_payments::{Payment, PaymentMethod};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub user_id: UserId,
    pub items: Vec<CartItem>,
    pub shipping: Option<ShippingInfo>,
    pub method: String,
}

#[derive(Debug, Deserialize)]
pub struct CancelOrderRequest {
    pub user_id: UserId,
}

#[derive(Debug, Deserialize)]
pub struct RetryPaymentRequest {
    pub method: String,
}

#[derive(Debug, Deserialize)]
pub struct RestockRequest {
    pub quantity: u32,
    pub unit: Option<String>,
}

pub fn parse_method(raw: &str) -> Result<PaymentMethod, axum::response::Response> {
    PaymentMethod::parse(raw).ok_or_else(|| {
        errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_payment_method",
            "method must be one of: zalopayapp, ATM, CC, QR, payos",
        )
    })
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub status: OrderStatus,
    pub total_amount: Money,
    pub items: Vec<OrderItem>,
    pub shipping: ShippingInfo,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.order_id(),
            user_id: order.user_id(),
            status: order.status(),
            total_amount: order.total_amount(),
            items: order.items().to_vec(),
            shipping: order.shipping().clone(),
            created_at: order.created_at(),
            updated_at: order.updated_at(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OrderDetailResponse {
    #[serde(flatten)]
    pub order: OrderResponse,
    pub payments: Vec<Payment>,
}

#[derive(Debug, Serialize)]
pub struct InventoryResponse {
    pub record: InventoryRecord,
    pub transactions: Vec<InventoryTransaction>,
    pub check: LedgerCheck,
}
