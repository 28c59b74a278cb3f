use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fmshop_core::{Money, OrderId, PaymentId, UserId};
use fmshop_orders::Order;

use crate::error::GatewayError;
use crate::payment::{Payment, PaymentMethod, Provider};

/// Line sent to the provider for display on its checkout page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutItem {
    pub name: String,
    pub quantity: u32,
    pub price: Money,
}

/// Everything an adapter needs to open a checkout for one payment attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutRequest {
    pub payment_id: PaymentId,
    pub order_id: OrderId,
    pub user_id: UserId,
    pub provider_ref: String,
    pub amount: Money,
    pub method: PaymentMethod,
    pub description: String,
    pub items: Vec<CheckoutItem>,
    pub buyer_name: Option<String>,
    pub buyer_phone: Option<String>,
    pub requested_at: DateTime<Utc>,
}

impl CheckoutRequest {
    pub fn for_order(order: &Order, payment: &Payment, now: DateTime<Utc>) -> Self {
        Self {
            payment_id: payment.id(),
            order_id: order.order_id(),
            user_id: order.user_id(),
            provider_ref: payment.provider_ref().to_owned(),
            amount: payment.amount(),
            method: payment.method(),
            description: format!("FMShop - Thanh toan don hang #{}", order.order_id()),
            items: order
                .items()
                .iter()
                .map(|item| CheckoutItem {
                    name: item.name.clone(),
                    quantity: item.quantity,
                    price: item.price,
                })
                .collect(),
            buyer_name: order.shipping().recipient_name.clone(),
            buyer_phone: order.shipping().recipient_phone.clone(),
            requested_at: now,
        }
    }
}

/// Provider's answer to a successful checkout creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub provider_ref: String,
    /// Redirect URL for the customer.
    pub checkout_url: Option<String>,
    pub qr_code: Option<String>,
    /// Provider-side token or link id (zp_trans_token, paymentLinkId).
    pub provider_token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayStatus {
    Success,
    Failed,
    Pending,
}

/// Normalized callback or status-query result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayNotification {
    pub provider_ref: String,
    pub status: GatewayStatus,
    pub amount: Money,
    /// Provider's own transaction id, when it reports one.
    pub provider_trans_id: Option<String>,
}

/// How a callback was handled, rendered into the provider's ack format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAck {
    Processed,
    Duplicate,
    InvalidSignature,
    Failed(String),
}

/// Capability set of a payment provider.
///
/// `verify_callback` must check the signature before it trusts any field of
/// the payload.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn provider(&self) -> Provider;

    /// Provider reference for a new payment attempt, derived from its id.
    fn transaction_ref(&self, payment_id: PaymentId, now: DateTime<Utc>) -> String;

    async fn create_checkout(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, GatewayError>;

    fn verify_callback(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> Result<GatewayNotification, GatewayError>;

    async fn query_status(&self, provider_ref: &str) -> Result<GatewayNotification, GatewayError>;

    /// Response body the provider expects for a handled callback.
    fn acknowledge(&self, ack: &CallbackAck) -> serde_json::Value;
}
