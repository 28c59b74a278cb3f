use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fmshop_core::{Money, OrderId, PaymentId};

use crate::error::PaymentError;
use crate::gateway::CheckoutSession;

/// Payment providers the shop talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    ZaloPay,
    PayOs,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::ZaloPay => "zalopay",
            Provider::PayOs => "payos",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "zalopay" => Some(Provider::ZaloPay),
            "payos" => Some(Provider::PayOs),
            _ => None,
        }
    }
}

impl core::fmt::Display for Provider {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment method requested at checkout.
///
/// The four ZaloPay channels differ only in the `bank_code` sent to ZaloPay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentMethod {
    #[serde(rename = "zalopayapp")]
    ZaloPayApp,
    #[serde(rename = "ATM")]
    Atm,
    #[serde(rename = "CC")]
    CreditCard,
    #[serde(rename = "QR")]
    Qr,
    #[serde(rename = "payos")]
    PayOs,
}

impl PaymentMethod {
    pub fn provider(self) -> Provider {
        match self {
            PaymentMethod::PayOs => Provider::PayOs,
            _ => Provider::ZaloPay,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::ZaloPayApp => "zalopayapp",
            PaymentMethod::Atm => "ATM",
            PaymentMethod::CreditCard => "CC",
            PaymentMethod::Qr => "QR",
            PaymentMethod::PayOs => "payos",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "zalopayapp" => Some(PaymentMethod::ZaloPayApp),
            "ATM" => Some(PaymentMethod::Atm),
            "CC" => Some(PaymentMethod::CreditCard),
            "QR" => Some(PaymentMethod::Qr),
            "payos" => Some(PaymentMethod::PayOs),
            _ => None,
        }
    }

    /// ZaloPay `bank_code`; empty lets the ZaloPay gateway page choose.
    pub fn zalopay_bank_code(self) -> &'static str {
        match self {
            PaymentMethod::ZaloPayApp => "zalopayapp",
            PaymentMethod::CreditCard => "CC",
            PaymentMethod::Atm | PaymentMethod::Qr | PaymentMethod::PayOs => "",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// Row written, gateway not yet confirmed the checkout.
    Initiated,
    /// Checkout created at the provider, waiting for the customer.
    Pending,
    Success,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Initiated => "initiated",
            PaymentStatus::Pending => "pending",
            PaymentStatus::Success => "success",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "initiated" => Some(PaymentStatus::Initiated),
            "pending" => Some(PaymentStatus::Pending),
            "success" => Some(PaymentStatus::Success),
            "failed" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PaymentStatus::Success | PaymentStatus::Failed)
    }
}

impl core::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flat persisted form of a [`Payment`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentParts {
    pub id: PaymentId,
    pub order_id: OrderId,
    pub amount: Money,
    pub method: PaymentMethod,
    pub provider: Provider,
    pub provider_ref: String,
    pub status: PaymentStatus,
    pub attempt: u32,
    pub checkout_url: Option<String>,
    pub qr_code: Option<String>,
    pub provider_trans_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One payment attempt for an order.
///
/// Once `success` or `failed` a payment never changes again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    id: PaymentId,
    order_id: OrderId,
    amount: Money,
    method: PaymentMethod,
    provider: Provider,
    provider_ref: String,
    status: PaymentStatus,
    attempt: u32,
    checkout_url: Option<String>,
    qr_code: Option<String>,
    provider_trans_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Payment {
    /// New attempt in `initiated`, written before the gateway is called.
    pub fn initiate(
        id: PaymentId,
        order_id: OrderId,
        amount: Money,
        method: PaymentMethod,
        provider_ref: impl Into<String>,
        attempt: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            order_id,
            amount,
            method,
            provider: method.provider(),
            provider_ref: provider_ref.into(),
            status: PaymentStatus::Initiated,
            attempt,
            checkout_url: None,
            qr_code: None,
            provider_trans_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn restore(parts: PaymentParts) -> Self {
        Self {
            id: parts.id,
            order_id: parts.order_id,
            amount: parts.amount,
            method: parts.method,
            provider: parts.provider,
            provider_ref: parts.provider_ref,
            status: parts.status,
            attempt: parts.attempt,
            checkout_url: parts.checkout_url,
            qr_code: parts.qr_code,
            provider_trans_id: parts.provider_trans_id,
            created_at: parts.created_at,
            updated_at: parts.updated_at,
        }
    }

    pub fn mark_pending(
        &mut self,
        session: &CheckoutSession,
        now: DateTime<Utc>,
    ) -> Result<(), PaymentError> {
        self.transition(PaymentStatus::Pending, now)?;
        self.checkout_url = session.checkout_url.clone();
        self.qr_code = session.qr_code.clone();
        Ok(())
    }

    pub fn mark_success(
        &mut self,
        provider_trans_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), PaymentError> {
        self.transition(PaymentStatus::Success, now)?;
        if provider_trans_id.is_some() {
            self.provider_trans_id = provider_trans_id;
        }
        Ok(())
    }

    pub fn mark_failed(&mut self, now: DateTime<Utc>) -> Result<(), PaymentError> {
        self.transition(PaymentStatus::Failed, now)
    }

    /// Keep the provider's transaction id for money captured after this
    /// attempt was already failed. The status stays `failed`.
    pub fn record_late_capture(
        &mut self,
        provider_trans_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), PaymentError> {
        if self.status != PaymentStatus::Failed {
            return Err(PaymentError::InvalidTransition {
                from: self.status,
                to: PaymentStatus::Success,
            });
        }
        if provider_trans_id.is_some() {
            self.provider_trans_id = provider_trans_id;
        }
        self.updated_at = now;
        Ok(())
    }

    fn transition(&mut self, to: PaymentStatus, now: DateTime<Utc>) -> Result<(), PaymentError> {
        let allowed = match (self.status, to) {
            (PaymentStatus::Initiated, PaymentStatus::Pending) => true,
            (PaymentStatus::Initiated | PaymentStatus::Pending, PaymentStatus::Success)
            | (PaymentStatus::Initiated | PaymentStatus::Pending, PaymentStatus::Failed) => true,
            _ => false,
        };
        if !allowed {
            return Err(PaymentError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    pub fn id(&self) -> PaymentId {
        self.id
    }

    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn method(&self) -> PaymentMethod {
        self.method
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn provider_ref(&self) -> &str {
        &self.provider_ref
    }

    pub fn status(&self) -> PaymentStatus {
        self.status
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn checkout_url(&self) -> Option<&str> {
        self.checkout_url.as_deref()
    }

    pub fn qr_code(&self) -> Option<&str> {
        self.qr_code.as_deref()
    }

    pub fn provider_trans_id(&self) -> Option<&str> {
        self.provider_trans_id.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_payment(method: PaymentMethod) -> Payment {
        Payment::initiate(
            PaymentId::new(),
            OrderId::new(),
            Money::new(200),
            method,
            "241018_abc",
            1,
            Utc::now(),
        )
    }

    fn session() -> CheckoutSession {
        CheckoutSession {
            provider_ref: "241018_abc".into(),
            checkout_url: Some("https://pay.example/checkout".into()),
            qr_code: None,
            provider_token: None,
        }
    }

    #[test]
    fn methods_route_to_providers() {
        assert_eq!(PaymentMethod::ZaloPayApp.provider(), Provider::ZaloPay);
        assert_eq!(PaymentMethod::Atm.provider(), Provider::ZaloPay);
        assert_eq!(PaymentMethod::CreditCard.provider(), Provider::ZaloPay);
        assert_eq!(PaymentMethod::Qr.provider(), Provider::ZaloPay);
        assert_eq!(PaymentMethod::PayOs.provider(), Provider::PayOs);
        assert_eq!(PaymentMethod::parse("CC"), Some(PaymentMethod::CreditCard));
    }

    #[test]
    fn method_serializes_with_wire_names() {
        let json = serde_json::to_string(&PaymentMethod::ZaloPayApp).unwrap();
        assert_eq!(json, "\"zalopayapp\"");
        let back: PaymentMethod = serde_json::from_str("\"ATM\"").unwrap();
        assert_eq!(back, PaymentMethod::Atm);
    }

    #[test]
    fn lifecycle_initiated_pending_success() {
        let mut payment = test_payment(PaymentMethod::ZaloPayApp);
        assert_eq!(payment.status(), PaymentStatus::Initiated);

        payment.mark_pending(&session(), Utc::now()).unwrap();
        assert_eq!(payment.status(), PaymentStatus::Pending);
        assert_eq!(payment.checkout_url(), Some("https://pay.example/checkout"));

        payment
            .mark_success(Some("240000123".into()), Utc::now())
            .unwrap();
        assert!(payment.is_terminal());
        assert_eq!(payment.provider_trans_id(), Some("240000123"));
    }

    #[test]
    fn terminal_payment_never_moves_back() {
        let mut payment = test_payment(PaymentMethod::PayOs);
        payment.mark_failed(Utc::now()).unwrap();

        assert_eq!(
            payment.mark_pending(&session(), Utc::now()),
            Err(PaymentError::InvalidTransition {
                from: PaymentStatus::Failed,
                to: PaymentStatus::Pending,
            })
        );
        assert!(payment.mark_success(None, Utc::now()).is_err());
        assert_eq!(payment.status(), PaymentStatus::Failed);
    }

    #[test]
    fn late_capture_keeps_failed_status() {
        let mut payment = test_payment(PaymentMethod::ZaloPayApp);
        assert!(payment.record_late_capture(Some("x".into()), Utc::now()).is_err());

        payment.mark_failed(Utc::now()).unwrap();
        payment
            .record_late_capture(Some("240000999".into()), Utc::now())
            .unwrap();
        assert_eq!(payment.status(), PaymentStatus::Failed);
        assert_eq!(payment.provider_trans_id(), Some("240000999"));
    }
}
