//! Scripted in-process gateway for tests and local runs.
//!
//! Checkout creation succeeds unless a failure was queued with
//! [`ScriptedGateway::fail_next_create`]. Status queries answer from a table
//! filled by [`ScriptedGateway::set_status`]. Callbacks are JSON
//! `{provider_ref, status, amount, signature}` signed with the shared secret
//! over `provider_ref|status|amount`.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use fmshop_core::{Money, PaymentId};

use crate::error::GatewayError;
use crate::gateway::{
    CallbackAck, CheckoutRequest, CheckoutSession, GatewayNotification, GatewayStatus,
    PaymentGateway,
};
use crate::payment::Provider;
use crate::signature::{sign_hex, verify_hex};

#[derive(Debug, Serialize, Deserialize)]
struct MockCallback {
    provider_ref: String,
    status: GatewayStatus,
    amount: u64,
    signature: String,
}

pub struct ScriptedGateway {
    provider: Provider,
    secret: String,
    create_failures: Mutex<VecDeque<GatewayError>>,
    statuses: Mutex<HashMap<String, (GatewayStatus, Money)>>,
    create_calls: AtomicUsize,
    query_calls: AtomicUsize,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn signed_fields(provider_ref: &str, status: GatewayStatus, amount: u64) -> String {
    let status = match status {
        GatewayStatus::Success => "success",
        GatewayStatus::Failed => "failed",
        GatewayStatus::Pending => "pending",
    };
    format!("{provider_ref}|{status}|{amount}")
}

/// Providers only assign a transaction id once money moved.
fn trans_id(provider_ref: &str, status: GatewayStatus) -> Option<String> {
    (status == GatewayStatus::Success).then(|| format!("txn_{provider_ref}"))
}

impl ScriptedGateway {
    pub fn new(provider: Provider, secret: impl Into<String>) -> Self {
        Self {
            provider,
            secret: secret.into(),
            create_failures: Mutex::new(VecDeque::new()),
            statuses: Mutex::new(HashMap::new()),
            create_calls: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
        }
    }

    /// Queue an error for the next `create_checkout` call.
    pub fn fail_next_create(&self, err: GatewayError) {
        lock(&self.create_failures).push_back(err);
    }

    /// Answer future status queries for `provider_ref`.
    pub fn set_status(&self, provider_ref: &str, status: GatewayStatus, amount: Money) {
        lock(&self.statuses).insert(provider_ref.to_owned(), (status, amount));
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    /// Callback body as the provider would send it.
    pub fn signed_callback(
        &self,
        provider_ref: &str,
        status: GatewayStatus,
        amount: Money,
    ) -> Result<Vec<u8>, GatewayError> {
        let signature = sign_hex(
            &self.secret,
            &signed_fields(provider_ref, status, amount.amount()),
        )?;
        let body = MockCallback {
            provider_ref: provider_ref.to_owned(),
            status,
            amount: amount.amount(),
            signature,
        };
        serde_json::to_vec(&body).map_err(|e| GatewayError::MalformedPayload(e.to_string()))
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn transaction_ref(&self, payment_id: PaymentId, _now: DateTime<Utc>) -> String {
        format!("mock_{}", payment_id.as_uuid().simple())
    }

    async fn create_checkout(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, GatewayError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = lock(&self.create_failures).pop_front() {
            return Err(err);
        }
        Ok(CheckoutSession {
            provider_ref: request.provider_ref.clone(),
            checkout_url: Some(format!("https://mock.pay/{}", request.provider_ref)),
            qr_code: Some(format!("mock-qr:{}", request.provider_ref)),
            provider_token: None,
        })
    }

    fn verify_callback(
        &self,
        raw_body: &[u8],
        _signature: Option<&str>,
    ) -> Result<GatewayNotification, GatewayError> {
        let body: MockCallback = serde_json::from_slice(raw_body)
            .map_err(|e| GatewayError::MalformedPayload(e.to_string()))?;
        verify_hex(
            &self.secret,
            &signed_fields(&body.provider_ref, body.status, body.amount),
            &body.signature,
        )?;
        let provider_trans_id = trans_id(&body.provider_ref, body.status);
        Ok(GatewayNotification {
            provider_ref: body.provider_ref,
            status: body.status,
            amount: Money::new(body.amount),
            provider_trans_id,
        })
    }

    async fn query_status(&self, provider_ref: &str) -> Result<GatewayNotification, GatewayError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        let (status, amount) = lock(&self.statuses)
            .get(provider_ref)
            .copied()
            .unwrap_or((GatewayStatus::Pending, Money::ZERO));
        Ok(GatewayNotification {
            provider_ref: provider_ref.to_owned(),
            status,
            amount,
            provider_trans_id: trans_id(provider_ref, status),
        })
    }

    fn acknowledge(&self, ack: &CallbackAck) -> serde_json::Value {
        match ack {
            CallbackAck::Processed => json!({"ack": "processed"}),
            CallbackAck::Duplicate => json!({"ack": "duplicate"}),
            CallbackAck::InvalidSignature => json!({"ack": "rejected", "reason": "invalid signature"}),
            CallbackAck::Failed(reason) => json!({"ack": "rejected", "reason": reason}),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_callback_verifies_and_tampering_fails() {
        let gw = ScriptedGateway::new(Provider::ZaloPay, "secret");
        let raw = gw
            .signed_callback("mock_1", GatewayStatus::Success, Money::new(200))
            .unwrap();

        let n = gw.verify_callback(&raw, None).unwrap();
        assert_eq!(n.amount, Money::new(200));
        assert_eq!(n.provider_trans_id.as_deref(), Some("txn_mock_1"));

        let mut tampered: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        tampered["amount"] = json!(201);
        assert_eq!(
            gw.verify_callback(tampered.to_string().as_bytes(), None),
            Err(GatewayError::InvalidSignature)
        );
    }

    #[tokio::test]
    async fn queued_failure_applies_once() {
        let gw = ScriptedGateway::new(Provider::PayOs, "secret");
        gw.fail_next_create(GatewayError::Unavailable("503".into()));
        let request = CheckoutRequest {
            payment_id: PaymentId::new(),
            order_id: fmshop_core::OrderId::new(),
            user_id: fmshop_core::UserId::new(),
            provider_ref: "mock_x".into(),
            amount: Money::new(10),
            method: crate::payment::PaymentMethod::PayOs,
            description: String::new(),
            items: vec![],
            buyer_name: None,
            buyer_phone: None,
            requested_at: Utc::now(),
        };

        assert!(gw.create_checkout(&request).await.is_err());
        assert!(gw.create_checkout(&request).await.is_ok());
        assert_eq!(gw.create_calls(), 2);
    }
}
