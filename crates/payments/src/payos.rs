//! PayOS v2 adapter.
//!
//! Payment links are created with a signature over five fixed fields.
//! Webhooks are signed over every key of `data`, sorted, as `k=v&k=v`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, instrument, warn};

use fmshop_core::{Money, PaymentId};

use crate::error::GatewayError;
use crate::gateway::{
    CallbackAck, CheckoutRequest, CheckoutSession, GatewayNotification, GatewayStatus,
    PaymentGateway,
};
use crate::payment::Provider;
use crate::signature::{sign_hex, verify_hex};

pub const DEFAULT_ENDPOINT: &str = "https://api-merchant.payos.vn";

/// PayOS limits `description` to 25 characters.
const MAX_DESCRIPTION_CHARS: usize = 25;
/// Order codes must stay within JavaScript's safe integer range.
const ORDER_CODE_MASK: u64 = (1 << 53) - 1;

#[derive(Debug, Clone)]
pub struct PayOsConfig {
    pub client_id: String,
    pub api_key: String,
    pub checksum_key: String,
    pub endpoint: String,
    pub return_url: String,
    pub cancel_url: String,
}

pub struct PayOsGateway {
    config: PayOsConfig,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct LinkItem<'a> {
    name: &'a str,
    quantity: u32,
    price: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateLinkBody<'a> {
    order_code: i64,
    amount: u64,
    description: String,
    items: Vec<LinkItem<'a>>,
    cancel_url: &'a str,
    return_url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    buyer_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    buyer_phone: Option<&'a str>,
    signature: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: String,
    #[serde(default)]
    desc: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinkData {
    checkout_url: Option<String>,
    qr_code: Option<String>,
    payment_link_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinkStatus {
    amount: u64,
    status: String,
    #[serde(default)]
    transactions: Vec<LinkTransaction>,
}

#[derive(Debug, Deserialize)]
struct LinkTransaction {
    reference: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Webhook {
    data: Map<String, Value>,
    signature: Option<String>,
}

impl PayOsGateway {
    pub fn new(config: PayOsConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    fn create_body<'a>(&'a self, request: &'a CheckoutRequest) -> Result<CreateLinkBody<'a>, GatewayError> {
        let order_code: i64 = request
            .provider_ref
            .parse()
            .map_err(|_| GatewayError::Rejected(format!("invalid order code {}", request.provider_ref)))?;
        let amount = request.amount.amount();
        let description: String = format!("FMSHOP {order_code}")
            .chars()
            .take(MAX_DESCRIPTION_CHARS)
            .collect();

        let signed = format!(
            "amount={amount}&cancelUrl={}&description={description}&orderCode={order_code}&returnUrl={}",
            self.config.cancel_url, self.config.return_url
        );
        let signature = sign_hex(&self.config.checksum_key, &signed)?;

        Ok(CreateLinkBody {
            order_code,
            amount,
            description,
            items: request
                .items
                .iter()
                .map(|i| LinkItem {
                    name: &i.name,
                    quantity: i.quantity,
                    price: i.price.amount(),
                })
                .collect(),
            cancel_url: &self.config.cancel_url,
            return_url: &self.config.return_url,
            buyer_name: request.buyer_name.as_deref(),
            buyer_phone: request.buyer_phone.as_deref(),
            signature,
        })
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("x-client-id", &self.config.client_id)
            .header("x-api-key", &self.config.api_key)
    }
}

/// Canonical `key=value&...` string over sorted keys of a webhook `data`.
pub fn canonical_data(data: &Map<String, Value>) -> String {
    let mut keys: Vec<&String> = data.keys().collect();
    keys.sort();
    keys.into_iter()
        .map(|k| format!("{k}={}", canonical_value(&data[k])))
        .collect::<Vec<_>>()
        .join("&")
}

fn canonical_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(_) | Value::Number(_) | Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

fn map_status(status: &str) -> Option<GatewayStatus> {
    match status {
        "PAID" => Some(GatewayStatus::Success),
        "CANCELLED" | "EXPIRED" | "FAILED" => Some(GatewayStatus::Failed),
        "PENDING" | "PROCESSING" | "UNDERPAID" => Some(GatewayStatus::Pending),
        _ => None,
    }
}

#[async_trait]
impl PaymentGateway for PayOsGateway {
    fn provider(&self) -> Provider {
        Provider::PayOs
    }

    /// Numeric order code from the low 53 bits of the payment id's random part.
    fn transaction_ref(&self, payment_id: PaymentId, _now: DateTime<Utc>) -> String {
        let bytes = payment_id.as_uuid().as_bytes();
        let mut tail = [0u8; 8];
        tail.copy_from_slice(&bytes[8..16]);
        let code = u64::from_be_bytes(tail) & ORDER_CODE_MASK;
        code.max(1).to_string()
    }

    #[instrument(skip(self, request), fields(provider = "payos", provider_ref = %request.provider_ref))]
    async fn create_checkout(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, GatewayError> {
        let body = self.create_body(request)?;
        let response: Envelope<LinkData> = self
            .authorized(
                self.client
                    .post(format!("{}/v2/payment-requests", self.config.endpoint)),
            )
            .json(&body)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(GatewayError::from_transport)?
            .json()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        debug!(code = %response.code, "payos create response");
        match (response.code.as_str(), response.data) {
            ("00", Some(data)) => Ok(CheckoutSession {
                provider_ref: request.provider_ref.clone(),
                checkout_url: data.checkout_url,
                qr_code: data.qr_code,
                provider_token: data.payment_link_id,
            }),
            _ => Err(GatewayError::Rejected(format!(
                "{} {}",
                response.code, response.desc
            ))),
        }
    }

    fn verify_callback(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> Result<GatewayNotification, GatewayError> {
        let webhook: Webhook = serde_json::from_slice(raw_body)
            .map_err(|e| GatewayError::MalformedPayload(e.to_string()))?;

        let provided = webhook
            .signature
            .as_deref()
            .or(signature)
            .ok_or(GatewayError::InvalidSignature)?;
        if let Err(err) = verify_hex(
            &self.config.checksum_key,
            &canonical_data(&webhook.data),
            provided,
        ) {
            warn!(provider = "payos", "webhook signature mismatch");
            return Err(err);
        }

        let data = &webhook.data;
        let order_code = data
            .get("orderCode")
            .and_then(Value::as_i64)
            .ok_or_else(|| GatewayError::MalformedPayload("missing orderCode".into()))?;
        let amount = data
            .get("amount")
            .and_then(Value::as_u64)
            .ok_or_else(|| GatewayError::MalformedPayload("missing amount".into()))?;
        let status = match data.get("code").and_then(Value::as_str) {
            Some("00") => GatewayStatus::Success,
            _ => GatewayStatus::Failed,
        };

        Ok(GatewayNotification {
            provider_ref: order_code.to_string(),
            status,
            amount: Money::new(amount),
            provider_trans_id: data
                .get("reference")
                .and_then(Value::as_str)
                .map(str::to_owned),
        })
    }

    #[instrument(skip(self), fields(provider = "payos"))]
    async fn query_status(&self, provider_ref: &str) -> Result<GatewayNotification, GatewayError> {
        let response: Envelope<LinkStatus> = self
            .authorized(self.client.get(format!(
                "{}/v2/payment-requests/{provider_ref}",
                self.config.endpoint
            )))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(GatewayError::from_transport)?
            .json()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        let data = match (response.code.as_str(), response.data) {
            ("00", Some(data)) => data,
            _ => {
                return Err(GatewayError::Rejected(format!(
                    "{} {}",
                    response.code, response.desc
                )));
            }
        };
        let status = map_status(&data.status).ok_or_else(|| {
            GatewayError::MalformedPayload(format!("unknown payment status {}", data.status))
        })?;

        Ok(GatewayNotification {
            provider_ref: provider_ref.to_owned(),
            status,
            amount: Money::new(data.amount),
            provider_trans_id: data.transactions.into_iter().find_map(|t| t.reference),
        })
    }

    fn acknowledge(&self, ack: &CallbackAck) -> Value {
        match ack {
            CallbackAck::Processed | CallbackAck::Duplicate => {
                json!({"error": 0, "message": "Ok", "data": null})
            }
            CallbackAck::InvalidSignature => {
                json!({"error": -1, "message": "invalid signature", "data": null})
            }
            CallbackAck::Failed(reason) => json!({"error": -1, "message": reason, "data": null}),
        }
    }
}
