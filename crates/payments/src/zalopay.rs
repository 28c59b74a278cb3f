//! ZaloPay v2 adapter.
//!
//! Create and query requests are form-encoded and signed with `key1`;
//! callbacks carry `{data, mac, type}` where `mac` is HMAC(`key2`, data).

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument, warn};

use fmshop_core::{Money, PaymentId};

use crate::error::GatewayError;
use crate::gateway::{
    CallbackAck, CheckoutRequest, CheckoutSession, GatewayNotification, GatewayStatus,
    PaymentGateway,
};
use crate::payment::Provider;
use crate::signature::{sign_hex, verify_hex};

pub const SANDBOX_ENDPOINT: &str = "https://sb-openapi.zalopay.vn/v2";

#[derive(Debug, Clone)]
pub struct ZaloPayConfig {
    pub app_id: String,
    pub key1: String,
    pub key2: String,
    pub endpoint: String,
    pub callback_url: Option<String>,
    pub redirect_url: Option<String>,
}

pub struct ZaloPayGateway {
    config: ZaloPayConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    return_code: i64,
    #[serde(default)]
    return_message: String,
    #[serde(default)]
    sub_return_message: String,
    order_url: Option<String>,
    zp_trans_token: Option<String>,
    qr_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    return_code: i64,
    #[serde(default)]
    return_message: String,
    #[serde(default)]
    amount: u64,
    zp_trans_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct CallbackEnvelope {
    data: String,
    mac: String,
}

#[derive(Debug, Deserialize)]
struct CallbackData {
    app_trans_id: String,
    amount: u64,
    zp_trans_id: Option<u64>,
}

impl ZaloPayGateway {
    pub fn new(config: ZaloPayConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    /// Signed form for `/create`.
    fn create_form(&self, request: &CheckoutRequest) -> Result<Vec<(&'static str, String)>, GatewayError> {
        let app_user = request.user_id.to_string();
        let amount = request.amount.amount().to_string();
        let app_time = request.requested_at.timestamp_millis().to_string();
        let embed_data = json!({
            "redirecturl": self.config.redirect_url.clone().unwrap_or_default(),
        })
        .to_string();
        let item = serde_json::Value::Array(
            request
                .items
                .iter()
                .map(|i| {
                    json!({
                        "itemname": i.name,
                        "itemprice": i.price.amount(),
                        "itemquantity": i.quantity,
                    })
                })
                .collect(),
        )
        .to_string();

        let mac_input = [
            self.config.app_id.as_str(),
            request.provider_ref.as_str(),
            app_user.as_str(),
            amount.as_str(),
            app_time.as_str(),
            embed_data.as_str(),
            item.as_str(),
        ]
        .join("|");
        let mac = sign_hex(&self.config.key1, &mac_input)?;

        Ok(vec![
            ("app_id", self.config.app_id.clone()),
            ("app_user", app_user),
            ("app_trans_id", request.provider_ref.clone()),
            ("app_time", app_time),
            ("amount", amount),
            ("item", item),
            ("embed_data", embed_data),
            ("description", request.description.clone()),
            ("bank_code", request.method.zalopay_bank_code().to_owned()),
            (
                "callback_url",
                self.config.callback_url.clone().unwrap_or_default(),
            ),
            ("mac", mac),
        ])
    }
}

#[async_trait]
impl PaymentGateway for ZaloPayGateway {
    fn provider(&self) -> Provider {
        Provider::ZaloPay
    }

    /// `yymmdd_<payment id>`, dated in Vietnam time (GMT+7).
    fn transaction_ref(&self, payment_id: PaymentId, now: DateTime<Utc>) -> String {
        let local = now + Duration::hours(7);
        format!(
            "{}_{}",
            local.format("%y%m%d"),
            payment_id.as_uuid().simple()
        )
    }

    #[instrument(skip(self, request), fields(provider = "zalopay", provider_ref = %request.provider_ref))]
    async fn create_checkout(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, GatewayError> {
        let form = self.create_form(request)?;
        let response: CreateResponse = self
            .client
            .post(format!("{}/create", self.config.endpoint))
            .form(&form)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(GatewayError::from_transport)?
            .json()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        debug!(return_code = response.return_code, "zalopay create response");
        match response.return_code {
            1 => Ok(CheckoutSession {
                provider_ref: request.provider_ref.clone(),
                checkout_url: response.order_url,
                qr_code: response.qr_code,
                provider_token: response.zp_trans_token,
            }),
            2 => Err(GatewayError::Rejected(format!(
                "{} {}",
                response.return_message, response.sub_return_message
            ))),
            _ => Err(GatewayError::Unavailable(response.return_message)),
        }
    }

    fn verify_callback(
        &self,
        raw_body: &[u8],
        _signature: Option<&str>,
    ) -> Result<GatewayNotification, GatewayError> {
        let envelope: CallbackEnvelope = serde_json::from_slice(raw_body)
            .map_err(|e| GatewayError::MalformedPayload(e.to_string()))?;

        if let Err(err) = verify_hex(&self.config.key2, &envelope.data, &envelope.mac) {
            warn!(provider = "zalopay", "callback mac mismatch");
            return Err(err);
        }

        let data: CallbackData = serde_json::from_str(&envelope.data)
            .map_err(|e| GatewayError::MalformedPayload(e.to_string()))?;

        // ZaloPay only calls back for completed payments.
        Ok(GatewayNotification {
            provider_ref: data.app_trans_id,
            status: GatewayStatus::Success,
            amount: Money::new(data.amount),
            provider_trans_id: data.zp_trans_id.map(|id| id.to_string()),
        })
    }

    #[instrument(skip(self), fields(provider = "zalopay"))]
    async fn query_status(&self, provider_ref: &str) -> Result<GatewayNotification, GatewayError> {
        let mac_input = format!(
            "{}|{}|{}",
            self.config.app_id, provider_ref, self.config.key1
        );
        let mac = sign_hex(&self.config.key1, &mac_input)?;
        let form = [
            ("app_id", self.config.app_id.as_str()),
            ("app_trans_id", provider_ref),
            ("mac", mac.as_str()),
        ];

        let response: QueryResponse = self
            .client
            .post(format!("{}/query", self.config.endpoint))
            .form(&form)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(GatewayError::from_transport)?
            .json()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        let status = match response.return_code {
            1 => GatewayStatus::Success,
            2 => GatewayStatus::Failed,
            3 => GatewayStatus::Pending,
            _ => return Err(GatewayError::Unavailable(response.return_message)),
        };

        Ok(GatewayNotification {
            provider_ref: provider_ref.to_owned(),
            status,
            amount: Money::new(response.amount),
            provider_trans_id: response.zp_trans_id.map(|id| id.to_string()),
        })
    }

    fn acknowledge(&self, ack: &CallbackAck) -> serde_json::Value {
        match ack {
            CallbackAck::Processed => json!({"return_code": 1, "return_message": "success"}),
            CallbackAck::Duplicate => json!({"return_code": 2, "return_message": "duplicate"}),
            CallbackAck::InvalidSignature => {
                json!({"return_code": -1, "return_message": "mac not equal"})
            }
            CallbackAck::Failed(reason) => json!({"return_code": 0, "return_message": reason}),
        }
    }
}
