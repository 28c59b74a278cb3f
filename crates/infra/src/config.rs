//! Settlement configuration from environment variables.
//!
//! Every key is optional. A provider is only registered when all of its
//! credentials are present.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use fmshop_payments::{GatewayRegistry, PayOsConfig, PayOsGateway, ZaloPayConfig, ZaloPayGateway};

use crate::retry::RetryPolicy;
use crate::settlement::SettlementPolicy;

pub const DEFAULT_PAYOS_RETURN_URL: &str = "http://localhost:3000/payment/success";
pub const DEFAULT_PAYOS_CANCEL_URL: &str = "http://localhost:3000/payment/cancel";

#[derive(Debug, Clone)]
pub struct SettlementConfig {
    pub payment_timeout: Duration,
    pub sweep_interval: Duration,
    pub max_payment_attempts: u32,
    pub gateway_retry: RetryPolicy,
    /// Timeout applied to every provider HTTP call.
    pub http_timeout: Duration,
    pub zalopay: Option<ZaloPayConfig>,
    pub payos: Option<PayOsConfig>,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        let policy = SettlementPolicy::default();
        Self {
            payment_timeout: policy.payment_timeout,
            sweep_interval: Duration::from_secs(60),
            max_payment_attempts: policy.max_payment_attempts,
            gateway_retry: policy.gateway_retry,
            http_timeout: Duration::from_secs(10),
            zalopay: None,
            payos: None,
        }
    }
}

impl SettlementConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let number = |key: &str| -> anyhow::Result<Option<u64>> {
            get(key)
                .map(|v| v.trim().parse::<u64>().with_context(|| format!("{key} must be a non-negative integer, got {v:?}")))
                .transpose()
        };

        let defaults = Self::default();
        let retry_defaults = &defaults.gateway_retry;

        let gateway_retry = RetryPolicy::exponential(
            number("GATEWAY_RETRY_MAX")?
                .map(u32::try_from)
                .transpose()
                .context("GATEWAY_RETRY_MAX out of range")?
                .unwrap_or(retry_defaults.max_retries),
            number("GATEWAY_RETRY_BASE_MS")?
                .map(Duration::from_millis)
                .unwrap_or(retry_defaults.base_delay),
            number("GATEWAY_RETRY_MAX_MS")?
                .map(Duration::from_millis)
                .unwrap_or(retry_defaults.max_delay),
        );

        let max_payment_attempts = number("MAX_PAYMENT_ATTEMPTS")?
            .map(u32::try_from)
            .transpose()
            .context("MAX_PAYMENT_ATTEMPTS out of range")?
            .unwrap_or(defaults.max_payment_attempts);
        if max_payment_attempts == 0 {
            anyhow::bail!("MAX_PAYMENT_ATTEMPTS must be at least 1");
        }

        let zalopay = match (get("ZALOPAY_APP_ID"), get("ZALOPAY_KEY1"), get("ZALOPAY_KEY2")) {
            (Some(app_id), Some(key1), Some(key2)) => Some(ZaloPayConfig {
                app_id,
                key1,
                key2,
                endpoint: get("ZALOPAY_ENDPOINT")
                    .unwrap_or_else(|| fmshop_payments::zalopay::SANDBOX_ENDPOINT.to_owned()),
                callback_url: get("ZALOPAY_CALLBACK_URL"),
                redirect_url: get("ZALOPAY_REDIRECT_URL"),
            }),
            _ => None,
        };

        let payos = match (
            get("PAYOS_CLIENT_ID"),
            get("PAYOS_API_KEY"),
            get("PAYOS_CHECKSUM_KEY"),
        ) {
            (Some(client_id), Some(api_key), Some(checksum_key)) => Some(PayOsConfig {
                client_id,
                api_key,
                checksum_key,
                endpoint: get("PAYOS_ENDPOINT")
                    .unwrap_or_else(|| fmshop_payments::payos::DEFAULT_ENDPOINT.to_owned()),
                return_url: get("PAYOS_RETURN_URL")
                    .unwrap_or_else(|| DEFAULT_PAYOS_RETURN_URL.to_owned()),
                cancel_url: get("PAYOS_CANCEL_URL")
                    .unwrap_or_else(|| DEFAULT_PAYOS_CANCEL_URL.to_owned()),
            }),
            _ => None,
        };

        Ok(Self {
            payment_timeout: number("PAYMENT_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.payment_timeout),
            sweep_interval: number("SWEEP_INTERVAL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            max_payment_attempts,
            gateway_retry,
            http_timeout: number("HTTP_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.http_timeout),
            zalopay,
            payos,
        })
    }

    pub fn policy(&self) -> SettlementPolicy {
        SettlementPolicy {
            payment_timeout: self.payment_timeout,
            max_payment_attempts: self.max_payment_attempts,
            gateway_retry: self.gateway_retry.clone(),
        }
    }

    /// Register a gateway for every configured provider.
    pub fn build_gateways(&self) -> anyhow::Result<GatewayRegistry> {
        let client = reqwest::Client::builder()
            .timeout(self.http_timeout)
            .build()
            .context("failed to build HTTP client")?;

        let mut registry = GatewayRegistry::new();
        match &self.zalopay {
            Some(config) => {
                registry.register(Arc::new(ZaloPayGateway::new(config.clone(), client.clone())));
                info!(endpoint = %config.endpoint, "zalopay gateway registered");
            }
            None => warn!("ZALOPAY_APP_ID/KEY1/KEY2 not set; zalopay payments disabled"),
        }
        match &self.payos {
            Some(config) => {
                registry.register(Arc::new(PayOsGateway::new(config.clone(), client)));
                info!(endpoint = %config.endpoint, "payos gateway registered");
            }
            None => warn!("PAYOS_CLIENT_ID/API_KEY/CHECKSUM_KEY not set; payos payments disabled"),
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let config = SettlementConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.payment_timeout, Duration::from_secs(900));
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
        assert_eq!(config.max_payment_attempts, 3);
        assert_eq!(config.gateway_retry.max_retries, 2);
        assert_eq!(config.http_timeout, Duration::from_secs(10));
        assert!(config.zalopay.is_none());
        assert!(config.payos.is_none());
    }

    #[test]
    fn provider_needs_all_credentials() {
        let config = SettlementConfig::from_lookup(lookup(&[
            ("ZALOPAY_APP_ID", "2553"),
            ("ZALOPAY_KEY1", "k1"),
            ("PAYOS_CLIENT_ID", "c"),
            ("PAYOS_API_KEY", "a"),
            ("PAYOS_CHECKSUM_KEY", "s"),
        ]))
        .unwrap();
        assert!(config.zalopay.is_none());

        let payos = config.payos.unwrap();
        assert_eq!(payos.endpoint, "https://api-merchant.payos.vn");
        assert_eq!(payos.return_url, DEFAULT_PAYOS_RETURN_URL);
    }

    #[test]
    fn numeric_overrides_and_errors() {
        let config = SettlementConfig::from_lookup(lookup(&[
            ("PAYMENT_TIMEOUT_SECS", "30"),
            ("GATEWAY_RETRY_MAX", "0"),
            ("MAX_PAYMENT_ATTEMPTS", " 5 "),
        ]))
        .unwrap();
        assert_eq!(config.payment_timeout, Duration::from_secs(30));
        assert_eq!(config.gateway_retry.max_retries, 0);
        assert_eq!(config.policy().max_payment_attempts, 5);

        assert!(SettlementConfig::from_lookup(lookup(&[("SWEEP_INTERVAL_SECS", "soon")])).is_err());
        assert!(SettlementConfig::from_lookup(lookup(&[("MAX_PAYMENT_ATTEMPTS", "0")])).is_err());
    }

    #[tokio::test]
    async fn only_configured_providers_are_registered() {
        let config = SettlementConfig::from_lookup(lookup(&[
            ("ZALOPAY_APP_ID", "2553"),
            ("ZALOPAY_KEY1", "k1"),
            ("ZALOPAY_KEY2", "k2"),
        ]))
        .unwrap();
        let registry = config.build_gateways().unwrap();
        assert_eq!(registry.providers(), vec![fmshop_payments::Provider::ZaloPay]);
    }
}
