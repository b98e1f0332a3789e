// service/payment_provider.rs
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use sqlx::types::BigDecimal;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::{config::Config, service::error::ServiceError, utils::decimal::to_minor_units};

pub const PAYMENT_CURRENCY: &str = "ARS";
pub const SIGNATURE_HEADER: &str = "x-paystack-signature";

/// A charge the engine needs collected before it can resume an amendment.
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub amount: BigDecimal,
    pub reference: String,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentInitResponse {
    pub payment_url: String,
    pub reference: String,
}

/// Outbound payment collaborator. Confirmation comes back later through the
/// signed webhook, never as part of `require_payment`.
#[async_trait]
pub trait PaymentGateway: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    async fn require_payment(&self, request: &PaymentRequest) -> Result<PaymentInitResponse, ServiceError>;

    fn verify_signature(&self, payload: &[u8], signature: &str) -> bool;
}

pub fn from_config(config: &Config) -> anyhow::Result<Arc<dyn PaymentGateway>> {
    match config.active_payment_provider.as_str() {
        "paystack" => Ok(Arc::new(PaystackGateway::new(
            config.paystack_secret_key.clone(),
            config.payment_callback_url.clone(),
        ))),
        "manual" => Ok(Arc::new(ManualGateway::new(
            config.paystack_secret_key.clone(),
            config.payment_callback_url.clone(),
        ))),
        other => Err(anyhow::anyhow!("Unknown payment provider: {}", other)),
    }
}

/// HMAC-SHA512 of the raw body, hex encoded, compared in constant time.
pub fn verify_hmac_signature(payload: &[u8], signature: &str, secret: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    let mut mac = match Hmac::<Sha512>::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(payload);

    let expected_signature_hex = hex::encode(mac.finalize().into_bytes());
    ConstantTimeEq::ct_eq(signature.trim().as_bytes(), expected_signature_hex.as_bytes()).into()
}

#[derive(Debug, Clone)]
pub struct PaystackGateway {
    secret_key: String,
    callback_url: String,
    client: reqwest::Client,
}

impl PaystackGateway {
    pub fn new(secret_key: String, callback_url: String) -> Self {
        Self {
            secret_key,
            callback_url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl PaymentGateway for PaystackGateway {
    fn name(&self) -> &str {
        "paystack"
    }

    async fn require_payment(&self, request: &PaymentRequest) -> Result<PaymentInitResponse, ServiceError> {
        let email = request
            .email
            .as_deref()
            .ok_or_else(|| ServiceError::Payment("an email address is required to pay by card".to_string()))?;
        let amount = to_minor_units(&request.amount)
            .ok_or_else(|| ServiceError::Payment(format!("amount {} cannot be charged", request.amount)))?;

        let payload = serde_json::json!({
            "email": email,
            "amount": amount,
            "reference": request.reference,
            "currency": PAYMENT_CURRENCY,
            "callback_url": self.callback_url,
            "metadata": request.metadata,
        });

        let response = self
            .client
            .post("https://api.paystack.co/transaction/initialize")
            .header("Authorization", format!("Bearer {}", self.secret_key))
            .json(&payload)
            .send()
            .await
            .map_err(|e| ServiceError::Payment(e.to_string()))?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ServiceError::Payment(e.to_string()))?;

        if !body["status"].as_bool().unwrap_or(false) {
            return Err(ServiceError::Payment(
                body["message"]
                    .as_str()
                    .unwrap_or("Payment initialization failed")
                    .to_string(),
            ));
        }

        let data = &body["data"];
        let payment_url = data["authorization_url"]
            .as_str()
            .ok_or_else(|| ServiceError::Payment("provider returned no authorization url".to_string()))?;

        tracing::info!("Paystack charge {} initialized for user {}", request.reference, request.user_id);

        Ok(PaymentInitResponse {
            payment_url: payment_url.to_string(),
            reference: data["reference"]
                .as_str()
                .unwrap_or(&request.reference)
                .to_string(),
        })
    }

    fn verify_signature(&self, payload: &[u8], signature: &str) -> bool {
        verify_hmac_signature(payload, signature, &self.secret_key)
    }
}

/// Collects payments out of band; an operator confirms them through the
/// same signed webhook. Used in development and tests.
#[derive(Debug, Clone)]
pub struct ManualGateway {
    webhook_secret: String,
    callback_url: String,
}

impl ManualGateway {
    pub fn new(webhook_secret: String, callback_url: String) -> Self {
        Self {
            webhook_secret,
            callback_url,
        }
    }
}

#[async_trait]
impl PaymentGateway for ManualGateway {
    fn name(&self) -> &str {
        "manual"
    }

    async fn require_payment(&self, request: &PaymentRequest) -> Result<PaymentInitResponse, ServiceError> {
        Ok(PaymentInitResponse {
            payment_url: format!("{}?reference={}", self.callback_url, request.reference),
            reference: request.reference.clone(),
        })
    }

    fn verify_signature(&self, payload: &[u8], signature: &str) -> bool {
        verify_hmac_signature(payload, signature, &self.webhook_secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(payload: &[u8], secret: &str) -> String {
        let mut mac = Hmac::<Sha512>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn signature_must_match_body_and_secret() {
        let body = br#"{"event":"charge.success","data":{"reference":"PMOD_1"}}"#;
        let signature = sign(body, "whsec");

        assert!(verify_hmac_signature(body, &signature, "whsec"));
        assert!(!verify_hmac_signature(body, &signature, "other"));
        assert!(!verify_hmac_signature(b"{}", &signature, "whsec"));
        assert!(!verify_hmac_signature(body, "", "whsec"));
    }

    #[test]
    fn webhook_signed_with_another_key_is_refused() {
        let body = br#"{"event":"charge.success","data":{"reference":"PMOD_7","amount":500000}}"#;
        let forged = sign(body, "test_secret_key");

        for gateway in [
            Box::new(PaystackGateway::new("sk_live_real".to_string(), "http://localhost/pay".to_string()))
                as Box<dyn PaymentGateway>,
            Box::new(ManualGateway::new("sk_live_real".to_string(), "http://localhost/pay".to_string())),
        ] {
            assert!(!gateway.verify_signature(body, &forged));
            assert!(gateway.verify_signature(body, &sign(body, "sk_live_real")));
        }

        assert!(!verify_hmac_signature(body, &sign(body, ""), ""));
    }

    #[tokio::test]
    async fn manual_gateway_echoes_the_reference() {
        let gateway = ManualGateway::new("whsec".to_string(), "http://localhost/pay".to_string());
        let response = gateway
            .require_payment(&PaymentRequest {
                user_id: Uuid::new_v4(),
                email: None,
                amount: BigDecimal::from(5_000),
                reference: "PMOD_42".to_string(),
                metadata: serde_json::json!({}),
            })
            .await
            .unwrap();

        assert_eq!(response.reference, "PMOD_42");
        assert_eq!(response.payment_url, "http://localhost/pay?reference=PMOD_42");
    }

    #[tokio::test]
    async fn paystack_requires_an_email() {
        let gateway = PaystackGateway::new("sk_test".to_string(), "http://localhost/pay".to_string());
        let result = gateway
            .require_payment(&PaymentRequest {
                user_id: Uuid::new_v4(),
                email: None,
                amount: BigDecimal::from(5_000),
                reference: "PMOD_43".to_string(),
                metadata: serde_json::json!({}),
            })
            .await;
        assert!(matches!(result, Err(ServiceError::Payment(_))));
    }
}
