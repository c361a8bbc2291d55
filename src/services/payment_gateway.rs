// src/services/payment_gateway.rs
use async_trait::async_trait;
use nanoid::nanoid;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing;
use uuid::Uuid;

use crate::{
    errors::{SparrowError as AppError, SparrowResult},
    models::{GatewayStatus, PaymentIntent, RefundReceipt},
    utils::id_generator::{IdGenerator, IdType},
};

/// The narrow surface the ride services need from a payment provider.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn authorize(&self, ride_id: &str, amount_cents: i64) -> SparrowResult<PaymentIntent>;
    async fn confirm(&self, intent_id: &str) -> SparrowResult<GatewayStatus>;
    async fn refund(&self, intent_id: &str) -> SparrowResult<RefundReceipt>;
}

#[derive(Debug, Clone)]
pub struct PaymentGatewayConfig {
    pub base_url: String,
    pub api_key: String,
    pub currency: String,
    pub timeout: Duration,
}

impl PaymentGatewayConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, currency: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            currency: currency.into(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Deserialize)]
struct IntentResponse {
    id: String,
    client_secret: Option<String>,
    amount: i64,
}

#[derive(Debug, Deserialize)]
struct IntentStatusResponse {
    status: GatewayStatus,
}

#[derive(Debug, Deserialize)]
struct RefundResponse {
    id: String,
    amount: i64,
}

#[derive(Debug, Serialize)]
struct RefundRequest<'a> {
    payment_intent: &'a str,
}

pub struct HttpPaymentProcessor {
    config: PaymentGatewayConfig,
    client: reqwest::Client,
}

impl HttpPaymentProcessor {
    pub fn new(config: PaymentGatewayConfig) -> SparrowResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(config.timeout)
            .build()?;
        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url, path)
    }

    /// Stable per operation and object, so retries collapse at the gateway.
    fn idempotency_key(operation: &str, object_id: &str) -> String {
        Uuid::new_v5(&Uuid::NAMESPACE_URL, format!("{}:{}", operation, object_id).as_bytes()).to_string()
    }

    async fn read_json<T: for<'de> Deserialize<'de>>(response: reqwest::Response) -> SparrowResult<T> {
        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            tracing::error!("Payment gateway returned {}: {}", status, error_text);
            return Err(AppError::PaymentGateway(format!("{}: {}", status, error_text)));
        }
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl PaymentProcessor for HttpPaymentProcessor {
    async fn authorize(&self, ride_id: &str, amount_cents: i64) -> SparrowResult<PaymentIntent> {
        tracing::info!("Authorizing {} {} for ride {}", amount_cents, self.config.currency, ride_id);

        let body = json!({
            "amount": amount_cents,
            "currency": self.config.currency,
            "metadata": { "ride_id": ride_id },
        });

        let response = self
            .client
            .post(self.url("payment_intents"))
            .bearer_auth(&self.config.api_key)
            .header("Idempotency-Key", Self::idempotency_key("authorize", ride_id))
            .json(&body)
            .send()
            .await?;

        let intent: IntentResponse = Self::read_json(response).await?;
        Ok(PaymentIntent {
            intent_id: intent.id,
            client_secret: intent.client_secret,
            amount_cents: intent.amount,
        })
    }

    async fn confirm(&self, intent_id: &str) -> SparrowResult<GatewayStatus> {
        tracing::debug!("Fetching status of payment intent {}", intent_id);

        let response = self
            .client
            .get(self.url(&format!("payment_intents/{}", intent_id)))
            .bearer_auth(&self.config.api_key)
            .send()
            .await?;

        let intent: IntentStatusResponse = Self::read_json(response).await?;
        Ok(intent.status)
    }

    async fn refund(&self, intent_id: &str) -> SparrowResult<RefundReceipt> {
        tracing::info!("Refunding payment intent {}", intent_id);

        let response = self
            .client
            .post(self.url("refunds"))
            .bearer_auth(&self.config.api_key)
            .header("Idempotency-Key", Self::idempotency_key("refund", intent_id))
            .json(&RefundRequest {
                payment_intent: intent_id,
            })
            .send()
            .await?;

        let refund: RefundResponse = Self::read_json(response).await?;
        Ok(RefundReceipt {
            refund_id: refund.id,
            amount_cents: refund.amount,
        })
    }
}

#[derive(Debug, Clone)]
struct MockIntent {
    amount_cents: i64,
    refunded: bool,
}

// Mock processor for development and testing
#[derive(Debug)]
pub struct MockPaymentProcessor {
    intents: Mutex<HashMap<String, MockIntent>>,
    confirm_status: GatewayStatus,
}

impl Default for MockPaymentProcessor {
    fn default() -> Self {
        Self::with_confirm_status(GatewayStatus::Succeeded)
    }
}

impl MockPaymentProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every confirmation reports `status`.
    pub fn with_confirm_status(status: GatewayStatus) -> Self {
        Self {
            intents: Mutex::new(HashMap::new()),
            confirm_status: status,
        }
    }
}

#[async_trait]
impl PaymentProcessor for MockPaymentProcessor {
    async fn authorize(&self, ride_id: &str, amount_cents: i64) -> SparrowResult<PaymentIntent> {
        let intent_id = IdGenerator::generate(IdType::PaymentIntent);
        tracing::info!("[MOCK] Authorized {} cents for ride {} as {}", amount_cents, ride_id, intent_id);

        self.intents.lock().await.insert(
            intent_id.clone(),
            MockIntent {
                amount_cents,
                refunded: false,
            },
        );

        Ok(PaymentIntent {
            client_secret: Some(format!("{}_secret_{}", intent_id, nanoid!(24))),
            intent_id,
            amount_cents,
        })
    }

    async fn confirm(&self, intent_id: &str) -> SparrowResult<GatewayStatus> {
        if !self.intents.lock().await.contains_key(intent_id) {
            return Err(AppError::PaymentGateway(format!("No such payment intent: {}", intent_id)));
        }
        tracing::info!("[MOCK] Intent {} is {:?}", intent_id, self.confirm_status);
        Ok(self.confirm_status)
    }

    async fn refund(&self, intent_id: &str) -> SparrowResult<RefundReceipt> {
        let mut intents = self.intents.lock().await;
        let intent = intents
            .get_mut(intent_id)
            .ok_or_else(|| AppError::PaymentGateway(format!("No such payment intent: {}", intent_id)))?;
        if intent.refunded {
            return Err(AppError::PaymentGateway(format!("Intent {} already refunded", intent_id)));
        }
        intent.refunded = true;

        let refund_id = IdGenerator::generate(IdType::Refund);
        tracing::info!("[MOCK] Refunded {} as {}", intent_id, refund_id);
        Ok(RefundReceipt {
            refund_id,
            amount_cents: intent.amount_cents,
        })
    }
}
