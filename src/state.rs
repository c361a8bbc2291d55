// src/state.rs
use dotenvy::dotenv;
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::{
    errors::{SparrowError, SparrowResult},
    services::{
        HttpPaymentProcessor, MockPaymentProcessor, PaymentGatewayConfig, PaymentProcessor,
        PaymentService, RatingService, RideService, UserService,
    },
    store::{MemoryStore, RedisStore, RideStore, UserStore},
};

pub struct AppState {
    pub user_service: Arc<UserService>,
    pub ride_service: Arc<RideService>,
    pub rating_service: Arc<RatingService>,
    pub payment_service: Arc<PaymentService>,
    pub config: AppConfig,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub redis_url: Option<String>,
    pub payment_gateway_url: Option<String>,
    pub payment_api_key: Option<String>,
    pub payment_currency: String,
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            redis_url: None,
            payment_gateway_url: None,
            payment_api_key: None,
            payment_currency: "usd".to_string(),
            log_level: "info".to_string(),
        }
    }
}

fn optional_var(key: &str) -> Option<String> {
    env::var(key).ok().map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

impl AppConfig {
    /// Reads the process environment, after loading `.env` if present.
    pub fn from_env() -> SparrowResult<Self> {
        dotenv().ok();
        let defaults = Self::default();

        let bind_addr = match optional_var("BIND_ADDR") {
            Some(addr) => addr
                .parse()
                .map_err(|e| SparrowError::Configuration(format!("BIND_ADDR '{}': {}", addr, e)))?,
            None => defaults.bind_addr,
        };

        Ok(Self {
            bind_addr,
            redis_url: optional_var("REDIS_URL"),
            payment_gateway_url: optional_var("PAYMENT_GATEWAY_URL"),
            payment_api_key: optional_var("PAYMENT_API_KEY"),
            payment_currency: optional_var("PAYMENT_CURRENCY")
                .map(|currency| currency.to_lowercase())
                .unwrap_or(defaults.payment_currency),
            log_level: optional_var("LOG_LEVEL").unwrap_or(defaults.log_level),
        })
    }
}

impl AppState {
    /// Opens the configured store and payment processor and wires the services.
    pub async fn new(config: AppConfig) -> SparrowResult<Self> {
        let (rides, users): (Arc<dyn RideStore>, Arc<dyn UserStore>) = match &config.redis_url {
            Some(url) => {
                let store = Arc::new(RedisStore::connect(url).await?);
                tracing::info!("Using Redis store");
                (store.clone() as Arc<dyn RideStore>, store as Arc<dyn UserStore>)
            }
            None => {
                tracing::warn!("REDIS_URL not set, using in-memory store");
                let store = Arc::new(MemoryStore::new());
                (store.clone() as Arc<dyn RideStore>, store as Arc<dyn UserStore>)
            }
        };

        let processor: Arc<dyn PaymentProcessor> =
            match (&config.payment_gateway_url, &config.payment_api_key) {
                (Some(url), Some(api_key)) => {
                    let gateway = PaymentGatewayConfig::new(
                        url.as_str(),
                        api_key.as_str(),
                        config.payment_currency.as_str(),
                    );
                    tracing::info!("Using payment gateway at {}", gateway.base_url);
                    Arc::new(HttpPaymentProcessor::new(gateway)?)
                }
                _ => {
                    tracing::warn!("PAYMENT_GATEWAY_URL or PAYMENT_API_KEY not set, using mock payment processor");
                    Arc::new(MockPaymentProcessor::new())
                }
            };

        Ok(Self::with_components(rides, users, processor, config))
    }

    pub fn with_components(
        rides: Arc<dyn RideStore>,
        users: Arc<dyn UserStore>,
        processor: Arc<dyn PaymentProcessor>,
        config: AppConfig,
    ) -> Self {
        Self {
            user_service: Arc::new(UserService::new(users.clone())),
            ride_service: Arc::new(RideService::new(rides.clone(), users.clone())),
            rating_service: Arc::new(RatingService::new(rides.clone(), users)),
            payment_service: Arc::new(PaymentService::new(rides, processor)),
            config,
        }
    }

    /// Process-local state with an in-memory store and mock payments.
    pub fn in_memory(config: AppConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::with_components(
            store.clone(),
            store,
            Arc::new(MockPaymentProcessor::new()),
            config,
        )
    }
}
