// src/models/payment.rs
use serde::{Deserialize, Serialize};

use super::ride::{PageInfo, PaymentStatus, Ride};

/// Status reported by the payment gateway for an intent.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GatewayStatus {
    RequiresPaymentMethod,
    Processing,
    Succeeded,
    PaymentFailed,
    Canceled,
}

impl GatewayStatus {
    /// Payment status the ride moves to, if the gateway status is final.
    pub fn settled_status(&self) -> Option<PaymentStatus> {
        match self {
            GatewayStatus::Succeeded => Some(PaymentStatus::Paid),
            GatewayStatus::PaymentFailed => Some(PaymentStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PaymentIntent {
    pub intent_id: String,
    pub client_secret: Option<String>,
    pub amount_cents: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RefundReceipt {
    pub refund_id: String,
    pub amount_cents: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentConfirmation {
    pub ride_id: String,
    pub payment_status: PaymentStatus,
    pub gateway_status: GatewayStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaymentHistoryPage {
    pub payments: Vec<Ride>,
    pub pagination: PageInfo,
}

/// Converts a fare total to the smallest currency unit.
pub fn to_cents(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}
