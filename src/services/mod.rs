// src/services/mod.rs
pub mod availability_service;
pub mod fare_service;
pub mod payment_gateway;
pub mod payment_service;
pub mod rating_service;
pub mod ride_service;
pub mod user_service;

pub use fare_service::FareCalculator;
pub use payment_gateway::{HttpPaymentProcessor, MockPaymentProcessor, PaymentGatewayConfig, PaymentProcessor};
pub use payment_service::{PaymentOperations, PaymentService};
pub use rating_service::{RatingOperations, RatingService};
pub use ride_service::{RideOperations, RideService};
pub use user_service::{UserOperations, UserService};
