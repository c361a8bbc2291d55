use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::RideStatus;
use crate::store::StoreError;

/// Main error type for the sparrow-rides service
#[derive(Debug)]
pub enum SparrowError {
    // Request and identity errors
    Unauthorized(String),
    AccessDenied(String),
    Forbidden(String),

    // Lookup errors
    RideNotFound(String),
    UserNotFound(String),

    // Ride lifecycle errors
    InvalidTransition { from: RideStatus, to: RideStatus },
    RideAlreadyClaimed,
    DriverUnavailable,
    InvalidState(String),
    InvalidRideType(String),

    // Validation errors
    ValidationFailed(Vec<ValidationError>),
    UserAlreadyExists(String),

    // Payment errors
    PaymentAlreadyExists,
    PaymentGateway(String),

    // Infrastructure errors
    Storage(String),
    NetworkTimeout,
    HttpClient(String),
    JsonParsing(String),
    Configuration(String),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl fmt::Display for SparrowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SparrowError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            SparrowError::AccessDenied(msg) => write!(f, "Access denied: {}", msg),
            SparrowError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),

            SparrowError::RideNotFound(id) => write!(f, "Ride not found: {}", id),
            SparrowError::UserNotFound(id) => write!(f, "User not found: {}", id),

            SparrowError::InvalidTransition { from, to } => {
                write!(f, "Cannot change status from {} to {}", from, to)
            }
            SparrowError::RideAlreadyClaimed => write!(f, "Ride has already been accepted by another driver"),
            SparrowError::DriverUnavailable => write!(f, "Driver is not available"),
            SparrowError::InvalidState(msg) => write!(f, "Invalid ride state: {}", msg),
            SparrowError::InvalidRideType(value) => write!(f, "Invalid ride type: {}", value),

            SparrowError::ValidationFailed(errors) => {
                write!(f, "Validation failed: {} errors", errors.len())
            }
            SparrowError::UserAlreadyExists(email) => {
                write!(f, "A user with email {} already exists", email)
            }

            SparrowError::PaymentAlreadyExists => write!(f, "Payment already exists for this ride"),
            SparrowError::PaymentGateway(msg) => write!(f, "Payment gateway error: {}", msg),

            SparrowError::Storage(msg) => write!(f, "Storage error: {}", msg),
            SparrowError::NetworkTimeout => write!(f, "Network request timed out"),
            SparrowError::HttpClient(msg) => write!(f, "HTTP client error: {}", msg),
            SparrowError::JsonParsing(msg) => write!(f, "JSON parsing error: {}", msg),
            SparrowError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for SparrowError {}

impl SparrowError {
    /// Stable machine-readable code, one per error kind.
    pub fn code(&self) -> &'static str {
        match self {
            SparrowError::Unauthorized(_) => "unauthorized",
            SparrowError::AccessDenied(_) => "access_denied",
            SparrowError::Forbidden(_) => "forbidden",
            SparrowError::RideNotFound(_) => "ride_not_found",
            SparrowError::UserNotFound(_) => "user_not_found",
            SparrowError::InvalidTransition { .. } => "invalid_transition",
            SparrowError::RideAlreadyClaimed => "ride_already_claimed",
            SparrowError::DriverUnavailable => "driver_unavailable",
            SparrowError::InvalidState(_) => "invalid_state",
            SparrowError::InvalidRideType(_) => "invalid_ride_type",
            SparrowError::ValidationFailed(_) => "validation_failed",
            SparrowError::UserAlreadyExists(_) => "user_already_exists",
            SparrowError::PaymentAlreadyExists => "payment_already_exists",
            SparrowError::PaymentGateway(_) => "payment_gateway_error",
            SparrowError::Storage(_) => "storage_error",
            SparrowError::NetworkTimeout => "network_timeout",
            SparrowError::HttpClient(_) => "http_client_error",
            SparrowError::JsonParsing(_) => "json_parsing_error",
            SparrowError::Configuration(_) => "configuration_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            SparrowError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            SparrowError::AccessDenied(_) | SparrowError::Forbidden(_) => StatusCode::FORBIDDEN,
            SparrowError::RideNotFound(_) | SparrowError::UserNotFound(_) => StatusCode::NOT_FOUND,
            SparrowError::RideAlreadyClaimed
            | SparrowError::DriverUnavailable
            | SparrowError::PaymentAlreadyExists
            | SparrowError::UserAlreadyExists(_) => StatusCode::CONFLICT,
            SparrowError::InvalidTransition { .. } | SparrowError::InvalidState(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            SparrowError::InvalidRideType(_)
            | SparrowError::ValidationFailed(_)
            | SparrowError::JsonParsing(_) => StatusCode::BAD_REQUEST,
            SparrowError::PaymentGateway(_) | SparrowError::HttpClient(_) => StatusCode::BAD_GATEWAY,
            SparrowError::NetworkTimeout => StatusCode::GATEWAY_TIMEOUT,
            SparrowError::Storage(_) | SparrowError::Configuration(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for SparrowError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error = self.code().to_string();

        let (message, details) = match self {
            SparrowError::ValidationFailed(errors) => {
                let details = serde_json::to_value(&errors).ok();
                ("Validation errors occurred".to_string(), details)
            }
            // Internal details stay in the logs
            SparrowError::Storage(msg) | SparrowError::Configuration(msg) => {
                tracing::error!("Internal error: {}", msg);
                ("Internal server error".to_string(), None)
            }
            other => (other.to_string(), None),
        };

        let error_response = ErrorResponse { error, message, details };

        (status, axum::Json(error_response)).into_response()
    }
}

// Convenience type alias for Results
pub type SparrowResult<T> = Result<T, SparrowError>;

impl From<StoreError> for SparrowError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::EmailTaken(email) => SparrowError::UserAlreadyExists(email),
            other => SparrowError::Storage(other.to_string()),
        }
    }
}

impl From<JsonRejection> for SparrowError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            // Well-formed JSON of the wrong shape
            JsonRejection::JsonDataError(err) => {
                SparrowError::validation_error("body", err.body_text())
            }
            other => SparrowError::JsonParsing(other.body_text()),
        }
    }
}

impl From<reqwest::Error> for SparrowError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SparrowError::NetworkTimeout
        } else if err.is_decode() {
            SparrowError::PaymentGateway(format!("Unreadable gateway response: {}", err))
        } else {
            SparrowError::HttpClient(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SparrowError {
    fn from(err: serde_json::Error) -> Self {
        SparrowError::JsonParsing(err.to_string())
    }
}

// Helper functions for creating common errors
impl SparrowError {
    pub fn access_denied(msg: impl Into<String>) -> Self {
        SparrowError::AccessDenied(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        SparrowError::Forbidden(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        SparrowError::InvalidState(msg.into())
    }

    pub fn validation_error(field: impl Into<String>, message: impl Into<String>) -> Self {
        SparrowError::ValidationFailed(vec![ValidationError {
            field: field.into(),
            message: message.into(),
        }])
    }

    pub fn ride_not_found(ride_id: impl Into<String>) -> Self {
        SparrowError::RideNotFound(ride_id.into())
    }

    pub fn user_not_found(user_id: impl Into<String>) -> Self {
        SparrowError::UserNotFound(user_id.into())
    }
}

/// Collects field errors so a request reports every problem at once.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<ValidationError>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&mut self, ok: bool, field: &str, message: &str) -> &mut Self {
        if !ok {
            self.errors.push(ValidationError {
                field: field.to_string(),
                message: message.to_string(),
            });
        }
        self
    }

    pub fn finish(self) -> SparrowResult<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(SparrowError::ValidationFailed(self.errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = SparrowError::RideNotFound("rid-240101-abcde".to_string());
        assert_eq!(error.to_string(), "Ride not found: rid-240101-abcde");

        let error = SparrowError::InvalidTransition {
            from: RideStatus::InProgress,
            to: RideStatus::Accepted,
        };
        assert_eq!(error.to_string(), "Cannot change status from in_progress to accepted");
    }

    #[test]
    fn test_validation_error() {
        let error = SparrowError::validation_error("notes", "Notes must be less than 500 characters");
        match error {
            SparrowError::ValidationFailed(errors) => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].field, "notes");
            }
            _ => panic!("Expected ValidationFailed error"),
        }
    }

    #[test]
    fn test_validator_collects_every_failure() {
        let mut validator = Validator::new();
        validator
            .check(false, "pickup.latitude", "out of range")
            .check(true, "pickup.longitude", "out of range")
            .check(false, "destination.address", "required");

        match validator.finish() {
            Err(SparrowError::ValidationFailed(errors)) => {
                let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
                assert_eq!(fields, vec!["pickup.latitude", "destination.address"]);
            }
            other => panic!("Expected ValidationFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_claim_races_are_distinguishable() {
        assert_ne!(SparrowError::RideAlreadyClaimed.code(), SparrowError::DriverUnavailable.code());
        assert_eq!(SparrowError::RideAlreadyClaimed.status_code(), StatusCode::CONFLICT);
        assert_eq!(SparrowError::access_denied("x").status_code(), StatusCode::FORBIDDEN);
        assert_ne!(SparrowError::access_denied("x").code(), SparrowError::forbidden("x").code());
    }
}
