// src/handlers/mod.rs
//! Thin HTTP layer. Identity arrives from the upstream auth layer as
//! `x-user-id` / `x-user-role` headers; every action check lives in the
//! services.

use axum::{
    extract::{FromRequest, FromRequestParts, Path, Request},
    http::request::Parts,
    routing::{get, patch, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::{
    errors::SparrowError,
    models::UserRole,
    state::AppState,
    utils::id_generator::{IdGenerator, IdType},
};

pub mod payment_handler;
pub mod ride_handler;
pub mod user_handler;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// The authenticated caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Actor {
    pub user_id: String,
    pub role: UserRole,
}

impl Actor {
    pub fn require_role(&self, role: UserRole, message: &str) -> Result<(), SparrowError> {
        if self.role == role {
            Ok(())
        } else {
            Err(SparrowError::forbidden(message))
        }
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = SparrowError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = header(parts, USER_ID_HEADER)
            .ok_or_else(|| SparrowError::Unauthorized("Missing user identity".to_string()))?;
        let role = header(parts, USER_ROLE_HEADER)
            .ok_or_else(|| SparrowError::Unauthorized("Missing user role".to_string()))?
            .parse::<UserRole>()
            .map_err(|_| SparrowError::Unauthorized("Unknown user role".to_string()))?;

        Ok(Actor {
            user_id: user_id.to_string(),
            role,
        })
    }
}

/// JSON body whose rejections come back in the `{error,message,details}`
/// shape instead of axum's plain-text default.
#[derive(Debug, Clone)]
pub struct AppJson<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequest<S> for AppJson<T>
where
    Json<T>: FromRequest<S, Rejection = axum::extract::rejection::JsonRejection>,
    S: Send + Sync,
{
    type Rejection = SparrowError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(AppJson(value))
    }
}

/// The `:ride_id` path segment. A malformed id names no ride, so it is
/// rejected as not found before any store read.
#[derive(Debug, Clone, PartialEq)]
pub struct RideId(pub String);

impl RideId {
    pub fn parse(raw: String) -> Result<Self, SparrowError> {
        if IdGenerator::validate_id(&raw, Some(IdType::Ride)) {
            Ok(RideId(raw))
        } else {
            Err(SparrowError::ride_not_found(raw))
        }
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for RideId
where
    S: Send + Sync,
{
    type Rejection = SparrowError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(ride_id) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| SparrowError::validation_error("ride_id", rejection.body_text()))?;
        RideId::parse(ride_id)
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/users", post(user_handler::register_user))
        .route("/users/:user_id", get(user_handler::get_user))
        .route("/rides", post(ride_handler::create_ride))
        .route("/rides/available", get(ride_handler::get_available_rides))
        .route("/rides/history", get(ride_handler::get_ride_history))
        .route("/rides/:ride_id", get(ride_handler::get_ride))
        .route("/rides/:ride_id/accept", post(ride_handler::accept_ride))
        .route("/rides/:ride_id/status", patch(ride_handler::update_status))
        .route("/rides/:ride_id/rating", post(ride_handler::submit_rating))
        .route("/payments/history", get(payment_handler::payment_history))
        .route("/payments/:ride_id/intent", post(payment_handler::create_intent))
        .route("/payments/:ride_id/confirm", post(payment_handler::confirm_payment))
        .route("/payments/:ride_id/refund", post(payment_handler::refund_payment))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
