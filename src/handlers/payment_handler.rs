// src/handlers/payment_handler.rs
use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use super::{Actor, RideId};
use crate::{
    errors::SparrowResult,
    models::{PaymentConfirmation, PaymentHistoryPage, PaymentIntent, RefundReceipt, UserRole},
    services::PaymentOperations,
    state::AppState,
};

const PASSENGERS_ONLY: &str = "Only passengers can manage payments";

#[derive(Debug, Deserialize)]
pub struct PaymentHistoryQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    10
}

pub async fn create_intent(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    RideId(ride_id): RideId,
) -> SparrowResult<(StatusCode, Json<PaymentIntent>)> {
    actor.require_role(UserRole::Passenger, PASSENGERS_ONLY)?;
    let intent = state
        .payment_service
        .create_payment_intent(&ride_id, &actor.user_id)
        .await?;
    Ok((StatusCode::CREATED, Json(intent)))
}

pub async fn confirm_payment(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    RideId(ride_id): RideId,
) -> SparrowResult<Json<PaymentConfirmation>> {
    actor.require_role(UserRole::Passenger, PASSENGERS_ONLY)?;
    Ok(Json(
        state.payment_service.confirm_payment(&ride_id, &actor.user_id).await?,
    ))
}

pub async fn refund_payment(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    RideId(ride_id): RideId,
) -> SparrowResult<Json<RefundReceipt>> {
    actor.require_role(UserRole::Passenger, PASSENGERS_ONLY)?;
    Ok(Json(
        state.payment_service.refund_payment(&ride_id, &actor.user_id).await?,
    ))
}

pub async fn payment_history(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Query(query): Query<PaymentHistoryQuery>,
) -> SparrowResult<Json<PaymentHistoryPage>> {
    actor.require_role(UserRole::Passenger, PASSENGERS_ONLY)?;
    let page = state
        .payment_service
        .payment_history(&actor.user_id, query.page, query.limit)
        .await?;
    Ok(Json(page))
}
