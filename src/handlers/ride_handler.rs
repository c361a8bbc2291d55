// src/handlers/ride_handler.rs
use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use super::{Actor, AppJson, RideId};
use crate::{
    errors::SparrowResult,
    models::{CreateRideRequest, RatingSubmission, Ride, RideHistoryPage, RideHistoryQuery, RideStatusUpdate, UserRole},
    services::{RatingOperations, RideOperations},
    state::AppState,
};

pub async fn create_ride(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    AppJson(request): AppJson<CreateRideRequest>,
) -> SparrowResult<(StatusCode, Json<Ride>)> {
    let ride = state.ride_service.create_ride(&actor.user_id, request).await?;
    Ok((StatusCode::CREATED, Json(ride)))
}

pub async fn get_available_rides(
    State(state): State<Arc<AppState>>,
    actor: Actor,
) -> SparrowResult<Json<Vec<Ride>>> {
    actor.require_role(UserRole::Driver, "Only drivers can browse available rides")?;
    Ok(Json(state.ride_service.get_available_rides().await?))
}

pub async fn get_ride_history(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Query(query): Query<RideHistoryQuery>,
) -> SparrowResult<Json<RideHistoryPage>> {
    Ok(Json(state.ride_service.get_ride_history(&actor.user_id, query).await?))
}

pub async fn get_ride(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    RideId(ride_id): RideId,
) -> SparrowResult<Json<Ride>> {
    Ok(Json(state.ride_service.get_ride(&ride_id, &actor.user_id).await?))
}

pub async fn accept_ride(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    RideId(ride_id): RideId,
) -> SparrowResult<Json<Ride>> {
    Ok(Json(state.ride_service.accept_ride(&ride_id, &actor.user_id).await?))
}

pub async fn update_status(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    RideId(ride_id): RideId,
    AppJson(update): AppJson<RideStatusUpdate>,
) -> SparrowResult<Json<Ride>> {
    let ride = state
        .ride_service
        .update_status(&ride_id, &actor.user_id, actor.role, update.parsed_status()?)
        .await?;
    Ok(Json(ride))
}

pub async fn submit_rating(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    RideId(ride_id): RideId,
    AppJson(submission): AppJson<RatingSubmission>,
) -> SparrowResult<Json<Ride>> {
    let ride = state
        .rating_service
        .submit_rating(&ride_id, &actor.user_id, submission.rating, submission.comment)
        .await?;
    Ok(Json(ride))
}
