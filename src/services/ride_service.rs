// src/services/ride_service.rs
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing;

use crate::{
    errors::{SparrowError as AppError, SparrowResult, Validator},
    models::{
        CreateRideRequest, Location, PageInfo, PaymentStatus, Ride, RideHistoryPage,
        RideHistoryQuery, RideRating, RideStatus, UserRole,
    },
    services::{availability_service::DriverAvailability, fare_service::FareCalculator},
    store::{
        CasOutcome, Pagination, RideFilter, RideGuard, RidePatch, RideQuery, RideStore, UserStore,
    },
    utils::id_generator::generate_ride_id,
};

pub const AVAILABLE_RIDES_LIMIT: u32 = 20;
pub const MAX_NOTES_LEN: usize = 500;
pub const MAX_HISTORY_LIMIT: u32 = 100;

#[async_trait]
pub trait RideOperations: Send + Sync {
    async fn create_ride(&self, passenger_id: &str, request: CreateRideRequest) -> SparrowResult<Ride>;
    async fn accept_ride(&self, ride_id: &str, driver_id: &str) -> SparrowResult<Ride>;
    async fn update_status(
        &self,
        ride_id: &str,
        actor_id: &str,
        actor_role: UserRole,
        new_status: RideStatus,
    ) -> SparrowResult<Ride>;
    async fn get_available_rides(&self) -> SparrowResult<Vec<Ride>>;
    async fn get_ride(&self, ride_id: &str, actor_id: &str) -> SparrowResult<Ride>;
    async fn get_ride_history(&self, user_id: &str, query: RideHistoryQuery) -> SparrowResult<RideHistoryPage>;
}

/// The ride lifecycle engine. Owns every status transition and the driver
/// availability side effects that go with them.
pub struct RideService {
    rides: Arc<dyn RideStore>,
    users: Arc<dyn UserStore>,
    availability: DriverAvailability,
}

impl RideService {
    pub fn new(rides: Arc<dyn RideStore>, users: Arc<dyn UserStore>) -> Self {
        Self {
            rides,
            availability: DriverAvailability::new(users.clone()),
            users,
        }
    }

    fn validate_location(validator: &mut Validator, field: &str, location: &Location) {
        validator
            .check(
                (-90.0..=90.0).contains(&location.latitude),
                &format!("{}.latitude", field),
                "Latitude must be between -90 and 90",
            )
            .check(
                (-180.0..=180.0).contains(&location.longitude),
                &format!("{}.longitude", field),
                "Longitude must be between -180 and 180",
            )
            .check(
                !location.address.trim().is_empty(),
                &format!("{}.address", field),
                "Address is required",
            );
    }

    fn validate_request(request: &CreateRideRequest) -> SparrowResult<()> {
        let mut validator = Validator::new();
        Self::validate_location(&mut validator, "pickup", &request.pickup);
        Self::validate_location(&mut validator, "destination", &request.destination);
        validator.check(
            request
                .notes
                .as_ref()
                .is_none_or(|notes| notes.trim().chars().count() <= MAX_NOTES_LEN),
            "notes",
            "Notes must be less than 500 characters",
        );
        validator.finish()
    }

    /// Explains why a claim guard did not hold.
    fn claim_failure(ride: &Ride) -> AppError {
        if ride.driver_id.is_some() {
            AppError::RideAlreadyClaimed
        } else {
            AppError::invalid_state(format!("Ride is {} and can no longer be accepted", ride.status))
        }
    }

    /// Driver side effects of reaching a terminal state. Failures are
    /// surfaced, not retried.
    async fn settle_driver(&self, ride: &Ride) -> SparrowResult<()> {
        let Some(driver_id) = ride.driver_id.as_deref() else {
            return Ok(());
        };
        if !ride.status.is_terminal() {
            return Ok(());
        }

        let result = if ride.status == RideStatus::Completed {
            self.availability.complete_trip(driver_id).await
        } else {
            self.availability.release(driver_id).await
        };

        if let Err(err) = &result {
            tracing::error!(
                "Ride {} is {} but driver {} could not be released: {}",
                ride.id,
                ride.status,
                driver_id,
                err
            );
        }
        result.map(|_| ())
    }

    /// Hands back a driver claim after the ride claim was lost, then reports
    /// `failure`. A failed hand-back leaves the driver stuck unavailable.
    async fn abandon_claim(&self, ride_id: &str, driver_id: &str, failure: AppError) -> AppError {
        match self.availability.release(driver_id).await {
            Ok(_) => failure,
            Err(err) => {
                tracing::error!(
                    "Driver {} lost ride {} ({}) and could not be released: {}",
                    driver_id,
                    ride_id,
                    failure,
                    err
                );
                err
            }
        }
    }
}

#[async_trait]
impl RideOperations for RideService {
    async fn create_ride(&self, passenger_id: &str, request: CreateRideRequest) -> SparrowResult<Ride> {
        let ride_type = request.parsed_ride_type()?;
        tracing::info!("Creating {} ride for passenger: {}", ride_type, passenger_id);

        Self::validate_request(&request)?;

        let passenger = self
            .users
            .get(passenger_id)
            .await?
            .ok_or_else(|| AppError::user_not_found(passenger_id))?;
        if passenger.role != UserRole::Passenger {
            return Err(AppError::forbidden("Only passengers can request rides"));
        }

        let quote = FareCalculator::quote(&request.pickup, &request.destination, ride_type);
        let now = Utc::now();

        let ride = Ride {
            id: generate_ride_id(),
            passenger_id: passenger.id,
            driver_id: None,
            pickup: request.pickup,
            destination: request.destination,
            distance_km: quote.distance_km,
            duration_minutes: quote.duration_minutes,
            fare: quote.fare,
            ride_type,
            status: RideStatus::Requested,
            payment_status: PaymentStatus::Pending,
            payment_intent_id: None,
            notes: request
                .notes
                .map(|notes| notes.trim().to_string())
                .filter(|notes| !notes.is_empty()),
            rating: RideRating::default(),
            requested_at: now,
            accepted_at: None,
            picked_up_at: None,
            completed_at: None,
            cancelled_at: None,
            updated_at: now,
        };

        self.rides.insert(&ride).await?;

        tracing::info!(
            "Ride requested: {} - {:.2} km, {} min, total {:.2}",
            ride.id,
            ride.distance_km,
            ride.duration_minutes,
            ride.fare.total
        );

        Ok(ride)
    }

    async fn accept_ride(&self, ride_id: &str, driver_id: &str) -> SparrowResult<Ride> {
        tracing::info!("Driver {} accepting ride {}", driver_id, ride_id);

        let ride = self
            .rides
            .get(ride_id)
            .await?
            .ok_or_else(|| AppError::ride_not_found(ride_id))?;
        if !RideGuard::claimable().holds(&ride) {
            return Err(Self::claim_failure(&ride));
        }

        // The availability flag is the per-driver claim; the ride guard is the
        // per-ride claim. Both are conditional writes, and losing the second
        // hands the first back.
        self.availability.claim(driver_id).await?;

        let now = Utc::now();
        let mut patch = RidePatch::transition(RideStatus::Accepted, now);
        patch.driver_id = Some(driver_id.to_string());

        let failure = match self.rides.conditional_update(ride_id, &RideGuard::claimable(), &patch).await {
            Ok(CasOutcome::Updated(ride)) => {
                tracing::info!("Driver {} assigned to ride {}", driver_id, ride_id);
                return Ok(ride);
            }
            Ok(CasOutcome::Rejected(current)) => {
                tracing::warn!("Driver {} lost the claim on ride {}", driver_id, ride_id);
                Self::claim_failure(&current)
            }
            Ok(CasOutcome::Missing) => AppError::ride_not_found(ride_id),
            Err(err) => err.into(),
        };

        Err(self.abandon_claim(ride_id, driver_id, failure).await)
    }

    async fn update_status(
        &self,
        ride_id: &str,
        actor_id: &str,
        actor_role: UserRole,
        new_status: RideStatus,
    ) -> SparrowResult<Ride> {
        tracing::info!("Updating ride {} to {} by {} ({})", ride_id, new_status, actor_id, actor_role);

        let ride = self
            .rides
            .get(ride_id)
            .await?
            .ok_or_else(|| AppError::ride_not_found(ride_id))?;

        if !ride.is_participant(actor_id) {
            return Err(AppError::access_denied("Only the ride's passenger or driver can update it"));
        }

        // Accepting goes through the claim protocol, never through here
        if new_status == RideStatus::Accepted || !ride.status.can_transition_to(new_status) {
            return Err(AppError::InvalidTransition {
                from: ride.status,
                to: new_status,
            });
        }

        if new_status.is_driver_progress() && (actor_role != UserRole::Driver || !ride.is_driver(actor_id)) {
            return Err(AppError::forbidden("Only the driver can update ride progress"));
        }

        let patch = RidePatch::transition(new_status, Utc::now());
        let updated = match self
            .rides
            .conditional_update(ride_id, &RideGuard::status(ride.status), &patch)
            .await?
        {
            CasOutcome::Updated(updated) => updated,
            CasOutcome::Rejected(current) => {
                tracing::warn!(
                    "Concurrent update on ride {}: expected {}, found {}",
                    ride_id,
                    ride.status,
                    current.status
                );
                return Err(AppError::InvalidTransition {
                    from: current.status,
                    to: new_status,
                });
            }
            CasOutcome::Missing => return Err(AppError::ride_not_found(ride_id)),
        };

        self.settle_driver(&updated).await?;

        tracing::info!("Ride {} is now {}", updated.id, updated.status);
        Ok(updated)
    }

    async fn get_available_rides(&self) -> SparrowResult<Vec<Ride>> {
        tracing::debug!("Listing available rides");

        let query = RideQuery::new(RideFilter {
            status: Some(RideStatus::Requested),
            unassigned: true,
            ..Default::default()
        })
        .paginated(Pagination::page(1, AVAILABLE_RIDES_LIMIT));

        Ok(self.rides.find(&query).await?.rides)
    }

    async fn get_ride(&self, ride_id: &str, actor_id: &str) -> SparrowResult<Ride> {
        tracing::debug!("Getting ride: {}", ride_id);

        let ride = self
            .rides
            .get(ride_id)
            .await?
            .ok_or_else(|| AppError::ride_not_found(ride_id))?;

        if !ride.is_participant(actor_id) {
            return Err(AppError::access_denied("Only the ride's passenger or driver can view it"));
        }
        Ok(ride)
    }

    async fn get_ride_history(&self, user_id: &str, query: RideHistoryQuery) -> SparrowResult<RideHistoryPage> {
        tracing::debug!("Getting ride history for user: {}", user_id);

        let mut validator = Validator::new();
        validator
            .check(query.page >= 1, "page", "Page must be at least 1")
            .check(
                (1..=MAX_HISTORY_LIMIT).contains(&query.limit),
                "limit",
                "Limit must be between 1 and 100",
            );
        validator.finish()?;

        let store_query = RideQuery::new(RideFilter {
            status: query.status,
            participant_id: Some(user_id.to_string()),
            ..Default::default()
        })
        .paginated(Pagination::page(query.page, query.limit));

        let slice = self.rides.find(&store_query).await?;

        Ok(RideHistoryPage {
            rides: slice.rides,
            pagination: PageInfo::new(query.page, query.limit, slice.total),
        })
    }
}
