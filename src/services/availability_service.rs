// src/services/availability_service.rs
//! Driver availability. A driver is available exactly when no active ride is
//! attached to them; the flag is only flipped from the ride lifecycle.

use std::sync::Arc;

use crate::{
    errors::{SparrowError as AppError, SparrowResult},
    models::{User, UserRole},
    store::{CasOutcome, UserGuard, UserPatch, UserStore},
};

#[derive(Clone)]
pub(crate) struct DriverAvailability {
    users: Arc<dyn UserStore>,
}

impl DriverAvailability {
    pub(crate) fn new(users: Arc<dyn UserStore>) -> Self {
        Self { users }
    }

    /// Atomically flips an available driver to unavailable.
    pub(crate) async fn claim(&self, driver_id: &str) -> SparrowResult<User> {
        let guard = UserGuard {
            role: Some(UserRole::Driver),
            is_available: Some(true),
        };
        let patch = UserPatch {
            is_available: Some(false),
            ..Default::default()
        };

        match self.users.conditional_update(driver_id, &guard, &patch).await? {
            CasOutcome::Updated(driver) => Ok(driver),
            CasOutcome::Rejected(user) if !user.is_driver() => {
                Err(AppError::forbidden("Only drivers can accept rides"))
            }
            CasOutcome::Rejected(_) => Err(AppError::DriverUnavailable),
            CasOutcome::Missing => Err(AppError::user_not_found(driver_id)),
        }
    }

    /// Hands a claim back after a ride was cancelled or a claim lost its race.
    pub(crate) async fn release(&self, driver_id: &str) -> SparrowResult<User> {
        let patch = UserPatch {
            is_available: Some(true),
            ..Default::default()
        };
        self.users
            .update(driver_id, &patch)
            .await?
            .ok_or_else(|| AppError::user_not_found(driver_id))
    }

    /// Frees the driver and counts the trip in one write.
    pub(crate) async fn complete_trip(&self, driver_id: &str) -> SparrowResult<User> {
        let patch = UserPatch {
            is_available: Some(true),
            total_rides_increment: 1,
            ..Default::default()
        };
        self.users
            .update(driver_id, &patch)
            .await?
            .ok_or_else(|| AppError::user_not_found(driver_id))
    }
}
