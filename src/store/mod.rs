// src/store/mod.rs
//! Persistence seam for rides and users.
//!
//! The lifecycle engine only ever talks to [`RideStore`] and [`UserStore`].
//! Every write goes through `conditional_update`: the guard is checked and the
//! patch applied as one atomic step, so callers never read-then-write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::models::{
    PaymentStatus, RatingEntry, RatingSlot, Ride, RideStatus, User, UserRole,
};

pub mod memory_store;
pub mod redis_store;

pub use memory_store::MemoryStore;
pub use redis_store::RedisStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("operation failed: {0}")]
    Operation(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("record already exists: {0}")]
    Duplicate(String),

    #[error("email already registered: {0}")]
    EmailTaken(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Result of a guarded write.
#[derive(Debug, Clone)]
pub enum CasOutcome<T> {
    /// Guard held, patch applied; carries the new record.
    Updated(T),
    /// Guard failed; carries the record as it currently is.
    Rejected(T),
    Missing,
}

// ------------------------------
// Rides
// ------------------------------

/// Preconditions a ride must satisfy for a patch to apply.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RideGuard {
    pub status: Option<RideStatus>,
    pub unassigned: bool,
    pub without_payment_intent: bool,
    pub payment_status: Option<PaymentStatus>,
}

impl RideGuard {
    pub fn status(status: RideStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// A ride nobody has claimed yet.
    pub fn claimable() -> Self {
        Self {
            status: Some(RideStatus::Requested),
            unassigned: true,
            ..Default::default()
        }
    }

    pub fn holds(&self, ride: &Ride) -> bool {
        if let Some(status) = self.status {
            if ride.status != status {
                return false;
            }
        }
        if self.unassigned && ride.driver_id.is_some() {
            return false;
        }
        if self.without_payment_intent && ride.payment_intent_id.is_some() {
            return false;
        }
        if self.payment_status.is_some_and(|status| ride.payment_status != status) {
            return false;
        }
        true
    }
}

/// Half of a ride rating to overwrite.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RatingPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passenger: Option<RatingEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver: Option<RatingEntry>,
}

impl RatingPatch {
    pub fn for_slot(slot: RatingSlot, entry: RatingEntry) -> Self {
        match slot {
            RatingSlot::Passenger => Self {
                passenger: Some(entry),
                driver: None,
            },
            RatingSlot::Driver => Self {
                passenger: None,
                driver: Some(entry),
            },
        }
    }
}

/// Fields to set on a ride. `None` leaves the field untouched; the
/// serialized form doubles as the merge document for the Redis script.
#[derive(Debug, Clone, Serialize)]
pub struct RidePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RideStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picked_up_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_status: Option<PaymentStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_intent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<RatingPatch>,
    pub updated_at: DateTime<Utc>,
}

impl Default for RidePatch {
    fn default() -> Self {
        Self {
            status: None,
            driver_id: None,
            accepted_at: None,
            picked_up_at: None,
            completed_at: None,
            cancelled_at: None,
            payment_status: None,
            payment_intent_id: None,
            rating: None,
            updated_at: Utc::now(),
        }
    }
}

impl RidePatch {
    /// Status change plus the timestamp that status stamps.
    pub fn transition(status: RideStatus, at: DateTime<Utc>) -> Self {
        let mut patch = Self {
            status: Some(status),
            updated_at: at,
            ..Default::default()
        };
        match status {
            RideStatus::Accepted => patch.accepted_at = Some(at),
            RideStatus::Pickup => patch.picked_up_at = Some(at),
            RideStatus::Completed => patch.completed_at = Some(at),
            RideStatus::Cancelled => patch.cancelled_at = Some(at),
            RideStatus::Requested | RideStatus::InProgress => {}
        }
        patch
    }

    pub fn apply(&self, ride: &mut Ride) {
        if let Some(status) = self.status {
            ride.status = status;
        }
        if let Some(driver_id) = &self.driver_id {
            ride.driver_id = Some(driver_id.clone());
        }
        if self.accepted_at.is_some() {
            ride.accepted_at = self.accepted_at;
        }
        if self.picked_up_at.is_some() {
            ride.picked_up_at = self.picked_up_at;
        }
        if self.completed_at.is_some() {
            ride.completed_at = self.completed_at;
        }
        if self.cancelled_at.is_some() {
            ride.cancelled_at = self.cancelled_at;
        }
        if let Some(payment_status) = self.payment_status {
            ride.payment_status = payment_status;
        }
        if let Some(intent_id) = &self.payment_intent_id {
            ride.payment_intent_id = Some(intent_id.clone());
        }
        if let Some(rating) = &self.rating {
            if let Some(entry) = &rating.passenger {
                ride.rating.passenger = Some(entry.clone());
            }
            if let Some(entry) = &rating.driver {
                ride.rating.driver = Some(entry.clone());
            }
        }
        ride.updated_at = self.updated_at;
    }
}

#[derive(Debug, Clone, Default)]
pub struct RideFilter {
    pub status: Option<RideStatus>,
    pub passenger_id: Option<String>,
    pub driver_id: Option<String>,
    /// Passenger or driver.
    pub participant_id: Option<String>,
    pub unassigned: bool,
    pub payment_statuses: Option<Vec<PaymentStatus>>,
    pub rated: Option<RatingSlot>,
}

impl RideFilter {
    pub fn matches(&self, ride: &Ride) -> bool {
        if self.status.is_some_and(|status| ride.status != status) {
            return false;
        }
        if let Some(passenger_id) = &self.passenger_id {
            if !ride.is_passenger(passenger_id) {
                return false;
            }
        }
        if let Some(driver_id) = &self.driver_id {
            if !ride.is_driver(driver_id) {
                return false;
            }
        }
        if let Some(user_id) = &self.participant_id {
            if !ride.is_participant(user_id) {
                return false;
            }
        }
        if self.unassigned && ride.driver_id.is_some() {
            return false;
        }
        if let Some(statuses) = &self.payment_statuses {
            if !statuses.contains(&ride.payment_status) {
                return false;
            }
        }
        if let Some(slot) = self.rated {
            if ride.rating.get(slot).is_none() {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RideSort {
    #[default]
    RequestedDesc,
    CompletedDesc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pagination {
    All,
    Page { page: u32, limit: u32 },
}

impl Pagination {
    pub fn page(page: u32, limit: u32) -> Self {
        Pagination::Page {
            page: page.max(1),
            limit,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RideQuery {
    pub filter: RideFilter,
    pub sort: RideSort,
    pub pagination: Pagination,
}

/// One page of matching rides and the total number of matches.
#[derive(Debug, Clone)]
pub struct RideSlice {
    pub rides: Vec<Ride>,
    pub total: u64,
}

impl RideQuery {
    pub fn new(filter: RideFilter) -> Self {
        Self {
            filter,
            sort: RideSort::default(),
            pagination: Pagination::All,
        }
    }

    pub fn sorted(mut self, sort: RideSort) -> Self {
        self.sort = sort;
        self
    }

    pub fn paginated(mut self, pagination: Pagination) -> Self {
        self.pagination = pagination;
        self
    }

    /// Filters, sorts and paginates a candidate set. Shared by every store
    /// so they agree on ordering and page boundaries.
    pub fn select(&self, candidates: impl IntoIterator<Item = Ride>) -> RideSlice {
        let mut rides: Vec<Ride> = candidates
            .into_iter()
            .filter(|ride| self.filter.matches(ride))
            .collect();

        match self.sort {
            RideSort::RequestedDesc => rides.sort_by(|a, b| {
                b.requested_at.cmp(&a.requested_at).then_with(|| b.id.cmp(&a.id))
            }),
            RideSort::CompletedDesc => rides.sort_by(|a, b| {
                b.completed_at
                    .cmp(&a.completed_at)
                    .then_with(|| b.requested_at.cmp(&a.requested_at))
            }),
        }

        let total = rides.len() as u64;
        let rides = match self.pagination {
            Pagination::All => rides,
            Pagination::Page { page, limit } => {
                let skip = (page.saturating_sub(1) as usize).saturating_mul(limit as usize);
                rides.into_iter().skip(skip).take(limit as usize).collect()
            }
        };

        RideSlice { rides, total }
    }
}

#[async_trait]
pub trait RideStore: Send + Sync {
    async fn insert(&self, ride: &Ride) -> Result<(), StoreError>;
    async fn get(&self, ride_id: &str) -> Result<Option<Ride>, StoreError>;
    async fn conditional_update(
        &self,
        ride_id: &str,
        guard: &RideGuard,
        patch: &RidePatch,
    ) -> Result<CasOutcome<Ride>, StoreError>;
    async fn find(&self, query: &RideQuery) -> Result<RideSlice, StoreError>;
}

// ------------------------------
// Users
// ------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct UserGuard {
    pub role: Option<UserRole>,
    pub is_available: Option<bool>,
}

impl UserGuard {
    pub fn holds(&self, user: &User) -> bool {
        self.role.is_none_or(|role| user.role == role)
            && self.is_available.is_none_or(|available| user.is_available == available)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UserPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_available: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    /// Added to `total_rides` inside the same atomic step.
    #[serde(skip)]
    pub total_rides_increment: u32,
    pub updated_at: DateTime<Utc>,
}

impl Default for UserPatch {
    fn default() -> Self {
        Self {
            is_available: None,
            rating: None,
            total_rides_increment: 0,
            updated_at: Utc::now(),
        }
    }
}

impl UserPatch {
    pub fn apply(&self, user: &mut User) {
        if let Some(available) = self.is_available {
            user.is_available = available;
        }
        if let Some(rating) = self.rating {
            user.rating = rating;
        }
        user.total_rides = user.total_rides.saturating_add(self.total_rides_increment);
        user.updated_at = self.updated_at;
    }
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fails with `EmailTaken` when another user already holds the email.
    async fn insert(&self, user: &User) -> Result<(), StoreError>;
    async fn get(&self, user_id: &str) -> Result<Option<User>, StoreError>;
    async fn conditional_update(
        &self,
        user_id: &str,
        guard: &UserGuard,
        patch: &UserPatch,
    ) -> Result<CasOutcome<User>, StoreError>;

    /// Unguarded write; `None` when the user does not exist.
    async fn update(&self, user_id: &str, patch: &UserPatch) -> Result<Option<User>, StoreError> {
        match self.conditional_update(user_id, &UserGuard::default(), patch).await? {
            CasOutcome::Updated(user) | CasOutcome::Rejected(user) => Ok(Some(user)),
            CasOutcome::Missing => Ok(None),
        }
    }
}
