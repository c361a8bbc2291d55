// src/models/ride.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::SparrowError;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
    Requested,  // Waiting for a driver to claim it
    Accepted,   // Driver claimed the ride and is heading to pickup
    Pickup,     // Driver arrived at the pickup point
    InProgress, // Passenger on board
    Completed,
    Cancelled,
}

impl RideStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RideStatus::Requested => "requested",
            RideStatus::Accepted => "accepted",
            RideStatus::Pickup => "pickup",
            RideStatus::InProgress => "in_progress",
            RideStatus::Completed => "completed",
            RideStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RideStatus::Completed | RideStatus::Cancelled)
    }

    /// Outgoing edges of the ride state machine.
    pub fn allowed_transitions(&self) -> &'static [RideStatus] {
        match self {
            RideStatus::Requested => &[RideStatus::Accepted, RideStatus::Cancelled],
            RideStatus::Accepted => &[RideStatus::Pickup, RideStatus::Cancelled],
            RideStatus::Pickup => &[RideStatus::InProgress, RideStatus::Cancelled],
            RideStatus::InProgress => &[RideStatus::Completed, RideStatus::Cancelled],
            RideStatus::Completed | RideStatus::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, next: RideStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    /// Progress steps only the assigned driver may report.
    pub fn is_driver_progress(&self) -> bool {
        matches!(self, RideStatus::Pickup | RideStatus::InProgress)
    }
}

impl fmt::Display for RideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RideStatus {
    type Err = SparrowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "requested" => Ok(RideStatus::Requested),
            "accepted" => Ok(RideStatus::Accepted),
            "pickup" => Ok(RideStatus::Pickup),
            "in_progress" => Ok(RideStatus::InProgress),
            "completed" => Ok(RideStatus::Completed),
            "cancelled" => Ok(RideStatus::Cancelled),
            other => Err(SparrowError::validation_error(
                "status",
                format!("Unknown ride status '{}'", other),
            )),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum RideType {
    #[default]
    Economy,
    Premium,
    Luxury,
}

impl RideType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RideType::Economy => "economy",
            RideType::Premium => "premium",
            RideType::Luxury => "luxury",
        }
    }
}

impl fmt::Display for RideType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RideType {
    type Err = SparrowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "economy" => Ok(RideType::Economy),
            "premium" => Ok(RideType::Premium),
            "luxury" => Ok(RideType::Luxury),
            other => Err(SparrowError::InvalidRideType(other.to_string())),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    Failed,
    Refunded,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub address: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct FareBreakdown {
    pub base_fare: f64,
    pub distance_fare: f64,
    pub time_fare: f64,
    pub total: f64,
}

/// One side of a ride's two-sided rating.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RatingEntry {
    pub score: u8,
    pub comment: Option<String>,
    pub rated_at: DateTime<Utc>,
}

/// `driver` is the score the passenger gave the driver, `passenger` the
/// score the driver gave the passenger.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct RideRating {
    pub passenger: Option<RatingEntry>,
    pub driver: Option<RatingEntry>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RatingSlot {
    Passenger,
    Driver,
}

impl RideRating {
    pub fn get(&self, slot: RatingSlot) -> Option<&RatingEntry> {
        match slot {
            RatingSlot::Passenger => self.passenger.as_ref(),
            RatingSlot::Driver => self.driver.as_ref(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Ride {
    pub id: String,
    pub passenger_id: String,
    pub driver_id: Option<String>,

    pub pickup: Location,
    pub destination: Location,
    pub distance_km: f64,
    pub duration_minutes: u32,
    pub fare: FareBreakdown,
    pub ride_type: RideType,

    pub status: RideStatus,
    pub payment_status: PaymentStatus,
    pub payment_intent_id: Option<String>,
    pub notes: Option<String>,
    pub rating: RideRating,

    pub requested_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub picked_up_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Ride {
    pub fn is_passenger(&self, user_id: &str) -> bool {
        self.passenger_id == user_id
    }

    pub fn is_driver(&self, user_id: &str) -> bool {
        self.driver_id.as_deref() == Some(user_id)
    }

    pub fn is_participant(&self, user_id: &str) -> bool {
        self.is_passenger(user_id) || self.is_driver(user_id)
    }

    /// Whoever is rated in `slot`.
    pub fn rated_user(&self, slot: RatingSlot) -> Option<&str> {
        match slot {
            RatingSlot::Passenger => Some(self.passenger_id.as_str()),
            RatingSlot::Driver => self.driver_id.as_deref(),
        }
    }
}

// Request/Response Models
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CreateRideRequest {
    pub pickup: Location,
    pub destination: Location,
    /// Wire name of a [`RideType`]; economy when omitted.
    #[serde(default)]
    pub ride_type: Option<String>,
    pub notes: Option<String>,
}

impl CreateRideRequest {
    pub fn parsed_ride_type(&self) -> Result<RideType, SparrowError> {
        self.ride_type
            .as_deref()
            .map(str::parse::<RideType>)
            .transpose()
            .map(Option::unwrap_or_default)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RideStatusUpdate {
    pub status: String,
}

impl RideStatusUpdate {
    pub fn parsed_status(&self) -> Result<RideStatus, SparrowError> {
        self.status.trim().parse()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RatingSubmission {
    pub rating: u8,
    pub comment: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RideHistoryQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
    pub status: Option<RideStatus>,
}

impl Default for RideHistoryQuery {
    fn default() -> Self {
        Self {
            page: default_page(),
            limit: default_limit(),
            status: None,
        }
    }
}

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    10
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PageInfo {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub pages: u64,
}

impl PageInfo {
    pub fn new(page: u32, limit: u32, total: u64) -> Self {
        let pages = if limit == 0 { 0 } else { total.div_ceil(limit as u64) };
        Self { page, limit, total, pages }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RideHistoryPage {
    pub rides: Vec<Ride>,
    pub pagination: PageInfo,
}
