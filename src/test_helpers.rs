// src/test_helpers.rs
//! Shared fixtures for unit tests.

use chrono::Utc;
use std::sync::Arc;

use crate::models::{
    CreateRideRequest, FareBreakdown, Location, PaymentStatus, Ride, RideRating, RideStatus,
    RideType, User, UserRole, VehicleInfo, DEFAULT_USER_RATING,
};
use crate::services::MockPaymentProcessor;
use crate::state::{AppConfig, AppState};
use crate::store::{MemoryStore, UserStore};

pub fn accra_pickup() -> Location {
    Location {
        latitude: 5.6037,
        longitude: -0.1870,
        address: "Independence Avenue, Accra".to_string(),
    }
}

pub fn accra_destination() -> Location {
    Location {
        latitude: 5.6500,
        longitude: -0.1000,
        address: "Kotoka International Airport".to_string(),
    }
}

pub fn ride_request() -> CreateRideRequest {
    CreateRideRequest {
        pickup: accra_pickup(),
        destination: accra_destination(),
        ride_type: Some("economy".to_string()),
        notes: Some("Two bags".to_string()),
    }
}

/// A requested, unassigned ride.
pub fn sample_ride(id: &str, passenger_id: &str) -> Ride {
    let now = Utc::now();
    Ride {
        id: id.to_string(),
        passenger_id: passenger_id.to_string(),
        driver_id: None,
        pickup: accra_pickup(),
        destination: accra_destination(),
        distance_km: 10.0,
        duration_minutes: 20,
        fare: FareBreakdown {
            base_fare: 3.0,
            distance_fare: 15.0,
            time_fare: 5.0,
            total: 23.0,
        },
        ride_type: RideType::Economy,
        status: RideStatus::Requested,
        payment_status: PaymentStatus::Pending,
        payment_intent_id: None,
        notes: None,
        rating: RideRating::default(),
        requested_at: now,
        accepted_at: None,
        picked_up_at: None,
        completed_at: None,
        cancelled_at: None,
        updated_at: now,
    }
}

/// A completed ride between two users, unrated.
pub fn completed_ride(id: &str, passenger_id: &str, driver_id: &str) -> Ride {
    let now = Utc::now();
    let mut ride = sample_ride(id, passenger_id);
    ride.driver_id = Some(driver_id.to_string());
    ride.status = RideStatus::Completed;
    ride.accepted_at = Some(now);
    ride.picked_up_at = Some(now);
    ride.completed_at = Some(now);
    ride
}

pub fn sample_passenger(id: &str) -> User {
    let now = Utc::now();
    User {
        id: id.to_string(),
        email: format!("{}@example.com", id),
        first_name: "Ama".to_string(),
        last_name: "Mensah".to_string(),
        phone: "+233201234567".to_string(),
        role: UserRole::Passenger,
        is_active: true,
        license_number: None,
        vehicle: None,
        is_available: false,
        rating: DEFAULT_USER_RATING,
        total_rides: 0,
        created_at: now,
        updated_at: now,
    }
}

/// An available driver with no trips.
pub fn sample_driver(id: &str) -> User {
    let mut user = sample_passenger(id);
    user.first_name = "Kofi".to_string();
    user.role = UserRole::Driver;
    user.license_number = Some("DL-0042".to_string());
    user.vehicle = Some(VehicleInfo {
        make: "Toyota".to_string(),
        model: "Corolla".to_string(),
        year: 2020,
        color: "Silver".to_string(),
        license_plate: "GR-1234-20".to_string(),
    });
    user.is_available = true;
    user
}

/// Passengers `usr-p1`, `usr-p2` and drivers `usr-d1` to `usr-d3`.
pub async fn seed_users(store: &MemoryStore) {
    for id in ["usr-p1", "usr-p2"] {
        UserStore::insert(store, &sample_passenger(id)).await.unwrap();
    }
    for id in ["usr-d1", "usr-d2", "usr-d3"] {
        UserStore::insert(store, &sample_driver(id)).await.unwrap();
    }
}

/// In-memory app state over the seeded users, with mock payments.
pub async fn seeded_state() -> AppState {
    let store = Arc::new(MemoryStore::new());
    seed_users(&store).await;
    AppState::with_components(
        store.clone(),
        store,
        Arc::new(MockPaymentProcessor::new()),
        AppConfig::default(),
    )
}
