// src/services/fare_service.rs
//! Distance, duration and fare computation. Pure and deterministic.

use serde::{Deserialize, Serialize};

use crate::models::{FareBreakdown, Location, RideType};

pub const EARTH_RADIUS_KM: f64 = 6371.0;
pub const AVERAGE_SPEED_KMH: f64 = 30.0;

/// Fixed price table for one ride type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateCard {
    pub base_fare: f64,
    pub per_km: f64,
    pub per_minute: f64,
    pub multiplier: f64,
}

impl RideType {
    pub fn rate_card(&self) -> RateCard {
        match self {
            RideType::Economy => RateCard {
                base_fare: 3.00,
                per_km: 1.50,
                per_minute: 0.25,
                multiplier: 1.0,
            },
            RideType::Premium => RateCard {
                base_fare: 5.00,
                per_km: 2.25,
                per_minute: 0.40,
                multiplier: 1.5,
            },
            RideType::Luxury => RateCard {
                base_fare: 8.00,
                per_km: 3.50,
                per_minute: 0.60,
                multiplier: 2.0,
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct FareQuote {
    pub distance_km: f64,
    pub duration_minutes: u32,
    pub fare: FareBreakdown,
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub struct FareCalculator;

impl FareCalculator {
    /// Great-circle distance in km, rounded to 2 decimals. Coordinates are
    /// assumed to be in range.
    pub fn haversine_distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
        let delta_lat = (lat2 - lat1).to_radians();
        let delta_lon = (lon2 - lon1).to_radians();

        let a = (delta_lat / 2.0).sin().powi(2)
            + lat1.to_radians().cos() * lat2.to_radians().cos() * (delta_lon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        round2(EARTH_RADIUS_KM * c)
    }

    pub fn estimate_duration_minutes(distance_km: f64) -> u32 {
        (distance_km / AVERAGE_SPEED_KMH * 60.0).round() as u32
    }

    /// The components are rounded for display only; the total is taken from
    /// the unrounded subtotal times the multiplier and rounded once.
    pub fn calculate_fare(distance_km: f64, duration_minutes: u32, ride_type: RideType) -> FareBreakdown {
        let rates = ride_type.rate_card();

        let base_fare = rates.base_fare;
        let distance_fare = distance_km * rates.per_km;
        let time_fare = duration_minutes as f64 * rates.per_minute;

        let subtotal = base_fare + distance_fare + time_fare;
        let total = round2(subtotal * rates.multiplier);

        FareBreakdown {
            base_fare: round2(base_fare),
            distance_fare: round2(distance_fare),
            time_fare: round2(time_fare),
            total,
        }
    }

    pub fn quote(pickup: &Location, destination: &Location, ride_type: RideType) -> FareQuote {
        let distance_km = Self::haversine_distance_km(
            pickup.latitude,
            pickup.longitude,
            destination.latitude,
            destination.longitude,
        );
        let duration_minutes = Self::estimate_duration_minutes(distance_km);

        FareQuote {
            distance_km,
            duration_minutes,
            fare: Self::calculate_fare(distance_km, duration_minutes, ride_type),
        }
    }
}
