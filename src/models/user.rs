// src/models/user.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::SparrowError;

pub const DEFAULT_USER_RATING: f64 = 5.0;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    #[default]
    Passenger,
    Driver,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Passenger => "passenger",
            UserRole::Driver => "driver",
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserRole {
    type Err = SparrowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "passenger" => Ok(UserRole::Passenger),
            "driver" => Ok(UserRole::Driver),
            other => Err(SparrowError::validation_error(
                "role",
                format!("Role must be either passenger or driver, got '{}'", other),
            )),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct VehicleInfo {
    pub make: String,
    pub model: String,
    pub year: i32,
    pub color: String,
    pub license_plate: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub role: UserRole,
    pub is_active: bool,

    // Driver specific fields
    pub license_number: Option<String>,
    pub vehicle: Option<VehicleInfo>,
    pub is_available: bool, // Only ever flipped by the ride lifecycle

    pub rating: f64,      // Rolling average (1.0 - 5.0)
    pub total_rides: u32, // Completed trips as driver
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_driver(&self) -> bool {
        self.role == UserRole::Driver
    }
}

// Request Models
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UserRegistration {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    #[serde(default)]
    pub role: UserRole,
    pub license_number: Option<String>,
    pub vehicle: Option<VehicleInfo>,
}
