// src/services/user_service.rs
use async_trait::async_trait;
use chrono::{Datelike, Utc};
use std::sync::Arc;
use tracing;

use crate::{
    errors::{SparrowError as AppError, SparrowResult, Validator},
    models::{User, UserRegistration, UserRole, VehicleInfo, DEFAULT_USER_RATING},
    store::{StoreError, UserStore},
    utils::id_generator::generate_user_id,
};

pub const MIN_VEHICLE_YEAR: i32 = 1990;

#[async_trait]
pub trait UserOperations: Send + Sync {
    async fn register_user(&self, registration: UserRegistration) -> SparrowResult<User>;
    async fn get_user(&self, user_id: &str) -> SparrowResult<User>;
}

pub struct UserService {
    users: Arc<dyn UserStore>,
}

impl UserService {
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self { users }
    }

    fn is_valid_email(email: &str) -> bool {
        let Some((local, domain)) = email.split_once('@') else {
            return false;
        };
        !local.is_empty()
            && !domain.starts_with('.')
            && !domain.ends_with('.')
            && domain.contains('.')
            && !email.chars().any(char::is_whitespace)
    }

    fn is_valid_phone(phone: &str) -> bool {
        let digits = phone.strip_prefix('+').unwrap_or(phone);
        (7..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit())
    }

    fn validate_vehicle(validator: &mut Validator, vehicle: &VehicleInfo) {
        let latest_year = Utc::now().year() + 1;
        validator
            .check(!vehicle.make.trim().is_empty(), "vehicle.make", "Vehicle make is required")
            .check(!vehicle.model.trim().is_empty(), "vehicle.model", "Vehicle model is required")
            .check(
                (MIN_VEHICLE_YEAR..=latest_year).contains(&vehicle.year),
                "vehicle.year",
                "Vehicle year is out of range",
            )
            .check(!vehicle.color.trim().is_empty(), "vehicle.color", "Vehicle color is required")
            .check(
                !vehicle.license_plate.trim().is_empty(),
                "vehicle.license_plate",
                "License plate is required",
            );
    }

    fn validate_registration(registration: &UserRegistration) -> SparrowResult<()> {
        let mut validator = Validator::new();
        validator
            .check(
                Self::is_valid_email(registration.email.trim()),
                "email",
                "A valid email is required",
            )
            .check(
                !registration.first_name.trim().is_empty(),
                "first_name",
                "First name is required",
            )
            .check(
                !registration.last_name.trim().is_empty(),
                "last_name",
                "Last name is required",
            )
            .check(
                Self::is_valid_phone(registration.phone.trim()),
                "phone",
                "A valid phone number is required",
            );

        if registration.role == UserRole::Driver {
            validator.check(
                registration
                    .license_number
                    .as_ref()
                    .is_some_and(|license| !license.trim().is_empty()),
                "license_number",
                "Drivers must provide a license number",
            );
            match &registration.vehicle {
                Some(vehicle) => Self::validate_vehicle(&mut validator, vehicle),
                None => {
                    validator.check(false, "vehicle", "Drivers must provide vehicle details");
                }
            }
        }

        validator.finish()
    }
}

#[async_trait]
impl UserOperations for UserService {
    async fn register_user(&self, registration: UserRegistration) -> SparrowResult<User> {
        tracing::info!("Registering {}: {}", registration.role, registration.email);

        Self::validate_registration(&registration)?;

        let is_driver = registration.role == UserRole::Driver;
        let now = Utc::now();
        let user = User {
            id: generate_user_id(),
            email: registration.email.trim().to_lowercase(),
            first_name: registration.first_name.trim().to_string(),
            last_name: registration.last_name.trim().to_string(),
            phone: registration.phone.trim().to_string(),
            role: registration.role,
            is_active: true,
            license_number: if is_driver {
                registration.license_number.map(|license| license.trim().to_string())
            } else {
                None
            },
            vehicle: if is_driver { registration.vehicle } else { None },
            // New drivers can take rides straight away
            is_available: is_driver,
            rating: DEFAULT_USER_RATING,
            total_rides: 0,
            created_at: now,
            updated_at: now,
        };

        match self.users.insert(&user).await {
            Ok(()) => {}
            Err(StoreError::Duplicate(id)) => {
                return Err(AppError::Storage(format!("Generated user id collided: {}", id)));
            }
            Err(err) => return Err(err.into()),
        }

        tracing::info!("User registered: {} ({})", user.id, user.role);
        Ok(user)
    }

    async fn get_user(&self, user_id: &str) -> SparrowResult<User> {
        tracing::debug!("Getting user: {}", user_id);

        self.users
            .get(user_id)
            .await?
            .ok_or_else(|| AppError::user_not_found(user_id))
    }
}
