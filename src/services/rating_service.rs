// src/services/rating_service.rs
//! Two-sided ride ratings and the rolling averages derived from them.
//!
//! Averages are recomputed by rescanning the rated user's completed rides
//! after every write. Two concurrent submissions for the same user may each
//! compute from a slightly stale set; the next submission converges it.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing;

use crate::{
    errors::{SparrowError as AppError, SparrowResult, Validator},
    models::{RatingEntry, RatingSlot, Ride, RideStatus, UserRole},
    services::fare_service::round1,
    store::{
        CasOutcome, Pagination, RatingPatch, RideFilter, RideGuard, RidePatch, RideQuery,
        RideStore, UserPatch, UserStore,
    },
};

pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 5;
pub const MAX_COMMENT_LEN: usize = 500;

#[async_trait]
pub trait RatingOperations: Send + Sync {
    async fn submit_rating(
        &self,
        ride_id: &str,
        rater_id: &str,
        rating: u8,
        comment: Option<String>,
    ) -> SparrowResult<Ride>;
}

pub struct RatingService {
    rides: Arc<dyn RideStore>,
    users: Arc<dyn UserStore>,
}

impl RatingService {
    pub fn new(rides: Arc<dyn RideStore>, users: Arc<dyn UserStore>) -> Self {
        Self { rides, users }
    }

    fn validate(rating: u8, comment: Option<&str>) -> SparrowResult<()> {
        let mut validator = Validator::new();
        validator
            .check(
                (MIN_RATING..=MAX_RATING).contains(&rating),
                "rating",
                "Rating must be between 1 and 5",
            )
            .check(
                comment.is_none_or(|comment| comment.trim().chars().count() <= MAX_COMMENT_LEN),
                "comment",
                "Comment must be less than 500 characters",
            );
        validator.finish()
    }

    /// Recomputes `user_id`'s average from every completed ride where they
    /// hold `slot` and that slot is rated. Returns the new average, or
    /// `None` when nothing qualifies and the stored value was left alone.
    pub async fn recompute_average(&self, user_id: &str, slot: RatingSlot) -> SparrowResult<Option<f64>> {
        let mut filter = RideFilter {
            status: Some(RideStatus::Completed),
            rated: Some(slot),
            ..Default::default()
        };
        match slot {
            RatingSlot::Driver => filter.driver_id = Some(user_id.to_string()),
            RatingSlot::Passenger => filter.passenger_id = Some(user_id.to_string()),
        }

        let rides = self
            .rides
            .find(&RideQuery::new(filter).paginated(Pagination::All))
            .await?
            .rides;

        let scores: Vec<f64> = rides
            .iter()
            .filter_map(|ride| ride.rating.get(slot))
            .map(|entry| entry.score as f64)
            .collect();

        if scores.is_empty() {
            return Ok(None);
        }

        let average = round1(scores.iter().sum::<f64>() / scores.len() as f64);
        let patch = UserPatch {
            rating: Some(average),
            ..Default::default()
        };
        self.users
            .update(user_id, &patch)
            .await?
            .ok_or_else(|| AppError::user_not_found(user_id))?;

        tracing::debug!("User {} now rated {:.1} over {} rides", user_id, average, scores.len());
        Ok(Some(average))
    }
}

#[async_trait]
impl RatingOperations for RatingService {
    async fn submit_rating(
        &self,
        ride_id: &str,
        rater_id: &str,
        rating: u8,
        comment: Option<String>,
    ) -> SparrowResult<Ride> {
        tracing::info!("User {} rating ride {}: {}", rater_id, ride_id, rating);

        Self::validate(rating, comment.as_deref())?;

        let ride = self
            .rides
            .get(ride_id)
            .await?
            .ok_or_else(|| AppError::ride_not_found(ride_id))?;

        if ride.status != RideStatus::Completed {
            return Err(AppError::invalid_state("Only completed rides can be rated"));
        }

        // A passenger rates the driver and a driver rates the passenger
        let (slot, rater_role) = if ride.is_passenger(rater_id) {
            (RatingSlot::Driver, UserRole::Passenger)
        } else if ride.is_driver(rater_id) {
            (RatingSlot::Passenger, UserRole::Driver)
        } else {
            return Err(AppError::access_denied("Only the ride's passenger or driver can rate it"));
        };

        let now = Utc::now();
        let entry = RatingEntry {
            score: rating,
            comment: comment
                .map(|comment| comment.trim().to_string())
                .filter(|comment| !comment.is_empty()),
            rated_at: now,
        };
        let patch = RidePatch {
            rating: Some(RatingPatch::for_slot(slot, entry)),
            updated_at: now,
            ..Default::default()
        };

        let updated = match self
            .rides
            .conditional_update(ride_id, &RideGuard::status(RideStatus::Completed), &patch)
            .await?
        {
            CasOutcome::Updated(updated) => updated,
            CasOutcome::Rejected(_) => {
                return Err(AppError::invalid_state("Only completed rides can be rated"));
            }
            CasOutcome::Missing => return Err(AppError::ride_not_found(ride_id)),
        };

        if let Some(target_id) = updated.rated_user(slot) {
            if let Err(err) = self.recompute_average(target_id, slot).await {
                tracing::error!("Rating saved on ride {} but average for {} failed: {}", ride_id, target_id, err);
                return Err(err);
            }
        }

        tracing::info!("Ride {} rated by {} ({})", ride_id, rater_id, rater_role);
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::test_helpers::{completed_ride, sample_ride, seed_users};

    async fn setup() -> (Arc<MemoryStore>, RatingService) {
        let store = Arc::new(MemoryStore::new());
        seed_users(&store).await;
        let service = RatingService::new(store.clone(), store.clone());
        (store, service)
    }

    async fn insert(store: &MemoryStore, ride: Ride) {
        RideStore::insert(store, &ride).await.unwrap();
    }

    async fn rating_of(store: &MemoryStore, user_id: &str) -> f64 {
        UserStore::get(store, user_id).await.unwrap().unwrap().rating
    }

    #[tokio::test]
    async fn test_driver_average_over_three_rides() {
        let (store, service) = setup().await;
        for (i, score) in [5, 3, 4].into_iter().enumerate() {
            let id = format!("rid-{}", i);
            insert(&store, completed_ride(&id, "usr-p1", "usr-d1")).await;
            service.submit_rating(&id, "usr-p1", score, None).await.unwrap();
        }

        assert_eq!(rating_of(&store, "usr-d1").await, 4.0);
    }

    #[tokio::test]
    async fn test_average_rounds_to_one_decimal() {
        let (store, service) = setup().await;
        for (i, score) in [5, 4, 4].into_iter().enumerate() {
            let id = format!("rid-{}", i);
            insert(&store, completed_ride(&id, "usr-p1", "usr-d1")).await;
            service.submit_rating(&id, "usr-p1", score, None).await.unwrap();
        }

        // 13 / 3 = 4.333..
        assert_eq!(rating_of(&store, "usr-d1").await, 4.3);
    }

    #[tokio::test]
    async fn test_no_rated_rides_leaves_average_untouched() {
        let (store, service) = setup().await;
        insert(&store, completed_ride("rid-1", "usr-p1", "usr-d1")).await;

        let average = service.recompute_average("usr-d1", RatingSlot::Driver).await.unwrap();
        assert_eq!(average, None);
        assert_eq!(rating_of(&store, "usr-d1").await, 5.0);
    }

    #[tokio::test]
    async fn test_resubmission_overwrites_same_half() {
        let (store, service) = setup().await;
        insert(&store, completed_ride("rid-1", "usr-p1", "usr-d1")).await;

        service.submit_rating("rid-1", "usr-p1", 4, Some("Nice".into())).await.unwrap();
        let ride = service.submit_rating("rid-1", "usr-p1", 2, None).await.unwrap();

        let driver_half = ride.rating.driver.unwrap();
        assert_eq!(driver_half.score, 2);
        assert_eq!(driver_half.comment, None);
        assert!(ride.rating.passenger.is_none());
        assert_eq!(rating_of(&store, "usr-d1").await, 2.0);
    }

    #[tokio::test]
    async fn test_driver_rates_passenger() {
        let (store, service) = setup().await;
        insert(&store, completed_ride("rid-1", "usr-p1", "usr-d1")).await;

        let ride = service
            .submit_rating("rid-1", "usr-d1", 3, Some("  Late to pickup  ".into()))
            .await
            .unwrap();

        let passenger_half = ride.rating.passenger.unwrap();
        assert_eq!(passenger_half.score, 3);
        assert_eq!(passenger_half.comment.as_deref(), Some("Late to pickup"));
        assert_eq!(rating_of(&store, "usr-p1").await, 3.0);
        assert_eq!(rating_of(&store, "usr-d1").await, 5.0);
    }

    #[tokio::test]
    async fn test_only_completed_rides_by_participants() {
        let (store, service) = setup().await;
        insert(&store, sample_ride("rid-open", "usr-p1")).await;
        insert(&store, completed_ride("rid-done", "usr-p1", "usr-d1")).await;

        assert!(matches!(
            service.submit_rating("rid-open", "usr-p1", 5, None).await,
            Err(AppError::InvalidState(_))
        ));
        assert!(matches!(
            service.submit_rating("rid-done", "usr-p2", 5, None).await,
            Err(AppError::AccessDenied(_))
        ));
        assert!(matches!(
            service.submit_rating("rid-missing", "usr-p1", 5, None).await,
            Err(AppError::RideNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rating_bounds_and_comment_length() {
        let (store, service) = setup().await;
        insert(&store, completed_ride("rid-1", "usr-p1", "usr-d1")).await;

        for score in [0, 6] {
            assert!(matches!(
                service.submit_rating("rid-1", "usr-p1", score, None).await,
                Err(AppError::ValidationFailed(_))
            ));
        }
        assert!(matches!(
            service.submit_rating("rid-1", "usr-p1", 5, Some("x".repeat(501))).await,
            Err(AppError::ValidationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_cancelled_rides_do_not_count() {
        let (store, service) = setup().await;
        insert(&store, completed_ride("rid-1", "usr-p1", "usr-d1")).await;
        let mut cancelled = completed_ride("rid-2", "usr-p1", "usr-d1");
        cancelled.status = RideStatus::Cancelled;
        cancelled.rating.driver = Some(RatingEntry {
            score: 1,
            comment: None,
            rated_at: Utc::now(),
        });
        insert(&store, cancelled).await;

        service.submit_rating("rid-1", "usr-p1", 5, None).await.unwrap();
        assert_eq!(rating_of(&store, "usr-d1").await, 5.0);
    }
}
