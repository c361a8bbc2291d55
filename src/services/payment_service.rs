// src/services/payment_service.rs
//! Ride payments. The service only moves `payment_status` and
//! `payment_intent_id`; money handling belongs to the [`PaymentProcessor`].

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing;

use crate::{
    errors::{SparrowError as AppError, SparrowResult},
    models::{
        to_cents, PageInfo, PaymentConfirmation, PaymentHistoryPage, PaymentIntent, PaymentStatus,
        RefundReceipt, Ride, RideStatus,
    },
    services::payment_gateway::PaymentProcessor,
    store::{CasOutcome, Pagination, RideFilter, RideGuard, RidePatch, RideQuery, RideSort, RideStore},
};

#[async_trait]
pub trait PaymentOperations: Send + Sync {
    async fn create_payment_intent(&self, ride_id: &str, passenger_id: &str) -> SparrowResult<PaymentIntent>;
    async fn confirm_payment(&self, ride_id: &str, passenger_id: &str) -> SparrowResult<PaymentConfirmation>;
    async fn refund_payment(&self, ride_id: &str, passenger_id: &str) -> SparrowResult<RefundReceipt>;
    async fn payment_history(&self, passenger_id: &str, page: u32, limit: u32) -> SparrowResult<PaymentHistoryPage>;
}

pub struct PaymentService {
    rides: Arc<dyn RideStore>,
    processor: Arc<dyn PaymentProcessor>,
}

impl PaymentService {
    pub fn new(rides: Arc<dyn RideStore>, processor: Arc<dyn PaymentProcessor>) -> Self {
        Self { rides, processor }
    }

    async fn passenger_ride(&self, ride_id: &str, passenger_id: &str) -> SparrowResult<Ride> {
        let ride = self
            .rides
            .get(ride_id)
            .await?
            .ok_or_else(|| AppError::ride_not_found(ride_id))?;

        if !ride.is_passenger(passenger_id) {
            return Err(AppError::access_denied("Only the ride's passenger can manage its payment"));
        }
        Ok(ride)
    }

    /// Moves the payment on from the status `ride` was read with; a
    /// concurrent payment or lifecycle change rejects the write.
    async fn set_payment_status(&self, ride: &Ride, status: PaymentStatus) -> SparrowResult<Ride> {
        let guard = RideGuard {
            status: Some(ride.status),
            payment_status: Some(ride.payment_status),
            ..Default::default()
        };
        let patch = RidePatch {
            payment_status: Some(status),
            ..Default::default()
        };
        match self.rides.conditional_update(&ride.id, &guard, &patch).await? {
            CasOutcome::Updated(updated) => Ok(updated),
            CasOutcome::Rejected(current) => Err(AppError::invalid_state(format!(
                "Ride changed to {} with payment {:?} while its payment was processed",
                current.status, current.payment_status
            ))),
            CasOutcome::Missing => Err(AppError::ride_not_found(&ride.id)),
        }
    }

    /// Hands a refund claim back after the gateway refused it.
    async fn restore_paid(&self, ride_id: &str, failure: AppError) -> AppError {
        let guard = RideGuard {
            payment_status: Some(PaymentStatus::Refunded),
            ..Default::default()
        };
        let patch = RidePatch {
            payment_status: Some(PaymentStatus::Paid),
            ..Default::default()
        };
        match self.rides.conditional_update(ride_id, &guard, &patch).await {
            Ok(CasOutcome::Updated(_)) => {
                tracing::warn!("Refund of ride {} failed, payment is paid again: {}", ride_id, failure);
                failure
            }
            Ok(_) => {
                tracing::error!(
                    "Refund of ride {} failed ({}) and its payment changed meanwhile",
                    ride_id,
                    failure
                );
                failure
            }
            Err(err) => {
                tracing::error!(
                    "Refund of ride {} failed ({}) and its payment is stuck as refunded: {}",
                    ride_id,
                    failure,
                    err
                );
                err.into()
            }
        }
    }
}

#[async_trait]
impl PaymentOperations for PaymentService {
    async fn create_payment_intent(&self, ride_id: &str, passenger_id: &str) -> SparrowResult<PaymentIntent> {
        tracing::info!("Creating payment intent for ride {}", ride_id);

        let ride = self.passenger_ride(ride_id, passenger_id).await?;
        if ride.status != RideStatus::Completed {
            return Err(AppError::invalid_state("Only completed rides can be paid"));
        }
        if ride.payment_intent_id.is_some() {
            return Err(AppError::PaymentAlreadyExists);
        }

        let intent = self.processor.authorize(&ride.id, to_cents(ride.fare.total)).await?;

        let guard = RideGuard {
            status: Some(RideStatus::Completed),
            without_payment_intent: true,
            ..Default::default()
        };
        let patch = RidePatch {
            payment_intent_id: Some(intent.intent_id.clone()),
            updated_at: Utc::now(),
            ..Default::default()
        };

        match self.rides.conditional_update(&ride.id, &guard, &patch).await? {
            CasOutcome::Updated(_) => {
                tracing::info!("Ride {} payment intent {}", ride.id, intent.intent_id);
                Ok(intent)
            }
            CasOutcome::Rejected(_) => {
                tracing::warn!(
                    "Ride {} got an intent concurrently; {} left unused",
                    ride.id,
                    intent.intent_id
                );
                Err(AppError::PaymentAlreadyExists)
            }
            CasOutcome::Missing => Err(AppError::ride_not_found(ride_id)),
        }
    }

    async fn confirm_payment(&self, ride_id: &str, passenger_id: &str) -> SparrowResult<PaymentConfirmation> {
        tracing::info!("Confirming payment for ride {}", ride_id);

        let ride = self.passenger_ride(ride_id, passenger_id).await?;
        let Some(intent_id) = ride.payment_intent_id.as_deref() else {
            return Err(AppError::invalid_state("Ride has no payment intent"));
        };

        let gateway_status = self.processor.confirm(intent_id).await?;

        // A refunded payment stays refunded whatever the intent reports
        let payment_status = match gateway_status.settled_status() {
            Some(status)
                if status != ride.payment_status && ride.payment_status != PaymentStatus::Refunded =>
            {
                self.set_payment_status(&ride, status).await?.payment_status
            }
            _ => ride.payment_status,
        };

        tracing::info!("Ride {} payment is {:?} ({:?})", ride_id, payment_status, gateway_status);
        Ok(PaymentConfirmation {
            ride_id: ride.id,
            payment_status,
            gateway_status,
        })
    }

    async fn refund_payment(&self, ride_id: &str, passenger_id: &str) -> SparrowResult<RefundReceipt> {
        tracing::info!("Refunding payment for ride {}", ride_id);

        let ride = self.passenger_ride(ride_id, passenger_id).await?;
        if ride.status != RideStatus::Cancelled {
            return Err(AppError::invalid_state("Only cancelled rides can be refunded"));
        }
        let intent_id = match (ride.payment_status, ride.payment_intent_id.as_deref()) {
            (PaymentStatus::Paid, Some(intent_id)) => intent_id,
            _ => return Err(AppError::invalid_state("Ride has no settled payment to refund")),
        };

        // Claim the refund first so only one caller reaches the gateway
        let claim = RideGuard {
            status: Some(RideStatus::Cancelled),
            payment_status: Some(PaymentStatus::Paid),
            ..Default::default()
        };
        let patch = RidePatch {
            payment_status: Some(PaymentStatus::Refunded),
            updated_at: Utc::now(),
            ..Default::default()
        };
        match self.rides.conditional_update(&ride.id, &claim, &patch).await? {
            CasOutcome::Updated(_) => {}
            CasOutcome::Rejected(current) => {
                return Err(AppError::invalid_state(format!(
                    "Payment is {:?}, nothing to refund",
                    current.payment_status
                )));
            }
            CasOutcome::Missing => return Err(AppError::ride_not_found(ride_id)),
        }

        match self.processor.refund(intent_id).await {
            Ok(receipt) => {
                tracing::info!("Ride {} refunded as {}", ride_id, receipt.refund_id);
                Ok(receipt)
            }
            Err(err) => Err(self.restore_paid(&ride.id, err).await),
        }
    }

    async fn payment_history(&self, passenger_id: &str, page: u32, limit: u32) -> SparrowResult<PaymentHistoryPage> {
        tracing::debug!("Getting payment history for passenger {}", passenger_id);

        let page = page.max(1);
        let limit = limit.clamp(1, 100);
        let query = RideQuery::new(RideFilter {
            passenger_id: Some(passenger_id.to_string()),
            payment_statuses: Some(vec![PaymentStatus::Paid, PaymentStatus::Failed]),
            ..Default::default()
        })
        .sorted(RideSort::CompletedDesc)
        .paginated(Pagination::page(page, limit));

        let slice = self.rides.find(&query).await?;
        Ok(PaymentHistoryPage {
            payments: slice.rides,
            pagination: PageInfo::new(page, limit, slice.total),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GatewayStatus;
    use crate::services::payment_gateway::MockPaymentProcessor;
    use crate::store::MemoryStore;
    use crate::test_helpers::completed_ride;
    use chrono::Duration;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn setup(processor: MockPaymentProcessor) -> (Arc<MemoryStore>, PaymentService) {
        let store = Arc::new(MemoryStore::new());
        RideStore::insert(store.as_ref(), &completed_ride("rid-1", "usr-p1", "usr-d1"))
            .await
            .unwrap();
        let service = PaymentService::new(store.clone(), Arc::new(processor));
        (store, service)
    }

    async fn ride(store: &MemoryStore, id: &str) -> Ride {
        RideStore::get(store, id).await.unwrap().unwrap()
    }

    /// Counts gateway refunds and holds each one open for a moment.
    struct SlowRefunds {
        inner: MockPaymentProcessor,
        refunds: AtomicUsize,
        decline: bool,
    }

    impl SlowRefunds {
        fn new(decline: bool) -> Self {
            Self {
                inner: MockPaymentProcessor::new(),
                refunds: AtomicUsize::new(0),
                decline,
            }
        }
    }

    #[async_trait]
    impl PaymentProcessor for SlowRefunds {
        async fn authorize(&self, ride_id: &str, amount_cents: i64) -> SparrowResult<PaymentIntent> {
            self.inner.authorize(ride_id, amount_cents).await
        }

        async fn confirm(&self, intent_id: &str) -> SparrowResult<GatewayStatus> {
            self.inner.confirm(intent_id).await
        }

        async fn refund(&self, intent_id: &str) -> SparrowResult<RefundReceipt> {
            self.refunds.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            if self.decline {
                return Err(AppError::PaymentGateway("card_declined".to_string()));
            }
            self.inner.refund(intent_id).await
        }
    }

    async fn cancelled_paid_ride(decline: bool) -> (Arc<MemoryStore>, Arc<SlowRefunds>, PaymentService) {
        let store = Arc::new(MemoryStore::new());
        let processor = Arc::new(SlowRefunds::new(decline));
        let service = PaymentService::new(store.clone(), processor.clone());

        let intent = processor.authorize("rid-c", 2300).await.unwrap();
        let mut ride = completed_ride("rid-c", "usr-p1", "usr-d1");
        ride.status = RideStatus::Cancelled;
        ride.completed_at = None;
        ride.cancelled_at = Some(Utc::now());
        ride.payment_intent_id = Some(intent.intent_id);
        ride.payment_status = PaymentStatus::Paid;
        RideStore::insert(store.as_ref(), &ride).await.unwrap();

        (store, processor, service)
    }

    #[tokio::test]
    async fn test_intent_then_confirm_marks_paid() {
        let (store, service) = setup(MockPaymentProcessor::new()).await;

        let intent = service.create_payment_intent("rid-1", "usr-p1").await.unwrap();
        assert_eq!(intent.amount_cents, 2300);
        assert_eq!(
            ride(&store, "rid-1").await.payment_intent_id.as_deref(),
            Some(intent.intent_id.as_str())
        );

        let confirmation = service.confirm_payment("rid-1", "usr-p1").await.unwrap();
        assert_eq!(confirmation.payment_status, PaymentStatus::Paid);
        assert_eq!(ride(&store, "rid-1").await.payment_status, PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn test_second_intent_is_rejected() {
        let (_, service) = setup(MockPaymentProcessor::new()).await;
        service.create_payment_intent("rid-1", "usr-p1").await.unwrap();

        assert!(matches!(
            service.create_payment_intent("rid-1", "usr-p1").await,
            Err(AppError::PaymentAlreadyExists)
        ));
    }

    #[tokio::test]
    async fn test_only_passenger_of_completed_ride_pays() {
        let (store, service) = setup(MockPaymentProcessor::new()).await;
        assert!(matches!(
            service.create_payment_intent("rid-1", "usr-d1").await,
            Err(AppError::AccessDenied(_))
        ));

        let mut open = completed_ride("rid-2", "usr-p1", "usr-d1");
        open.status = RideStatus::InProgress;
        RideStore::insert(store.as_ref(), &open).await.unwrap();
        assert!(matches!(
            service.create_payment_intent("rid-2", "usr-p1").await,
            Err(AppError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_pending_gateway_status_leaves_payment_unchanged() {
        let (store, service) = setup(MockPaymentProcessor::with_confirm_status(GatewayStatus::Processing)).await;
        service.create_payment_intent("rid-1", "usr-p1").await.unwrap();

        let confirmation = service.confirm_payment("rid-1", "usr-p1").await.unwrap();
        assert_eq!(confirmation.gateway_status, GatewayStatus::Processing);
        assert_eq!(confirmation.payment_status, PaymentStatus::Pending);
        assert_eq!(ride(&store, "rid-1").await.payment_status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_refund_requires_cancelled_paid_ride() {
        let processor = Arc::new(MockPaymentProcessor::new());
        let store = Arc::new(MemoryStore::new());
        let service = PaymentService::new(store.clone(), processor.clone());

        let intent = processor.authorize("rid-c", 2300).await.unwrap();
        let mut cancelled = completed_ride("rid-c", "usr-p1", "usr-d1");
        cancelled.status = RideStatus::Cancelled;
        cancelled.completed_at = None;
        cancelled.cancelled_at = Some(Utc::now());
        cancelled.payment_intent_id = Some(intent.intent_id);
        cancelled.payment_status = PaymentStatus::Pending;
        RideStore::insert(store.as_ref(), &cancelled).await.unwrap();

        assert!(matches!(
            service.refund_payment("rid-c", "usr-p1").await,
            Err(AppError::InvalidState(_))
        ));

        RideStore::conditional_update(
            store.as_ref(),
            "rid-c",
            &RideGuard::default(),
            &RidePatch {
                payment_status: Some(PaymentStatus::Paid),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let receipt = service.refund_payment("rid-c", "usr-p1").await.unwrap();
        assert_eq!(receipt.amount_cents, 2300);
        assert_eq!(ride(&store, "rid-c").await.payment_status, PaymentStatus::Refunded);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_refunds_reach_gateway_once() {
        let (store, processor, service) = cancelled_paid_ride(false).await;

        let (first, second) = tokio::join!(
            service.refund_payment("rid-c", "usr-p1"),
            service.refund_payment("rid-c", "usr-p1"),
        );

        let results = [first, second];
        assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|result| matches!(result, Err(AppError::InvalidState(_)))));
        assert_eq!(processor.refunds.load(Ordering::SeqCst), 1);
        assert_eq!(ride(&store, "rid-c").await.payment_status, PaymentStatus::Refunded);
    }

    #[tokio::test]
    async fn test_declined_refund_restores_paid() {
        let (store, processor, service) = cancelled_paid_ride(true).await;

        let result = service.refund_payment("rid-c", "usr-p1").await;
        assert!(matches!(result, Err(AppError::PaymentGateway(_))));
        assert_eq!(ride(&store, "rid-c").await.payment_status, PaymentStatus::Paid);

        // The claim was handed back, so a retry reaches the gateway again
        let _ = service.refund_payment("rid-c", "usr-p1").await;
        assert_eq!(processor.refunds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_confirm_after_refund_keeps_refunded() {
        let (store, _, service) = cancelled_paid_ride(false).await;
        service.refund_payment("rid-c", "usr-p1").await.unwrap();

        let confirmation = service.confirm_payment("rid-c", "usr-p1").await.unwrap();
        assert_eq!(confirmation.gateway_status, GatewayStatus::Succeeded);
        assert_eq!(confirmation.payment_status, PaymentStatus::Refunded);
        assert_eq!(ride(&store, "rid-c").await.payment_status, PaymentStatus::Refunded);
    }

    #[tokio::test]
    async fn test_history_lists_settled_payments_newest_first() {
        let store = Arc::new(MemoryStore::new());
        let service = PaymentService::new(store.clone(), Arc::new(MockPaymentProcessor::new()));
        let base = Utc::now();

        for (i, status) in [PaymentStatus::Paid, PaymentStatus::Pending, PaymentStatus::Failed]
            .into_iter()
            .enumerate()
        {
            let mut ride = completed_ride(&format!("rid-{}", i), "usr-p1", "usr-d1");
            ride.completed_at = Some(base + Duration::minutes(i as i64));
            ride.payment_status = status;
            RideStore::insert(store.as_ref(), &ride).await.unwrap();
        }

        let history = service.payment_history("usr-p1", 1, 10).await.unwrap();
        let ids: Vec<_> = history.payments.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["rid-2", "rid-0"]);
        assert_eq!(history.pagination.total, 2);
    }
}
