// src/store/redis_store.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, Script};
use serde::{Deserialize, Serialize};

use super::{
    CasOutcome, RideFilter, RideGuard, RidePatch, RideQuery, RideSlice, RideStore, StoreError,
    UserGuard, UserPatch, UserStore,
};
use crate::models::{PaymentStatus, Ride, RideRating, RideStatus, User};

// Key layout
const RIDE_PREFIX: &str = "ride:";
const USER_PREFIX: &str = "user:";
const USER_EMAIL_PREFIX: &str = "user:email:";
const RIDE_TIMELINE: &str = "rides:timeline"; // every ride, scored by request time
const RIDE_OPEN: &str = "rides:open"; // requested and unclaimed
const PASSENGER_INDEX_PREFIX: &str = "rides:passenger:";
const DRIVER_INDEX_PREFIX: &str = "rides:driver:";

// Ride hash fields
const BASE_FIELD: &str = "base";
const STATE_FIELD: &str = "state";

const OUTCOME_MISSING: i64 = 0;
const OUTCOME_REJECTED: i64 = 1;
const OUTCOME_UPDATED: i64 = 2;

// KEYS: ride key. ARGV: base document, state document.
const INSERT_RIDE: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return 0
end
redis.call('HSET', KEYS[1], 'base', ARGV[1], 'state', ARGV[2])
return 1
"#;

// KEYS: ride key, open set, timeline. ARGV: guard, patch, ride id, driver index prefix.
// Only the state field is decoded and re-encoded. The base document holds
// coordinates and fares, which cjson would round to 14 significant digits.
const CONDITIONAL_RIDE_UPDATE: &str = r#"
local raw = redis.call('HGET', KEYS[1], 'state')
if not raw then
  return {0, '', ''}
end
local base = redis.call('HGET', KEYS[1], 'base')

local function present(value)
  return value ~= nil and value ~= cjson.null
end

local state = cjson.decode(raw)
local guard = cjson.decode(ARGV[1])
if present(guard.status) and state.status ~= guard.status then
  return {1, base, raw}
end
if guard.unassigned and present(state.driver_id) then
  return {1, base, raw}
end
if guard.without_payment_intent and present(state.payment_intent_id) then
  return {1, base, raw}
end
if present(guard.payment_status) and state.payment_status ~= guard.payment_status then
  return {1, base, raw}
end

local patch = cjson.decode(ARGV[2])
for field, value in pairs(patch) do
  if type(value) == 'table' and type(state[field]) == 'table' then
    for inner, inner_value in pairs(value) do
      state[field][inner] = inner_value
    end
  else
    state[field] = value
  end
end

local updated = cjson.encode(state)
redis.call('HSET', KEYS[1], 'state', updated)

if state.status ~= 'requested' or present(state.driver_id) then
  redis.call('ZREM', KEYS[2], ARGV[3])
end
if present(state.driver_id) then
  local score = redis.call('ZSCORE', KEYS[3], ARGV[3]) or 0
  redis.call('ZADD', ARGV[4] .. state.driver_id, score, ARGV[3])
end

return {2, base, updated}
"#;

// KEYS: user key, email key. ARGV: user document, user id.
const INSERT_USER: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return 0
end
if redis.call('SETNX', KEYS[2], ARGV[2]) == 0 then
  return 1
end
redis.call('SET', KEYS[1], ARGV[1])
return 2
"#;

const USER_INSERTED: i64 = 2;
const USER_EMAIL_TAKEN: i64 = 1;

// KEYS: user key. ARGV: guard, patch, total rides increment.
// User documents carry no free-form floats; the rating is stored rounded to
// one decimal, which survives cjson unchanged.
const CONDITIONAL_USER_UPDATE: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then
  return {0, ''}
end

local function present(value)
  return value ~= nil and value ~= cjson.null
end

local user = cjson.decode(raw)
local guard = cjson.decode(ARGV[1])
if present(guard.role) and user.role ~= guard.role then
  return {1, raw}
end
if present(guard.is_available) and user.is_available ~= guard.is_available then
  return {1, raw}
end

local patch = cjson.decode(ARGV[2])
for field, value in pairs(patch) do
  user[field] = value
end
user.total_rides = (tonumber(user.total_rides) or 0) + tonumber(ARGV[3])

local updated = cjson.encode(user)
redis.call('SET', KEYS[1], updated)
return {2, updated}
"#;

/// The part of a ride that changes after creation. Every field a
/// [`RidePatch`] can touch lives here and nothing else does.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RideState {
    status: RideStatus,
    driver_id: Option<String>,
    payment_status: PaymentStatus,
    payment_intent_id: Option<String>,
    rating: RideRating,
    accepted_at: Option<DateTime<Utc>>,
    picked_up_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl RideState {
    fn of(ride: &Ride) -> Self {
        Self {
            status: ride.status,
            driver_id: ride.driver_id.clone(),
            payment_status: ride.payment_status,
            payment_intent_id: ride.payment_intent_id.clone(),
            rating: ride.rating.clone(),
            accepted_at: ride.accepted_at,
            picked_up_at: ride.picked_up_at,
            completed_at: ride.completed_at,
            cancelled_at: ride.cancelled_at,
            updated_at: ride.updated_at,
        }
    }

    fn apply_to(self, ride: &mut Ride) {
        ride.status = self.status;
        ride.driver_id = self.driver_id;
        ride.payment_status = self.payment_status;
        ride.payment_intent_id = self.payment_intent_id;
        ride.rating = self.rating;
        ride.accepted_at = self.accepted_at;
        ride.picked_up_at = self.picked_up_at;
        ride.completed_at = self.completed_at;
        ride.cancelled_at = self.cancelled_at;
        ride.updated_at = self.updated_at;
    }
}

/// Rebuilds a ride from its base document and current state.
fn assemble_ride(base: &str, state: &str) -> Result<Ride, StoreError> {
    let mut ride: Ride = serde_json::from_str(base)?;
    let state: RideState = serde_json::from_str(state)?;
    state.apply_to(&mut ride);
    Ok(ride)
}

/// Redis-backed ride and user store.
///
/// A ride is a hash of two JSON documents: `base`, written once at insert,
/// and `state`, the only part the update script touches. Users are single
/// JSON documents. Conditional updates are Lua scripts so the guard and the
/// write are a single atomic server-side step.
pub struct RedisStore {
    connection: MultiplexedConnection,
    ride_insert: Script,
    ride_update: Script,
    user_insert: Script,
    user_update: Script,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = Client::open(redis_url)?;
        let connection = client.get_multiplexed_tokio_connection().await?;

        tracing::info!("Connected to Redis at {}", redis_url);

        Ok(Self {
            connection,
            ride_insert: Script::new(INSERT_RIDE),
            ride_update: Script::new(CONDITIONAL_RIDE_UPDATE),
            user_insert: Script::new(INSERT_USER),
            user_update: Script::new(CONDITIONAL_USER_UPDATE),
        })
    }

    fn conn(&self) -> MultiplexedConnection {
        self.connection.clone()
    }

    fn ride_key(ride_id: &str) -> String {
        format!("{}{}", RIDE_PREFIX, ride_id)
    }

    fn user_key(user_id: &str) -> String {
        format!("{}{}", USER_PREFIX, user_id)
    }

    fn email_key(email: &str) -> String {
        format!("{}{}", USER_EMAIL_PREFIX, email)
    }

    /// Narrowest index that covers the filter. The filter itself is still
    /// applied to every loaded ride.
    async fn candidate_ids(&self, filter: &RideFilter) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn();

        let mut ids: Vec<String> = if let Some(passenger_id) = &filter.passenger_id {
            conn.zrevrange(format!("{}{}", PASSENGER_INDEX_PREFIX, passenger_id), 0, -1).await?
        } else if let Some(driver_id) = &filter.driver_id {
            conn.zrevrange(format!("{}{}", DRIVER_INDEX_PREFIX, driver_id), 0, -1).await?
        } else if let Some(user_id) = &filter.participant_id {
            let mut as_passenger: Vec<String> = conn
                .zrevrange(format!("{}{}", PASSENGER_INDEX_PREFIX, user_id), 0, -1)
                .await?;
            let as_driver: Vec<String> = conn
                .zrevrange(format!("{}{}", DRIVER_INDEX_PREFIX, user_id), 0, -1)
                .await?;
            as_passenger.extend(as_driver);
            as_passenger
        } else if filter.unassigned && filter.status == Some(RideStatus::Requested) {
            conn.zrevrange(RIDE_OPEN, 0, -1).await?
        } else {
            conn.zrevrange(RIDE_TIMELINE, 0, -1).await?
        };

        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    async fn load_rides(&self, ids: &[String]) -> Result<Vec<Ride>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for id in ids {
            pipe.cmd("HMGET")
                .arg(Self::ride_key(id))
                .arg(BASE_FIELD)
                .arg(STATE_FIELD);
        }
        let mut conn = self.conn();
        let rows: Vec<(Option<String>, Option<String>)> = pipe.query_async(&mut conn).await?;

        rows.into_iter()
            .filter_map(|row| match row {
                (Some(base), Some(state)) => Some(assemble_ride(&base, &state)),
                _ => None,
            })
            .collect()
    }

    fn decode_ride_outcome(
        code: i64,
        base: &str,
        state: &str,
    ) -> Result<CasOutcome<Ride>, StoreError> {
        match code {
            OUTCOME_MISSING => Ok(CasOutcome::Missing),
            OUTCOME_REJECTED => Ok(CasOutcome::Rejected(assemble_ride(base, state)?)),
            OUTCOME_UPDATED => Ok(CasOutcome::Updated(assemble_ride(base, state)?)),
            other => Err(StoreError::Operation(format!(
                "unexpected script outcome {}",
                other
            ))),
        }
    }

    fn decode_user_outcome(code: i64, document: &str) -> Result<CasOutcome<User>, StoreError> {
        match code {
            OUTCOME_MISSING => Ok(CasOutcome::Missing),
            OUTCOME_REJECTED => Ok(CasOutcome::Rejected(serde_json::from_str(document)?)),
            OUTCOME_UPDATED => Ok(CasOutcome::Updated(serde_json::from_str(document)?)),
            other => Err(StoreError::Operation(format!(
                "unexpected script outcome {}",
                other
            ))),
        }
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        match err.kind() {
            redis::ErrorKind::IoError | redis::ErrorKind::AuthenticationFailed => {
                StoreError::Connection(err.to_string())
            }
            redis::ErrorKind::TypeError => StoreError::Serialization(err.to_string()),
            _ => StoreError::Operation(err.to_string()),
        }
    }
}

#[async_trait]
impl RideStore for RedisStore {
    async fn insert(&self, ride: &Ride) -> Result<(), StoreError> {
        let base = serde_json::to_string(ride)?;
        let state = serde_json::to_string(&RideState::of(ride))?;
        let score = ride.requested_at.timestamp_millis();
        let mut conn = self.conn();

        let created: i64 = self
            .ride_insert
            .key(Self::ride_key(&ride.id))
            .arg(base)
            .arg(state)
            .invoke_async(&mut conn)
            .await?;
        if created == 0 {
            return Err(StoreError::Duplicate(ride.id.clone()));
        }

        let mut pipe = redis::pipe();
        pipe.atomic()
            .zadd(RIDE_TIMELINE, &ride.id, score)
            .ignore()
            .zadd(
                format!("{}{}", PASSENGER_INDEX_PREFIX, ride.passenger_id),
                &ride.id,
                score,
            )
            .ignore();
        if ride.status == RideStatus::Requested && ride.driver_id.is_none() {
            pipe.zadd(RIDE_OPEN, &ride.id, score).ignore();
        }
        if let Some(driver_id) = &ride.driver_id {
            pipe.zadd(format!("{}{}", DRIVER_INDEX_PREFIX, driver_id), &ride.id, score)
                .ignore();
        }
        pipe.query_async::<_, ()>(&mut conn).await?;

        tracing::debug!("Stored ride {}", ride.id);
        Ok(())
    }

    async fn get(&self, ride_id: &str) -> Result<Option<Ride>, StoreError> {
        let mut conn = self.conn();
        let (base, state): (Option<String>, Option<String>) = redis::cmd("HMGET")
            .arg(Self::ride_key(ride_id))
            .arg(BASE_FIELD)
            .arg(STATE_FIELD)
            .query_async(&mut conn)
            .await?;

        match (base, state) {
            (Some(base), Some(state)) => assemble_ride(&base, &state).map(Some),
            _ => Ok(None),
        }
    }

    async fn conditional_update(
        &self,
        ride_id: &str,
        guard: &RideGuard,
        patch: &RidePatch,
    ) -> Result<CasOutcome<Ride>, StoreError> {
        let mut conn = self.conn();
        let (code, base, state): (i64, String, String) = self
            .ride_update
            .key(Self::ride_key(ride_id))
            .key(RIDE_OPEN)
            .key(RIDE_TIMELINE)
            .arg(serde_json::to_string(guard)?)
            .arg(serde_json::to_string(patch)?)
            .arg(ride_id)
            .arg(DRIVER_INDEX_PREFIX)
            .invoke_async(&mut conn)
            .await?;

        Self::decode_ride_outcome(code, &base, &state)
    }

    async fn find(&self, query: &RideQuery) -> Result<RideSlice, StoreError> {
        let ids = self.candidate_ids(&query.filter).await?;
        let rides = self.load_rides(&ids).await?;
        Ok(query.select(rides))
    }
}

#[async_trait]
impl UserStore for RedisStore {
    async fn insert(&self, user: &User) -> Result<(), StoreError> {
        let json = serde_json::to_string(user)?;
        let mut conn = self.conn();

        let outcome: i64 = self
            .user_insert
            .key(Self::user_key(&user.id))
            .key(Self::email_key(&user.email))
            .arg(json)
            .arg(&user.id)
            .invoke_async(&mut conn)
            .await?;

        match outcome {
            USER_INSERTED => Ok(()),
            USER_EMAIL_TAKEN => Err(StoreError::EmailTaken(user.email.clone())),
            _ => Err(StoreError::Duplicate(user.id.clone())),
        }
    }

    async fn get(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        let mut conn = self.conn();
        let json: Option<String> = conn.get(Self::user_key(user_id)).await?;
        json.map(|json| serde_json::from_str(&json).map_err(StoreError::from))
            .transpose()
    }

    async fn conditional_update(
        &self,
        user_id: &str,
        guard: &UserGuard,
        patch: &UserPatch,
    ) -> Result<CasOutcome<User>, StoreError> {
        let mut conn = self.conn();
        let (code, document): (i64, String) = self
            .user_update
            .key(Self::user_key(user_id))
            .arg(serde_json::to_string(guard)?)
            .arg(serde_json::to_string(patch)?)
            .arg(patch.total_rides_increment)
            .invoke_async(&mut conn)
            .await?;

        Self::decode_user_outcome(code, &document)
    }
}


/// Runs the Lua scripts against a real server. Skipped unless `REDIS_URL`
/// is set, e.g. `REDIS_URL=redis://127.0.0.1:6379 cargo test live_`.
#[cfg(test)]
mod live_tests {
    use super::*;
    use crate::store::Pagination;
    use crate::test_helpers::{sample_driver, sample_ride};
    use crate::utils::id_generator::{generate_ride_id, generate_user_id};

    async fn live_store() -> Option<RedisStore> {
        let url = std::env::var("REDIS_URL").ok()?;
        Some(RedisStore::connect(&url).await.expect("REDIS_URL is set but unreachable"))
    }

    fn claim(driver_id: &str) -> RidePatch {
        RidePatch {
            driver_id: Some(driver_id.to_string()),
            ..RidePatch::transition(RideStatus::Accepted, Utc::now())
        }
    }

    fn open_rides() -> RideQuery {
        RideQuery::new(RideFilter {
            status: Some(RideStatus::Requested),
            unassigned: true,
            ..Default::default()
        })
        .paginated(Pagination::All)
    }

    fn ids(slice: &RideSlice) -> Vec<&str> {
        slice.rides.iter().map(|ride| ride.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_live_claim_is_guarded() {
        let Some(store) = live_store().await else { return };
        let ride_id = generate_ride_id();
        RideStore::insert(&store, &sample_ride(&ride_id, &generate_user_id())).await.unwrap();

        let first = RideStore::conditional_update(&store, &ride_id, &RideGuard::claimable(), &claim("usr-d1"))
            .await
            .unwrap();
        assert!(matches!(first, CasOutcome::Updated(ref r) if r.driver_id.as_deref() == Some("usr-d1")));

        let second = RideStore::conditional_update(&store, &ride_id, &RideGuard::claimable(), &claim("usr-d2"))
            .await
            .unwrap();
        assert!(matches!(second, CasOutcome::Rejected(ref r) if r.driver_id.as_deref() == Some("usr-d1")));

        let missing = RideStore::conditional_update(&store, &generate_ride_id(), &RideGuard::claimable(), &claim("usr-d1"))
            .await
            .unwrap();
        assert!(matches!(missing, CasOutcome::Missing));

        let duplicate = RideStore::insert(&store, &sample_ride(&ride_id, "usr-p")).await;
        assert!(matches!(duplicate, Err(StoreError::Duplicate(_))));
    }

    #[tokio::test]
    async fn test_live_payment_status_guard() {
        let Some(store) = live_store().await else { return };
        let ride_id = generate_ride_id();
        RideStore::insert(&store, &sample_ride(&ride_id, &generate_user_id())).await.unwrap();

        let guard = RideGuard {
            payment_status: Some(PaymentStatus::Paid),
            ..Default::default()
        };
        let patch = RidePatch {
            payment_status: Some(PaymentStatus::Refunded),
            ..Default::default()
        };
        let outcome = RideStore::conditional_update(&store, &ride_id, &guard, &patch).await.unwrap();
        assert!(matches!(outcome, CasOutcome::Rejected(ref r) if r.payment_status == PaymentStatus::Pending));
    }

    #[tokio::test]
    async fn test_live_open_index_drops_accepted_and_cancelled_rides() {
        let Some(store) = live_store().await else { return };
        let passenger_id = generate_user_id();
        let accepted = generate_ride_id();
        let cancelled = generate_ride_id();
        RideStore::insert(&store, &sample_ride(&accepted, &passenger_id)).await.unwrap();
        RideStore::insert(&store, &sample_ride(&cancelled, &passenger_id)).await.unwrap();

        let before = store.find(&open_rides()).await.unwrap();
        assert!(ids(&before).contains(&accepted.as_str()));
        assert!(ids(&before).contains(&cancelled.as_str()));

        RideStore::conditional_update(&store, &accepted, &RideGuard::claimable(), &claim("usr-d1"))
            .await
            .unwrap();
        RideStore::conditional_update(
            &store,
            &cancelled,
            &RideGuard::status(RideStatus::Requested),
            &RidePatch::transition(RideStatus::Cancelled, Utc::now()),
        )
        .await
        .unwrap();

        let after = store.find(&open_rides()).await.unwrap();
        assert!(!ids(&after).contains(&accepted.as_str()));
        assert!(!ids(&after).contains(&cancelled.as_str()));

        let history = store
            .find(&RideQuery::new(RideFilter {
                passenger_id: Some(passenger_id),
                ..Default::default()
            }))
            .await
            .unwrap();
        assert_eq!(history.total, 2);
    }

    #[tokio::test]
    async fn test_live_driver_history_follows_claim() {
        let Some(store) = live_store().await else { return };
        let driver_id = generate_user_id();
        let ride_id = generate_ride_id();
        RideStore::insert(&store, &sample_ride(&ride_id, &generate_user_id())).await.unwrap();
        RideStore::conditional_update(&store, &ride_id, &RideGuard::claimable(), &claim(&driver_id))
            .await
            .unwrap();

        for filter in [
            RideFilter {
                driver_id: Some(driver_id.clone()),
                ..Default::default()
            },
            RideFilter {
                participant_id: Some(driver_id.clone()),
                ..Default::default()
            },
        ] {
            let slice = store.find(&RideQuery::new(filter)).await.unwrap();
            assert_eq!(ids(&slice), vec![ride_id.as_str()]);
        }
    }

    #[tokio::test]
    async fn test_live_coordinates_survive_script_updates() {
        let Some(store) = live_store().await else { return };
        let ride_id = generate_ride_id();
        let mut ride = sample_ride(&ride_id, &generate_user_id());
        ride.pickup.latitude = 37.421998333333335;
        ride.destination.longitude = -122.08400000000002;
        RideStore::insert(&store, &ride).await.unwrap();

        RideStore::conditional_update(&store, &ride_id, &RideGuard::claimable(), &claim("usr-d1"))
            .await
            .unwrap();

        let loaded = RideStore::get(&store, &ride_id).await.unwrap().unwrap();
        assert_eq!(loaded.pickup.latitude, 37.421998333333335);
        assert_eq!(loaded.destination.longitude, -122.08400000000002);
        assert_eq!(loaded.fare.total, ride.fare.total);
        assert_eq!(loaded.status, RideStatus::Accepted);
    }

    #[tokio::test]
    async fn test_live_user_increment_and_unique_email() {
        let Some(store) = live_store().await else { return };
        let driver_id = generate_user_id();
        let driver = sample_driver(&driver_id);
        UserStore::insert(&store, &driver).await.unwrap();

        let patch = UserPatch {
            is_available: Some(true),
            total_rides_increment: 1,
            ..Default::default()
        };
        let user = store.update(&driver_id, &patch).await.unwrap().unwrap();
        assert_eq!(user.total_rides, 1);
        assert!(user.is_available);

        let guard = UserGuard {
            is_available: Some(false),
            ..Default::default()
        };
        let outcome = UserStore::conditional_update(&store, &driver_id, &guard, &patch)
            .await
            .unwrap();
        assert!(matches!(outcome, CasOutcome::Rejected(ref u) if u.total_rides == 1));

        let mut twin = sample_driver(&generate_user_id());
        twin.email = driver.email.clone();
        let err = UserStore::insert(&store, &twin).await.unwrap_err();
        assert!(matches!(err, StoreError::EmailTaken(_)));
        assert!(UserStore::get(&store, &twin.id).await.unwrap().is_none());
    }
}
