// src/store/memory_store.rs
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use super::{
    CasOutcome, RideGuard, RidePatch, RideQuery, RideSlice, RideStore, StoreError, UserGuard,
    UserPatch, UserStore,
};
use crate::models::{Ride, User};

type Records<T> = RwLock<HashMap<String, Arc<Mutex<T>>>>;

/// Process-local store for development and tests.
///
/// The map lock is only held to look a record up; each record has its own
/// mutex, so writers to different rides or drivers never contend.
#[derive(Default)]
pub struct MemoryStore {
    rides: Records<Ride>,
    users: Records<User>,
    emails: Mutex<HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn record<T>(records: &Records<T>, id: &str) -> Option<Arc<Mutex<T>>> {
        records.read().await.get(id).cloned()
    }

    async fn insert_record<T>(records: &Records<T>, id: &str, value: T) -> Result<(), StoreError> {
        let mut map = records.write().await;
        if map.contains_key(id) {
            return Err(StoreError::Duplicate(id.to_string()));
        }
        map.insert(id.to_string(), Arc::new(Mutex::new(value)));
        Ok(())
    }
}

#[async_trait]
impl RideStore for MemoryStore {
    async fn insert(&self, ride: &Ride) -> Result<(), StoreError> {
        Self::insert_record(&self.rides, &ride.id, ride.clone()).await
    }

    async fn get(&self, ride_id: &str) -> Result<Option<Ride>, StoreError> {
        match Self::record(&self.rides, ride_id).await {
            Some(record) => Ok(Some(record.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn conditional_update(
        &self,
        ride_id: &str,
        guard: &RideGuard,
        patch: &RidePatch,
    ) -> Result<CasOutcome<Ride>, StoreError> {
        let Some(record) = Self::record(&self.rides, ride_id).await else {
            return Ok(CasOutcome::Missing);
        };

        let mut ride = record.lock().await;
        if !guard.holds(&ride) {
            return Ok(CasOutcome::Rejected(ride.clone()));
        }
        patch.apply(&mut ride);
        Ok(CasOutcome::Updated(ride.clone()))
    }

    async fn find(&self, query: &RideQuery) -> Result<RideSlice, StoreError> {
        let records: Vec<Arc<Mutex<Ride>>> = self.rides.read().await.values().cloned().collect();

        let mut snapshot = Vec::with_capacity(records.len());
        for record in records {
            snapshot.push(record.lock().await.clone());
        }

        Ok(query.select(snapshot))
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn insert(&self, user: &User) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        let mut emails = self.emails.lock().await;
        if users.contains_key(&user.id) {
            return Err(StoreError::Duplicate(user.id.clone()));
        }
        if !emails.insert(user.email.clone()) {
            return Err(StoreError::EmailTaken(user.email.clone()));
        }
        users.insert(user.id.clone(), Arc::new(Mutex::new(user.clone())));
        Ok(())
    }

    async fn get(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        match Self::record(&self.users, user_id).await {
            Some(record) => Ok(Some(record.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn conditional_update(
        &self,
        user_id: &str,
        guard: &UserGuard,
        patch: &UserPatch,
    ) -> Result<CasOutcome<User>, StoreError> {
        let Some(record) = Self::record(&self.users, user_id).await else {
            return Ok(CasOutcome::Missing);
        };

        let mut user = record.lock().await;
        if !guard.holds(&user) {
            return Ok(CasOutcome::Rejected(user.clone()));
        }
        patch.apply(&mut user);
        Ok(CasOutcome::Updated(user.clone()))
    }
}
