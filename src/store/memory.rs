// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! A `DashMap`-backed `CacheStore` fake. Atomicity comes from `DashMap`'s
//! per-shard locking: `remove` and `remove_if` observe and mutate a key in
//! one critical section, so a concurrent append/schedule can never be lost
//! between the "read" and "delete" halves of a drain/pop.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use crate::{error::GatewayError, policy::PrivacyPolicy, store::CacheStore};

type Key = (String, String);

/// In-process fake of the cache + accumulation store, for tests.
#[derive(Default)]
pub struct InMemoryStore {
    policies: DashMap<Key, (PrivacyPolicy, Instant)>,
    buffers: DashMap<Key, Vec<Value>>,
    due_queue: DashMap<Key, f64>,
}

impl InMemoryStore {
    /// Builds an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn key(device_id: &str, subject_id: &str) -> Key {
        (device_id.to_string(), subject_id.to_string())
    }
}

#[async_trait]
impl CacheStore for InMemoryStore {
    async fn get_policy(
        &self,
        device_id: &str,
        subject_id: &str,
    ) -> Result<Option<PrivacyPolicy>, GatewayError> {
        let key = Self::key(device_id, subject_id);
        let Some(entry) = self.policies.get(&key) else {
            return Ok(None);
        };
        let (policy, expires_at) = entry.value().clone();
        if Instant::now() >= expires_at {
            drop(entry);
            self.policies.remove(&key);
            return Ok(None);
        }
        Ok(Some(policy))
    }

    async fn set_policy(
        &self,
        device_id: &str,
        subject_id: &str,
        policy: &PrivacyPolicy,
        ttl: Duration,
    ) -> Result<(), GatewayError> {
        let key = Self::key(device_id, subject_id);
        self.policies
            .insert(key, (policy.clone(), Instant::now() + ttl));
        Ok(())
    }

    async fn invalidate_policy(
        &self,
        device_id: &str,
        subject_id: &str,
    ) -> Result<(), GatewayError> {
        self.policies.remove(&Self::key(device_id, subject_id));
        Ok(())
    }

    async fn append_point(
        &self,
        device_id: &str,
        subject_id: &str,
        point: &Value,
    ) -> Result<(), GatewayError> {
        let key = Self::key(device_id, subject_id);
        // New items are prepended, matching the FIFO-via-LPUSH contract.
        self.buffers.entry(key).or_default().insert(0, point.clone());
        Ok(())
    }

    async fn drain_points(
        &self,
        device_id: &str,
        subject_id: &str,
    ) -> Result<Vec<Value>, GatewayError> {
        let key = Self::key(device_id, subject_id);
        let mut points = self.buffers.remove(&key).map(|(_, v)| v).unwrap_or_default();
        // Stored newest-first (prepend); drain returns oldest-first.
        points.reverse();
        Ok(points)
    }

    async fn schedule(
        &self,
        device_id: &str,
        subject_id: &str,
        due_at: f64,
    ) -> Result<(), GatewayError> {
        self.due_queue.insert(Self::key(device_id, subject_id), due_at);
        Ok(())
    }

    async fn pop_due(&self, now: f64) -> Result<Vec<(String, String)>, GatewayError> {
        let candidates: Vec<Key> = self
            .due_queue
            .iter()
            .filter(|entry| *entry.value() <= now)
            .map(|entry| entry.key().clone())
            .collect();

        let mut due = Vec::with_capacity(candidates.len());
        for key in candidates {
            let removed = self.due_queue.remove_if(&key, |_, score| *score <= now);
            if removed.is_some() {
                due.push(key);
            }
        }
        Ok(due)
    }
}
