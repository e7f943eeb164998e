//! The cache + accumulation store: the single source of truth shared by the
//! ingest handler and the aggregation scheduler. The gateway itself holds no
//! authoritative in-process state beyond what this trait exposes.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// In-memory fake used by tests; same atomicity guarantees as the Redis
/// implementation, backed by sharded locks instead of server-side scripts.
pub mod memory;
/// Redis-backed implementation used in production.
pub mod redis_store;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::{error::GatewayError, policy::PrivacyPolicy};

/// Shared cache + accumulation store contract.
///
/// Implementations MUST make `drain_points` and `pop_due` atomic against
/// concurrent `append_point`/`schedule` calls respectively — a read followed
/// by an unrelated delete is not a conforming implementation.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Looks up the cached policy for `(device, subject)`.
    async fn get_policy(
        &self,
        device_id: &str,
        subject_id: &str,
    ) -> Result<Option<PrivacyPolicy>, GatewayError>;

    /// Caches `policy` for `(device, subject)` with the given TTL.
    async fn set_policy(
        &self,
        device_id: &str,
        subject_id: &str,
        policy: &PrivacyPolicy,
        ttl: Duration,
    ) -> Result<(), GatewayError>;

    /// Evicts the cached policy for `(device, subject)`. Idempotent.
    async fn invalidate_policy(
        &self,
        device_id: &str,
        subject_id: &str,
    ) -> Result<(), GatewayError>;

    /// Appends `point` to the FIFO accumulation buffer for
    /// `(device, subject)`, creating it if absent.
    async fn append_point(
        &self,
        device_id: &str,
        subject_id: &str,
        point: &Value,
    ) -> Result<(), GatewayError>;

    /// Atomically reads and clears the accumulation buffer for
    /// `(device, subject)`, returning its full ordered contents (possibly
    /// empty).
    async fn drain_points(
        &self,
        device_id: &str,
        subject_id: &str,
    ) -> Result<Vec<Value>, GatewayError>;

    /// Upserts `(device, subject)` into the due-queue at `due_at`
    /// (Unix seconds), replacing any prior entry.
    async fn schedule(
        &self,
        device_id: &str,
        subject_id: &str,
        due_at: f64,
    ) -> Result<(), GatewayError>;

    /// Atomically returns and removes every `(device, subject)` pair whose
    /// due time is `<= now` (Unix seconds).
    async fn pop_due(&self, now: f64) -> Result<Vec<(String, String)>, GatewayError>;
}
