// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Redis-backed `CacheStore`. Atomicity for `drain_points` and `pop_due`
//! comes from server-side Lua (`redis::Script`), not from a read followed by
//! a separate delete issued from the client.
//!
//! Key layout:
//! - `policy:{device_id}:{subject_id}` — a JSON-encoded [`PrivacyPolicy`]
//!   string with a `PEXPIRE`/`SET EX` TTL.
//! - `data:{device_id}:{subject_id}` — a list, used as a FIFO buffer via
//!   `LPUSH` (producer) and `LRANGE` + `DEL` (atomic drain).
//! - the configured due-queue key — a sorted set, member
//!   `{device_id}:{subject_id}`, score the Unix-seconds due time.
//!
//! Device and subject identifiers must not themselves contain `:`; the
//! due-queue member encoding would otherwise be ambiguous to split back
//! apart.

use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use redis::{AsyncCommands, Script, aio::ConnectionManager};
use serde_json::Value;

use crate::{error::GatewayError, policy::PrivacyPolicy, store::CacheStore};

/// Atomically reads and clears a list key, returning its elements oldest
/// first. `LPUSH` stores newest-first, so `LRANGE 0 -1` comes back
/// newest-first too; the script reverses it before returning.
static DRAIN_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local items = redis.call('LRANGE', KEYS[1], 0, -1)
        redis.call('DEL', KEYS[1])
        local out = {}
        local n = #items
        for i = 1, n do
            out[i] = items[n - i + 1]
        end
        return out
        "#,
    )
});

/// Atomically returns and removes every sorted-set member whose score is
/// `<= now`.
static POP_DUE_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
        if #due > 0 then
            redis.call('ZREM', KEYS[1], unpack(due))
        end
        return due
        "#,
    )
});

/// Production `CacheStore` over a single Redis instance.
pub struct RedisStore {
    conn: ConnectionManager,
    queue_key: String,
}

impl RedisStore {
    /// Opens a connection to `url` and wraps it in an auto-reconnecting
    /// [`ConnectionManager`]. `queue_key` is the sorted-set key backing the
    /// aggregation due-queue.
    pub async fn connect(url: &str, queue_key: impl Into<String>) -> Result<Self, GatewayError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            queue_key: queue_key.into(),
        })
    }

    fn policy_key(device_id: &str, subject_id: &str) -> String {
        format!("policy:{device_id}:{subject_id}")
    }

    fn data_key(device_id: &str, subject_id: &str) -> String {
        format!("data:{device_id}:{subject_id}")
    }

    fn member(device_id: &str, subject_id: &str) -> String {
        format!("{device_id}:{subject_id}")
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get_policy(
        &self,
        device_id: &str,
        subject_id: &str,
    ) -> Result<Option<PrivacyPolicy>, GatewayError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(Self::policy_key(device_id, subject_id)).await?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    async fn set_policy(
        &self,
        device_id: &str,
        subject_id: &str,
        policy: &PrivacyPolicy,
        ttl: Duration,
    ) -> Result<(), GatewayError> {
        let mut conn = self.conn.clone();
        let raw = serde_json::to_string(policy)?;
        conn.set_ex(Self::policy_key(device_id, subject_id), raw, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn invalidate_policy(
        &self,
        device_id: &str,
        subject_id: &str,
    ) -> Result<(), GatewayError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(Self::policy_key(device_id, subject_id)).await?;
        Ok(())
    }

    async fn append_point(
        &self,
        device_id: &str,
        subject_id: &str,
        point: &Value,
    ) -> Result<(), GatewayError> {
        let mut conn = self.conn.clone();
        let raw = serde_json::to_string(point)?;
        conn.lpush::<_, _, ()>(Self::data_key(device_id, subject_id), raw).await?;
        Ok(())
    }

    async fn drain_points(
        &self,
        device_id: &str,
        subject_id: &str,
    ) -> Result<Vec<Value>, GatewayError> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = DRAIN_SCRIPT
            .key(Self::data_key(device_id, subject_id))
            .invoke_async(&mut conn)
            .await?;
        raw.iter()
            .map(|s| serde_json::from_str(s).map_err(GatewayError::from))
            .collect()
    }

    async fn schedule(
        &self,
        device_id: &str,
        subject_id: &str,
        due_at: f64,
    ) -> Result<(), GatewayError> {
        let mut conn = self.conn.clone();
        conn.zadd::<_, _, _, ()>(&self.queue_key, Self::member(device_id, subject_id), due_at)
            .await?;
        Ok(())
    }

    async fn pop_due(&self, now: f64) -> Result<Vec<(String, String)>, GatewayError> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = POP_DUE_SCRIPT
            .key(&self.queue_key)
            .arg(now)
            .invoke_async(&mut conn)
            .await?;
        Ok(members
            .iter()
            .filter_map(|m| m.split_once(':'))
            .map(|(d, s)| (d.to_string(), s.to_string()))
            .collect())
    }
}
