// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Ingest handler: turns one inbound device-data message into a resolved
//! policy, a strategy dispatch, and either a publish or an accumulation.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{
    broker::Publisher,
    mgc::ConsentClient,
    policy::{self, PrivacyPolicy},
    store::CacheStore,
    strategies::{self, ExecuteCtx},
};

fn now_unix() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Resolves the policy for `(device_id, subject_id)` via cache-then-fetch.
/// On a fresh fetch, also performs the kickstart scheduling rule for
/// accumulated strategies. Returns `None` if the cache misses and the
/// consent service has no record (the message is then dropped by the
/// caller).
async fn resolve_policy(
    store: &(dyn CacheStore + Send + Sync),
    consent: &ConsentClient,
    device_id: &str,
    subject_id: &str,
    cache_ttl: Duration,
) -> Option<PrivacyPolicy> {
    match store.get_policy(device_id, subject_id).await {
        Ok(Some(policy)) => return Some(policy),
        Ok(None) => {}
        Err(err) => {
            warn!(device_id, subject_id, error = %err, "cache lookup failed, treating as miss");
        }
    }

    let policy = consent.fetch_policy(device_id, subject_id).await?;

    if let Err(err) = store.set_policy(device_id, subject_id, &policy, cache_ttl).await {
        warn!(device_id, subject_id, error = %err, "failed to cache fetched policy");
    }

    kickstart_if_accumulated(store, device_id, subject_id, &policy).await;

    Some(policy)
}

/// Schedules an initial aggregation timer when a freshly cached policy's
/// action is accumulated and carries a positive interval.
async fn kickstart_if_accumulated(
    store: &(dyn CacheStore + Send + Sync),
    device_id: &str,
    subject_id: &str,
    policy: &PrivacyPolicy,
) {
    let Some(key_str) = policy.policy_key() else {
        return;
    };
    let Ok(key) = policy::parse(key_str) else {
        return;
    };
    let Some(action) = &key.action else {
        return;
    };
    let Some(strategy) = strategies::lookup(action) else {
        return;
    };
    if !strategy.is_accumulated() {
        return;
    }
    let Some(interval) = key.interval_secs.filter(|s| *s > 0) else {
        return;
    };

    let due_at = now_unix() + interval as f64;
    if let Err(err) = store.schedule(device_id, subject_id, due_at).await {
        warn!(device_id, subject_id, error = %err, "failed to kickstart aggregation timer");
        return;
    }
    info!(device_id, subject_id, interval, "kickstarted aggregation timer");
}

/// Handles one inbound device-data message.
///
/// `topic` is the full MQTT topic the message arrived on; `device_id` is
/// extracted from its second path segment (`DATA_TOPIC` is configured as a
/// single-segment prefix, e.g. `devices`, so a device publishes under
/// `devices/{device_id}`).
pub async fn handle_data_message(
    topic: &str,
    payload: &[u8],
    store: &(dyn CacheStore + Send + Sync),
    consent: &ConsentClient,
    publisher: &(dyn Publisher + Send + Sync),
    cache_ttl: Duration,
    processed_topic: &str,
) {
    let Some(device_id) = topic.split('/').nth(1) else {
        warn!(topic, "data topic has no device-id segment, dropping");
        return;
    };

    let body: Value = match serde_json::from_slice(payload) {
        Ok(v) => v,
        Err(err) => {
            warn!(device_id, error = %err, "data payload is not valid JSON, dropping");
            return;
        }
    };

    let Some(subject_id) = body.get("titular_id").and_then(Value::as_str) else {
        warn!(device_id, "data payload missing titular_id, dropping");
        return;
    };

    let Some(policy) = resolve_policy(store, consent, device_id, subject_id, cache_ttl).await else {
        debug!(device_id, subject_id, "no policy resolved, dropping message");
        return;
    };

    let Some(key_str) = policy.policy_key() else {
        warn!(device_id, subject_id, "policy has no policy key, dropping");
        return;
    };
    let key = match policy::parse(key_str) {
        Ok(k) => k,
        Err(err) => {
            warn!(device_id, subject_id, error = %err, "malformed policy key, dropping");
            return;
        }
    };
    let Some(action) = &key.action else {
        warn!(device_id, subject_id, "policy key has no action, dropping");
        return;
    };

    let Some(strategy) = strategies::lookup(action) else {
        warn!(device_id, subject_id, action, "unknown treatment strategy, dropping");
        return;
    };

    let ctx = ExecuteCtx {
        payload: &body,
        key: &key,
        device_id,
        subject_id,
        store,
    };

    match strategy.execute(&ctx).await {
        Ok(Some(result)) => {
            let topic = format!("{processed_topic}/{device_id}");
            if let Err(err) = publisher.publish(topic, &result).await {
                warn!(device_id, subject_id, error = %err, "failed to publish processed payload");
            }
        }
        Ok(None) => {
            debug!(device_id, subject_id, action, "strategy accumulated or dropped the point");
        }
        Err(err) => {
            warn!(device_id, subject_id, action, error = %err, "strategy execution failed");
        }
    }
}
