// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Aggregation scheduler: a background worker that polls the due-queue on a
//! steady tick, drains accumulated points, and publishes their aggregate.
//!
//! Missed ticks are never coalesced beyond what `pop_due` itself yields: if
//! several periods elapse while the worker slept, exactly one aggregation
//! still runs per due pair, and the next is scheduled relative to wake time
//! rather than to the original cadence. This drifting-cadence behavior is
//! intentional and must not be "fixed" by catching up missed ticks.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{broker::Publisher, mgc::ConsentClient, policy, store::CacheStore, strategies};

fn now_unix() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Runs the aggregation loop until `stop` is cancelled, sleeping `tick`
/// between polls. Cancellation is observed at the next tick boundary; an
/// in-flight tick always completes.
pub async fn run(
    store: &(dyn CacheStore + Send + Sync),
    consent: &ConsentClient,
    publisher: &(dyn Publisher + Send + Sync),
    processed_topic: &str,
    cache_ttl: Duration,
    tick: Duration,
    stop: CancellationToken,
) {
    info!("aggregation scheduler started");
    loop {
        tokio::select! {
            _ = stop.cancelled() => {
                info!("aggregation scheduler stopping");
                return;
            }
            _ = tokio::time::sleep(tick) => {
                run_tick(store, consent, publisher, processed_topic, cache_ttl, now_unix()).await;
            }
        }
    }
}

/// Runs exactly one poll-and-dispatch cycle against `now` (Unix seconds).
/// Exposed separately from [`run`] so tests can drive the scheduler against
/// a fake clock without real sleeps.
pub async fn run_tick(
    store: &(dyn CacheStore + Send + Sync),
    consent: &ConsentClient,
    publisher: &(dyn Publisher + Send + Sync),
    processed_topic: &str,
    cache_ttl: Duration,
    now: f64,
) {
    let due = match store.pop_due(now).await {
        Ok(due) => due,
        Err(err) => {
            warn!(error = %err, "pop_due failed, skipping this tick");
            return;
        }
    };

    for (device_id, subject_id) in due {
        process_due_pair(store, consent, publisher, processed_topic, cache_ttl, now, &device_id, &subject_id).await;
    }
}

async fn process_due_pair(
    store: &(dyn CacheStore + Send + Sync),
    consent: &ConsentClient,
    publisher: &(dyn Publisher + Send + Sync),
    processed_topic: &str,
    cache_ttl: Duration,
    now: f64,
    device_id: &str,
    subject_id: &str,
) {
    let policy = match store.get_policy(device_id, subject_id).await {
        Ok(Some(policy)) => policy,
        Ok(None) => match consent.fetch_policy(device_id, subject_id).await {
            Some(policy) => {
                if let Err(err) = store.set_policy(device_id, subject_id, &policy, cache_ttl).await {
                    warn!(device_id, subject_id, error = %err, "failed to cache refetched policy");
                }
                policy
            }
            None => {
                debug!(device_id, subject_id, "no policy on scheduled wake, dropping task");
                return;
            }
        },
        Err(err) => {
            warn!(device_id, subject_id, error = %err, "policy lookup failed, dropping task");
            return;
        }
    };

    let Some(key_str) = policy.policy_key() else {
        debug!(device_id, subject_id, "policy has no policy key, dropping task");
        return;
    };
    let Ok(key) = policy::parse(key_str) else {
        warn!(device_id, subject_id, "malformed policy key on scheduled wake, dropping task");
        return;
    };
    let Some(action) = &key.action else {
        debug!(device_id, subject_id, "policy key has no action, dropping task");
        return;
    };

    let Some(strategy) = strategies::lookup(action) else {
        debug!(device_id, subject_id, action, "strategy no longer registered, dropping task");
        return;
    };
    if !strategy.is_accumulated() {
        debug!(device_id, subject_id, action, "policy is no longer accumulated, dropping task");
        return;
    }

    let points = match store.drain_points(device_id, subject_id).await {
        Ok(points) => points,
        Err(err) => {
            warn!(device_id, subject_id, error = %err, "drain failed, dropping task");
            return;
        }
    };

    if points.is_empty() {
        debug!(device_id, subject_id, "no points accumulated, rescheduling without publish");
        reschedule(store, device_id, subject_id, &key, now).await;
        return;
    }

    let aggregate = strategy.aggregate(&points);
    let result = serde_json::json!({
        "dispositivo_id": device_id,
        "titular_id": subject_id,
        "value": aggregate,
    });
    let topic = format!("{processed_topic}/{device_id}");
    if let Err(err) = publisher.publish(topic, &result).await {
        warn!(device_id, subject_id, error = %err, "failed to publish aggregate");
    }

    reschedule(store, device_id, subject_id, &key, now).await;
}

async fn reschedule(
    store: &(dyn CacheStore + Send + Sync),
    device_id: &str,
    subject_id: &str,
    key: &policy::PolicyKey,
    now: f64,
) {
    let Some(interval) = key.interval_secs.filter(|s| *s > 0) else {
        debug!(device_id, subject_id, "no positive interval, not rescheduling");
        return;
    };
    let due_at = now + interval as f64;
    if let Err(err) = store.schedule(device_id, subject_id, due_at).await {
        warn!(device_id, subject_id, error = %err, "failed to reschedule aggregation timer");
        return;
    }
    info!(device_id, subject_id, interval, "rescheduled aggregation timer");
}

#[cfg(test)]
mod tests {
    use httpmock::MockServer;
    use serde_json::json;

    use super::*;
    use crate::{broker::test_support::RecordingPublisher, cfg::config::ConsentConfig, store::memory::InMemoryStore};

    fn consent_client(base_url: String) -> ConsentClient {
        ConsentClient::new(&ConsentConfig {
            base_url,
            timeout: Duration::from_secs(5),
        })
        .expect("client builds")
    }

    #[tokio::test]
    async fn aggregates_and_republishes_on_due_tick() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(httpmock::Method::GET)
                .path("/consentimentos/titular/s1");
            then.status(200).json_body(json!([{
                "dispositivo_id": "d1",
                "opcao_tratamento": { "chave_politica": "AVG::0:10S" },
            }]));
        });

        let store = InMemoryStore::new();
        store.append_point("d1", "s1", &json!(5.0)).await.expect("append");
        store.append_point("d1", "s1", &json!(15.0)).await.expect("append");
        store.append_point("d1", "s1", &json!(10.0)).await.expect("append");
        store.schedule("d1", "s1", 1_000.0).await.expect("schedule");

        let consent = consent_client(server.base_url());
        let publisher = RecordingPublisher::default();

        run_tick(&store, &consent, &publisher, "out", Duration::from_secs(300), 1_011.0).await;

        let published = publisher.published.lock().expect("mutex");
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "out/d1");
        assert_eq!(
            published[0].1,
            json!({"dispositivo_id": "d1", "titular_id": "s1", "value": 10.0})
        );
        drop(published);

        assert!(store.drain_points("d1", "s1").await.expect("drain").is_empty());
        let due = store.pop_due(1_100.0).await.expect("pop");
        assert_eq!(due, vec![("d1".to_string(), "s1".to_string())]);
    }

    #[tokio::test]
    async fn empty_buffer_reschedules_without_publishing() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(httpmock::Method::GET)
                .path("/consentimentos/titular/s1");
            then.status(200).json_body(json!([{
                "dispositivo_id": "d1",
                "opcao_tratamento": { "chave_politica": "AVG::0:10S" },
            }]));
        });

        let store = InMemoryStore::new();
        store.schedule("d1", "s1", 1_000.0).await.expect("schedule");

        let consent = consent_client(server.base_url());
        let publisher = RecordingPublisher::default();

        run_tick(&store, &consent, &publisher, "out", Duration::from_secs(300), 1_005.0).await;

        assert!(publisher.published.lock().expect("mutex").is_empty());
        let due = store.pop_due(1_100.0).await.expect("pop");
        assert_eq!(due, vec![("d1".to_string(), "s1".to_string())]);
    }

    #[tokio::test]
    async fn sleeping_past_multiple_periods_fires_exactly_once() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(httpmock::Method::GET)
                .path("/consentimentos/titular/s1");
            then.status(200).json_body(json!([{
                "dispositivo_id": "d1",
                "opcao_tratamento": { "chave_politica": "AVG::0:10S" },
            }]));
        });

        let store = InMemoryStore::new();
        store.append_point("d1", "s1", &json!(2.0)).await.expect("append");
        store.schedule("d1", "s1", 1_000.0).await.expect("schedule");

        let consent = consent_client(server.base_url());
        let publisher = RecordingPublisher::default();

        // Five periods elapsed since the due time; still exactly one run.
        run_tick(&store, &consent, &publisher, "out", Duration::from_secs(300), 1_050.0).await;

        assert_eq!(publisher.published.lock().expect("mutex").len(), 1);
    }
}
