// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! End-to-end scenarios driving the ingest handler and scheduler directly
//! against the in-memory store fake, without a live broker/Redis/HTTP
//! stack.

use std::time::Duration;

use httpmock::{Method::GET, MockServer};
use privaline_gateway::{
    broker::test_support::RecordingPublisher, cfg::config::ConsentConfig, ingest, mgc::ConsentClient,
    notifications, scheduler, store::{CacheStore, memory::InMemoryStore},
};
use serde_json::json;

fn consent_client(base_url: String) -> ConsentClient {
    ConsentClient::new(&ConsentConfig {
        base_url,
        timeout: Duration::from_secs(5),
    })
    .expect("client builds")
}

fn mock_policy(server: &MockServer, subject_id: &str, device_id: &str, policy_key: &str) {
    server.mock(|when, then| {
        when.method(GET).path(format!("/consentimentos/titular/{subject_id}"));
        then.status(200).json_body(json!([{
            "dispositivo_id": device_id,
            "opcao_tratamento": { "chave_politica": policy_key },
        }]));
    });
}

#[tokio::test]
async fn scenario_1_raw_forwarding() {
    let server = MockServer::start();
    mock_policy(&server, "s1", "d1", "RAW");
    let store = InMemoryStore::new();
    let consent = consent_client(server.base_url());
    let publisher = RecordingPublisher::default();

    let payload = json!({"dispositivo_id": "d1", "titular_id": "s1", "value": 42});
    ingest::handle_data_message(
        "devices/d1",
        payload.to_string().as_bytes(),
        &store,
        &consent,
        &publisher,
        Duration::from_secs(300),
        "out",
    )
    .await;

    let published = publisher.published.lock().expect("mutex");
    assert_eq!(published.len(), 1);
    assert_eq!(published[0], ("out/d1".to_string(), payload));
}

#[tokio::test]
async fn scenario_2_gnoise_zero_sigma() {
    let server = MockServer::start();
    mock_policy(&server, "s1", "d1", "GNOISE:sigma=0");
    let store = InMemoryStore::new();
    let consent = consent_client(server.base_url());
    let publisher = RecordingPublisher::default();

    let payload = json!({"dispositivo_id": "d1", "titular_id": "s1", "value": 10, "label": "x"});
    ingest::handle_data_message(
        "devices/d1",
        payload.to_string().as_bytes(),
        &store,
        &consent,
        &publisher,
        Duration::from_secs(300),
        "out",
    )
    .await;

    let published = publisher.published.lock().expect("mutex");
    assert_eq!(published.len(), 1);
    let (topic, body) = &published[0];
    assert_eq!(topic, "out/d1");
    assert_eq!(body.get("value").and_then(|v| v.as_f64()), Some(10.0));
    assert_eq!(body.get("label"), Some(&json!("x")));
}

#[tokio::test]
async fn scenario_3_avg_first_point() {
    let server = MockServer::start();
    mock_policy(&server, "s1", "d1", "AVG::0:10S");
    let store = InMemoryStore::new();
    let consent = consent_client(server.base_url());
    let publisher = RecordingPublisher::default();

    let before = now_unix();
    let payload = json!({"dispositivo_id": "d1", "titular_id": "s1", "value": 5});
    ingest::handle_data_message(
        "devices/d1",
        payload.to_string().as_bytes(),
        &store,
        &consent,
        &publisher,
        Duration::from_secs(300),
        "out",
    )
    .await;

    assert!(publisher.published.lock().expect("mutex").is_empty());

    let buffered = store.drain_points("d1", "s1").await.expect("drain");
    assert_eq!(buffered, vec![json!(5.0)]);

    let due = store.pop_due(before + 10.5).await.expect("pop");
    assert_eq!(due, vec![("d1".to_string(), "s1".to_string())]);
}

#[tokio::test]
async fn scenario_4_avg_aggregation_after_tick() {
    let server = MockServer::start();
    mock_policy(&server, "s1", "d1", "AVG::0:10S");
    let store = InMemoryStore::new();
    let consent = consent_client(server.base_url());
    let publisher = RecordingPublisher::default();

    let t0 = 1_000.0;
    let payload = |value: i64| json!({"dispositivo_id": "d1", "titular_id": "s1", "value": value});

    // First point: kickstarts the timer.
    ingest::handle_data_message(
        "devices/d1",
        payload(5).to_string().as_bytes(),
        &store,
        &consent,
        &publisher,
        Duration::from_secs(300),
        "out",
    )
    .await;
    // Two more points accumulate without publishing.
    store.append_point("d1", "s1", &json!(15.0)).await.expect("append");
    store.append_point("d1", "s1", &json!(10.0)).await.expect("append");

    // Force the due-queue entry to a known time so the clock advance below
    // is deterministic regardless of wall-clock skew from the kickstart.
    store.schedule("d1", "s1", t0).await.expect("force due time");

    scheduler::run_tick(&store, &consent, &publisher, "out", Duration::from_secs(300), t0 + 11.0).await;

    let published = publisher.published.lock().expect("mutex");
    assert_eq!(published.len(), 1);
    assert_eq!(
        published[0],
        ("out/d1".to_string(), json!({"dispositivo_id": "d1", "titular_id": "s1", "value": 10.0}))
    );
    drop(published);

    assert!(store.drain_points("d1", "s1").await.expect("drain").is_empty());
    let due = store.pop_due(t0 + 100.0).await.expect("pop");
    assert_eq!(due, vec![("d1".to_string(), "s1".to_string())]);
}

#[tokio::test]
async fn scenario_5_invalidation() {
    use privaline_gateway::policy::PrivacyPolicy;

    let store = InMemoryStore::new();
    let policy = PrivacyPolicy(json!({"opcao_tratamento": {"chave_politica": "RAW"}}));
    store
        .set_policy("d1", "s1", &policy, Duration::from_secs(300))
        .await
        .expect("set");

    let notification = json!({"dispositivo_id": "d1", "titular_id": "s1"});
    notifications::handle_notification(notification.to_string().as_bytes(), &store).await;

    assert_eq!(store.get_policy("d1", "s1").await.expect("get"), None);
}

#[tokio::test]
async fn scenario_6_unknown_strategy() {
    let server = MockServer::start();
    mock_policy(&server, "s1", "d1", "DROP");
    let store = InMemoryStore::new();
    let consent = consent_client(server.base_url());
    let publisher = RecordingPublisher::default();

    let payload = json!({"dispositivo_id": "d1", "titular_id": "s1", "value": 1});
    ingest::handle_data_message(
        "devices/d1",
        payload.to_string().as_bytes(),
        &store,
        &consent,
        &publisher,
        Duration::from_secs(300),
        "out",
    )
    .await;

    assert!(publisher.published.lock().expect("mutex").is_empty());
    assert!(store.drain_points("d1", "s1").await.expect("drain").is_empty());
}

fn now_unix() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock is after the epoch")
        .as_secs_f64()
}
