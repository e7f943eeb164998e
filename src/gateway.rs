// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Top-level orchestrator: wires the store, consent client and broker
//! together, spawns the aggregation scheduler, and drives the MQTT event
//! loop until an operator interrupt cancels the shared stop token.

use std::{sync::Arc, time::Duration};

use rumqttc::{Event, Packet};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    broker::Broker,
    cfg::config::GatewayConfig,
    ingest,
    mgc::ConsentClient,
    notifications,
    scheduler,
    store::{CacheStore, redis_store::RedisStore},
};

/// Runs the gateway until `stop` is cancelled (e.g. from a `SIGINT`/`SIGTERM`
/// handler installed by the caller).
pub async fn run(cfg: GatewayConfig, stop: CancellationToken) -> anyhow::Result<()> {
    let store: Arc<dyn CacheStore + Send + Sync> = Arc::new(
        RedisStore::connect(&cfg.store.connection_url(), cfg.store.aggregation_queue_key.clone()).await?,
    );
    let consent = Arc::new(ConsentClient::new(&cfg.consent)?);

    let broker = Broker::connect(&cfg.mqtt);
    broker.subscribe(&cfg.mqtt).await?;
    let publisher = Arc::new(broker.handle());
    let Broker { eventloop, .. } = broker;

    let scheduler_handle = {
        let store = Arc::clone(&store);
        let consent = Arc::clone(&consent);
        let publisher = Arc::clone(&publisher);
        let processed_topic = cfg.mqtt.processed_topic.clone();
        let cache_ttl = cfg.store.cache_ttl;
        let tick = cfg.scheduler.tick;
        let stop = stop.clone();
        tokio::spawn(async move {
            scheduler::run(
                store.as_ref(),
                &consent,
                publisher.as_ref(),
                &processed_topic,
                cache_ttl,
                tick,
                stop,
            )
            .await;
        })
    };

    run_event_loop(eventloop, store, consent, publisher, &cfg, stop.clone()).await;

    stop.cancel();
    if let Err(err) = scheduler_handle.await {
        warn!(error = %err, "scheduler task panicked");
    }
    Ok(())
}

async fn run_event_loop(
    mut eventloop: rumqttc::EventLoop,
    store: Arc<dyn CacheStore + Send + Sync>,
    consent: Arc<ConsentClient>,
    publisher: Arc<crate::broker::BrokerHandle>,
    cfg: &GatewayConfig,
    stop: CancellationToken,
) {
    info!("gateway connected, entering event loop");
    loop {
        tokio::select! {
            _ = stop.cancelled() => {
                info!("gateway event loop stopping");
                return;
            }
            event = eventloop.poll() => {
                match event {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        dispatch(
                            &publish.topic,
                            &publish.payload,
                            store.as_ref(),
                            consent.as_ref(),
                            publisher.as_ref(),
                            cfg,
                        )
                        .await;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(error = %err, "mqtt event loop error, retrying");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}

async fn dispatch(
    topic: &str,
    payload: &[u8],
    store: &(dyn CacheStore + Send + Sync),
    consent: &ConsentClient,
    publisher: &crate::broker::BrokerHandle,
    cfg: &GatewayConfig,
) {
    if topic == cfg.mqtt.notifications_topic {
        notifications::handle_notification(payload, store).await;
        return;
    }

    if topic.starts_with(&format!("{}/", cfg.mqtt.data_topic)) {
        ingest::handle_data_message(
            topic,
            payload,
            store,
            consent,
            publisher,
            cfg.store.cache_ttl,
            &cfg.mqtt.processed_topic,
        )
        .await;
        return;
    }

    warn!(topic, "message on unrecognized topic, ignoring");
}
