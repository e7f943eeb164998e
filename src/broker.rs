// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Thin wrapper over the MQTT broker client.
//!
//! `rumqttc` delivers every inbound packet through a single `EventLoop`, so
//! callbacks are effectively serialized relative to each other — the ingest
//! and notification handlers never run two invocations concurrently for the
//! same broker connection. Outbound publishes go through the same
//! `AsyncClient` handle and are non-blocking best-effort hand-offs to its
//! internal queue.

use async_trait::async_trait;
use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS};
use serde_json::Value;

use crate::{cfg::config::MqttConfig, error::GatewayError};

/// Outbound channel capacity for the internal `rumqttc` request queue.
const CLIENT_CAPACITY: usize = 64;

/// Narrow publish seam the ingest handler and scheduler depend on, so both
/// can be driven in tests against a recording fake instead of a live broker.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publishes `payload` as JSON to `topic`.
    async fn publish(&self, topic: String, payload: &Value) -> Result<(), GatewayError>;
}

/// Handle to the MQTT connection: the publish/subscribe client plus the
/// event loop that must be polled (by a single owner) to drive the
/// connection and receive inbound packets.
pub struct Broker {
    pub client: AsyncClient,
    pub eventloop: EventLoop,
}

impl Broker {
    /// Opens a (not-yet-connected) client/eventloop pair for `cfg`. The
    /// actual TCP connect happens lazily on the first `eventloop.poll()`.
    pub fn connect(cfg: &MqttConfig) -> Self {
        let mut options = MqttOptions::new(cfg.client_id.clone(), cfg.host.clone(), cfg.port);
        options.set_keep_alive(cfg.keep_alive);
        let (client, eventloop) = AsyncClient::new(options, CLIENT_CAPACITY);
        Self { client, eventloop }
    }

    /// Subscribes to the notification topic and the device-data topic
    /// filter (wildcarded on its last segment, since each device publishes
    /// under its own leaf topic).
    pub async fn subscribe(&self, cfg: &MqttConfig) -> Result<(), GatewayError> {
        self.client
            .subscribe(&cfg.notifications_topic, QoS::AtLeastOnce)
            .await?;
        self.client
            .subscribe(format!("{}/+", cfg.data_topic), QoS::AtLeastOnce)
            .await?;
        Ok(())
    }

    /// A cloneable publish-only handle, independent of the event loop, for
    /// the ingest handler and scheduler to publish through.
    pub fn handle(&self) -> BrokerHandle {
        BrokerHandle(self.client.clone())
    }
}

/// A cloneable publish handle split off from [`Broker`] so the event-loop
/// owner (which needs `&mut EventLoop`) and the publishing call sites (which
/// only ever need the client) don't contend over the same struct.
#[derive(Clone)]
pub struct BrokerHandle(AsyncClient);

#[async_trait]
impl Publisher for BrokerHandle {
    async fn publish(&self, topic: String, payload: &Value) -> Result<(), GatewayError> {
        let body = serde_json::to_vec(payload)?;
        self.0.publish(topic, QoS::AtLeastOnce, false, body).await?;
        Ok(())
    }
}

/// [`Publisher`] fake that records publishes instead of sending them
/// anywhere. Not `cfg(test)`-gated so the integration test binary (which
/// links this crate as an ordinary dependency) can use it too.
pub mod test_support {
    use std::sync::Mutex;

    use super::*;

    /// Captures every publish in order.
    #[derive(Default)]
    pub struct RecordingPublisher {
        pub published: Mutex<Vec<(String, Value)>>,
    }

    #[async_trait]
    impl Publisher for RecordingPublisher {
        async fn publish(&self, topic: String, payload: &Value) -> Result<(), GatewayError> {
            self.published
                .lock()
                .expect("test mutex is never poisoned")
                .push((topic, payload.clone()));
            Ok(())
        }
    }
}
