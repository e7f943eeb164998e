//! Typed error taxonomy for the gateway's boundary operations.
//!
//! Per-message failures (malformed JSON, missing fields, unknown strategy)
//! are *not* represented here — they are logged and the message is dropped
//! at the call site, never propagated as a `Result::Err`. This enum covers
//! failures of the external collaborators and of startup validation, where
//! the caller genuinely needs to distinguish "retry is pointless" (most
//! variants) from "the process cannot continue" (`Config`).

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use thiserror::Error;

/// Errors surfaced by the cache/accumulation store, the consent-service
/// client, the MQTT broker client, or startup configuration.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The cache/accumulation store (Redis) failed or is unreachable.
    #[error("cache/accumulation store error: {0}")]
    Store(#[from] redis::RedisError),

    /// The consent-management service could not be reached or returned an
    /// unexpected status/body.
    #[error("consent service error: {0}")]
    Upstream(String),

    /// The MQTT broker connection or publish failed.
    #[error("broker error: {0}")]
    Broker(#[from] rumqttc::ClientError),

    /// A value read back from the store did not deserialize as expected
    /// (treated like any other malformed input: logged and dropped, never
    /// fatal).
    #[error("malformed cached value: {0}")]
    Codec(#[from] serde_json::Error),

    /// Startup configuration failed validation. Fatal: the process exits.
    #[error("configuration error: {0}")]
    Config(anyhow::Error),
}
