//! Pluggable treatment strategies and the runtime registry that dispatches a
//! parsed [`PolicyKey`] action to one.
//!
//! Adding a strategy is a registration-only change — the registry is a
//! runtime map keyed by action tag, not a closed compile-time enum, so a new
//! `Strategy` impl needs no changes anywhere else in this module.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

pub mod avg;
pub mod gnoise;
pub mod raw;

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde_json::Value;

use crate::{error::GatewayError, policy::PolicyKey, store::CacheStore};

/// Everything a strategy needs to process one inbound data point.
pub struct ExecuteCtx<'a> {
    /// The raw JSON payload published by the device.
    pub payload: &'a Value,
    /// The parsed policy key selecting this strategy and its params.
    pub key: &'a PolicyKey,
    pub device_id: &'a str,
    pub subject_id: &'a str,
    pub store: &'a (dyn CacheStore + Send + Sync),
}

/// A pluggable data-treatment strategy.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Processes one inbound point. `Ok(None)` means "nothing to forward
    /// right now" — either the point was accumulated for later aggregation,
    /// or the strategy chose to drop it.
    async fn execute(&self, ctx: &ExecuteCtx<'_>) -> Result<Option<Value>, GatewayError>;

    /// Whether this strategy accumulates points instead of forwarding them
    /// immediately. Accumulated strategies must also implement
    /// [`Strategy::aggregate`] and are driven by the scheduler, not just the
    /// ingest path.
    fn is_accumulated(&self) -> bool {
        false
    }

    /// Reduces a drained buffer of accumulated points to the published
    /// aggregate. Only called on strategies where [`Strategy::is_accumulated`]
    /// returns `true`.
    fn aggregate(&self, _points: &[Value]) -> Value {
        Value::Null
    }
}

static REGISTRY: Lazy<HashMap<&'static str, Arc<dyn Strategy>>> = Lazy::new(|| {
    let mut map: HashMap<&'static str, Arc<dyn Strategy>> = HashMap::new();
    map.insert("RAW", Arc::new(raw::RawStrategy));
    map.insert("GNOISE", Arc::new(gnoise::GaussianNoiseStrategy));
    map.insert("AVG", Arc::new(avg::AverageStrategy));
    map
});

/// Looks up the strategy registered for `action` (case-insensitive).
pub fn lookup(action: &str) -> Option<Arc<dyn Strategy>> {
    REGISTRY.get(action.to_ascii_uppercase().as_str()).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_actions_resolve() {
        assert!(lookup("RAW").is_some());
        assert!(lookup("gnoise").is_some());
        assert!(lookup("AVG").is_some());
    }

    #[test]
    fn unknown_action_is_none() {
        assert!(lookup("DROP").is_none());
    }
}
