// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Notification handler: on each upstream invalidation message, evicts the
//! affected cache entry. Malformed payloads are logged and dropped; there is
//! no retry.

use serde_json::Value;
use tracing::{info, warn};

use crate::store::CacheStore;

/// Handles one inbound notification message.
pub async fn handle_notification(payload: &[u8], store: &(dyn CacheStore + Send + Sync)) {
    let body: Value = match serde_json::from_slice(payload) {
        Ok(v) => v,
        Err(err) => {
            warn!(error = %err, "notification payload is not valid JSON, dropping");
            return;
        }
    };

    let (Some(device_id), Some(subject_id)) = (
        body.get("dispositivo_id").and_then(Value::as_str),
        body.get("titular_id").and_then(Value::as_str),
    ) else {
        warn!("notification missing dispositivo_id/titular_id, dropping");
        return;
    };

    if let Err(err) = store.invalidate_policy(device_id, subject_id).await {
        warn!(device_id, subject_id, error = %err, "failed to invalidate cached policy");
        return;
    }
    info!(device_id, subject_id, "cached policy invalidated");
}
