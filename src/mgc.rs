// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! HTTP client for the consent-management service (MGC).
//!
//! `GET {base_url}/consentimentos/titular/{subject_id}` returns a JSON array
//! of consent records; the one whose `dispositivo_id` matches the device is
//! selected. Network failure or a non-2xx status is treated identically to
//! "no policy for this device" — the caller drops the message, it never
//! propagates as a hard error.

use serde_json::Value;
use tracing::warn;

use crate::{cfg::config::ConsentConfig, policy::PrivacyPolicy};

/// Thin wrapper around a `reqwest::Client` bound to one consent service.
pub struct ConsentClient {
    http: reqwest::Client,
    base_url: String,
}

impl ConsentClient {
    /// Builds a client from the consent-service settings in `cfg`.
    pub fn new(cfg: &ConsentConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(cfg.timeout).build()?;
        Ok(Self {
            http,
            base_url: cfg.base_url.clone(),
        })
    }

    /// Fetches the active privacy policy for `(device_id, subject_id)`.
    /// Returns `None` on any network error, non-2xx status, malformed body,
    /// or simply no matching record — callers treat all of these as a
    /// transient upstream failure; the distinction is only ever observable
    /// in the log line.
    pub async fn fetch_policy(&self, device_id: &str, subject_id: &str) -> Option<PrivacyPolicy> {
        let url = format!("{}/consentimentos/titular/{subject_id}", self.base_url);
        let response = match self.http.get(&url).send().await {
            Ok(r) => r,
            Err(err) => {
                warn!(device_id, subject_id, error = %err, "consent service request failed");
                return None;
            }
        };

        if !response.status().is_success() {
            warn!(
                device_id,
                subject_id,
                status = %response.status(),
                "consent service returned non-2xx"
            );
            return None;
        }

        let records: Vec<Value> = match response.json().await {
            Ok(r) => r,
            Err(err) => {
                warn!(device_id, subject_id, error = %err, "consent service body not decodable");
                return None;
            }
        };

        records
            .into_iter()
            .find(|record| record.get("dispositivo_id").and_then(Value::as_str) == Some(device_id))
            .map(PrivacyPolicy)
    }
}
