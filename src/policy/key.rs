// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Decodes the compact policy-key string into a structured record.
//!
//! Canonical textual form: `ACTION[:k1=v1,k2=v2[:WINDOW[:INTERVAL]]]`.
//! Colons separate the four positional fields, commas separate params, and
//! `=` separates a param name from its value within a param.

use std::collections::HashMap;

use thiserror::Error;

/// A scalar parameter value: numeric when the raw string parses as a float,
/// text otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    /// Parsed as a floating-point number.
    Number(f64),
    /// Left as-is; did not parse as a number.
    Text(String),
}

impl ParamValue {
    /// The numeric value, if this param parsed as a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Number(n) => Some(*n),
            ParamValue::Text(_) => None,
        }
    }
}

/// A parsed policy key: action, params, reserved window, and the
/// accumulation interval normalized to whole seconds.
///
/// `interval_secs` is normalized at parse time (see the open-question
/// resolution in the design notes) so downstream consumers never re-parse a
/// duration string — the scheduler and the kickstart path use the integer
/// directly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyKey {
    /// Uppercased action tag, e.g. `RAW`, `GNOISE`, `AVG`. `None` only for
    /// the empty-input sentinel.
    pub action: Option<String>,
    /// Named parameters, numeric when parseable.
    pub params: HashMap<String, ParamValue>,
    /// Reserved; not consumed by any built-in strategy.
    pub window: Option<i64>,
    /// Accumulation interval, normalized to seconds.
    pub interval_secs: Option<u64>,
}

impl PolicyKey {
    /// The sigma parameter as a float, defaulting to `1.0` when absent or
    /// when present but not numeric (matches GNOISE's coercion-failure
    /// fallback).
    pub fn sigma_or_default(&self) -> f64 {
        self.params
            .get("sigma")
            .and_then(ParamValue::as_f64)
            .unwrap_or(1.0)
    }

    /// Rebuilds the canonical textual form. A left-inverse of [`parse`] for
    /// any key produced by [`parse`] itself (round-trip property).
    pub fn to_canonical(&self) -> String {
        let Some(action) = &self.action else {
            return String::new();
        };

        let mut out = action.clone();
        let has_window_or_interval = self.window.is_some() || self.interval_secs.is_some();

        if !self.params.is_empty() || has_window_or_interval {
            out.push(':');
            let mut entries: Vec<_> = self.params.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let rendered: Vec<String> = entries
                .iter()
                .map(|(k, v)| match v {
                    ParamValue::Number(n) => format!("{k}={n}"),
                    ParamValue::Text(s) => format!("{k}={s}"),
                })
                .collect();
            out.push_str(&rendered.join(","));
        }

        if has_window_or_interval {
            out.push(':');
            if let Some(w) = self.window {
                out.push_str(&w.to_string());
            }
        }

        if let Some(secs) = self.interval_secs {
            out.push(':');
            out.push_str(&format!("{secs}S"));
        }

        out
    }
}

/// Failure parsing the params section of a policy key.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyKeyError {
    /// A param chunk had no `=` separating name from value.
    #[error("malformed policy key params: chunk {0:?} has no '='")]
    MalformedParams(String),
}

/// Parses a policy-key string. An empty string yields the sentinel
/// `PolicyKey { action: None, .. }` rather than an error. A non-empty,
/// syntactically malformed params section is the only parse failure.
pub fn parse(raw: &str) -> Result<PolicyKey, PolicyKeyError> {
    if raw.is_empty() {
        return Ok(PolicyKey::default());
    }

    let parts: Vec<&str> = raw.splitn(4, ':').collect();
    let mut key = PolicyKey {
        action: Some(parts[0].trim().to_string()),
        ..Default::default()
    };

    if let Some(params_str) = parts.get(1).filter(|s| !s.is_empty()) {
        key.params = parse_params(params_str)?;
    }
    if let Some(window_str) = parts.get(2).filter(|s| !s.is_empty()) {
        key.window = window_str.trim().parse().ok();
    }
    if let Some(interval_str) = parts.get(3).filter(|s| !s.is_empty()) {
        key.interval_secs = parse_interval_secs(interval_str.trim());
    }

    Ok(key)
}

fn parse_params(s: &str) -> Result<HashMap<String, ParamValue>, PolicyKeyError> {
    let mut params = HashMap::new();
    for chunk in s.split(',') {
        let (name, value) = chunk
            .split_once('=')
            .ok_or_else(|| PolicyKeyError::MalformedParams(chunk.to_string()))?;
        let name = name.trim().to_string();
        let value = value.trim();
        let value = match value.parse::<f64>() {
            Ok(n) => ParamValue::Number(n),
            Err(_) => ParamValue::Text(value.to_string()),
        };
        params.insert(name, value);
    }
    Ok(params)
}

/// Parses a duration string of the form `<N>[S|M|H]` (case-insensitive) into
/// whole seconds. Returns `None` for anything that isn't digits followed by
/// one of those unit suffixes. `"0S"` parses to `Some(0)`; callers treat a
/// zero or absent interval as "do not schedule".
pub fn parse_interval_secs(s: &str) -> Option<u64> {
    let upper = s.to_ascii_uppercase();
    let (digits, multiplier) = match upper.as_bytes() {
        [.., b'S'] => (&upper[..upper.len() - 1], 1u64),
        [.., b'M'] => (&upper[..upper.len() - 1], 60u64),
        [.., b'H'] => (&upper[..upper.len() - 1], 3600u64),
        _ => return None,
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<u64>().ok()?.checked_mul(multiplier)
}
