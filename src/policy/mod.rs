//! The policy-key grammar and the privacy-policy document it comes from.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// Compact `ACTION[:params[:window[:interval]]]` policy-key parser.
pub mod key;
/// The opaque privacy-policy document fetched from the consent service.
pub mod privacy_policy;

pub use key::{ParamValue, PolicyKey, PolicyKeyError, parse};
pub use privacy_policy::PrivacyPolicy;
