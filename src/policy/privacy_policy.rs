// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The privacy-policy document fetched from the consent service and cached
//! verbatim. Only the nested `opcao_tratamento.chave_politica` field is
//! meaningful to the gateway; everything else is opaque and preserved
//! round-trip through the cache.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An opaque privacy-policy document. Wraps the upstream JSON body so unknown
/// fields survive a cache round-trip unmodified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrivacyPolicy(pub Value);

impl PrivacyPolicy {
    /// The nested `opcao_tratamento.chave_politica` field, if present and a
    /// string.
    pub fn policy_key(&self) -> Option<&str> {
        self.0.get("opcao_tratamento")?.get("chave_politica")?.as_str()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn extracts_nested_policy_key() {
        let policy = PrivacyPolicy(json!({
            "dispositivo_id": "d1",
            "opcao_tratamento": { "chave_politica": "RAW" },
        }));
        assert_eq!(policy.policy_key(), Some("RAW"));
    }

    #[test]
    fn missing_nested_field_yields_none() {
        let policy = PrivacyPolicy(json!({ "dispositivo_id": "d1" }));
        assert_eq!(policy.policy_key(), None);
    }

    #[test]
    fn round_trips_unknown_fields_through_json() {
        let original = json!({
            "opcao_tratamento": { "chave_politica": "AVG::0:10S" },
            "vendor_extra": { "nested": [1, 2, 3] },
        });
        let policy = PrivacyPolicy(original.clone());
        let serialized = serde_json::to_value(&policy).expect("serializes");
        assert_eq!(serialized, original);
    }
}
