// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Adds zero-mean Gaussian noise to every numeric field of the payload.
//! Non-numeric fields pass through untouched. `sigma` comes from the policy
//! key's `sigma` param, defaulting to `1.0` when absent or non-numeric.

use async_trait::async_trait;
use rand::rng;
use rand_distr::{Distribution, Normal};
use serde_json::{Map, Value};

use crate::{
    error::GatewayError,
    strategies::{ExecuteCtx, Strategy},
};

pub struct GaussianNoiseStrategy;

#[async_trait]
impl Strategy for GaussianNoiseStrategy {
    async fn execute(&self, ctx: &ExecuteCtx<'_>) -> Result<Option<Value>, GatewayError> {
        let sigma = ctx.key.sigma_or_default();
        // A non-positive sigma degenerates to "no noise"; Normal::new would
        // otherwise reject it.
        let normal = Normal::new(0.0, sigma.max(f64::MIN_POSITIVE)).unwrap_or(
            Normal::new(0.0, 1.0).expect("(0.0, 1.0) is always a valid normal distribution"),
        );

        let Some(obj) = ctx.payload.as_object() else {
            return Ok(Some(ctx.payload.clone()));
        };

        let mut out = Map::with_capacity(obj.len());
        let mut rng = rng();
        for (key, value) in obj {
            match value.as_f64() {
                Some(n) => {
                    let noisy = n + normal.sample(&mut rng);
                    out.insert(key.clone(), serde_json::json!(noisy));
                }
                None => {
                    out.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(Some(Value::Object(out)))
    }
}
