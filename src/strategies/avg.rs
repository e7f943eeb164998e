// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Accumulates the payload's `value` field for later aggregation. Never
//! forwards a point itself — the scheduler drains the buffer on the policy's
//! interval and publishes the mean.

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::{
    error::GatewayError,
    strategies::{ExecuteCtx, Strategy},
};

pub struct AverageStrategy;

#[async_trait]
impl Strategy for AverageStrategy {
    async fn execute(&self, ctx: &ExecuteCtx<'_>) -> Result<Option<Value>, GatewayError> {
        let Some(value) = ctx.payload.get("value").and_then(Value::as_f64) else {
            warn!(
                device_id = ctx.device_id,
                subject_id = ctx.subject_id,
                "AVG: payload has no numeric 'value' field, dropping point"
            );
            return Ok(None);
        };

        ctx.store
            .append_point(ctx.device_id, ctx.subject_id, &serde_json::json!(value))
            .await?;
        Ok(None)
    }

    fn is_accumulated(&self) -> bool {
        true
    }

    fn aggregate(&self, points: &[Value]) -> Value {
        let numbers: Vec<f64> = points.iter().filter_map(Value::as_f64).collect();
        if numbers.is_empty() {
            return Value::Null;
        }
        let mean = numbers.iter().sum::<f64>() / numbers.len() as f64;
        serde_json::json!(mean)
    }
}
