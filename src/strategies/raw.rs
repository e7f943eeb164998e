// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Forwards the payload unmodified.

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    error::GatewayError,
    strategies::{ExecuteCtx, Strategy},
};

pub struct RawStrategy;

#[async_trait]
impl Strategy for RawStrategy {
    async fn execute(&self, ctx: &ExecuteCtx<'_>) -> Result<Option<Value>, GatewayError> {
        Ok(Some(ctx.payload.clone()))
    }
}
