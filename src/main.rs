// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Context, Result};
use privaline_gateway::{
    cfg::{config::GatewayConfig, logger::init_logger},
    gateway,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = GatewayConfig::from_env().context("failed to load configuration")?;
    init_logger(&cfg.logging)?;

    let stop = CancellationToken::new();
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                info!("interrupt received, shutting down");
                stop.cancel();
            }
        });
    }

    gateway::run(cfg, stop).await
}
