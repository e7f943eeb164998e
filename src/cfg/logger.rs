// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cfg::config::{LogFormat, LoggingConfig};

/// Initializes the global `tracing` subscriber.
///
/// `RUST_LOG` always wins when present; otherwise the filter falls back to
/// `cfg.level`. Output goes to stdout, either as a human-readable line per
/// event (`LogFormat::Pretty`) or one JSON object per event
/// (`LogFormat::Json`), matching what a container log collector expects.
pub fn init_logger(cfg: &LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.level))
        .context("failed to build log filter from RUST_LOG or configured level")?;

    let registry = tracing_subscriber::registry().with(env_filter);

    match cfg.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(true).with_current_span(true))
            .try_init()
            .context("failed to install JSON log subscriber")?,
        LogFormat::Pretty => registry
            .with(fmt::layer().with_target(true))
            .try_init()
            .context("failed to install pretty log subscriber")?,
    }

    Ok(())
}
