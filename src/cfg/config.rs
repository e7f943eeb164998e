// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{env, str::FromStr, time::Duration};

use anyhow::{Context, Result, ensure};

/// Everything the gateway needs to talk to the consent service, the
/// cache/accumulation store, and the MQTT broker, plus the ambient knobs
/// (log level/format, scheduler cadence) that have no RFC-mandated source
/// and simply default sanely.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Consent-management service (MGC) HTTP client settings.
    pub consent: ConsentConfig,
    /// Cache + accumulation store (Redis) settings.
    pub store: StoreConfig,
    /// MQTT broker connection and topic settings.
    pub mqtt: MqttConfig,
    /// Aggregation scheduler cadence.
    pub scheduler: SchedulerConfig,
    /// Logging knobs.
    pub logging: LoggingConfig,
}

/// Consent-management service (MGC) HTTP client settings.
#[derive(Debug, Clone)]
pub struct ConsentConfig {
    /// Base URL, e.g. `https://mgc.example.org`.
    pub base_url: String,
    /// Request timeout.
    pub timeout: Duration,
}

/// Cache + accumulation store (Redis) settings.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Redis host.
    pub host: String,
    /// Redis port.
    pub port: u16,
    /// TTL applied to cached `policy:{device}:{subject}` entries.
    pub cache_ttl: Duration,
    /// Sorted-set key holding the due-queue of aggregation tasks.
    pub aggregation_queue_key: String,
}

impl StoreConfig {
    /// `redis://host:port` connection string.
    pub fn connection_url(&self) -> String {
        format!("redis://{}:{}", self.host, self.port)
    }
}

/// MQTT broker connection and topic settings.
#[derive(Debug, Clone)]
pub struct MqttConfig {
    /// Broker host.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Client id advertised on CONNECT.
    pub client_id: String,
    /// Keep-alive interval.
    pub keep_alive: Duration,
    /// Inbound notifications topic (`TOPICO_NOTIFICACOES_MGC`).
    pub notifications_topic: String,
    /// Inbound device-data topic filter (`TOPICO_DADOS_DISPOSITIVOS`).
    pub data_topic: String,
    /// Outbound processed-data topic prefix (`TOPICO_DADOS_PROCESSADOS`).
    pub processed_topic: String,
}

/// Aggregation scheduler cadence.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often the scheduler polls the due-queue.
    pub tick: Duration,
}

/// Output format for the logging layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, ANSI-colored output for local runs.
    Pretty,
    /// One JSON object per line, for shipped deployments.
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "" => Ok(LogFormat::Pretty),
            other => Err(anyhow::anyhow!("unknown LOG_FORMAT: {other}")),
        }
    }
}

/// Logging knobs.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Base level passed to `EnvFilter` when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl GatewayConfig {
    /// Loads configuration from the process environment, applying a `.env`
    /// file (if present) first. Required keys missing or malformed cause an
    /// error; ambient keys fall back to their documented defaults.
    pub fn from_env() -> Result<Self> {
        // Best effort: local/dev runs may keep secrets in a `.env` file.
        // Deployments are expected to set the real environment directly.
        let _ = dotenvy::dotenv();

        let mut cfg = GatewayConfig {
            consent: ConsentConfig {
                base_url: require_env("MGC_API_URL")?,
                timeout: Duration::from_secs(optional_env("MGC_TIMEOUT_SECS", 5)?),
            },
            store: StoreConfig {
                host: require_env("REDIS_HOST")?,
                port: parse_env("REDIS_PORT")?,
                cache_ttl: Duration::from_secs(parse_env("CACHE_TTL_TIME")?),
                aggregation_queue_key: require_env("AGGREGATION_TASK_QUEUE")?,
            },
            mqtt: MqttConfig {
                host: require_env("MQTT_HOST")?,
                port: parse_env("MQTT_PORT")?,
                client_id: optional_env_string("MQTT_CLIENT_ID", "privaline-gateway"),
                keep_alive: Duration::from_secs(optional_env(
                    "MQTT_KEEPALIVE_SECS",
                    30,
                )?),
                notifications_topic: require_env("TOPICO_NOTIFICACOES_MGC")?,
                data_topic: require_env("TOPICO_DADOS_DISPOSITIVOS")?,
                processed_topic: require_env("TOPICO_DADOS_PROCESSADOS")?,
            },
            scheduler: SchedulerConfig {
                tick: Duration::from_secs(optional_env("SCHEDULER_TICK_SECS", 2)?),
            },
            logging: LoggingConfig {
                level: optional_env_string("LOG_LEVEL", "info"),
                format: optional_env_string("LOG_FORMAT", "pretty").parse()?,
            },
        };

        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// Validates invariants that the individual field parsers can't check in
    /// isolation (cross-field relationships, non-zero durations).
    pub fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(!self.consent.base_url.is_empty(), "MGC_API_URL must not be empty");
        ensure!(!self.consent.timeout.is_zero(), "MGC_TIMEOUT_SECS must be > 0");

        ensure!(!self.store.host.is_empty(), "REDIS_HOST must not be empty");
        ensure!(!self.store.cache_ttl.is_zero(), "CACHE_TTL_TIME must be > 0");
        ensure!(
            !self.store.aggregation_queue_key.is_empty(),
            "AGGREGATION_TASK_QUEUE must not be empty"
        );

        ensure!(!self.mqtt.host.is_empty(), "MQTT_HOST must not be empty");
        ensure!(!self.mqtt.client_id.is_empty(), "MQTT_CLIENT_ID must not be empty");
        ensure!(!self.mqtt.keep_alive.is_zero(), "MQTT_KEEPALIVE_SECS must be > 0");
        ensure!(
            !self.mqtt.notifications_topic.is_empty(),
            "TOPICO_NOTIFICACOES_MGC must not be empty"
        );
        ensure!(
            !self.mqtt.data_topic.is_empty(),
            "TOPICO_DADOS_DISPOSITIVOS must not be empty"
        );
        ensure!(
            !self.mqtt.processed_topic.is_empty(),
            "TOPICO_DADOS_PROCESSADOS must not be empty"
        );
        ensure!(
            self.mqtt.processed_topic != self.mqtt.notifications_topic
                && self.mqtt.processed_topic != self.mqtt.data_topic,
            "TOPICO_DADOS_PROCESSADOS must not alias an inbound topic (feedback loop)"
        );

        ensure!(!self.scheduler.tick.is_zero(), "SCHEDULER_TICK_SECS must be > 0");

        Ok(())
    }
}

fn require_env(key: &str) -> Result<String> {
    env::var(key).with_context(|| format!("missing required environment variable {key}"))
}

fn parse_env<T>(key: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    require_env(key)?
        .parse()
        .with_context(|| format!("failed to parse environment variable {key}"))
}

fn optional_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(v) => v
            .parse()
            .with_context(|| format!("failed to parse environment variable {key}")),
        Err(_) => Ok(default),
    }
}

fn optional_env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    fn set_required_vars() {
        // SAFETY (test-only): env mutation is serialized via #[serial] below.
        unsafe {
            env::set_var("MGC_API_URL", "http://mgc.local");
            env::set_var("REDIS_HOST", "localhost");
            env::set_var("REDIS_PORT", "6379");
            env::set_var("CACHE_TTL_TIME", "300");
            env::set_var("AGGREGATION_TASK_QUEUE", "agg_queue");
            env::set_var("MQTT_HOST", "localhost");
            env::set_var("MQTT_PORT", "1883");
            env::set_var("TOPICO_NOTIFICACOES_MGC", "mgc/notifications");
            env::set_var("TOPICO_DADOS_DISPOSITIVOS", "devices");
            env::set_var("TOPICO_DADOS_PROCESSADOS", "devices/processed");
        }
    }

    #[test]
    #[serial]
    fn loads_required_fields_and_defaults() {
        set_required_vars();
        unsafe {
            env::remove_var("LOG_LEVEL");
            env::remove_var("LOG_FORMAT");
            env::remove_var("SCHEDULER_TICK_SECS");
        }

        let cfg = GatewayConfig::from_env().expect("config should load");
        assert_eq!(cfg.store.port, 6379);
        assert_eq!(cfg.scheduler.tick, Duration::from_secs(2));
        assert_eq!(cfg.logging.format, LogFormat::Pretty);
        assert_eq!(cfg.store.connection_url(), "redis://localhost:6379");
    }

    #[test]
    #[serial]
    fn rejects_missing_required_field() {
        set_required_vars();
        unsafe {
            env::remove_var("MGC_API_URL");
        }
        assert!(GatewayConfig::from_env().is_err());
        unsafe {
            env::set_var("MGC_API_URL", "http://mgc.local");
        }
    }

    #[test]
    #[serial]
    fn rejects_processed_topic_aliasing_inbound_topic() {
        set_required_vars();
        unsafe {
            env::set_var("TOPICO_DADOS_PROCESSADOS", "devices");
        }
        assert!(GatewayConfig::from_env().is_err());
        unsafe {
            env::set_var("TOPICO_DADOS_PROCESSADOS", "devices/processed");
        }
    }
}
