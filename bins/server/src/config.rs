use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use playback_api_server::{WindowDefaults, parse_time};
use playback_engine::PlaybackConfig;

use crate::error::ServerError;

#[derive(Parser)]
#[command(name = "playback-server", about = "Сервис воспроизведения topic'ов")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Запустить сервер
    Serve(ServeArgs),
}

#[derive(Args, Clone, Debug)]
pub struct ServeArgs {
    /// Путь к TOML конфиг файлу
    #[arg(long, default_value = "config.toml", env = "CONFIG_PATH")]
    pub config: String,
}

// ---- TOML Config ----

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    #[serde(default)]
    pub playback: PlaybackConfig,
    /// Откуда читаются окна.
    #[serde(default)]
    pub source: BrokerConfig,
    /// Куда публикуются сообщения playback'ов.
    #[serde(default)]
    pub target: BrokerConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
}

fn default_api_port() -> u16 {
    9300
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// In-process лог; source и target делят один экземпляр.
    #[default]
    Memory,
    Kafka,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default)]
    pub backend: Backend,
    #[serde(default = "default_bootstrap_servers")]
    pub bootstrap_servers: String,
    /// Consumer group (используется только source стороной).
    #[serde(default = "default_group_id")]
    pub group_id: String,
}

fn default_bootstrap_servers() -> String {
    "localhost:9092".into()
}
fn default_group_id() -> String {
    "playbackService".into()
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            bootstrap_servers: default_bootstrap_servers(),
            group_id: default_group_id(),
        }
    }
}

/// Окно по умолчанию для запросов без `startTime`/`endTime`.
#[derive(Debug, Clone, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default = "default_start_time")]
    pub start_time: String,
    #[serde(default = "default_end_time")]
    pub end_time: String,
}

fn default_start_time() -> String {
    "2020-09-22T12:00:00.000+03:00".into()
}
fn default_end_time() -> String {
    "2020-09-22T15:00:00.000+03:00".into()
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            start_time: default_start_time(),
            end_time: default_end_time(),
        }
    }
}

impl DefaultsConfig {
    pub fn window(&self) -> Result<WindowDefaults, ServerError> {
        let parse = |raw: &str| {
            parse_time(raw).map_err(|detail| ServerError::Config { context: "defaults", detail })
        };
        Ok(WindowDefaults {
            start_ms: parse(&self.start_time)?,
            end_ms: parse(&self.end_time)?,
        })
    }
}

impl ServerConfig {
    pub fn load(path: &str) -> Result<Self, ServerError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config { context: "read", detail: format!("'{path}': {e}") })?;
        Self::parse(&content)
            .map_err(|e| ServerError::Config { context: "parse", detail: format!("'{path}': {e}") })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use playback_engine::PlaybackOrder;

    #[test]
    fn empty_config_takes_defaults() {
        let cfg = ServerConfig::parse("").unwrap();

        assert_eq!(cfg.api_port, 9300);
        assert_eq!(cfg.source.backend, Backend::Memory);
        assert_eq!(cfg.source.group_id, "playbackService");
        assert_eq!(cfg.playback.grace_period_ms, 100);
        assert_eq!(cfg.defaults.window().unwrap(), WindowDefaults::LEGACY);
    }

    #[test]
    fn full_config() {
        let cfg = ServerConfig::parse(
            r#"
            api_port = 8080

            [playback]
            grace_period_ms = 250
            order = "fetch"
            decode_failure = "skip"

            [source]
            backend = "kafka"
            bootstrap_servers = "kafka-a:9092"
            group_id = "replayer"

            [target]
            backend = "kafka"
            bootstrap_servers = "kafka-b:9092"

            [defaults]
            start_time = "1970-01-01T00:00:01Z"
            end_time = "5000"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.api_port, 8080);
        assert_eq!(cfg.playback.order, PlaybackOrder::Fetch);
        assert_eq!(cfg.playback.grace_period_ms, 250);
        assert_eq!(cfg.playback.poll_timeout_ms, 1000);
        assert_eq!(cfg.source.backend, Backend::Kafka);
        assert_eq!(cfg.source.group_id, "replayer");
        assert_eq!(cfg.target.bootstrap_servers, "kafka-b:9092");
        assert_eq!(
            cfg.defaults.window().unwrap(),
            WindowDefaults { start_ms: 1000, end_ms: 5000 }
        );
    }

    #[test]
    fn bad_default_window_is_a_config_error() {
        let cfg = ServerConfig::parse("[defaults]\nstart_time = \"noon\"").unwrap();
        assert!(matches!(
            cfg.defaults.window(),
            Err(ServerError::Config { context: "defaults", .. })
        ));
    }
}
