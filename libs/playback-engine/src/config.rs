use std::time::Duration;

use serde::Deserialize;

// ═══════════════════════════════════════════════════════════════
//  Playback Config
// ═══════════════════════════════════════════════════════════════

/// Порядок, в котором извлечённые сообщения передаются scheduler'у.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackOrder {
    /// Стабильная сортировка по timestamp: partition'ы сливаются
    /// в общий поток, порядок внутри partition сохраняется.
    #[default]
    Timestamp,
    /// Порядок прихода batch'ей от брокера, без пересортировки.
    Fetch,
}

/// Что делать с записью, которую не удалось привести к ожидаемому типу.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeFailurePolicy {
    /// Прервать извлечение с `DecodeFailure`.
    #[default]
    Fail,
    /// Залогировать и пропустить запись.
    Skip,
}

/// Параметры playback engine'а (секция `[playback]`).
#[derive(Debug, Clone, Deserialize)]
pub struct PlaybackConfig {
    /// Задержка completion task'а после последней доставки.
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
    /// Таймаут одного poll'а при извлечении.
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    /// Таймаут metadata / offsets-for-times запросов.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Максимум записей за один poll.
    #[serde(default = "default_max_poll_records")]
    pub max_poll_records: usize,
    #[serde(default)]
    pub order: PlaybackOrder,
    #[serde(default)]
    pub decode_failure: DecodeFailurePolicy,
}

fn default_grace_period_ms() -> u64 {
    100
}
fn default_poll_timeout_ms() -> u64 {
    1000
}
fn default_request_timeout_ms() -> u64 {
    5000
}
fn default_max_poll_records() -> usize {
    1000
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: default_grace_period_ms(),
            poll_timeout_ms: default_poll_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            max_poll_records: default_max_poll_records(),
            order: PlaybackOrder::default(),
            decode_failure: DecodeFailurePolicy::default(),
        }
    }
}

impl PlaybackConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let cfg: PlaybackConfig = serde_json::from_str(r#"{"order":"fetch"}"#).unwrap();
        assert_eq!(cfg.order, PlaybackOrder::Fetch);
        assert_eq!(cfg.decode_failure, DecodeFailurePolicy::Fail);
        assert_eq!(cfg.grace_period(), Duration::from_millis(100));
        assert_eq!(cfg.max_poll_records, 1000);
    }
}
