use std::time::Duration;

use playback_api::{LogConsumer, OffsetMap};

use crate::PlaybackError;

/// Переводит wall-clock время в offset'ы partition'ов через
/// timestamp-индекс брокера.
#[derive(Debug, Clone, Copy)]
pub struct LogRangeResolver {
    timeout: Duration,
}

impl LogRangeResolver {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Для каждой partition `topic`: offset первой записи с timestamp ≥ `at_ms`,
    /// `None` если такой записи нет.
    pub fn resolve(
        &self,
        consumer: &mut dyn LogConsumer,
        topic: &str,
        at_ms: i64,
    ) -> Result<OffsetMap, PlaybackError> {
        let partitions = consumer
            .partitions_for(topic, self.timeout)
            .map_err(|e| PlaybackError::unavailable(topic, e))?;
        if partitions.is_empty() {
            return Err(PlaybackError::unavailable(topic, "no partitions"));
        }

        let offsets = consumer
            .offsets_for_times(topic, &partitions, at_ms, self.timeout)
            .map_err(|e| PlaybackError::unavailable(topic, e))?;
        tracing::debug!(topic, at_ms, ?offsets, "resolved offsets");
        Ok(offsets)
    }

    /// Границы окна `[start_ms, end_ms]`: два resolve подряд.
    pub fn resolve_window(
        &self,
        consumer: &mut dyn LogConsumer,
        topic: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<(OffsetMap, OffsetMap), PlaybackError> {
        let start = self.resolve(consumer, topic, start_ms)?;
        let end = self.resolve(consumer, topic, end_ms)?;
        Ok((start, end))
    }
}
