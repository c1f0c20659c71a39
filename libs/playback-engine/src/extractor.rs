use std::collections::HashMap;
use std::time::Duration;

use serde::de::DeserializeOwned;

use playback_api::{
    BrokerContext, EndOffset, LogConsumer, OffsetMap, PartitionOffsetBound, TimedMessage,
};

use crate::config::{DecodeFailurePolicy, PlaybackConfig};
use crate::resolver::LogRangeResolver;
use crate::PlaybackError;

// ═══════════════════════════════════════════════════════════════
//  BoundedExtractor
// ═══════════════════════════════════════════════════════════════

/// Читает partition'ы topic'а от start offset'ов до end offset'ов.
///
/// Завершается, когда все partition'ы пересекли свою верхнюю границу,
/// либо на первом пустом poll'е, смотря что наступит раньше. Второе
/// условие ограничивает время ожидания на разреженных topic'ах ценой
/// возможного недочитывания хвоста окна.
#[derive(Debug, Clone, Copy)]
pub struct BoundedExtractor {
    max_poll_records: usize,
    poll_timeout: Duration,
    decode_failure: DecodeFailurePolicy,
}

impl BoundedExtractor {
    pub fn new(max_poll_records: usize, poll_timeout: Duration, decode_failure: DecodeFailurePolicy) -> Self {
        Self {
            max_poll_records: max_poll_records.max(1),
            poll_timeout,
            decode_failure,
        }
    }

    pub fn from_config(config: &PlaybackConfig) -> Self {
        Self::new(config.max_poll_records, config.poll_timeout(), config.decode_failure)
    }

    /// Извлечь записи окна, декодируя value в `T`.
    ///
    /// Порядок результата: порядок прихода batch'ей; слияния
    /// partition'ов по timestamp здесь нет.
    pub fn extract<T: DeserializeOwned>(
        &self,
        consumer: &mut dyn LogConsumer,
        topic: &str,
        start: &OffsetMap,
        end: &OffsetMap,
    ) -> Result<Vec<TimedMessage<T>>, PlaybackError> {
        let bounds = PartitionOffsetBound::from_offsets(start, end);

        // Partition'ы без start offset'а не назначаются вовсе.
        let mut active: HashMap<i32, EndOffset> = HashMap::new();
        let mut positions = Vec::new();
        for bound in &bounds {
            if let Some(offset) = bound.start {
                positions.push((bound.partition, offset));
                active.insert(bound.partition, bound.end);
            }
        }
        if positions.is_empty() {
            tracing::info!(topic, "no partition has data in the window");
            return Ok(Vec::new());
        }

        consumer
            .assign(topic, &positions)
            .map_err(|e| PlaybackError::unavailable(topic, e))?;

        let mut messages = Vec::new();
        while !active.is_empty() {
            let batch = consumer
                .poll(self.max_poll_records, self.poll_timeout)
                .map_err(|e| PlaybackError::Broker(e.with_context(format!("poll '{topic}'"))))?;
            if batch.is_empty() {
                tracing::debug!(
                    topic,
                    pending = ?active.keys().collect::<Vec<_>>(),
                    "caught up before every partition reached its end offset"
                );
                break;
            }

            for record in batch {
                let Some(end) = active.get(&record.partition).copied() else {
                    continue;
                };
                if !end.admits(record.offset) {
                    active.remove(&record.partition);
                    continue;
                }
                // value мог не разобраться ещё на стороне брокера
                let decoded = record
                    .value
                    .and_then(|value| serde_json::from_value::<T>(value).map_err(|e| e.to_string()));
                match decoded {
                    Ok(payload) => messages.push(TimedMessage::new(record.timestamp_ms, payload)),
                    Err(detail) => match self.decode_failure {
                        DecodeFailurePolicy::Fail => {
                            return Err(PlaybackError::DecodeFailure {
                                topic: topic.to_string(),
                                partition: record.partition,
                                offset: record.offset,
                                expected: std::any::type_name::<T>(),
                                detail,
                            });
                        }
                        DecodeFailurePolicy::Skip => {
                            tracing::warn!(
                                topic,
                                partition = record.partition,
                                offset = record.offset,
                                error = %detail,
                                "skipping undecodable record"
                            );
                        }
                    },
                }
            }

            if let Err(e) = consumer.commit_async() {
                tracing::warn!(topic, error = %e, "offset commit failed");
            }
        }

        Ok(messages)
    }
}

/// Resolve + extract окна `[start_ms, end_ms]` одним свежим consumer'ом.
///
/// Блокирующая: вызывать из `spawn_blocking`. Consumer закрывается
/// при любом исходе.
pub fn find_messages_between<T: DeserializeOwned>(
    broker: &BrokerContext,
    config: &PlaybackConfig,
    topic: &str,
    start_ms: i64,
    end_ms: i64,
) -> Result<Vec<TimedMessage<T>>, PlaybackError> {
    let mut consumer = broker
        .consumers
        .create_consumer()
        .map_err(|e| PlaybackError::unavailable(topic, e))?;

    let resolver = LogRangeResolver::new(config.request_timeout());
    let extractor = BoundedExtractor::from_config(config);
    let result = resolver
        .resolve_window(consumer.as_mut(), topic, start_ms, end_ms)
        .and_then(|(start, end)| extractor.extract(consumer.as_mut(), topic, &start, &end));

    consumer.close();
    tracing::info!(topic, "closed source consumer");

    if let Ok(messages) = &result {
        tracing::info!(topic, count = messages.len(), "found messages");
    }
    result
}
