use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use playback_api::{LogProducer, ProducerFactory};

use crate::PlaybackError;

/// Публикует сообщения в destination topic'и.
///
/// Держит один producer на topic: создаётся лениво при первой отправке
/// (атомарный get-or-create под lock'ом shard'а) и переиспользуется
/// до `stop`.
pub struct DeliverySink {
    producers: Arc<dyn ProducerFactory>,
    channels: DashMap<String, Arc<dyn LogProducer>>,
}

impl DeliverySink {
    pub fn new(producers: Arc<dyn ProducerFactory>) -> Self {
        Self {
            producers,
            channels: DashMap::new(),
        }
    }

    /// Fire-and-forget публикация без повторов.
    pub fn send(&self, topic: &str, payload: &serde_json::Value) -> Result<(), PlaybackError> {
        let publish_failure = |source| PlaybackError::PublishFailure {
            topic: topic.to_string(),
            source,
        };

        let producer = match self.channels.entry(topic.to_string()) {
            Entry::Occupied(e) => e.get().clone(),
            Entry::Vacant(e) => {
                let producer = self.producers.create_producer().map_err(publish_failure)?;
                tracing::debug!(topic, "created producer");
                e.insert(producer.clone());
                producer
            }
        };

        producer.send(topic, None, payload).map_err(publish_failure)?;
        tracing::info!(topic, %payload, "delivered");
        Ok(())
    }

    /// Забыть producer topic'а и закрыть его. Повторный вызов: no-op.
    ///
    /// Закрытие (flush буферов) может блокировать, поэтому внутри runtime'а
    /// оно уходит на blocking пул и `stop` возвращается сразу.
    pub fn stop(&self, topic: &str) {
        let Some((_, producer)) = self.channels.remove(topic) else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let topic = topic.to_string();
                runtime.spawn_blocking(move || release(&topic, producer.as_ref()));
            }
            Err(_) => release(topic, producer.as_ref()),
        }
    }

    /// Закрыть все producer'ы (shutdown сервиса). Блокирует до конца
    /// flush'а каждого: вызывать вне worker'ов runtime'а.
    pub fn close_all(&self) {
        let topics: Vec<String> = self.channels.iter().map(|e| e.key().clone()).collect();
        for topic in topics {
            if let Some((_, producer)) = self.channels.remove(&topic) {
                release(&topic, producer.as_ref());
            }
        }
    }

    /// Число открытых producer'ов.
    pub fn open_channels(&self) -> usize {
        self.channels.len()
    }
}

fn release(topic: &str, producer: &dyn LogProducer) {
    producer.close();
    tracing::info!(topic, "released producer");
}
