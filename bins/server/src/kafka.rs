//! Kafka backend на `rdkafka`: блокирующий `BaseConsumer` для извлечения
//! окон и `ThreadedProducer` для доставки.

use std::sync::Arc;
use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::Message;
use rdkafka::producer::{BaseRecord, DefaultProducerContext, Producer, ThreadedProducer};
use rdkafka::{Offset, TopicPartitionList};

use playback_api::{
    BrokerError, ConsumerFactory, LogConsumer, LogProducer, LogRecord, OffsetMap, ProducerFactory,
};

const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

fn kafka_err(context: &str, e: KafkaError) -> BrokerError {
    match e.rdkafka_error_code() {
        Some(RDKafkaErrorCode::OperationTimedOut | RDKafkaErrorCode::RequestTimedOut) => {
            BrokerError::timeout(format!("{context}: {e}"))
        }
        _ => BrokerError::io(format!("{context}: {e}")),
    }
}

// ═══════════════════════════════════════════════════════════════
//  Consumer
// ═══════════════════════════════════════════════════════════════

pub struct KafkaConsumerFactory {
    config: ClientConfig,
}

impl KafkaConsumerFactory {
    pub fn new(bootstrap_servers: &str, group_id: &str) -> Self {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", bootstrap_servers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "latest")
            .set("enable.partition.eof", "false");
        Self { config }
    }

    /// Проверить конфигурацию пробным созданием клиента.
    pub fn validated(self) -> Result<Self, BrokerError> {
        drop(self.create_consumer()?);
        Ok(self)
    }
}

impl ConsumerFactory for KafkaConsumerFactory {
    fn create_consumer(&self) -> Result<Box<dyn LogConsumer>, BrokerError> {
        let consumer: BaseConsumer = self
            .config
            .create()
            .map_err(|e| BrokerError::config(format!("create consumer: {e}")))?;
        Ok(Box::new(KafkaLogConsumer {
            consumer: Some(consumer),
        }))
    }
}

pub struct KafkaLogConsumer {
    /// `None` после `close`.
    consumer: Option<BaseConsumer>,
}

impl KafkaLogConsumer {
    fn inner(&self) -> Result<&BaseConsumer, BrokerError> {
        self.consumer
            .as_ref()
            .ok_or_else(|| BrokerError::new("consumer is closed"))
    }
}

impl LogConsumer for KafkaLogConsumer {
    fn partitions_for(&mut self, topic: &str, timeout: Duration) -> Result<Vec<i32>, BrokerError> {
        let metadata = self
            .inner()?
            .fetch_metadata(Some(topic), timeout)
            .map_err(|e| kafka_err("fetch metadata", e))?;
        Ok(metadata
            .topics()
            .iter()
            .filter(|t| t.name() == topic && t.error().is_none())
            .flat_map(|t| t.partitions().iter().map(|p| p.id()))
            .collect())
    }

    fn offsets_for_times(
        &mut self,
        topic: &str,
        partitions: &[i32],
        timestamp_ms: i64,
        timeout: Duration,
    ) -> Result<OffsetMap, BrokerError> {
        let mut query = TopicPartitionList::new();
        for &partition in partitions {
            query
                .add_partition_offset(topic, partition, Offset::Offset(timestamp_ms))
                .map_err(|e| kafka_err("offsets for times", e))?;
        }

        let found = self
            .inner()?
            .offsets_for_times(query, timeout)
            .map_err(|e| kafka_err("offsets for times", e))?;

        let mut offsets: OffsetMap = partitions.iter().map(|&p| (p, None)).collect();
        for elem in found.elements_for_topic(topic) {
            if let Offset::Offset(offset) = elem.offset() {
                offsets.insert(elem.partition(), Some(offset));
            }
        }
        Ok(offsets)
    }

    fn assign(&mut self, topic: &str, positions: &[(i32, i64)]) -> Result<(), BrokerError> {
        let mut tpl = TopicPartitionList::new();
        for &(partition, offset) in positions {
            tpl.add_partition_offset(topic, partition, Offset::Offset(offset))
                .map_err(|e| kafka_err("assign", e))?;
        }
        self.inner()?.assign(&tpl).map_err(|e| kafka_err("assign", e))
    }

    fn poll(&mut self, max_records: usize, timeout: Duration) -> Result<Vec<LogRecord>, BrokerError> {
        let consumer = self.inner()?;
        let mut records = Vec::new();
        let mut wait = timeout;

        while records.len() < max_records {
            let Some(result) = consumer.poll(wait) else {
                break;
            };
            let message = result.map_err(|e| kafka_err("poll", e))?;
            match to_log_record(&message) {
                Some(record) => records.push(record),
                None => tracing::warn!(
                    topic = message.topic(),
                    partition = message.partition(),
                    offset = message.offset(),
                    "skipping record without timestamp"
                ),
            }
            // остаток batch'а забираем без ожидания
            wait = Duration::ZERO;
        }
        Ok(records)
    }

    fn commit_async(&mut self) -> Result<(), BrokerError> {
        self.inner()?
            .commit_consumer_state(CommitMode::Async)
            .map_err(|e| kafka_err("commit", e))
    }

    fn close(&mut self) {
        if let Some(consumer) = self.consumer.take() {
            if let Err(e) = consumer.unassign() {
                tracing::debug!(error = %e, "unassign on close failed");
            }
        }
    }
}

/// `None` для записи без timestamp'а: её нельзя разместить на шкале
/// воспроизведения. Payload, не являющийся JSON, передаётся дальше как
/// ошибка value, чтобы extractor применил политику декодирования.
fn to_log_record<M: Message>(message: &M) -> Option<LogRecord> {
    let timestamp_ms = message.timestamp().to_millis()?;
    let value = match message.payload() {
        Some(bytes) => serde_json::from_slice(bytes).map_err(|e| format!("payload is not JSON: {e}")),
        None => Ok(serde_json::Value::Null),
    };
    Some(LogRecord {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        timestamp_ms,
        key: message.key().map(|k| String::from_utf8_lossy(k).into_owned()),
        value,
    })
}

// ═══════════════════════════════════════════════════════════════
//  Producer
// ═══════════════════════════════════════════════════════════════

pub struct KafkaProducerFactory {
    config: ClientConfig,
}

impl KafkaProducerFactory {
    pub fn new(bootstrap_servers: &str) -> Self {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", bootstrap_servers);
        Self { config }
    }

    pub fn validated(self) -> Result<Self, BrokerError> {
        let _: ThreadedProducer<DefaultProducerContext> = self
            .config
            .create()
            .map_err(|e| BrokerError::config(format!("create producer: {e}")))?;
        Ok(self)
    }
}

impl ProducerFactory for KafkaProducerFactory {
    fn create_producer(&self) -> Result<Arc<dyn LogProducer>, BrokerError> {
        let producer: ThreadedProducer<DefaultProducerContext> = self
            .config
            .create()
            .map_err(|e| BrokerError::config(format!("create producer: {e}")))?;
        Ok(Arc::new(KafkaLogProducer { producer }))
    }
}

pub struct KafkaLogProducer {
    producer: ThreadedProducer<DefaultProducerContext>,
}

impl LogProducer for KafkaLogProducer {
    fn send(&self, topic: &str, key: Option<&str>, value: &serde_json::Value) -> Result<(), BrokerError> {
        let payload = serde_json::to_vec(value)?;
        let mut record: BaseRecord<'_, str, [u8]> = BaseRecord::to(topic).payload(payload.as_slice());
        if let Some(key) = key {
            record = record.key(key);
        }
        self.producer
            .send(record)
            .map_err(|(e, _)| kafka_err("send", e))
    }

    fn close(&self) {
        if let Err(e) = self.producer.flush(FLUSH_TIMEOUT) {
            tracing::warn!(error = %e, "producer flush on close failed");
        }
    }
}
