use std::sync::Arc;
use std::time::Duration;

use crate::{BrokerError, LogRecord, OffsetMap};

// ════════════════════════════════════════════════════════════════
//  Broker Plugin Traits
// ════════════════════════════════════════════════════════════════

/// Read-side клиент брокера. Один экземпляр на одно извлечение окна.
///
/// Все методы блокирующие и ограничены таймаутом: вызывающий
/// запускает их на blocking пуле (`spawn_blocking`).
///
/// Реализации: MemoryConsumer (broker-memory), Kafka (`BaseConsumer`).
pub trait LogConsumer: Send {
    /// Список partition'ов topic'а. Пустой список или ошибка:
    /// topic недоступен.
    fn partitions_for(&mut self, topic: &str, timeout: Duration) -> Result<Vec<i32>, BrokerError>;

    /// Для каждой partition: offset первой записи с timestamp ≥ `timestamp_ms`,
    /// `None` если такой записи нет.
    fn offsets_for_times(
        &mut self,
        topic: &str,
        partitions: &[i32],
        timestamp_ms: i64,
        timeout: Duration,
    ) -> Result<OffsetMap, BrokerError>;

    /// Назначить курсор чтения: (partition, offset) для каждой partition.
    /// Заменяет предыдущее назначение целиком.
    fn assign(&mut self, topic: &str, positions: &[(i32, i64)]) -> Result<(), BrokerError>;

    /// Получить очередной batch (не более `max_records`). Пустой batch:
    /// брокер догнан, новых данных за `timeout` не появилось.
    fn poll(&mut self, max_records: usize, timeout: Duration) -> Result<Vec<LogRecord>, BrokerError>;

    /// Неблокирующий commit прочитанных offset'ов (best effort).
    fn commit_async(&mut self) -> Result<(), BrokerError>;

    /// Освободить соединение.
    fn close(&mut self);
}

/// Фабрика read-side клиентов.
pub trait ConsumerFactory: Send + Sync {
    fn create_consumer(&self) -> Result<Box<dyn LogConsumer>, BrokerError>;
}

/// Write-side клиент брокера. Переиспользуется всеми отправками
/// в один destination topic, поэтому `Send + Sync`.
pub trait LogProducer: Send + Sync {
    /// Fire-and-forget публикация. Ошибка: запись не принята в очередь
    /// отправки; повторов нет.
    fn send(&self, topic: &str, key: Option<&str>, value: &serde_json::Value) -> Result<(), BrokerError>;

    /// Дослать буферы и освободить соединение.
    fn close(&self);
}

/// Фабрика write-side клиентов.
pub trait ProducerFactory: Send + Sync {
    fn create_producer(&self) -> Result<Arc<dyn LogProducer>, BrokerError>;
}

// ════════════════════════════════════════════════════════════════
//  BrokerContext
// ════════════════════════════════════════════════════════════════

/// Явно владеемый контекст подключения к брокерам: source (чтение)
/// и target (запись). Создаётся при старте сервиса и передаётся
/// в resolver, extractor и sink.
#[derive(Clone)]
pub struct BrokerContext {
    pub consumers: Arc<dyn ConsumerFactory>,
    pub producers: Arc<dyn ProducerFactory>,
}

impl BrokerContext {
    pub fn new(consumers: Arc<dyn ConsumerFactory>, producers: Arc<dyn ProducerFactory>) -> Self {
        Self { consumers, producers }
    }
}

impl std::fmt::Debug for BrokerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerContext").finish_non_exhaustive()
    }
}
