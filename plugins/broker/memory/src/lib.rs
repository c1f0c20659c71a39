use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use playback_api::{
    BrokerContext, BrokerError, ConsumerFactory, LogConsumer, LogProducer, LogRecord, OffsetMap,
    ProducerFactory, now_ms,
};

// ═══════════════════════════════════════════════════════════════
//  MemoryBroker
// ═══════════════════════════════════════════════════════════════

#[derive(Clone, Debug)]
struct StoredRecord {
    timestamp_ms: i64,
    key: Option<String>,
    value: serde_json::Value,
}

#[derive(Default)]
struct Inner {
    /// topic → partitions; offset записи = её индекс в partition.
    topics: RwLock<HashMap<String, Vec<Vec<StoredRecord>>>>,
    rejected: RwLock<HashSet<String>>,
    consumers_created: AtomicUsize,
    producers_created: AtomicUsize,
}

impl Inner {
    fn topics(&self) -> RwLockReadGuard<'_, HashMap<String, Vec<Vec<StoredRecord>>>> {
        match self.topics.read() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("memory broker read lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn topics_mut(&self) -> RwLockWriteGuard<'_, HashMap<String, Vec<Vec<StoredRecord>>>> {
        match self.topics.write() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("memory broker write lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn is_rejected(&self, topic: &str) -> bool {
        match self.rejected.read() {
            Ok(g) => g.contains(topic),
            Err(poisoned) => poisoned.into_inner().contains(topic),
        }
    }

    fn set_rejected(&self, topic: &str, rejected: bool) {
        let mut guard = match self.rejected.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if rejected {
            guard.insert(topic.to_string());
        } else {
            guard.remove(topic);
        }
    }
}

/// Partitioned in-memory log. Для тестов и локального запуска сервиса
/// без внешнего брокера.
///
/// Клонирование дёшево: все клоны разделяют одно хранилище. Один и тот же
/// broker обслуживает и чтение (source), и запись (target).
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// BrokerContext, в котором и source, и target: этот broker.
    pub fn context(&self) -> BrokerContext {
        BrokerContext::new(Arc::new(self.clone()), Arc::new(self.clone()))
    }

    /// Создать topic с `partitions` partition'ами. Существующий topic
    /// только расширяется до нужного числа partition'ов.
    pub fn create_topic(&self, name: &str, partitions: usize) {
        let mut topics = self.inner.topics_mut();
        let parts = topics.entry(name.to_string()).or_default();
        while parts.len() < partitions {
            parts.push(Vec::new());
        }
    }

    /// Дописать запись в partition. Возвращает её offset.
    pub fn append(
        &self,
        topic: &str,
        partition: i32,
        timestamp_ms: i64,
        key: Option<&str>,
        value: serde_json::Value,
    ) -> Result<i64, BrokerError> {
        let mut topics = self.inner.topics_mut();
        let parts = topics
            .get_mut(topic)
            .ok_or_else(|| BrokerError::new(format!("unknown topic '{topic}'")))?;
        let log = usize::try_from(partition)
            .ok()
            .and_then(|p| parts.get_mut(p))
            .ok_or_else(|| BrokerError::new(format!("unknown partition {topic}-{partition}")))?;
        log.push(StoredRecord {
            timestamp_ms,
            key: key.map(str::to_string),
            value,
        });
        Ok(log.len() as i64 - 1)
    }

    /// Все записи topic'а: partition за partition, в порядке offset'ов.
    pub fn records(&self, topic: &str) -> Vec<LogRecord> {
        let topics = self.inner.topics();
        let Some(parts) = topics.get(topic) else {
            return Vec::new();
        };
        parts
            .iter()
            .enumerate()
            .flat_map(|(p, log)| {
                log.iter()
                    .enumerate()
                    .map(move |(o, r)| to_log_record(topic, p as i32, o as i64, r))
            })
            .collect()
    }

    /// Отклонять (или снова принимать) запись в topic. Для проверки
    /// поведения при ошибках публикации.
    pub fn reject_writes(&self, topic: &str, rejected: bool) {
        self.inner.set_rejected(topic, rejected);
    }

    /// Сколько read-side клиентов было создано за время жизни broker'а.
    pub fn consumers_created(&self) -> usize {
        self.inner.consumers_created.load(Ordering::SeqCst)
    }

    pub fn producers_created(&self) -> usize {
        self.inner.producers_created.load(Ordering::SeqCst)
    }
}

fn to_log_record(topic: &str, partition: i32, offset: i64, r: &StoredRecord) -> LogRecord {
    LogRecord {
        topic: topic.to_string(),
        partition,
        offset,
        timestamp_ms: r.timestamp_ms,
        key: r.key.clone(),
        value: Ok(r.value.clone()),
    }
}

impl ConsumerFactory for MemoryBroker {
    fn create_consumer(&self) -> Result<Box<dyn LogConsumer>, BrokerError> {
        self.inner.consumers_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryConsumer {
            inner: self.inner.clone(),
            topic: None,
            positions: BTreeMap::new(),
            closed: false,
        }))
    }
}

impl ProducerFactory for MemoryBroker {
    fn create_producer(&self) -> Result<Arc<dyn LogProducer>, BrokerError> {
        self.inner.producers_created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemoryProducer {
            inner: self.inner.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryConsumer
// ═══════════════════════════════════════════════════════════════

/// Read-side клиент. Никогда не ждёт: пустой poll возвращается сразу.
pub struct MemoryConsumer {
    inner: Arc<Inner>,
    topic: Option<String>,
    /// partition → следующий offset для чтения.
    positions: BTreeMap<i32, i64>,
    closed: bool,
}

impl MemoryConsumer {
    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.closed {
            return Err(BrokerError::new("consumer is closed"));
        }
        Ok(())
    }
}

impl LogConsumer for MemoryConsumer {
    fn partitions_for(&mut self, topic: &str, _timeout: Duration) -> Result<Vec<i32>, BrokerError> {
        self.ensure_open()?;
        let topics = self.inner.topics();
        Ok(topics
            .get(topic)
            .map(|parts| (0..parts.len() as i32).collect())
            .unwrap_or_default())
    }

    fn offsets_for_times(
        &mut self,
        topic: &str,
        partitions: &[i32],
        timestamp_ms: i64,
        _timeout: Duration,
    ) -> Result<OffsetMap, BrokerError> {
        self.ensure_open()?;
        let topics = self.inner.topics();
        let parts = topics
            .get(topic)
            .ok_or_else(|| BrokerError::new(format!("unknown topic '{topic}'")))?;
        let mut offsets = OffsetMap::new();
        for &partition in partitions {
            let log = usize::try_from(partition)
                .ok()
                .and_then(|p| parts.get(p))
                .ok_or_else(|| BrokerError::new(format!("unknown partition {topic}-{partition}")))?;
            let offset = log
                .iter()
                .position(|r| r.timestamp_ms >= timestamp_ms)
                .map(|o| o as i64);
            offsets.insert(partition, offset);
        }
        Ok(offsets)
    }

    fn assign(&mut self, topic: &str, positions: &[(i32, i64)]) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.topic = Some(topic.to_string());
        self.positions = positions.iter().copied().collect();
        Ok(())
    }

    fn poll(&mut self, max_records: usize, _timeout: Duration) -> Result<Vec<LogRecord>, BrokerError> {
        self.ensure_open()?;
        let Some(topic) = self.topic.as_deref() else {
            return Err(BrokerError::new("consumer is not assigned to any partition"));
        };
        let topics = self.inner.topics();
        let Some(parts) = topics.get(topic) else {
            return Ok(Vec::new());
        };

        let mut batch = Vec::new();
        for (&partition, position) in self.positions.iter_mut() {
            let Some(log) = parts.get(partition as usize) else {
                continue;
            };
            while batch.len() < max_records {
                let Some(r) = log.get(*position as usize) else {
                    break;
                };
                batch.push(to_log_record(topic, partition, *position, r));
                *position += 1;
            }
        }
        Ok(batch)
    }

    fn commit_async(&mut self) -> Result<(), BrokerError> {
        self.ensure_open()
    }

    fn close(&mut self) {
        self.closed = true;
        self.positions.clear();
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryProducer
// ═══════════════════════════════════════════════════════════════

/// Write-side клиент. Неизвестный topic создаётся с одной partition,
/// timestamp записи: время отправки.
pub struct MemoryProducer {
    inner: Arc<Inner>,
    closed: AtomicBool,
}

impl LogProducer for MemoryProducer {
    fn send(&self, topic: &str, key: Option<&str>, value: &serde_json::Value) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::new("producer is closed"));
        }
        if self.inner.is_rejected(topic) {
            return Err(BrokerError::io(format!("topic '{topic}' rejected the write")));
        }
        let mut topics = self.inner.topics_mut();
        let parts = topics.entry(topic.to_string()).or_default();
        if parts.is_empty() {
            parts.push(Vec::new());
        }
        parts[0].push(StoredRecord {
            timestamp_ms: now_ms(),
            key: key.map(str::to_string),
            value: value.clone(),
        });
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const T: Duration = Duration::from_millis(10);

    fn seeded() -> MemoryBroker {
        let broker = MemoryBroker::new();
        broker.create_topic("orders", 2);
        broker.append("orders", 0, 1000, None, json!("a")).unwrap();
        broker.append("orders", 0, 2000, None, json!("b")).unwrap();
        broker.append("orders", 1, 1500, Some("k"), json!("c")).unwrap();
        broker
    }

    #[test]
    fn offsets_for_times_finds_first_at_or_after() {
        let broker = seeded();
        let mut c = broker.create_consumer().unwrap();

        let offsets = c.offsets_for_times("orders", &[0, 1], 1200, T).unwrap();
        assert_eq!(offsets, OffsetMap::from([(0, Some(1)), (1, Some(0))]));

        let offsets = c.offsets_for_times("orders", &[0, 1], 2500, T).unwrap();
        assert_eq!(offsets, OffsetMap::from([(0, None), (1, None)]));
    }

    #[test]
    fn unknown_topic_has_no_partitions() {
        let broker = MemoryBroker::new();
        let mut c = broker.create_consumer().unwrap();
        assert!(c.partitions_for("missing", T).unwrap().is_empty());
        assert!(c.offsets_for_times("missing", &[0], 0, T).is_err());
    }

    #[test]
    fn poll_reads_from_assigned_positions_and_respects_batch_size() {
        let broker = seeded();
        let mut c = broker.create_consumer().unwrap();
        c.assign("orders", &[(0, 1), (1, 0)]).unwrap();

        let first = c.poll(1, T).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!((first[0].partition, first[0].offset), (0, 1));

        let second = c.poll(10, T).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].key.as_deref(), Some("k"));

        assert!(c.poll(10, T).unwrap().is_empty());
    }

    #[test]
    fn closed_consumer_refuses_work() {
        let broker = seeded();
        let mut c = broker.create_consumer().unwrap();
        c.close();
        assert!(c.poll(1, T).is_err());
        assert_eq!(broker.consumers_created(), 1);
    }

    #[test]
    fn producer_auto_creates_topic_and_honours_rejection() {
        let broker = MemoryBroker::new();
        let p = broker.create_producer().unwrap();

        p.send("replay", None, &json!({"n": 1})).unwrap();
        assert_eq!(broker.records("replay").len(), 1);

        broker.reject_writes("replay", true);
        assert!(p.send("replay", None, &json!({"n": 2})).is_err());
        broker.reject_writes("replay", false);

        p.close();
        assert!(p.send("replay", None, &json!({"n": 3})).is_err());
        assert_eq!(broker.records("replay").len(), 1);
    }
}
