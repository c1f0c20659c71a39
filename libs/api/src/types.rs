use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ════════════════════════════════════════════════════════════════
//  TimedMessage
// ════════════════════════════════════════════════════════════════

/// Сообщение, извлечённое из source topic'а: исходный timestamp + payload.
///
/// Неизменяемо после создания. `T`: тип, к которому декодирован value
/// записи (по умолчанию `serde_json::Value`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimedMessage<T> {
    /// Timestamp записи в миллисекундах (Unix epoch).
    pub timestamp_ms: i64,
    pub payload: T,
}

impl<T> TimedMessage<T> {
    pub fn new(timestamp_ms: i64, payload: T) -> Self {
        Self { timestamp_ms, payload }
    }

    /// Заменить payload, сохранив timestamp.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> TimedMessage<U> {
        TimedMessage {
            timestamp_ms: self.timestamp_ms,
            payload: f(self.payload),
        }
    }
}

// ════════════════════════════════════════════════════════════════
//  LogRecord
// ════════════════════════════════════════════════════════════════

/// Запись лога в том виде, в котором её отдаёт consumer брокера.
///
/// Key декодирован как текст, value: как generic JSON; приведение
/// к типу вызывающего делает extractor. Запись, чей payload не разобрался
/// как JSON, не теряется: её value содержит текст ошибки, и extractor
/// решает её судьбу по политике декодирования.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    /// Timestamp в миллисекундах (Unix epoch).
    pub timestamp_ms: i64,
    pub key: Option<String>,
    pub value: Result<serde_json::Value, String>,
}

// ════════════════════════════════════════════════════════════════
//  Offsets
// ════════════════════════════════════════════════════════════════

/// partition → offset первой записи с timestamp ≥ запрошенного.
/// `None`: такой записи в partition нет.
pub type OffsetMap = BTreeMap<i32, Option<i64>>;

/// Верхняя граница чтения partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndOffset {
    /// Читать, пока offset ≤ значения (inclusive).
    Bounded(i64),
    /// Окно открыто справа: читать до исчерпания partition.
    Unbounded,
}

impl EndOffset {
    /// Попадает ли запись с данным offset в окно.
    pub fn admits(&self, offset: i64) -> bool {
        match self {
            EndOffset::Bounded(end) => offset <= *end,
            EndOffset::Unbounded => true,
        }
    }
}

impl From<Option<i64>> for EndOffset {
    fn from(offset: Option<i64>) -> Self {
        offset.map_or(EndOffset::Unbounded, EndOffset::Bounded)
    }
}

/// Границы чтения одной partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionOffsetBound {
    pub partition: i32,
    /// `None`: в окне нет записей этой partition, partition пропускается.
    pub start: Option<i64>,
    pub end: EndOffset,
}

impl PartitionOffsetBound {
    /// Собрать границы по результатам двух resolve (начало и конец окна).
    /// Partition, отсутствующая в `end`, считается открытой справа.
    pub fn from_offsets(start: &OffsetMap, end: &OffsetMap) -> Vec<PartitionOffsetBound> {
        let mut partitions: Vec<i32> = start.keys().chain(end.keys()).copied().collect();
        partitions.sort_unstable();
        partitions.dedup();
        partitions
            .into_iter()
            .map(|partition| PartitionOffsetBound {
                partition,
                start: start.get(&partition).copied().flatten(),
                end: end.get(&partition).copied().flatten().into(),
            })
            .collect()
    }
}

// ════════════════════════════════════════════════════════════════
//  PlaybackInfo
// ════════════════════════════════════════════════════════════════

/// Описание принятого playback'а. Идентичность: только по `id`.
#[derive(Clone, Debug)]
pub struct PlaybackInfo {
    pub id: String,
    pub source_topic: String,
    pub target_topic: String,
    pub speed: f64,
}

impl PlaybackInfo {
    /// Создать playback со сгенерированным UUID v4.
    pub fn create(
        source_topic: impl Into<String>,
        target_topic: impl Into<String>,
        speed: f64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source_topic: source_topic.into(),
            target_topic: target_topic.into(),
            speed,
        }
    }
}

impl PartialEq for PlaybackInfo {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PlaybackInfo {}

impl std::hash::Hash for PlaybackInfo {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Serialize for PlaybackInfo {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("PlaybackInfo", 5)?;
        s.serialize_field("id", &self.id)?;
        s.serialize_field("sourceTopic", &self.source_topic)?;
        // Старые клиенты читают source topic как hostTopic
        s.serialize_field("hostTopic", &self.source_topic)?;
        s.serialize_field("targetTopic", &self.target_topic)?;
        s.serialize_field("speed", &self.speed)?;
        s.end()
    }
}

impl<'de> Deserialize<'de> for PlaybackInfo {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Raw {
            id: String,
            source_topic: Option<String>,
            host_topic: Option<String>,
            target_topic: String,
            speed: f64,
        }
        let raw = Raw::deserialize(deserializer)?;
        let source_topic = raw
            .source_topic
            .or(raw.host_topic)
            .ok_or_else(|| serde::de::Error::missing_field("sourceTopic"))?;
        Ok(PlaybackInfo {
            id: raw.id,
            source_topic,
            target_topic: raw.target_topic,
            speed: raw.speed,
        })
    }
}
