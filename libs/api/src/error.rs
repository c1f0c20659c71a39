/// Что именно не получилось у клиента брокера.
///
/// Engine смотрит на вид ошибки, когда решает, чем её показать
/// вызывающему: недоступный topic, сбой доставки, битые данные.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Клиент не создаётся с такими настройками. Повтор не поможет.
    Config,
    /// Соединение или брокер отказали; следующий запрос может пройти.
    Io,
    /// Ответ не пришёл за отведённое время.
    Timeout,
    /// Payload не удалось (де)сериализовать.
    Encoding,
    /// Всё остальное: неизвестный topic, закрытый клиент и т.п.
    Other,
}

impl ErrorKind {
    fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Config => "config",
            ErrorKind::Io => "io",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Encoding => "encoding",
            ErrorKind::Other => "other",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ошибка любого вызова `LogConsumer` / `LogProducer` и их фабрик.
///
/// `Display` печатает только текст; `Debug` добавляет вид в скобках.
#[derive(Clone)]
pub struct BrokerError {
    kind: ErrorKind,
    message: String,
}

impl BrokerError {
    fn with_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn new(message: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Other, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Config, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Io, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Timeout, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Дописать, на каком шаге случилась ошибка: `"<ctx>: <message>"`.
    pub fn with_context(self, ctx: impl std::fmt::Display) -> Self {
        Self::with_kind(self.kind, format!("{ctx}: {}", self.message))
    }
}

impl std::fmt::Debug for BrokerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl std::fmt::Display for BrokerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for BrokerError {}

impl From<String> for BrokerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for BrokerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<std::io::Error> for BrokerError {
    fn from(e: std::io::Error) -> Self {
        Self::io(e.to_string())
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(e: serde_json::Error) -> Self {
        Self::with_kind(ErrorKind::Encoding, e.to_string())
    }
}
