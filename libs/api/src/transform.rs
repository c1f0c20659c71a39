use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::TimedMessage;

/// Пользовательское преобразование извлечённых сообщений перед playback'ом.
///
/// Объявляет тип payload'а, к которому engine должен декодировать записи
/// source topic'а (`Input`), и тип результата (`Output`). Возврат `None`
/// отбрасывает сообщение.
pub trait PlaybackTransform: Send + Sync {
    type Input: DeserializeOwned + Send + 'static;
    type Output: Serialize;

    fn transform(&self, message: TimedMessage<Self::Input>) -> Option<TimedMessage<Self::Output>>;

    /// Имя ожидаемого типа, для логов и ошибок декодирования.
    fn expected_type(&self) -> &'static str {
        std::any::type_name::<Self::Input>()
    }
}

/// Пропускает сообщения как есть, без приведения к типу.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl PlaybackTransform for Passthrough {
    type Input = serde_json::Value;
    type Output = serde_json::Value;

    fn transform(&self, message: TimedMessage<serde_json::Value>) -> Option<TimedMessage<serde_json::Value>> {
        Some(message)
    }

    fn expected_type(&self) -> &'static str {
        "json"
    }
}

/// Transform из замыкания: `FilterMap::new(|m: TimedMessage<Order>| ...)`.
pub struct FilterMap<I, O, F> {
    f: F,
    _types: std::marker::PhantomData<fn(I) -> O>,
}

impl<I, O, F> FilterMap<I, O, F>
where
    F: Fn(TimedMessage<I>) -> Option<TimedMessage<O>> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f, _types: std::marker::PhantomData }
    }
}

impl<I, O, F> PlaybackTransform for FilterMap<I, O, F>
where
    I: DeserializeOwned + Send + 'static,
    O: Serialize,
    F: Fn(TimedMessage<I>) -> Option<TimedMessage<O>> + Send + Sync,
{
    type Input = I;
    type Output = O;

    fn transform(&self, message: TimedMessage<I>) -> Option<TimedMessage<O>> {
        (self.f)(message)
    }
}
