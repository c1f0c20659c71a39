use std::sync::{Arc, Weak};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use playback_api::{BrokerContext, BrokerError, Passthrough, PlaybackInfo, PlaybackTransform, TimedMessage};

use crate::PlaybackError;
use crate::config::{PlaybackConfig, PlaybackOrder};
use crate::extractor::find_messages_between;
use crate::scheduler::{PlaybackScheduler, PlaybackState, ScheduleHandle};
use crate::sink::DeliverySink;

// ═══════════════════════════════════════════════════════════════
//  PlaybackRequest
// ═══════════════════════════════════════════════════════════════

/// Параметры запуска playback'а.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackRequest {
    pub source_topic: String,
    pub target_topic: String,
    pub speed: f64,
    /// Начало окна, ms (Unix epoch).
    pub start_ms: i64,
    /// Конец окна, ms (Unix epoch), включительно.
    pub end_ms: i64,
}

impl PlaybackRequest {
    pub fn new(
        source_topic: impl Into<String>,
        target_topic: impl Into<String>,
        speed: f64,
        start_ms: i64,
        end_ms: i64,
    ) -> Self {
        Self {
            source_topic: source_topic.into(),
            target_topic: target_topic.into(),
            speed,
            start_ms,
            end_ms,
        }
    }

    pub fn validate(&self) -> Result<(), PlaybackError> {
        if self.source_topic.trim().is_empty() {
            return Err(PlaybackError::InvalidRequest("source topic is empty".into()));
        }
        if self.target_topic.trim().is_empty() {
            return Err(PlaybackError::InvalidRequest("target topic is empty".into()));
        }
        if !(self.speed.is_finite() && self.speed > 0.0) {
            return Err(PlaybackError::InvalidRequest(format!(
                "speed must be a positive number, got {}",
                self.speed
            )));
        }
        if self.start_ms > self.end_ms {
            return Err(PlaybackError::InvalidRequest(format!(
                "window start {} is after window end {}",
                self.start_ms, self.end_ms
            )));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════
//  Destination claim
// ═══════════════════════════════════════════════════════════════

/// Захват destination topic'а на время `start`. Освобождается при drop,
/// если не был закреплён через `keep`.
struct TargetClaim<'a> {
    targets: &'a DashMap<String, String>,
    topic: String,
    owner: String,
    held: bool,
}

impl<'a> TargetClaim<'a> {
    fn acquire(targets: &'a DashMap<String, String>, info: &PlaybackInfo) -> Result<Self, PlaybackError> {
        match targets.entry(info.target_topic.clone()) {
            Entry::Occupied(_) => Err(PlaybackError::DestinationInUse(info.target_topic.clone())),
            Entry::Vacant(e) => {
                e.insert(info.id.clone());
                Ok(Self {
                    targets,
                    topic: info.target_topic.clone(),
                    owner: info.id.clone(),
                    held: true,
                })
            }
        }
    }

    fn keep(mut self) {
        self.held = false;
    }
}

impl Drop for TargetClaim<'_> {
    fn drop(&mut self) {
        if self.held {
            self.targets.remove_if(&self.topic, |_, owner| *owner == self.owner);
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  PlaybackRegistry
// ═══════════════════════════════════════════════════════════════

struct ActivePlayback {
    info: PlaybackInfo,
    handle: ScheduleHandle,
}

struct RegistryState {
    broker: BrokerContext,
    config: PlaybackConfig,
    sink: Arc<DeliverySink>,
    scheduler: PlaybackScheduler,
    /// id → запущенный playback
    playbacks: DashMap<String, ActivePlayback>,
    /// destination topic → id владельца
    targets: DashMap<String, String>,
}

impl RegistryState {
    /// Playback доиграл: освободить producer, handle и destination.
    fn complete(&self, id: &str) {
        let Some((_, playback)) = self.playbacks.remove(id) else {
            return;
        };
        let target = &playback.info.target_topic;
        self.sink.stop(target);
        self.targets.remove_if(target, |_, owner| owner == id);
        tracing::info!(
            id,
            source = %playback.info.source_topic,
            target = %target,
            delivered = playback.handle.fired(),
            "playback completed"
        );
    }
}

/// Точка входа engine'а: запуск, список и остановка playback'ов.
///
/// Не более одного активного playback'а на destination topic.
/// Клонируется дёшево; все клоны разделяют одно состояние.
#[derive(Clone)]
pub struct PlaybackRegistry {
    state: Arc<RegistryState>,
}

impl PlaybackRegistry {
    pub fn new(broker: BrokerContext, config: PlaybackConfig) -> Self {
        let sink = Arc::new(DeliverySink::new(broker.producers.clone()));
        let scheduler = PlaybackScheduler::new(sink.clone(), config.grace_period());
        Self {
            state: Arc::new(RegistryState {
                broker,
                config,
                sink,
                scheduler,
                playbacks: DashMap::new(),
                targets: DashMap::new(),
            }),
        }
    }

    /// Запустить playback без преобразования сообщений.
    pub async fn start(&self, request: PlaybackRequest) -> Result<String, PlaybackError> {
        self.start_with_transform(request, Arc::new(Passthrough)).await
    }

    /// Запустить playback: claim destination → extract → transform →
    /// order → schedule → register. Возвращает id playback'а.
    ///
    /// Любая ошибка освобождает destination; в реестре ничего не остаётся.
    pub async fn start_with_transform<T>(
        &self,
        request: PlaybackRequest,
        transform: Arc<T>,
    ) -> Result<String, PlaybackError>
    where
        T: PlaybackTransform + 'static,
    {
        request.validate()?;

        let state = &self.state;
        let info = PlaybackInfo::create(
            request.source_topic.clone(),
            request.target_topic.clone(),
            request.speed,
        );
        let claim = TargetClaim::acquire(&state.targets, &info)?;

        tracing::info!(
            id = %info.id,
            source = %info.source_topic,
            target = %info.target_topic,
            speed = info.speed,
            start_ms = request.start_ms,
            end_ms = request.end_ms,
            expected = transform.expected_type(),
            "starting playback"
        );

        let mut messages = self.extract(&request, transform).await?;
        if messages.is_empty() {
            return Err(PlaybackError::EmptySourceWindow(info.source_topic));
        }
        if state.config.order == PlaybackOrder::Timestamp {
            messages.sort_by_key(|m| m.timestamp_ms);
        }
        let count = messages.len();

        let weak: Weak<RegistryState> = Arc::downgrade(state);
        let id = info.id.clone();
        let handle = state.scheduler.schedule(&info.target_topic, messages, info.speed, move || {
            if let Some(state) = weak.upgrade() {
                state.complete(&id);
            }
        })?;

        state.playbacks.insert(
            info.id.clone(),
            ActivePlayback {
                info: info.clone(),
                handle: handle.clone(),
            },
        );
        claim.keep();

        // completion мог отработать до регистрации handle'а
        if handle.state() == PlaybackState::Completed {
            state.complete(&info.id);
        }

        tracing::info!(id = %info.id, messages = count, "playback scheduled");
        Ok(info.id)
    }

    async fn extract<T>(
        &self,
        request: &PlaybackRequest,
        transform: Arc<T>,
    ) -> Result<Vec<TimedMessage<serde_json::Value>>, PlaybackError>
    where
        T: PlaybackTransform + 'static,
    {
        let broker = self.state.broker.clone();
        let config = self.state.config.clone();
        let topic = request.source_topic.clone();
        let (start_ms, end_ms) = (request.start_ms, request.end_ms);

        tokio::task::spawn_blocking(move || -> Result<Vec<TimedMessage<serde_json::Value>>, PlaybackError> {
            let found = find_messages_between::<T::Input>(&broker, &config, &topic, start_ms, end_ms)?;
            let total = found.len();
            let mut out = Vec::with_capacity(total);
            for message in found {
                let Some(message) = transform.transform(message) else {
                    continue;
                };
                let payload = serde_json::to_value(&message.payload)
                    .map_err(|e| PlaybackError::Broker(BrokerError::from(e).with_context("encode transformed payload")))?;
                out.push(TimedMessage::new(message.timestamp_ms, payload));
            }
            if out.len() != total {
                tracing::debug!(topic = %topic, found = total, kept = out.len(), "transform dropped messages");
            }
            Ok(out)
        })
        .await
        .map_err(|e| PlaybackError::Broker(BrokerError::new(format!("extraction task failed: {e}"))))?
    }

    /// Снимок активных playback'ов.
    pub fn list(&self) -> Vec<PlaybackInfo> {
        self.state.playbacks.iter().map(|e| e.info.clone()).collect()
    }

    /// Остановить playback. Неизвестный id: no-op; повторный вызов: no-op.
    ///
    /// После возврата ни одна доставка этого playback'а уже не сработает.
    pub fn stop(&self, id: &str) {
        let state = &self.state;
        let Some((_, playback)) = state.playbacks.remove(id) else {
            tracing::debug!(id, "stop of unknown playback ignored");
            return;
        };
        let cancelled = playback.handle.cancel();
        let target = &playback.info.target_topic;
        state.sink.stop(target);
        state.targets.remove_if(target, |_, owner| owner == id);
        tracing::info!(id, target = %target, cancelled, "playback stopped");
    }

    /// Остановить все playback'и и закрыть producer'ы.
    ///
    /// Ждёт flush'а каждого producer'а: из async кода вызывать через
    /// `spawn_blocking`.
    pub fn shutdown(&self) {
        let state = &self.state;
        let ids: Vec<String> = state.playbacks.iter().map(|e| e.key().clone()).collect();
        let mut stopped = 0;
        for id in &ids {
            let Some((_, playback)) = state.playbacks.remove(id) else {
                continue;
            };
            let cancelled = playback.handle.cancel();
            state.targets.remove_if(&playback.info.target_topic, |_, owner| owner == id);
            tracing::info!(id = %id, cancelled, "playback stopped");
            stopped += 1;
        }
        state.sink.close_all();
        tracing::info!(stopped, "playback registry shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker_memory::MemoryBroker;
    use serde_json::json;

    fn registry(broker: &MemoryBroker) -> PlaybackRegistry {
        PlaybackRegistry::new(broker.context(), PlaybackConfig::default())
    }

    #[test]
    fn validation_rejects_bad_requests() {
        let ok = PlaybackRequest::new("orders", "replay", 1.0, 0, 10);
        assert!(ok.validate().is_ok());
        assert!(PlaybackRequest::new("orders", "replay", 1.0, 10, 10).validate().is_ok());

        for bad in [
            PlaybackRequest { speed: 0.0, ..ok.clone() },
            PlaybackRequest { speed: -1.0, ..ok.clone() },
            PlaybackRequest { speed: f64::INFINITY, ..ok.clone() },
            PlaybackRequest { start_ms: 11, ..ok.clone() },
            PlaybackRequest { source_topic: " ".into(), ..ok.clone() },
            PlaybackRequest { target_topic: String::new(), ..ok.clone() },
        ] {
            assert!(matches!(bad.validate(), Err(PlaybackError::InvalidRequest(_))), "{bad:?}");
        }
    }

    #[test]
    fn claim_is_released_on_drop_unless_kept() {
        let targets = DashMap::new();
        let info = PlaybackInfo::create("orders", "replay", 1.0);

        let claim = TargetClaim::acquire(&targets, &info).unwrap();
        assert!(matches!(
            TargetClaim::acquire(&targets, &PlaybackInfo::create("other", "replay", 1.0)),
            Err(PlaybackError::DestinationInUse(_))
        ));
        drop(claim);
        assert!(targets.is_empty());

        TargetClaim::acquire(&targets, &info).unwrap().keep();
        assert_eq!(targets.get("replay").map(|v| v.clone()), Some(info.id));
    }

    #[tokio::test]
    async fn invalid_request_touches_nothing() {
        let broker = MemoryBroker::new();
        let reg = registry(&broker);

        let err = reg
            .start(PlaybackRequest::new("orders", "replay", 0.0, 0, 10))
            .await
            .unwrap_err();

        assert!(matches!(err, PlaybackError::InvalidRequest(_)));
        assert_eq!(broker.consumers_created(), 0);
        assert!(reg.list().is_empty());
    }

    #[tokio::test]
    async fn unknown_source_releases_destination() {
        let broker = MemoryBroker::new();
        let reg = registry(&broker);

        let err = reg
            .start(PlaybackRequest::new("ghost", "replay", 1.0, 0, 10))
            .await
            .unwrap_err();
        assert!(matches!(err, PlaybackError::TopicUnavailable { .. }));

        broker.create_topic("orders", 1);
        broker.append("orders", 0, 5, None, json!("A")).unwrap();
        let id = reg
            .start(PlaybackRequest::new("orders", "replay", 1.0, 0, 10))
            .await
            .unwrap();
        assert_eq!(reg.list().len(), 1);
        reg.stop(&id);
    }

    #[tokio::test]
    async fn shutdown_stops_everything() {
        let broker = MemoryBroker::new();
        broker.create_topic("orders", 1);
        broker.append("orders", 0, 0, None, json!("A")).unwrap();
        broker.append("orders", 0, 60_000, None, json!("B")).unwrap();
        let reg = registry(&broker);

        reg.start(PlaybackRequest::new("orders", "r1", 1.0, 0, 60_000)).await.unwrap();
        reg.start(PlaybackRequest::new("orders", "r2", 1.0, 0, 60_000)).await.unwrap();
        assert_eq!(reg.list().len(), 2);

        reg.shutdown();

        assert!(reg.list().is_empty());
        assert!(reg.state.targets.is_empty());
        assert_eq!(reg.state.sink.open_channels(), 0);
    }
}
