use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use playback_api::TimedMessage;

use crate::PlaybackError;
use crate::sink::DeliverySink;

/// Жизненный цикл одного playback'а.
///
/// `Scheduled → Running → {Completed | Cancelled}`; оба финальных
/// состояния терминальны.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Scheduled,
    Running,
    Completed,
    Cancelled,
}

struct Progress {
    state: PlaybackState,
    fired: usize,
}

struct Shared {
    progress: Mutex<Progress>,
    total: usize,
    token: CancellationToken,
}

impl Shared {
    fn progress(&self) -> MutexGuard<'_, Progress> {
        match self.progress.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("playback progress lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

/// Управление запущенным расписанием.
#[derive(Clone)]
pub struct ScheduleHandle {
    shared: Arc<Shared>,
}

impl ScheduleHandle {
    /// Отменить все ещё не сработавшие доставки.
    ///
    /// Доставка выполняется под тем же lock'ом, поэтому после возврата
    /// ни одна доставка уже не сработает. Возвращает число отменённых
    /// доставок; 0 если playback уже завершён или отменён.
    pub fn cancel(&self) -> usize {
        let mut progress = self.shared.progress();
        match progress.state {
            PlaybackState::Scheduled | PlaybackState::Running => {
                progress.state = PlaybackState::Cancelled;
                self.shared.token.cancel();
                self.shared.total - progress.fired
            }
            PlaybackState::Completed | PlaybackState::Cancelled => 0,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.progress().state
    }

    /// Сколько доставок уже сработало (включая неуспешные публикации).
    pub fn fired(&self) -> usize {
        self.shared.progress().fired
    }

    pub fn total(&self) -> usize {
        self.shared.total
    }
}

impl std::fmt::Debug for ScheduleHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let progress = self.shared.progress();
        f.debug_struct("ScheduleHandle")
            .field("state", &progress.state)
            .field("fired", &progress.fired)
            .field("total", &self.shared.total)
            .finish()
    }
}

/// Задержка доставки сообщения с timestamp `ts_ms` относительно первого
/// сообщения (`t0_ms`) при скорости `speed`.
///
/// Миллисекунды, дробная часть отбрасывается (усечение к нулю).
/// Отрицательная разница (сообщение старше первого) даёт ноль.
pub fn delay_for(t0_ms: i64, ts_ms: i64, speed: f64) -> Duration {
    let diff = ts_ms.saturating_sub(t0_ms);
    if diff <= 0 {
        return Duration::ZERO;
    }
    Duration::from_millis((diff as f64 / speed) as u64)
}

/// Раскладывает сообщения по времени и отправляет их в `DeliverySink`.
///
/// Каждый playback получает собственную task'у на tokio runtime; отмена
/// одного playback'а не задевает другие.
pub struct PlaybackScheduler {
    sink: Arc<DeliverySink>,
    grace: Duration,
}

impl PlaybackScheduler {
    pub fn new(sink: Arc<DeliverySink>, grace: Duration) -> Self {
        Self { sink, grace }
    }

    /// Запланировать доставку `messages` в `target` со скоростью `speed`.
    ///
    /// Не блокирует: возвращается сразу после постановки task'и.
    /// `on_complete` вызывается один раз, через `grace` после последней
    /// доставки, и только если playback не был отменён.
    pub fn schedule<F>(
        &self,
        target: &str,
        messages: Vec<TimedMessage<serde_json::Value>>,
        speed: f64,
        on_complete: F,
    ) -> Result<ScheduleHandle, PlaybackError>
    where
        F: FnOnce() + Send + 'static,
    {
        if !(speed.is_finite() && speed > 0.0) {
            return Err(PlaybackError::InvalidRequest(format!(
                "speed must be a positive number, got {speed}"
            )));
        }
        let Some(first) = messages.first() else {
            return Err(PlaybackError::InvalidRequest("nothing to schedule".into()));
        };

        let t0 = first.timestamp_ms;
        let mut deliveries: Vec<(Duration, serde_json::Value)> = messages
            .into_iter()
            .map(|m| (delay_for(t0, m.timestamp_ms, speed), m.payload))
            .collect();
        deliveries.sort_by_key(|(delay, _)| *delay);
        let last = deliveries.last().map(|(d, _)| *d).unwrap_or_default();
        let finish = last + self.grace;

        let shared = Arc::new(Shared {
            progress: Mutex::new(Progress {
                state: PlaybackState::Scheduled,
                fired: 0,
            }),
            total: deliveries.len(),
            token: CancellationToken::new(),
        });

        let started = Instant::now();
        shared.progress().state = PlaybackState::Running;

        let task_shared = shared.clone();
        let sink = self.sink.clone();
        let target = target.to_string();
        tokio::spawn(async move {
            let token = task_shared.token.clone();

            for (delay, payload) in deliveries {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep_until(started + delay) => {}
                }

                let mut progress = task_shared.progress();
                if progress.state != PlaybackState::Running {
                    return;
                }
                if let Err(e) = sink.send(&target, &payload) {
                    tracing::warn!(topic = %target, error = %e, "scheduled delivery failed");
                }
                progress.fired += 1;
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                _ = tokio::time::sleep_until(started + finish) => {}
            }

            {
                let mut progress = task_shared.progress();
                if progress.state != PlaybackState::Running {
                    return;
                }
                progress.state = PlaybackState::Completed;
            }
            on_complete();
        });

        Ok(ScheduleHandle { shared })
    }
}
