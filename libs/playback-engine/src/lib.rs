//! Playback engine: извлекает окно сообщений из source topic'а и
//! переигрывает его в destination topic с масштабированием по времени.
//!
//! ```text
//! PlaybackRegistry::start
//!   → LogRangeResolver   (время → offset'ы)
//!   → BoundedExtractor   (offset'ы → TimedMessage)
//!   → PlaybackScheduler  (задержки / speed)
//!   → DeliverySink       (publish в destination)
//! ```

pub mod config;
pub mod error;
pub mod extractor;
pub mod registry;
pub mod resolver;
pub mod scheduler;
pub mod sink;

pub use config::{DecodeFailurePolicy, PlaybackConfig, PlaybackOrder};
pub use error::PlaybackError;
pub use extractor::{BoundedExtractor, find_messages_between};
pub use registry::{PlaybackRegistry, PlaybackRequest};
pub use resolver::LogRangeResolver;
pub use scheduler::{PlaybackScheduler, PlaybackState, ScheduleHandle, delay_for};
pub use sink::DeliverySink;
