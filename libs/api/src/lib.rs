mod broker;
mod error;
mod transform;
mod types;
mod util;

pub use broker::{BrokerContext, ConsumerFactory, LogConsumer, LogProducer, ProducerFactory};
pub use error::{BrokerError, ErrorKind};
pub use transform::{FilterMap, Passthrough, PlaybackTransform};
pub use types::{EndOffset, LogRecord, OffsetMap, PartitionOffsetBound, PlaybackInfo, TimedMessage};
pub use util::now_ms;
