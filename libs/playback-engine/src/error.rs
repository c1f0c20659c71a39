use playback_api::BrokerError;

#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("topic '{topic}' is unavailable: {reason}")]
    TopicUnavailable { topic: String, reason: String },

    #[error("no data could be found in source topic '{0}' for the requested window")]
    EmptySourceWindow(String),

    #[error("destination topic '{0}' is used by another playback")]
    DestinationInUse(String),

    #[error("record {topic}-{partition}@{offset} could not be decoded as {expected}: {detail}")]
    DecodeFailure {
        topic: String,
        partition: i32,
        offset: i64,
        expected: &'static str,
        detail: String,
    },

    #[error("publish to '{topic}' failed: {source}")]
    PublishFailure { topic: String, source: BrokerError },

    #[error("invalid playback request: {0}")]
    InvalidRequest(String),

    #[error("broker: {0}")]
    Broker(#[from] BrokerError),
}

impl PlaybackError {
    pub(crate) fn unavailable(topic: &str, reason: impl std::fmt::Display) -> Self {
        PlaybackError::TopicUnavailable {
            topic: topic.to_string(),
            reason: reason.to_string(),
        }
    }
}
