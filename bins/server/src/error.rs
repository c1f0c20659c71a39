#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("backend '{0}' is not compiled in (enable the `{0}` feature)")]
    UnsupportedBackend(&'static str),

    #[error("broker: {0}")]
    Broker(#[from] playback_api::BrokerError),

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),
}
