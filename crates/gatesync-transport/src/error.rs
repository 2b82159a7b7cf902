pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
}

impl TransportError {
    pub fn connect(url: &str, source: impl Into<BoxError>) -> Self {
        Self::Connect {
            url: url.to_string(),
            source: source.into(),
        }
    }
}
