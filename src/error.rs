use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP {0}")]
    Status(reqwest::StatusCode),
    #[error("unexpected payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid endpoint: {0}")]
    Url(#[from] url::ParseError),
    #[error("{0}")]
    Missing(&'static str),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid socket url: {0}")]
    Url(#[from] url::ParseError),
    #[error("websocket error: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("could not encode frame: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("transport is not connected")]
    NotConnected,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no config directory available")]
    NoConfigDir,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("could not parse settings: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("could not write settings: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid url in settings: {0}")]
    Url(#[from] url::ParseError),
    #[error("base url is not configured")]
    MissingBaseUrl,
}
