use std::io;

#[derive(thiserror::Error, Debug)]
pub enum SentryError {
    #[error("network error: {0}")]
    Network(String),
    #[error("timeout")]
    Timeout,
    #[error("http error: {0}")]
    Http(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("db error: {0}")]
    Db(String),
    #[error("source error: {0}")]
    Source(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unknown error")]
    Unknown,
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<reqwest::Error> for SentryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SentryError::Timeout
        } else if err.is_connect() {
            SentryError::Network(err.to_string())
        } else if err.is_status() {
            SentryError::Http(err.to_string())
        } else {
            SentryError::Unknown
        }
    }
}

impl From<rusqlite::Error> for SentryError {
    fn from(err: rusqlite::Error) -> Self {
        SentryError::Db(err.to_string())
    }
}
