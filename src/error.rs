//! Error types for hookline.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("processing failed: {0}")]
    Processing(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn http_client_errors_convert() {
        let source = reqwest::Client::new()
            .get("not a url")
            .send()
            .await
            .unwrap_err();
        let err: Error = source.into();
        assert!(matches!(err, Error::Http(_)));
        assert!(err.to_string().starts_with("http client error"));
    }
}
