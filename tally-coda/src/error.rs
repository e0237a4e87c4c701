use thiserror::Error;

/// Any failure talking to the document API. None of these are retried: a
/// run that hits one stops without returning partial rows.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("invalid client configuration: {reason}")]
    Config { reason: String },

    #[error("request to {endpoint} failed")]
    Http {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} returned {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("could not decode response from {endpoint}: {reason}")]
    Decode { endpoint: String, reason: String },
}
