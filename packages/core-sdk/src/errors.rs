use thiserror::Error;

/**
 * \brief Failure of a single provider call, or of a whole round.
 */
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("No endpoint has an API key configured")]
    NoActiveEndpoint,
    #[error("Timeout while querying {endpoint}")]
    Timeout { endpoint: String },
    #[error("Error querying {endpoint}: request failed: {status} -> {body}")]
    Http {
        endpoint: String,
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("Error querying {endpoint}: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Error querying {endpoint}: {reason}")]
    InvalidResponse { endpoint: String, reason: String },
}

/**
 * \brief Rejected session transitions.
 */
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("A submission is already in flight")]
    Busy,
    #[error("Nothing to send")]
    EmptyInput,
    #[error("No submission is in flight")]
    NotInFlight,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value}")]
    InvalidVar { var: &'static str, value: String },
    #[error("read endpoints file failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse endpoints file failed: {0}")]
    Toml(#[from] toml::de::Error),
}
