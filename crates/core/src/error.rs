use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid duration for {key}: {value:?}")]
    InvalidDuration { key: String, value: String },

    #[error("Invalid number for {key}: {value:?}")]
    InvalidNumber { key: String, value: String },

    #[error("Invalid boolean for {key}: {value:?}")]
    InvalidBool { key: String, value: String },

    #[error("{0}")]
    Other(String),
}
