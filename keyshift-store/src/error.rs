#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("connection failed `{0}`")]
    Connection(String),

    #[error("target key name already exists `{0}`")]
    BusyKey(String),

    #[error("operation against a key holding the wrong kind of value `{key}`, expected {expected}")]
    WrongType { key: String, expected: String },

    #[error("payload version or checksum mismatch: {0}")]
    CorruptPayload(String),

    #[error("invalid integer value at `{0}`")]
    NotAnInteger(String),

    #[error("bitcode `{0}`")]
    Bitcode(#[from] bitcode::Error),

    #[cfg(feature = "redis")]
    #[error("redis `{0}`")]
    Redis(#[from] redis::RedisError),

    #[error("{0}`")]
    Any(#[from] anyhow::Error),
}

impl StoreError {
    /// Errors raised by a payload that cannot be restored, as opposed to
    /// errors reaching the store itself.
    pub fn is_payload_error(&self) -> bool {
        matches!(
            self,
            Self::BusyKey(_) | Self::CorruptPayload(_) | Self::Bitcode(_) | Self::WrongType { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
