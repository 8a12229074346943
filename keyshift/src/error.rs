use keyshift_store::StoreError;
use parse_display::Display;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    #[error("line {line} of `{path}`: {message}")]
    Parse {
        path: String,
        line: usize,
        message: String,
    },

    #[error("no source record found for `{0}`")]
    MissingLinkage(String),

    #[error("restore `{key}`: {source}")]
    Restore { key: String, source: StoreError },

    #[error("field `{field}` of `{key}` has no declared rule")]
    UndeclaredField { key: String, field: String },

    #[error("rate limited after {1} attempts for `{0}`")]
    RateLimited(String, u32),

    #[error("remote resource `{0}` no longer exists")]
    ResourceGone(String),

    #[error("`{key}`: {message}")]
    General { key: String, message: String },

    #[error("group `{0}` has no `:object` record")]
    MissingObject(String),

    #[error("no identifier assigned for {model} `{id}`")]
    UnresolvedIdentifier { model: String, id: String },

    #[error("field `{field}` value `{value}` is not a valid {expected}")]
    Coercion {
        field: String,
        value: String,
        expected: String,
    },

    #[error("dependency cycle detected involving model `{0}`")]
    DependencyCycle(String),

    #[error("unknown model `{0}`")]
    UnknownModel(String),

    #[error("configuration `{0}`")]
    Config(String),

    #[error("store `{0}`")]
    Store(#[from] StoreError),

    #[error("io `{0}`")]
    Io(#[from] std::io::Error),

    #[error("serde_json `{0}`")]
    SerdeJson(#[from] serde_json::Error),

    #[error("base64 `{0}`")]
    Base64(#[from] base64::DecodeError),

    #[error("{0}`")]
    Any(#[from] anyhow::Error),
}

/// Category under which a per-record failure is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[display(style = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Parse,
    MissingLinkage,
    Restore,
    UndeclaredField,
    RateLimited,
    ResourceGone,
    General,
}

impl MigrateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Parse { .. } => ErrorKind::Parse,
            Self::MissingLinkage(_) => ErrorKind::MissingLinkage,
            Self::Restore { .. } => ErrorKind::Restore,
            Self::UndeclaredField { .. } => ErrorKind::UndeclaredField,
            Self::RateLimited(..) => ErrorKind::RateLimited,
            Self::ResourceGone(_) => ErrorKind::ResourceGone,
            _ => ErrorKind::General,
        }
    }
}

pub type Result<T> = std::result::Result<T, MigrateError>;
