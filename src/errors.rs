use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("index '{index}' not found on store '{store}'")]
    IndexNotFound { store: String, index: String },

    #[error("store not found: {0}")]
    StoreNotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("data error: {0}")]
    Data(String),

    #[error("read-only transaction: {0}")]
    ReadOnly(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("corrupt database image: {0}")]
    CorruptImage(String),

    #[error("Decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("Encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("Serde JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("BSON: {0}")]
    Bson(#[from] bson::error::Error),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("logging error: {0}")]
    Logging(String),
}
