use containers::Height;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Container(#[from] containers::Error),

    #[error("block validation failed at height {height}: {reason}")]
    Validation { height: Height, reason: String },

    #[error("light commit verification failed at height {height}: {source}")]
    CommitVerification {
        height: Height,
        source: containers::Error,
    },

    #[error("proxy app error: {0}")]
    App(String),

    #[error("proxy app already started")]
    ProxyAlreadyStarted,

    #[error("proxy app already stopped")]
    ProxyAlreadyStopped,

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("databases not open")]
    DbsNotOpen,

    #[error("block at height {0} not found in store")]
    BlockNotFound(Height),

    #[error("engine \"{tag}\" not found, available engines: {available}")]
    UnknownEngine { tag: String, available: String },

    #[error("invalid upgrade entry \"{0}\", expected \"height:tag\"")]
    InvalidUpgrade(String),
}
