use crate::height::Height;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to parse block height from key \"{key}\"")]
    InvalidHeightKey { key: String },

    #[error("runtime \"{0}\" unknown")]
    UnknownRuntime(String),

    #[error("failed to decode block value: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("commit height {commit} does not match block height {block}")]
    CommitHeightMismatch { commit: Height, block: Height },

    #[error("commit block id does not match hash of block at height {height}")]
    CommitBlockIdMismatch { height: Height },

    #[error("commit signature from unknown validator {address} at height {height}")]
    UnknownValidator { address: String, height: Height },

    #[error(
        "insufficient voting power for commit at height {height}: \
         got {got} of {total}, need more than {need}"
    )]
    InsufficientVotingPower {
        height: Height,
        got: u64,
        need: u64,
        total: u64,
    },

    #[error("invalid validator public key: {0}")]
    InvalidPublicKey(String),

    #[error("failed to read genesis file at {path}: {source}")]
    GenesisIo {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse genesis file at {path}: {source}")]
    GenesisParse {
        path: String,
        source: serde_json::Error,
    },
}
