use crate::block::Block;
use crate::error::Error;
use crate::height::Height;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One entry of a data-pool bundle: a decimal height key and the serialized
/// block as raw bytes. How the bytes decode depends on the pool's runtime.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataItem {
    pub key: String,
    pub value: Vec<u8>,
}

/// Strict decimal parse of a bundle key into a height. Anything but plain
/// ASCII digits is an integrity error: a malformed key means the bundle
/// cannot be trusted.
pub fn parse_height(key: &str) -> Result<Height, Error> {
    if key.is_empty() || !key.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::InvalidHeightKey {
            key: key.to_string(),
        });
    }
    key.parse::<u64>()
        .map(Height)
        .map_err(|_| Error::InvalidHeightKey {
            key: key.to_string(),
        })
}

/// Data-pool runtime, selecting the bundle value encoding. Absent (`None`
/// at the call sites) means the source is a peer node and values are raw
/// `/block` RPC responses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Runtime {
    Tendermint,
    TendermintBsync,
}

impl Runtime {
    pub const TENDERMINT: &'static str = "@kyvejs/tendermint";
    pub const TENDERMINT_BSYNC: &'static str = "@kyvejs/tendermint-bsync";
}

impl FromStr for Runtime {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            Self::TENDERMINT => Ok(Runtime::Tendermint),
            Self::TENDERMINT_BSYNC => Ok(Runtime::TendermintBsync),
            other => Err(Error::UnknownRuntime(other.to_string())),
        }
    }
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Runtime::Tendermint => Self::TENDERMINT,
            Runtime::TendermintBsync => Self::TENDERMINT_BSYNC,
        })
    }
}

/// Peer RPC `/block` response envelope.
#[derive(Debug, Serialize, Deserialize)]
struct BlockResponse {
    result: BlockResult,
}

#[derive(Debug, Serialize, Deserialize)]
struct BlockResult {
    block: Block,
}

/// `@kyvejs/tendermint` bundle value envelope.
#[derive(Debug, Serialize, Deserialize)]
struct TendermintValue {
    block: TendermintBlockWrapper,
}

#[derive(Debug, Serialize, Deserialize)]
struct TendermintBlockWrapper {
    block: Block,
}

/// Decode a bundle value into a block according to the runtime tag.
pub fn decode_block(runtime: Option<Runtime>, value: &[u8]) -> Result<Block, Error> {
    match runtime {
        None => {
            let response: BlockResponse = serde_json::from_slice(value)?;
            Ok(response.result.block)
        }
        Some(Runtime::Tendermint) => {
            let parsed: TendermintValue = serde_json::from_slice(value)?;
            Ok(parsed.block.block)
        }
        Some(Runtime::TendermintBsync) => Ok(serde_json::from_slice(value)?),
    }
}
