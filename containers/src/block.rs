use crate::commit::Commit;
use crate::height::Height;
use crate::types::Bytes32;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Consensus and application protocol versions carried in every header.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockVersion {
    #[serde(with = "crate::serde_helpers::string_u64")]
    pub block: u64,
    #[serde(with = "crate::serde_helpers::string_u64")]
    pub app: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: BlockVersion,
    pub chain_id: String,
    pub height: Height,
    /// RFC 3339 timestamp, kept as the wire string.
    pub time: String,
    /// Hash of the previous block's header.
    pub last_block_id: Bytes32,
    /// Application hash after executing the previous block.
    pub app_hash: Bytes32,
    pub validators_hash: Bytes32,
    pub proposer_address: String,
}

/// A full block as delivered by the data pool or a peer RPC node.
///
/// `last_commit` certifies the *previous* block; a block is therefore only
/// finalizable once its successor has been seen.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    /// Raw transactions, base64-encoded on the wire.
    #[serde(default)]
    pub data: Vec<String>,
    pub last_commit: Commit,
}

impl Block {
    pub fn height(&self) -> Height {
        self.header.height
    }

    pub fn chain_id(&self) -> &str {
        &self.header.chain_id
    }

    /// Block id: sha256 over the canonical JSON encoding of the header.
    pub fn hash(&self) -> Bytes32 {
        let encoded =
            serde_json::to_vec(&self.header).expect("header serialization cannot fail");
        let digest = Sha256::digest(&encoded);
        Bytes32(digest.into())
    }
}
