use crate::height::Height;
use crate::types::Bytes32;
use serde::{Deserialize, Serialize};

/// Commit certifying a block: the aggregate of validator signatures over
/// `(chain_id, height, block_id)`. A block at height `h` carries the commit
/// for height `h - 1` as its `last_commit`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub height: Height,
    pub block_id: Bytes32,
    pub signatures: Vec<CommitSig>,
}

/// A single validator's signature inside a commit. Absent votes are simply
/// not included; the set is judged by accumulated voting power.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSig {
    pub validator_address: String,
    #[serde(with = "crate::serde_helpers::base64_bytes")]
    pub signature: Vec<u8>,
}

/// The exact bytes a validator signs when committing a block.
#[derive(Serialize)]
struct SignPayload<'a> {
    chain_id: &'a str,
    height: Height,
    block_id: Bytes32,
}

/// Canonical sign-bytes for a commit vote. Field order is fixed by the
/// struct definition, so the encoding is deterministic.
pub fn commit_sign_bytes(chain_id: &str, height: Height, block_id: Bytes32) -> Vec<u8> {
    serde_json::to_vec(&SignPayload {
        chain_id,
        height,
        block_id,
    })
    .expect("sign payload serialization cannot fail")
}
