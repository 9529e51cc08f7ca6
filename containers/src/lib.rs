//! Chain data containers shared across the riptide workspace.
//!
//! Everything that crosses a wire or a store boundary lives here: block and
//! commit structures, validator sets with commit verification, genesis
//! documents, and the data-pool bundle items together with their
//! runtime-tagged decoding.

pub mod block;
pub mod bundle;
pub mod commit;
pub mod error;
pub mod genesis;
pub mod height;
pub mod types;
pub mod validator;

mod serde_helpers;

pub use block::{Block, BlockHeader, BlockVersion};
pub use bundle::{decode_block, parse_height, DataItem, Runtime};
pub use commit::{Commit, CommitSig};
pub use error::Error;
pub use genesis::{GenesisDoc, GenesisValidator};
pub use height::Height;
pub use types::Bytes32;
pub use validator::{Validator, ValidatorSet, ValidatorUpdate};
