use crate::commit::{commit_sign_bytes, Commit};
use crate::error::Error;
use crate::height::Height;
use crate::types::Bytes32;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A single validator: ed25519 public key and voting power.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    #[serde(with = "crate::serde_helpers::base64_key")]
    pub pub_key: [u8; 32],
    #[serde(with = "crate::serde_helpers::string_u64")]
    pub power: u64,
    #[serde(default)]
    pub name: Option<String>,
}

impl Validator {
    /// Validator address: first 20 bytes of the sha256 of the public key,
    /// hex-encoded. This is what commit signatures reference.
    pub fn address(&self) -> String {
        let digest = Sha256::digest(self.pub_key);
        hex::encode(&digest[..20])
    }

    fn verifying_key(&self) -> Result<VerifyingKey, Error> {
        VerifyingKey::from_bytes(&self.pub_key)
            .map_err(|e| Error::InvalidPublicKey(e.to_string()))
    }
}

/// Validator-set update returned by the application after finalizing a
/// block. Zero power removes the validator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorUpdate {
    #[serde(with = "crate::serde_helpers::base64_key")]
    pub pub_key: [u8; 32],
    #[serde(with = "crate::serde_helpers::string_u64")]
    pub power: u64,
}

/// The active validator set, used to light-verify every commit.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSet {
    pub validators: Vec<Validator>,
}

impl ValidatorSet {
    pub fn new(validators: Vec<Validator>) -> Self {
        Self { validators }
    }

    pub fn total_power(&self) -> u64 {
        self.validators.iter().map(|v| v.power).sum()
    }

    /// Digest over the set, pinned into block headers.
    pub fn hash(&self) -> Bytes32 {
        let mut hasher = Sha256::new();
        for validator in &self.validators {
            hasher.update(validator.pub_key);
            hasher.update(validator.power.to_be_bytes());
        }
        Bytes32(hasher.finalize().into())
    }

    fn by_address(&self, address: &str) -> Option<&Validator> {
        self.validators.iter().find(|v| v.address() == address)
    }

    /// Light commit verification: the commit must reference the expected
    /// height and block id, and the accumulated power of validators with a
    /// valid signature must exceed 2/3 of the set's total power.
    pub fn verify_commit(
        &self,
        chain_id: &str,
        block_id: Bytes32,
        height: Height,
        commit: &Commit,
    ) -> Result<(), Error> {
        if commit.height != height {
            return Err(Error::CommitHeightMismatch {
                commit: commit.height,
                block: height,
            });
        }

        if commit.block_id != block_id {
            return Err(Error::CommitBlockIdMismatch { height });
        }

        let sign_bytes = commit_sign_bytes(chain_id, height, block_id);
        let total = self.total_power();
        let mut signed = 0u64;

        for sig in &commit.signatures {
            let validator = self.by_address(&sig.validator_address).ok_or_else(|| {
                Error::UnknownValidator {
                    address: sig.validator_address.clone(),
                    height,
                }
            })?;

            let Ok(signature) = Signature::from_slice(&sig.signature) else {
                continue;
            };
            if validator
                .verifying_key()?
                .verify(&sign_bytes, &signature)
                .is_ok()
            {
                signed += validator.power;
            }
        }

        // strictly more than 2/3: signed * 3 > total * 2
        if (signed as u128) * 3 <= (total as u128) * 2 {
            return Err(Error::InsufficientVotingPower {
                height,
                got: signed,
                need: total * 2 / 3,
                total,
            });
        }

        Ok(())
    }

    /// Apply application-issued validator updates. Zero power removes the
    /// validator, a known key changes its power, an unknown key joins.
    pub fn apply_updates(&mut self, updates: Vec<ValidatorUpdate>) {
        for update in updates {
            match self
                .validators
                .iter_mut()
                .find(|v| v.pub_key == update.pub_key)
            {
                Some(existing) if update.power == 0 => {
                    let key = existing.pub_key;
                    self.validators.retain(|v| v.pub_key != key);
                }
                Some(existing) => existing.power = update.power,
                None if update.power > 0 => self.validators.push(Validator {
                    pub_key: update.pub_key,
                    power: update.power,
                    name: None,
                }),
                None => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::CommitSig;
    use ed25519_dalek::{Signer, SigningKey};

    fn keypair(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    fn set_of(keys: &[(u8, u64)]) -> ValidatorSet {
        ValidatorSet::new(
            keys.iter()
                .map(|(seed, power)| Validator {
                    pub_key: keypair(*seed).verifying_key().to_bytes(),
                    power: *power,
                    name: None,
                })
                .collect(),
        )
    }

    fn commit_for(
        set: &ValidatorSet,
        signers: &[u8],
        chain_id: &str,
        height: Height,
        block_id: Bytes32,
    ) -> Commit {
        let sign_bytes = commit_sign_bytes(chain_id, height, block_id);
        let signatures = signers
            .iter()
            .map(|seed| {
                let key = keypair(*seed);
                let validator = set
                    .validators
                    .iter()
                    .find(|v| v.pub_key == key.verifying_key().to_bytes())
                    .unwrap();
                CommitSig {
                    validator_address: validator.address(),
                    signature: key.sign(&sign_bytes).to_bytes().to_vec(),
                }
            })
            .collect();
        Commit {
            height,
            block_id,
            signatures,
        }
    }

    #[test]
    fn accepts_two_thirds_plus_one() {
        let set = set_of(&[(1, 1), (2, 1), (3, 1)]);
        let block_id = Bytes32([9u8; 32]);
        let commit = commit_for(&set, &[1, 2, 3], "chain", Height(5), block_id);
        set.verify_commit("chain", block_id, Height(5), &commit)
            .unwrap();
    }

    #[test]
    fn rejects_exactly_two_thirds() {
        let set = set_of(&[(1, 1), (2, 1), (3, 1)]);
        let block_id = Bytes32([9u8; 32]);
        let commit = commit_for(&set, &[1, 2], "chain", Height(5), block_id);
        let err = set
            .verify_commit("chain", block_id, Height(5), &commit)
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientVotingPower { .. }));
    }

    #[test]
    fn rejects_wrong_chain_id_signatures() {
        let set = set_of(&[(1, 1), (2, 1), (3, 1)]);
        let block_id = Bytes32([9u8; 32]);
        let commit = commit_for(&set, &[1, 2, 3], "other-chain", Height(5), block_id);
        assert!(set
            .verify_commit("chain", block_id, Height(5), &commit)
            .is_err());
    }

    #[test]
    fn rejects_signatures_from_foreign_validators() {
        let set = set_of(&[(1, 1), (2, 1)]);
        let foreign = set_of(&[(7, 10)]);
        let block_id = Bytes32([9u8; 32]);
        let commit = commit_for(&foreign, &[7], "chain", Height(5), block_id);
        let err = set
            .verify_commit("chain", block_id, Height(5), &commit)
            .unwrap_err();
        assert!(matches!(err, Error::UnknownValidator { .. }));
    }

    #[test]
    fn rejects_height_and_block_id_mismatches() {
        let set = set_of(&[(1, 1)]);
        let block_id = Bytes32([9u8; 32]);
        let commit = commit_for(&set, &[1], "chain", Height(5), block_id);

        assert!(matches!(
            set.verify_commit("chain", block_id, Height(6), &commit),
            Err(Error::CommitHeightMismatch { .. })
        ));
        assert!(matches!(
            set.verify_commit("chain", Bytes32([8u8; 32]), Height(5), &commit),
            Err(Error::CommitBlockIdMismatch { .. })
        ));
    }

    #[test]
    fn power_is_weighted() {
        // one whale with 10 power outvotes two minnows with 1 each
        let set = set_of(&[(1, 10), (2, 1), (3, 1)]);
        let block_id = Bytes32([9u8; 32]);
        let commit = commit_for(&set, &[1], "chain", Height(5), block_id);
        set.verify_commit("chain", block_id, Height(5), &commit)
            .unwrap();
    }

    #[test]
    fn updates_add_change_and_remove() {
        let mut set = set_of(&[(1, 5), (2, 5)]);
        let new_key = keypair(3).verifying_key().to_bytes();
        let existing = keypair(1).verifying_key().to_bytes();
        let removed = keypair(2).verifying_key().to_bytes();

        set.apply_updates(vec![
            ValidatorUpdate {
                pub_key: new_key,
                power: 7,
            },
            ValidatorUpdate {
                pub_key: existing,
                power: 9,
            },
            ValidatorUpdate {
                pub_key: removed,
                power: 0,
            },
        ]);

        assert_eq!(set.validators.len(), 2);
        assert_eq!(set.total_power(), 16);
        assert!(set.validators.iter().all(|v| v.pub_key != removed));
    }
}
