use crate::error::Error;
use crate::height::Height;
use crate::validator::{Validator, ValidatorSet};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Validator entry as it appears in `genesis.json`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisValidator {
    #[serde(with = "crate::serde_helpers::base64_key")]
    pub pub_key: [u8; 32],
    #[serde(with = "crate::serde_helpers::string_u64")]
    pub power: u64,
    #[serde(default)]
    pub name: Option<String>,
}

/// The genesis document at `{home}/config/genesis.json`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GenesisDoc {
    pub chain_id: String,
    #[serde(default = "initial_height_default")]
    pub initial_height: Height,
    #[serde(default)]
    pub validators: Vec<GenesisValidator>,
    #[serde(default)]
    pub app_state: serde_json::Value,
}

fn initial_height_default() -> Height {
    Height(1)
}

impl GenesisDoc {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let raw = std::fs::read(path).map_err(|source| Error::GenesisIo {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_slice(&raw).map_err(|source| Error::GenesisParse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn validator_set(&self) -> ValidatorSet {
        ValidatorSet::new(
            self.validators
                .iter()
                .map(|v| Validator {
                    pub_key: v.pub_key,
                    power: v.power,
                    name: v.name.clone(),
                })
                .collect(),
        )
    }
}
