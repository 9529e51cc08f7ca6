//! Finalized-bundle fetching and decoding.
//!
//! Bundles are archived on a storage provider and indexed by the chain's
//! `/kyve/v1/bundles/{pool_id}` endpoint. Each bundle is a JSON array of
//! key/value items, optionally gzip-compressed in storage.

use crate::error::CollectorError;
use containers::DataItem;
use flate2::read::GzDecoder;
use reqwest::Client;
use serde::Deserialize;
use std::io::Read;

/// Compression id the storage layer uses for gzip.
const COMPRESSION_GZIP: u64 = 1;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FinalizedBundle {
    #[serde(with = "string_u64")]
    pub id: u64,
    pub storage_id: String,
    pub from_key: String,
    pub to_key: String,
    #[serde(default, with = "string_u64")]
    pub compression_id: u64,
}

mod string_u64 {
    use serde::de::{self, Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw.is_empty() {
            return Ok(0);
        }
        raw.parse().map_err(de::Error::custom)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct FinalizedBundlesResponse {
    #[serde(default)]
    pub finalized_bundles: Vec<FinalizedBundle>,
}

/// One page of finalized bundles starting at `offset`.
pub async fn get_finalized_bundles_page(
    client: &Client,
    chain_rest: &str,
    pool_id: u64,
    offset: u64,
    limit: u64,
) -> Result<Vec<FinalizedBundle>, CollectorError> {
    let url = format!(
        "{chain_rest}/kyve/v1/bundles/{pool_id}?pagination.offset={offset}&pagination.limit={limit}"
    );
    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|source| CollectorError::Http {
            url: url.clone(),
            source,
        })?;

    if !response.status().is_success() {
        return Err(CollectorError::Status {
            url,
            status: response.status(),
        });
    }

    let parsed: FinalizedBundlesResponse = response
        .json()
        .await
        .map_err(|source| CollectorError::Http { url, source })?;
    Ok(parsed.finalized_bundles)
}

/// Fetch a bundle's payload from the storage provider.
pub async fn get_bundle_payload(
    client: &Client,
    storage_rest: &str,
    bundle: &FinalizedBundle,
) -> Result<Vec<u8>, CollectorError> {
    let url = format!("{storage_rest}/{}", bundle.storage_id);
    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|source| CollectorError::Http {
            url: url.clone(),
            source,
        })?;

    if !response.status().is_success() {
        return Err(CollectorError::Status {
            url,
            status: response.status(),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|source| CollectorError::Http { url, source })?;
    Ok(bytes.to_vec())
}

/// Bundle item as stored: the value is an arbitrary JSON document whose
/// schema depends on the pool runtime.
#[derive(Debug, Deserialize)]
struct RawItem {
    key: String,
    value: serde_json::Value,
}

/// Decompress (if needed) and decode a bundle payload into data items.
pub fn decode_bundle(bundle: &FinalizedBundle, payload: &[u8]) -> Result<Vec<DataItem>, CollectorError> {
    let raw = if bundle.compression_id == COMPRESSION_GZIP {
        let mut decoder = GzDecoder::new(payload);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|source| CollectorError::Decompress {
                id: bundle.id,
                source,
            })?;
        out
    } else {
        payload.to_vec()
    };

    let items: Vec<RawItem> =
        serde_json::from_slice(&raw).map_err(|source| CollectorError::BundleDecode {
            id: bundle.id,
            source,
        })?;

    Ok(items
        .into_iter()
        .map(|item| DataItem {
            key: item.key,
            value: item.value.to_string().into_bytes(),
        })
        .collect())
}
