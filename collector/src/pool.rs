//! Pool-info client against the chain REST API.

use crate::error::CollectorError;
use crate::http_client;
use containers::Height;
use reqwest::Client;
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Deserialize)]
struct PoolResponse {
    pool: PoolInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolInfo {
    #[serde(with = "string_u64")]
    pub id: u64,
    pub data: PoolData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolData {
    pub runtime: String,
    #[serde(default)]
    pub start_key: String,
    #[serde(default)]
    pub current_key: String,
}

mod string_u64 {
    use serde::de::{self, Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

impl PoolInfo {
    /// The pool's latest included height, or zero while the pool is empty.
    pub fn current_height(&self) -> Height {
        Height(self.data.current_key.parse().unwrap_or(0))
    }
}

/// Query `{chain_rest}/kyve/query/v1beta1/pool/{id}`.
pub async fn get_pool_info(
    client: &Client,
    chain_rest: &str,
    pool_id: u64,
) -> Result<PoolInfo, CollectorError> {
    let url = format!("{chain_rest}/kyve/query/v1beta1/pool/{pool_id}");
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

    let parsed: PoolResponse = response
        .json()
        .await
        .map_err(|source| CollectorError::Http { url, source })?;
    Ok(parsed.pool)
}

/// Lazily refreshed view of the snapshot pool's latest height.
///
/// The height is advisory (backpressure only), so a transient fetch failure
/// keeps the last-known value instead of propagating.
pub struct SnapshotPoolTracker {
    client: Client,
    chain_rest: String,
    pool_id: u64,
    last: Height,
}

impl SnapshotPoolTracker {
    pub fn new(chain_rest: impl Into<String>, pool_id: u64) -> Result<Self, CollectorError> {
        Ok(Self {
            client: http_client()?,
            chain_rest: chain_rest.into(),
            pool_id,
            last: Height(0),
        })
    }

    pub async fn refresh(&mut self) -> Height {
        match get_pool_info(&self.client, &self.chain_rest, self.pool_id).await {
            Ok(info) => self.last = info.current_height(),
            Err(err) => warn!(
                pool_id = self.pool_id,
                last_known = self.last.0,
                "failed to refresh snapshot pool height: {err}"
            ),
        }
        self.last
    }
}
