//! The block collector task: a single producer delivering an ordered,
//! gap-free stream of data items to the executor.

use crate::bundles::{decode_bundle, get_bundle_payload, get_finalized_bundles_page};
use crate::error::CollectorError;
use crate::http_client;
use containers::{parse_height, DataItem, Height};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Where blocks come from.
#[derive(Debug, Clone)]
pub enum BlockSource {
    /// Archived bundles from a data pool.
    Pool {
        chain_rest: String,
        storage_rest: String,
        pool_id: u64,
    },
    /// A peer node's `/block` RPC.
    Rpc { endpoint: String },
}

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub source: BlockSource,
    /// First height to deliver.
    pub start_height: Height,
    /// Inclusive sync target; the stream ends after `target + 1` so the
    /// executor sees the commit certifying the target. Zero is unbounded.
    pub target_height: Height,
    pub page_limit: u64,
    pub retry_attempts: u32,
    pub retry_backoff: Duration,
    /// Pause when the source has nothing new yet.
    pub idle_interval: Duration,
}

impl CollectorConfig {
    pub fn new(source: BlockSource, start_height: Height, target_height: Height) -> Self {
        Self {
            source,
            start_height,
            target_height,
            page_limit: 100,
            retry_attempts: 8,
            retry_backoff: Duration::from_secs(1),
            idle_interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug)]
enum Flow {
    Continue,
    Done,
}

/// Run the collector until the target is delivered, the consumer goes away,
/// or a fatal error occurs. Fatal errors are published on `errors`; the
/// item channel closes when this task returns.
pub async fn start_block_collector(
    items: mpsc::Sender<DataItem>,
    errors: mpsc::Sender<CollectorError>,
    config: CollectorConfig,
) {
    let result = match config.source.clone() {
        BlockSource::Pool {
            chain_rest,
            storage_rest,
            pool_id,
        } => collect_from_pool(&items, &config, &chain_rest, &storage_rest, pool_id).await,
        BlockSource::Rpc { endpoint } => collect_from_rpc(&items, &config, &endpoint).await,
    };

    if let Err(err) = result {
        let _ = errors.send(err).await;
    }
}

async fn collect_from_pool(
    items: &mpsc::Sender<DataItem>,
    config: &CollectorConfig,
    chain_rest: &str,
    storage_rest: &str,
    pool_id: u64,
) -> Result<(), CollectorError> {
    let client = http_client()?;
    let client = &client;
    let mut next = config.start_height;
    let mut offset = 0u64;
    let page_limit = config.page_limit;

    loop {
        let current_offset = offset;
        let page = with_retry(
            "finalized bundles page",
            config.retry_attempts,
            config.retry_backoff,
            move || async move {
                get_finalized_bundles_page(client, chain_rest, pool_id, current_offset, page_limit)
                    .await
            },
        )
        .await?;

        if page.is_empty() {
            // pool has not produced past this offset yet
            sleep(config.idle_interval).await;
            continue;
        }

        for bundle in page {
            offset += 1;

            // skip bundles entirely below the requested start
            let to_key = parse_height(&bundle.to_key)?;
            if to_key < next {
                continue;
            }

            debug!(
                bundle_id = bundle.id,
                from_key = %bundle.from_key,
                to_key = %bundle.to_key,
                "fetching bundle"
            );

            let bundle_ref = &bundle;
            let payload = with_retry(
                "bundle payload",
                config.retry_attempts,
                config.retry_backoff,
                move || async move { get_bundle_payload(client, storage_rest, bundle_ref).await },
            )
            .await?;

            let batch = decode_bundle(&bundle, &payload)?;
            if let Flow::Done =
                forward_items(items, &mut next, config.target_height, batch).await?
            {
                return Ok(());
            }
        }
    }
}

async fn collect_from_rpc(
    items: &mpsc::Sender<DataItem>,
    config: &CollectorConfig,
    endpoint: &str,
) -> Result<(), CollectorError> {
    let client = http_client()?;
    let client = &client;
    let mut next = config.start_height;

    loop {
        let url = format!("{endpoint}/block?height={next}");
        let url_ref = url.as_str();
        let body = with_retry(
            "peer block",
            config.retry_attempts,
            config.retry_backoff,
            move || async move {
                let response =
                    client
                        .get(url_ref)
                        .send()
                        .await
                        .map_err(|source| CollectorError::Http {
                            url: url_ref.to_string(),
                            source,
                        })?;
                if !response.status().is_success() {
                    return Err(CollectorError::Status {
                        url: url_ref.to_string(),
                        status: response.status(),
                    });
                }
                response
                    .bytes()
                    .await
                    .map(|b| b.to_vec())
                    .map_err(|source| CollectorError::Http {
                        url: url_ref.to_string(),
                        source,
                    })
            },
        )
        .await?;

        // the node answers requests past its tip with an error document
        let parsed: Result<serde_json::Value, _> = serde_json::from_slice(&body);
        if parsed.map(|v| v.get("error").is_some()).unwrap_or(true) {
            sleep(config.idle_interval).await;
            continue;
        }

        let item = DataItem {
            key: next.to_string(),
            value: body,
        };
        if let Flow::Done =
            forward_items(items, &mut next, config.target_height, vec![item]).await?
        {
            return Ok(());
        }
    }
}

/// Deliver a batch, enforcing the strictly-ascending no-gap sequence.
/// Returns `Done` once `target + 1` has been sent or the consumer dropped
/// its receiver.
async fn forward_items(
    items: &mpsc::Sender<DataItem>,
    next: &mut Height,
    target: Height,
    batch: Vec<DataItem>,
) -> Result<Flow, CollectorError> {
    for item in batch {
        let height = parse_height(&item.key)?;
        if height < *next {
            continue;
        }
        if height > *next {
            return Err(CollectorError::Gap {
                expected: *next,
                got: height,
            });
        }

        if items.send(item).await.is_err() {
            // consumer is gone; nothing left to do
            return Ok(Flow::Done);
        }
        *next = next.next();

        if target.0 > 0 && height >= target.next() {
            return Ok(Flow::Done);
        }
    }
    Ok(Flow::Continue)
}

async fn with_retry<T, F, Fut>(
    op: &str,
    attempts: u32,
    backoff: Duration,
    mut call: F,
) -> Result<T, CollectorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CollectorError>>,
{
    let mut attempt = 0u32;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if attempt >= attempts {
                    return Err(CollectorError::RetriesExhausted {
                        op: op.to_string(),
                        attempts,
                        source: Box::new(err),
                    });
                }
                warn!(op, attempt, "transient failure: {err}, retrying");
                sleep(backoff * attempt).await;
            }
        }
    }
}
