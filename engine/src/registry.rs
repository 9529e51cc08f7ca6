//! Engine registry: tag constants, the factory, and upgrade-height
//! resolution.
//!
//! A chain's registry entry is a list of `(upgrade_height, engine_tag)`
//! pairs; the engine used for a sync run is the one with the highest
//! upgrade height at or below the continuation height.

use crate::comet::CometEngine;
use crate::error::EngineError;
use crate::Engine;
use containers::Height;
use std::path::Path;

pub const ENGINE_COMET_V1: &str = "comet-v1";

/// Every engine tag this build can instantiate.
pub const AVAILABLE_ENGINES: &[&str] = &[ENGINE_COMET_V1];

/// Instantiate an engine by tag. The empty tag selects the default engine.
pub fn engine_factory(
    tag: &str,
    home: &Path,
    app_addr: &str,
) -> Result<Box<dyn Engine>, EngineError> {
    match tag {
        "" | ENGINE_COMET_V1 => Ok(Box::new(CometEngine::new(home, app_addr))),
        other => Err(EngineError::UnknownEngine {
            tag: other.to_string(),
            available: AVAILABLE_ENGINES.join(", "),
        }),
    }
}

/// Resolve the engine tag for a continuation height from upgrade pairs.
///
/// Pairs must be sorted ascending by height; the highest entry whose height
/// is at or below `continuation_height` wins. With no matching entry the
/// default engine tag is returned.
pub fn engine_for_height(
    upgrades: &[(Height, String)],
    continuation_height: Height,
) -> &str {
    let mut selected = ENGINE_COMET_V1;
    for (height, tag) in upgrades {
        if continuation_height < *height {
            break;
        }
        selected = tag;
    }
    selected
}

/// Parse a comma-separated `height:tag` upgrade list (the `--upgrades`
/// flag) into pairs sorted ascending by height.
pub fn parse_upgrades(raw: &str) -> Result<Vec<(Height, String)>, EngineError> {
    let mut upgrades = Vec::new();
    for entry in raw.split(',').filter(|entry| !entry.is_empty()) {
        let (height, tag) = entry
            .split_once(':')
            .ok_or_else(|| EngineError::InvalidUpgrade(entry.to_string()))?;
        let height: u64 = height
            .parse()
            .map_err(|_| EngineError::InvalidUpgrade(entry.to_string()))?;
        if tag.is_empty() {
            return Err(EngineError::InvalidUpgrade(entry.to_string()));
        }
        upgrades.push((Height(height), tag.to_string()));
    }
    upgrades.sort_by_key(|(height, _)| *height);
    Ok(upgrades)
}
