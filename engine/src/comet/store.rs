//! Block and state stores on SQLite.
//!
//! Both stores run in WAL mode so the read-only RPC collaborator can open
//! its own reader connections while the executor writes.

use crate::error::EngineError;
use containers::{Block, Bytes32, Commit, GenesisDoc, Height, ValidatorSet};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Chain state carried between block applications and persisted after each
/// one. The validator set in here is the set expected to sign the *next*
/// commit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainState {
    pub chain_id: String,
    pub initial_height: Height,
    pub last_block_height: Height,
    pub last_block_id: Bytes32,
    pub app_hash: Bytes32,
    pub validators: ValidatorSet,
}

impl ChainState {
    pub fn from_genesis(doc: &GenesisDoc) -> Self {
        Self {
            chain_id: doc.chain_id.clone(),
            initial_height: doc.initial_height,
            last_block_height: doc.initial_height.prev(),
            last_block_id: Bytes32::default(),
            app_hash: Bytes32::default(),
            validators: doc.validator_set(),
        }
    }

    /// Whether no block has been applied yet on this chain.
    pub fn is_fresh(&self) -> bool {
        self.last_block_height < self.initial_height
    }
}

pub struct BlockStore {
    conn: Connection,
}

impl BlockStore {
    pub fn open(path: &Path) -> Result<Self, EngineError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;

            CREATE TABLE IF NOT EXISTS blocks (
                height      INTEGER PRIMARY KEY,
                block       TEXT NOT NULL,
                seen_commit TEXT NOT NULL
            );
            "#,
        )?;
        Ok(Self { conn })
    }

    pub fn height(&self) -> Result<Height, EngineError> {
        let max: Option<i64> = self
            .conn
            .query_row("SELECT MAX(height) FROM blocks", [], |row| row.get(0))?;
        Ok(Height(max.unwrap_or(0) as u64))
    }

    pub fn base_height(&self) -> Result<Height, EngineError> {
        let min: Option<i64> = self
            .conn
            .query_row("SELECT MIN(height) FROM blocks", [], |row| row.get(0))?;
        Ok(Height(min.unwrap_or(0) as u64))
    }

    /// Save a block together with the commit that was seen for it (carried
    /// by its successor).
    pub fn save_block(&self, block: &Block, seen_commit: &Commit) -> Result<(), EngineError> {
        let block_json = serde_json::to_string(block)
            .map_err(|e| EngineError::App(format!("failed to encode block: {e}")))?;
        let commit_json = serde_json::to_string(seen_commit)
            .map_err(|e| EngineError::App(format!("failed to encode commit: {e}")))?;
        self.conn.execute(
            "INSERT OR REPLACE INTO blocks (height, block, seen_commit) VALUES (?1, ?2, ?3)",
            params![block.height().0 as i64, block_json, commit_json],
        )?;
        Ok(())
    }

    pub fn load_block(&self, height: Height) -> Result<Option<String>, EngineError> {
        let row: Option<String> = self
            .conn
            .query_row(
                "SELECT block FROM blocks WHERE height = ?1",
                params![height.0 as i64],
                |row| row.get(0),
            )
            .optional()?;
        Ok(row)
    }

    /// Delete all blocks strictly below `to_height`. Returns the number of
    /// blocks pruned.
    pub fn prune(&self, to_height: Height) -> Result<u64, EngineError> {
        let pruned = self.conn.execute(
            "DELETE FROM blocks WHERE height < ?1",
            params![to_height.0 as i64],
        )?;
        Ok(pruned as u64)
    }
}

pub struct StateStore {
    conn: Connection,
}

impl StateStore {
    pub fn open(path: &Path) -> Result<Self, EngineError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;

            CREATE TABLE IF NOT EXISTS chain_state (
                id    INTEGER PRIMARY KEY CHECK (id = 0),
                state TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS block_results (
                height  INTEGER PRIMARY KEY,
                results TEXT NOT NULL
            );
            "#,
        )?;
        Ok(Self { conn })
    }

    pub fn load_state(&self) -> Result<Option<ChainState>, EngineError> {
        let raw: Option<String> = self
            .conn
            .query_row("SELECT state FROM chain_state WHERE id = 0", [], |row| {
                row.get(0)
            })
            .optional()?;
        match raw {
            Some(json) => {
                let state = serde_json::from_str(&json)
                    .map_err(|e| EngineError::App(format!("corrupt chain state: {e}")))?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    pub fn save_state(&self, state: &ChainState) -> Result<(), EngineError> {
        let json = serde_json::to_string(state)
            .map_err(|e| EngineError::App(format!("failed to encode chain state: {e}")))?;
        self.conn.execute(
            "INSERT INTO chain_state (id, state) VALUES (0, ?1)
             ON CONFLICT(id) DO UPDATE SET state = excluded.state",
            params![json],
        )?;
        Ok(())
    }

    pub fn save_block_results(
        &self,
        height: Height,
        results: &serde_json::Value,
    ) -> Result<(), EngineError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO block_results (height, results) VALUES (?1, ?2)",
            params![height.0 as i64, results.to_string()],
        )?;
        Ok(())
    }

    pub fn load_block_results(&self, height: Height) -> Result<Option<String>, EngineError> {
        let row: Option<String> = self
            .conn
            .query_row(
                "SELECT results FROM block_results WHERE height = ?1",
                params![height.0 as i64],
                |row| row.get(0),
            )
            .optional()?;
        Ok(row)
    }

    pub fn prune_results(&self, to_height: Height) -> Result<(), EngineError> {
        self.conn.execute(
            "DELETE FROM block_results WHERE height < ?1",
            params![to_height.0 as i64],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use containers::{BlockHeader, BlockVersion};
    use tempfile::TempDir;

    fn block_at(height: u64) -> Block {
        Block {
            header: BlockHeader {
                version: BlockVersion { block: 11, app: 1 },
                chain_id: "riptide-1".to_string(),
                height: Height(height),
                time: "2024-01-01T00:00:00Z".to_string(),
                last_block_id: Bytes32::default(),
                app_hash: Bytes32::default(),
                validators_hash: Bytes32::default(),
                proposer_address: "ab".repeat(20),
            },
            data: vec![],
            last_commit: Default::default(),
        }
    }

    #[test]
    fn block_store_heights_and_pruning() {
        let dir = TempDir::new().unwrap();
        let store = BlockStore::open(&dir.path().join("blockstore.db")).unwrap();

        assert_eq!(store.height().unwrap(), Height(0));
        assert_eq!(store.base_height().unwrap(), Height(0));

        for h in 1..=10 {
            store.save_block(&block_at(h), &Commit::default()).unwrap();
        }
        assert_eq!(store.height().unwrap(), Height(10));
        assert_eq!(store.base_height().unwrap(), Height(1));

        let pruned = store.prune(Height(5)).unwrap();
        assert_eq!(pruned, 4);
        assert_eq!(store.base_height().unwrap(), Height(5));
        assert_eq!(store.height().unwrap(), Height(10));
        assert!(store.load_block(Height(4)).unwrap().is_none());
        assert!(store.load_block(Height(5)).unwrap().is_some());
    }

    #[test]
    fn state_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::open(&dir.path().join("state.db")).unwrap();

        assert!(store.load_state().unwrap().is_none());

        let state = ChainState {
            chain_id: "riptide-1".to_string(),
            initial_height: Height(1),
            last_block_height: Height(3),
            last_block_id: Bytes32([5u8; 32]),
            app_hash: Bytes32([6u8; 32]),
            validators: ValidatorSet::default(),
        };
        store.save_state(&state).unwrap();
        assert_eq!(store.load_state().unwrap().unwrap(), state);

        // overwrite, not append
        let mut updated = state.clone();
        updated.last_block_height = Height(4);
        store.save_state(&updated).unwrap();
        assert_eq!(store.load_state().unwrap().unwrap(), updated);
    }

    #[test]
    fn block_results_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::open(&dir.path().join("state.db")).unwrap();

        store
            .save_block_results(Height(2), &serde_json::json!([{"code": 0}]))
            .unwrap();
        assert!(store.load_block_results(Height(2)).unwrap().is_some());

        store.prune_results(Height(3)).unwrap();
        assert!(store.load_block_results(Height(2)).unwrap().is_none());
    }
}
