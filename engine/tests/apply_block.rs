//! End-to-end tests for the reference engine: prev-block buffering, commit
//! verification, pruning, and restart/handshake behavior, driven against an
//! in-process mock application over the real socket protocol.

use containers::{
    commit::commit_sign_bytes, Block, BlockHeader, BlockVersion, Bytes32, Commit, CommitSig,
    GenesisDoc, GenesisValidator, Height, Runtime, Validator, ValidatorSet,
};
use ed25519_dalek::{Signer, SigningKey};
use engine::comet::proxy::AppRequest;
use engine::{CometEngine, Engine, EngineError};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

const CHAIN_ID: &str = "riptide-test-1";

/// Deterministic app hash the mock application reports after executing
/// `height`; block headers are built against the same function.
fn app_hash(height: u64) -> Bytes32 {
    let digest = Sha256::digest(format!("app-state-{height}"));
    Bytes32(digest.into())
}

#[derive(Default)]
struct MockAppState {
    height: u64,
    snapshots: Vec<u64>,
    finalized: Vec<u64>,
}

/// Speaks the engine's line-delimited JSON protocol on a local listener.
async fn spawn_mock_app(state: Arc<Mutex<MockAppState>>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                return;
            };
            let state = state.clone();
            tokio::spawn(async move {
                let (read_half, mut write_half) = socket.into_split();
                let mut lines = BufReader::new(read_half).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let request: AppRequest = serde_json::from_str(&line).unwrap();
                    let result = {
                        let mut app = state.lock().unwrap();
                        match request {
                            AppRequest::Info => serde_json::json!({
                                "last_block_height": app.height.to_string(),
                                "last_block_app_hash": app_hash(app.height),
                            }),
                            AppRequest::InitChain(_) => serde_json::json!({
                                "app_hash": app_hash(0),
                            }),
                            AppRequest::FinalizeBlock(req) => {
                                app.height = req.height.0;
                                app.finalized.push(req.height.0);
                                serde_json::json!({
                                    "app_hash": app_hash(req.height.0),
                                    "tx_results": [],
                                    "validator_updates": [],
                                })
                            }
                            AppRequest::ListSnapshots => serde_json::json!({
                                "snapshots": app
                                    .snapshots
                                    .iter()
                                    .map(|h| serde_json::json!({
                                        "height": h.to_string(),
                                        "format": 1,
                                        "chunks": 1,
                                    }))
                                    .collect::<Vec<_>>(),
                            }),
                        }
                    };
                    let mut frame =
                        serde_json::to_vec(&serde_json::json!({ "result": result })).unwrap();
                    frame.push(b'\n');
                    if write_half.write_all(&frame).await.is_err() {
                        return;
                    }
                }
            });
        }
    });

    addr
}

struct ChainBuilder {
    keys: Vec<SigningKey>,
    set: ValidatorSet,
    blocks: Vec<Block>,
}

impl ChainBuilder {
    fn new(seeds: &[u8]) -> Self {
        let keys: Vec<SigningKey> = seeds.iter().map(|s| SigningKey::from_bytes(&[*s; 32])).collect();
        let set = ValidatorSet::new(
            keys.iter()
                .map(|k| Validator {
                    pub_key: k.verifying_key().to_bytes(),
                    power: 10,
                    name: None,
                })
                .collect(),
        );
        Self {
            keys,
            set,
            blocks: vec![],
        }
    }

    fn commit_for(&self, height: Height, block_id: Bytes32) -> Commit {
        let sign_bytes = commit_sign_bytes(CHAIN_ID, height, block_id);
        Commit {
            height,
            block_id,
            signatures: self
                .keys
                .iter()
                .map(|key| {
                    let validator = Validator {
                        pub_key: key.verifying_key().to_bytes(),
                        power: 10,
                        name: None,
                    };
                    CommitSig {
                        validator_address: validator.address(),
                        signature: key.sign(&sign_bytes).to_bytes().to_vec(),
                    }
                })
                .collect(),
        }
    }

    /// Extend the chain to `up_to` blocks starting at height 1.
    fn build(&mut self, up_to: u64) {
        while (self.blocks.len() as u64) < up_to {
            let height = self.blocks.len() as u64 + 1;
            let (last_block_id, last_commit) = match self.blocks.last() {
                Some(prev) => {
                    let id = prev.hash();
                    (id, self.commit_for(prev.height(), id))
                }
                None => (Bytes32::default(), Commit::default()),
            };
            self.blocks.push(Block {
                header: BlockHeader {
                    version: BlockVersion { block: 11, app: 1 },
                    chain_id: CHAIN_ID.to_string(),
                    height: Height(height),
                    time: "2024-01-01T00:00:00Z".to_string(),
                    last_block_id,
                    app_hash: app_hash(height - 1),
                    validators_hash: self.set.hash(),
                    proposer_address: self.set.validators[0].address(),
                },
                data: vec![],
                last_commit,
            });
        }
    }

    fn value(&self, height: u64) -> Vec<u8> {
        serde_json::to_vec(&self.blocks[height as usize - 1]).unwrap()
    }

    fn write_genesis(&self, home: &Path) {
        let doc = GenesisDoc {
            chain_id: CHAIN_ID.to_string(),
            initial_height: Height(1),
            validators: self
                .set
                .validators
                .iter()
                .map(|v| GenesisValidator {
                    pub_key: v.pub_key,
                    power: v.power,
                    name: None,
                })
                .collect(),
            app_state: serde_json::Value::Null,
        };
        let config_dir = home.join("config");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(
            config_dir.join("genesis.json"),
            serde_json::to_vec_pretty(&doc).unwrap(),
        )
        .unwrap();
    }
}

async fn booted_engine(home: &Path, addr: &str) -> CometEngine {
    let mut engine = CometEngine::new(home, addr);
    engine.open_dbs().unwrap();
    engine.start_proxy_app().await.unwrap();
    engine.do_handshake().await.unwrap();
    engine
}

#[tokio::test]
async fn first_apply_only_buffers() {
    let home = TempDir::new().unwrap();
    let addr = spawn_mock_app(Arc::new(Mutex::new(MockAppState::default()))).await;
    let mut chain = ChainBuilder::new(&[1, 2, 3]);
    chain.build(2);
    chain.write_genesis(home.path());

    let mut engine = booted_engine(home.path(), &addr).await;
    engine
        .apply_block(Some(Runtime::TendermintBsync), &chain.value(1))
        .await
        .unwrap();

    assert_eq!(engine.get_height(), Height(0));
}

#[tokio::test]
async fn applies_in_strict_height_order() {
    let home = TempDir::new().unwrap();
    let app = Arc::new(Mutex::new(MockAppState::default()));
    let addr = spawn_mock_app(app.clone()).await;
    let mut chain = ChainBuilder::new(&[1, 2, 3]);
    chain.build(6);
    chain.write_genesis(home.path());

    let mut engine = booted_engine(home.path(), &addr).await;
    for h in 1..=6 {
        engine
            .apply_block(Some(Runtime::TendermintBsync), &chain.value(h))
            .await
            .unwrap();
    }

    assert_eq!(engine.get_height(), Height(5));
    assert_eq!(engine.get_base_height(), Height(1));
    assert_eq!(app.lock().unwrap().finalized, vec![1, 2, 3, 4, 5]);
    assert_eq!(engine.get_app_height().await.unwrap(), Height(5));
}

#[tokio::test]
async fn rejects_commit_from_wrong_validator_set() {
    let home = TempDir::new().unwrap();
    let addr = spawn_mock_app(Arc::new(Mutex::new(MockAppState::default()))).await;
    let mut chain = ChainBuilder::new(&[1, 2, 3]);
    chain.build(7);
    chain.write_genesis(home.path());

    // Re-sign block 7's carried commit (certifying block 6) with a foreign
    // validator set.
    let foreign = ChainBuilder::new(&[8, 9]);
    let block_six_id = chain.blocks[5].hash();
    chain.blocks[6].last_commit = foreign.commit_for(Height(6), block_six_id);

    let mut engine = booted_engine(home.path(), &addr).await;
    for h in 1..=6 {
        engine
            .apply_block(Some(Runtime::TendermintBsync), &chain.value(h))
            .await
            .unwrap();
    }

    let err = engine
        .apply_block(Some(Runtime::TendermintBsync), &chain.value(7))
        .await
        .unwrap_err();
    assert!(
        matches!(err, EngineError::CommitVerification { height, .. } if height == Height(6)),
        "unexpected error: {err}"
    );
    // block 6 must not have been stored
    assert_eq!(engine.get_height(), Height(5));
}

#[tokio::test]
async fn rejects_gapped_heights() {
    let home = TempDir::new().unwrap();
    let addr = spawn_mock_app(Arc::new(Mutex::new(MockAppState::default()))).await;
    let mut chain = ChainBuilder::new(&[1]);
    chain.build(4);
    chain.write_genesis(home.path());

    let mut engine = booted_engine(home.path(), &addr).await;
    engine
        .apply_block(Some(Runtime::TendermintBsync), &chain.value(1))
        .await
        .unwrap();
    engine
        .apply_block(Some(Runtime::TendermintBsync), &chain.value(2))
        .await
        .unwrap();

    // feed block 4, skipping 3: the commit carried by 4 certifies height 3,
    // not the buffered block 2, so verification must fail
    let err = engine
        .apply_block(Some(Runtime::TendermintBsync), &chain.value(4))
        .await
        .unwrap_err();
    assert!(
        matches!(err, EngineError::CommitVerification { height, .. } if height == Height(2)),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn pruning_respects_floor() {
    let home = TempDir::new().unwrap();
    let addr = spawn_mock_app(Arc::new(Mutex::new(MockAppState::default()))).await;
    let mut chain = ChainBuilder::new(&[1, 2]);
    chain.build(11);
    chain.write_genesis(home.path());

    let mut engine = booted_engine(home.path(), &addr).await;
    for h in 1..=11 {
        engine
            .apply_block(Some(Runtime::TendermintBsync), &chain.value(h))
            .await
            .unwrap();
    }
    assert_eq!(engine.get_height(), Height(10));

    engine.prune_blocks(Height(7)).unwrap();
    assert_eq!(engine.get_base_height(), Height(7));
    assert_eq!(engine.get_height(), Height(10));
    assert!(engine.get_block(Height(6)).is_err());
    assert!(engine.get_block(Height(7)).is_ok());
}

#[tokio::test]
async fn restart_resumes_at_continuation_height() {
    let home = TempDir::new().unwrap();
    let app = Arc::new(Mutex::new(MockAppState::default()));
    let addr = spawn_mock_app(app.clone()).await;
    let mut chain = ChainBuilder::new(&[1, 2, 3]);
    chain.build(8);
    chain.write_genesis(home.path());

    {
        let mut engine = booted_engine(home.path(), &addr).await;
        for h in 1..=6 {
            engine
                .apply_block(Some(Runtime::TendermintBsync), &chain.value(h))
                .await
                .unwrap();
        }
        engine.stop_proxy_app().await.unwrap();
        engine.close_dbs().unwrap();
    }

    let mut engine = CometEngine::new(home.path(), addr.as_str());
    engine.open_dbs().unwrap();
    assert_eq!(engine.get_continuation_height().unwrap(), Height(6));

    engine.start_proxy_app().await.unwrap();
    engine.do_handshake().await.unwrap();
    for h in 6..=8 {
        engine
            .apply_block(Some(Runtime::TendermintBsync), &chain.value(h))
            .await
            .unwrap();
    }
    assert_eq!(engine.get_height(), Height(7));
}

#[tokio::test]
async fn handshake_replays_blocks_into_a_reset_app() {
    let home = TempDir::new().unwrap();
    let app = Arc::new(Mutex::new(MockAppState::default()));
    let addr = spawn_mock_app(app.clone()).await;
    let mut chain = ChainBuilder::new(&[1, 2]);
    chain.build(6);
    chain.write_genesis(home.path());

    {
        let mut engine = booted_engine(home.path(), &addr).await;
        for h in 1..=6 {
            engine
                .apply_block(Some(Runtime::TendermintBsync), &chain.value(h))
                .await
                .unwrap();
        }
    }

    // the application lost its state; the handshake must replay 1..=5
    app.lock().unwrap().height = 0;
    app.lock().unwrap().finalized.clear();

    let mut engine = CometEngine::new(home.path(), addr.as_str());
    engine.open_dbs().unwrap();
    engine.start_proxy_app().await.unwrap();
    engine.do_handshake().await.unwrap();

    assert_eq!(app.lock().unwrap().finalized, vec![1, 2, 3, 4, 5]);
    assert_eq!(engine.get_app_height().await.unwrap(), Height(5));
}

#[tokio::test]
async fn handshake_rejects_app_ahead_of_store() {
    let home = TempDir::new().unwrap();
    let app = Arc::new(Mutex::new(MockAppState::default()));
    let addr = spawn_mock_app(app.clone()).await;
    let chain = {
        let mut c = ChainBuilder::new(&[1]);
        c.build(1);
        c
    };
    chain.write_genesis(home.path());

    app.lock().unwrap().height = 42;

    let mut engine = CometEngine::new(home.path(), addr.as_str());
    engine.open_dbs().unwrap();
    engine.start_proxy_app().await.unwrap();
    let err = engine.do_handshake().await.unwrap_err();
    assert!(matches!(err, EngineError::Handshake(_)), "got {err}");
}

#[tokio::test]
async fn snapshot_availability_matches_exact_height() {
    let home = TempDir::new().unwrap();
    let app = Arc::new(Mutex::new(MockAppState::default()));
    let addr = spawn_mock_app(app.clone()).await;
    let chain = {
        let mut c = ChainBuilder::new(&[1]);
        c.build(1);
        c
    };
    chain.write_genesis(home.path());

    let mut engine = CometEngine::new(home.path(), addr.as_str());
    assert!(!engine.is_snapshot_available(Height(10)).await.unwrap());

    app.lock().unwrap().snapshots.push(10);
    assert!(engine.is_snapshot_available(Height(10)).await.unwrap());
    assert!(!engine.is_snapshot_available(Height(11)).await.unwrap());
}

#[tokio::test]
async fn proxy_app_double_start_and_stop_error() {
    let home = TempDir::new().unwrap();
    let addr = spawn_mock_app(Arc::new(Mutex::new(MockAppState::default()))).await;
    let chain = {
        let mut c = ChainBuilder::new(&[1]);
        c.build(1);
        c
    };
    chain.write_genesis(home.path());

    let mut engine = CometEngine::new(home.path(), addr.as_str());
    engine.start_proxy_app().await.unwrap();
    assert!(matches!(
        engine.start_proxy_app().await.unwrap_err(),
        EngineError::ProxyAlreadyStarted
    ));
    engine.stop_proxy_app().await.unwrap();
    assert!(matches!(
        engine.stop_proxy_app().await.unwrap_err(),
        EngineError::ProxyAlreadyStopped
    ));
}
