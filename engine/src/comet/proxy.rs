//! Application connection: newline-delimited JSON frames over TCP.
//!
//! The engine drives the application through four calls: `info`,
//! `init_chain`, `finalize_block` and `list_snapshots`. Each request is one
//! JSON line `{"method": …, "params": …}`, each response one JSON line
//! `{"result": …}` or `{"error": "…"}`.

use crate::error::EngineError;
use async_trait::async_trait;
use containers::{Bytes32, Height, ValidatorUpdate};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum AppRequest {
    Info,
    InitChain(InitChainRequest),
    FinalizeBlock(FinalizeRequest),
    ListSnapshots,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitChainRequest {
    pub chain_id: String,
    pub initial_height: Height,
    pub app_state: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeRequest {
    pub height: Height,
    pub time: String,
    pub proposer_address: String,
    /// Raw transactions, base64-encoded.
    pub txs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfoResponse {
    pub last_block_height: Height,
    #[serde(default)]
    pub last_block_app_hash: Bytes32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitChainResponse {
    #[serde(default)]
    pub app_hash: Bytes32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeResponse {
    pub app_hash: Bytes32,
    #[serde(default)]
    pub tx_results: serde_json::Value,
    #[serde(default)]
    pub validator_updates: Vec<ValidatorUpdate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub height: Height,
    pub format: u32,
    pub chunks: u32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SnapshotsResponse {
    #[serde(default)]
    pub snapshots: Vec<Snapshot>,
}

#[derive(Debug, Deserialize)]
struct ResponseEnvelope<T> {
    #[serde(default)]
    error: Option<String>,
    result: Option<T>,
}

/// The application side of the engine, as the engine sees it.
#[async_trait]
pub trait AppConn: Send {
    async fn info(&mut self) -> Result<InfoResponse, EngineError>;
    async fn init_chain(&mut self, req: InitChainRequest)
        -> Result<InitChainResponse, EngineError>;
    async fn finalize_block(
        &mut self,
        req: FinalizeRequest,
    ) -> Result<FinalizeResponse, EngineError>;
    async fn list_snapshots(&mut self) -> Result<Vec<Snapshot>, EngineError>;
}

/// TCP implementation of [`AppConn`].
pub struct SocketApp {
    stream: BufStream<TcpStream>,
}

impl SocketApp {
    pub async fn connect(addr: &str) -> Result<Self, EngineError> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            stream: BufStream::new(stream),
        })
    }

    async fn call<T: DeserializeOwned>(&mut self, request: &AppRequest) -> Result<T, EngineError> {
        let mut frame = serde_json::to_vec(request)
            .map_err(|e| EngineError::App(format!("failed to encode request: {e}")))?;
        frame.push(b'\n');
        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;

        let mut line = String::new();
        let read = self.stream.read_line(&mut line).await?;
        if read == 0 {
            return Err(EngineError::App("connection closed by app".to_string()));
        }

        let envelope: ResponseEnvelope<T> = serde_json::from_str(&line)
            .map_err(|e| EngineError::App(format!("failed to decode response: {e}")))?;
        if let Some(error) = envelope.error {
            return Err(EngineError::App(error));
        }
        envelope
            .result
            .ok_or_else(|| EngineError::App("response carried no result".to_string()))
    }
}

#[async_trait]
impl AppConn for SocketApp {
    async fn info(&mut self) -> Result<InfoResponse, EngineError> {
        self.call(&AppRequest::Info).await
    }

    async fn init_chain(
        &mut self,
        req: InitChainRequest,
    ) -> Result<InitChainResponse, EngineError> {
        self.call(&AppRequest::InitChain(req)).await
    }

    async fn finalize_block(
        &mut self,
        req: FinalizeRequest,
    ) -> Result<FinalizeResponse, EngineError> {
        self.call(&AppRequest::FinalizeBlock(req)).await
    }

    async fn list_snapshots(&mut self) -> Result<Vec<Snapshot>, EngineError> {
        let response: SnapshotsResponse = self.call(&AppRequest::ListSnapshots).await?;
        Ok(response.snapshots)
    }
}
