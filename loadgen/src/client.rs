use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{error::ClientError, transaction::GasPrice, transaction::TransactionEnvelope};

/// Signed transaction bytes, ready to be simulated or broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTx {
    pub bytes: Vec<u8>,
}

/// Node answer to a synchronous broadcast (CheckTx acceptance, not commit).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxResponse {
    pub code: u32,
    pub txhash: String,
    #[serde(default)]
    pub raw_log: String,
}

impl TxResponse {
    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

/// Queries and submissions against a chain node.
#[async_trait]
pub trait ChainClient: Send + Sync {
    // Current on-chain sequence of the account
    async fn account_sequence(&self, address: &str) -> Result<u64, ClientError>;

    // Gas used by the transaction when executed in simulation mode
    async fn simulate(&self, tx: &SignedTx) -> Result<u64, ClientError>;

    async fn broadcast_sync(&self, tx: &SignedTx) -> Result<TxResponse, ClientError>;

    // Identity record of the account, None if it was never registered
    async fn profile(&self, address: &str) -> Result<Option<Value>, ClientError>;
}

/// Key holder of one account.
#[async_trait]
pub trait Signer: Send + Sync {
    fn address(&self) -> &str;

    async fn sign(&self, envelope: &TransactionEnvelope) -> Result<SignedTx, ClientError>;
}

/// Everything needed to talk to the chain on behalf of one account.
#[derive(Clone)]
pub struct Session {
    pub client: Arc<dyn ChainClient>,
    pub signer: Arc<dyn Signer>,
    pub gas_price: GasPrice,
    pub request_timeout: Duration,
}

impl Session {
    pub fn new(
        client: Arc<dyn ChainClient>,
        signer: Arc<dyn Signer>,
        gas_price: GasPrice,
        request_timeout: Duration,
    ) -> Self {
        Self {
            client,
            signer,
            gas_price,
            request_timeout,
        }
    }

    pub fn address(&self) -> &str {
        self.signer.address()
    }

    // Run a chain call bounded by the request timeout
    pub async fn call<T, F>(&self, fut: F) -> Result<T, ClientError>
    where
        F: Future<Output = Result<T, ClientError>>,
    {
        with_timeout(self.request_timeout, fut).await
    }
}

pub async fn with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T, ClientError>
where
    F: Future<Output = Result<T, ClientError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(res) => res,
        Err(_) => Err(ClientError::Timeout(timeout)),
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("address", &self.address())
            .field("gas_price", &self.gas_price)
            .finish()
    }
}
