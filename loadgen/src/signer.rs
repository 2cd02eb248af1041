use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use log::debug;
use serde_json::{json, Value};

use crate::{
    client::{SignedTx, Signer},
    error::ClientError,
    node_client::{build_http_client, parse_endpoint, JsonRpcTransport, NodeClientConfig},
    transaction::TransactionEnvelope,
};

/// Account material sent to the signing service.
#[derive(Clone)]
pub struct AccountKey {
    pub mnemonic: String,
    pub hd_path: String,
    pub bech32_prefix: String,
}

impl std::fmt::Debug for AccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountKey")
            .field("hd_path", &self.hd_path)
            .field("bech32_prefix", &self.bech32_prefix)
            .finish_non_exhaustive()
    }
}

/// Signer backed by a local signing service.
///
/// Key derivation and transaction encoding live in the service; this side
/// only ships the envelope and gets back the encoded, signed bytes. The
/// account address is derived once when the signer is created.
pub struct RemoteSigner {
    rpc: JsonRpcTransport,
    key: AccountKey,
    chain_id: Option<String>,
    address: String,
}

impl RemoteSigner {
    pub async fn connect(
        signer_address: &str,
        key: AccountKey,
        chain_id: Option<String>,
        config: &NodeClientConfig,
    ) -> Result<Self, ClientError> {
        let url = parse_endpoint(signer_address)
            .map_err(|e| ClientError::Signer(format!("invalid signer address: {}", e)))?;
        let rpc = JsonRpcTransport::new(build_http_client(config)?, url, config.request_timeout);

        let derived = rpc
            .call(
                "derive_address",
                json!({
                    "mnemonic": key.mnemonic,
                    "hd_path": key.hd_path,
                    "bech32_prefix": key.bech32_prefix,
                }),
            )
            .await?;

        let address = derived
            .as_str()
            .or_else(|| derived.get("address").and_then(Value::as_str))
            .ok_or_else(|| ClientError::Signer("signing service returned no address".into()))?
            .to_owned();

        if log::log_enabled!(log::Level::Debug) {
            debug!("Derived {} at {}", address, key.hd_path);
        }

        Ok(Self {
            rpc,
            key,
            chain_id,
            address,
        })
    }
}

#[async_trait]
impl Signer for RemoteSigner {
    fn address(&self) -> &str {
        &self.address
    }

    async fn sign(&self, envelope: &TransactionEnvelope) -> Result<SignedTx, ClientError> {
        let result = self
            .rpc
            .call(
                "sign_transaction",
                json!({
                    "mnemonic": self.key.mnemonic,
                    "hd_path": self.key.hd_path,
                    "chain_id": self.chain_id,
                    "tx": envelope,
                }),
            )
            .await
            .map_err(|e| match e {
                ClientError::Rpc { code, message } => {
                    ClientError::Signer(format!("signing failed ({}): {}", code, message))
                }
                other => other,
            })?;

        let encoded = result
            .get("tx_bytes")
            .and_then(Value::as_str)
            .ok_or_else(|| ClientError::Signer("signing service returned no tx_bytes".into()))?;
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| ClientError::Signer(format!("invalid tx_bytes encoding: {}", e)))?;

        Ok(SignedTx { bytes })
    }
}

impl std::fmt::Debug for RemoteSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSigner")
            .field("address", &self.address)
            .field("key", &self.key)
            .finish()
    }
}
