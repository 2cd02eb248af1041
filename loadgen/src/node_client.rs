use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use log::{debug, trace};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

use crate::{
    client::{ChainClient, SignedTx, TxResponse},
    error::ClientError,
};

/// Timeouts of the HTTP transport
#[derive(Debug, Clone)]
pub struct NodeClientConfig {
    pub request_timeout: Duration,
    pub connection_timeout: Duration,
}

impl Default for NodeClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(10),
        }
    }
}

/// JSON-RPC request structure
#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u32,
    method: &'a str,
    params: Value,
}

/// JSON-RPC response structure
#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

/// JSON-RPC error structure
#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

// Accept addresses with or without scheme
pub fn parse_endpoint(address: &str) -> Result<Url, url::ParseError> {
    if address.starts_with("http://") || address.starts_with("https://") {
        Url::parse(address)
    } else {
        Url::parse(&format!("http://{}", address))
    }
}

pub(crate) fn build_http_client(config: &NodeClientConfig) -> Result<Client, ClientError> {
    Client::builder()
        .timeout(config.request_timeout)
        .connect_timeout(config.connection_timeout)
        .build()
        .map_err(|e| ClientError::Transport(e.to_string()))
}

fn map_send_error(e: reqwest::Error, timeout: Duration) -> ClientError {
    if e.is_timeout() {
        ClientError::Timeout(timeout)
    } else if e.is_connect() {
        ClientError::Transport(format!("connection failed: {}", e))
    } else {
        ClientError::Transport(format!("network error: {}", e))
    }
}

/// Minimal JSON-RPC 2.0 caller over HTTP POST.
///
/// No retry happens here: whether a failed call is retried is decided by the
/// call site.
#[derive(Debug, Clone)]
pub struct JsonRpcTransport {
    client: Client,
    url: Url,
    timeout: Duration,
}

impl JsonRpcTransport {
    pub fn new(client: Client, url: Url, timeout: Duration) -> Self {
        Self {
            client,
            url,
            timeout,
        }
    }

    pub async fn call(&self, method: &str, params: Value) -> Result<Value, ClientError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: rand::random::<u32>(),
            method,
            params,
        };

        if log::log_enabled!(log::Level::Trace) {
            trace!("JSON-RPC call to {}: {}", self.url, method);
        }

        let response = self
            .client
            .post(self.url.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| map_send_error(e, self.timeout))?;

        if !response.status().is_success() {
            return Err(ClientError::Transport(format!(
                "HTTP error {}: {}",
                response.status().as_u16(),
                response.status().canonical_reason().unwrap_or("Unknown error")
            )));
        }

        let rpc_response: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| ClientError::Malformed(format!("invalid JSON-RPC response: {}", e)))?;

        if let Some(error) = rpc_response.error {
            let message = match error.data {
                Some(Value::String(data)) => format!("{} ({})", error.message, data),
                _ => error.message,
            };
            return Err(ClientError::Rpc {
                code: error.code,
                message,
            });
        }

        rpc_response
            .result
            .ok_or_else(|| ClientError::Malformed("no result in response".into()))
    }
}

#[derive(Debug, Deserialize)]
struct BroadcastResult {
    code: u32,
    hash: String,
    #[serde(default)]
    log: String,
}

/// Chain client talking to a node.
///
/// Broadcasts go through the consensus JSON-RPC endpoint (`broadcast_tx_sync`),
/// account lookups, simulations and profile queries through the REST query
/// gateway.
pub struct NodeClient {
    rpc: JsonRpcTransport,
    http: Client,
    query_url: Url,
    config: NodeClientConfig,
}

impl NodeClient {
    pub fn with_config(
        rpc_address: &str,
        query_address: &str,
        config: NodeClientConfig,
    ) -> Result<Self, ClientError> {
        let rpc_url = parse_endpoint(rpc_address)
            .map_err(|e| ClientError::Transport(format!("invalid RPC address: {}", e)))?;
        let mut query_url = parse_endpoint(query_address)
            .map_err(|e| ClientError::Transport(format!("invalid query address: {}", e)))?;
        // Query paths are joined onto the gateway URL, which keeps a path
        // prefix only when it ends with a slash
        if !query_url.path().ends_with('/') {
            let path = format!("{}/", query_url.path());
            query_url.set_path(&path);
        }

        let http = build_http_client(&config)?;
        Ok(Self {
            rpc: JsonRpcTransport::new(http.clone(), rpc_url, config.request_timeout),
            http,
            query_url,
            config,
        })
    }

    fn query_endpoint(&self, path: &str) -> Result<Url, ClientError> {
        self.query_url
            .join(path)
            .map_err(|e| ClientError::Transport(format!("invalid query path {}: {}", path, e)))
    }

    async fn get_json(&self, path: &str) -> Result<Option<Value>, ClientError> {
        let url = self.query_endpoint(path)?;
        if log::log_enabled!(log::Level::Trace) {
            trace!("GET {}", url);
        }

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| map_send_error(e, self.config.request_timeout))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(ClientError::Transport(format!(
                "HTTP error {} on {}",
                response.status().as_u16(),
                path
            )));
        }

        response.json().await.map(Some).map_err(ClientError::from)
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, ClientError> {
        let url = self.query_endpoint(path)?;
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| map_send_error(e, self.config.request_timeout))?;

        let status = response.status();
        let value: Value = response.json().await.map_err(ClientError::from)?;
        if !status.is_success() {
            // the gateway reports failed simulations as {"code", "message"}
            let code = value["code"].as_i64().unwrap_or(status.as_u16() as i64);
            let message = value["message"].as_str().unwrap_or("unknown error").to_owned();
            return Err(ClientError::Rpc { code, message });
        }
        Ok(value)
    }
}

// Unpack the account interface returned by the auth module.
// Vesting and module accounts wrap the base account one or two levels deep.
pub fn sequence_from_account(account: &Value) -> Result<u64, ClientError> {
    let mut current = account;
    for _ in 0..3 {
        if let Some(sequence) = current.get("sequence") {
            return match sequence {
                Value::String(s) => s
                    .parse()
                    .map_err(|_| ClientError::Malformed(format!("invalid sequence '{}'", s))),
                Value::Number(n) => n
                    .as_u64()
                    .ok_or_else(|| ClientError::Malformed(format!("invalid sequence {}", n))),
                other => Err(ClientError::Malformed(format!(
                    "unexpected sequence value {}",
                    other
                ))),
            };
        }

        current = current
            .get("base_account")
            .or_else(|| current.get("base_vesting_account"))
            .ok_or_else(|| {
                ClientError::Malformed("account has no sequence nor base account".into())
            })?;
    }

    Err(ClientError::Malformed("account nesting too deep".into()))
}

#[async_trait]
impl ChainClient for NodeClient {
    async fn account_sequence(&self, address: &str) -> Result<u64, ClientError> {
        let path = format!("cosmos/auth/v1beta1/accounts/{}", address);
        let response = self
            .get_json(&path)
            .await?
            .ok_or_else(|| ClientError::Rpc {
                code: 404,
                message: format!("account {} not found", address),
            })?;

        let account = response
            .get("account")
            .ok_or_else(|| ClientError::Malformed("missing account field".into()))?;
        sequence_from_account(account)
    }

    async fn simulate(&self, tx: &SignedTx) -> Result<u64, ClientError> {
        let body = json!({ "tx_bytes": BASE64.encode(&tx.bytes) });
        let response = self.post_json("cosmos/tx/v1beta1/simulate", &body).await?;

        let gas_used = &response["gas_info"]["gas_used"];
        let gas = match gas_used {
            Value::String(s) => s.parse().ok(),
            Value::Number(n) => n.as_u64(),
            _ => None,
        };
        gas.ok_or_else(|| ClientError::Malformed(format!("invalid gas_used {}", gas_used)))
    }

    async fn broadcast_sync(&self, tx: &SignedTx) -> Result<TxResponse, ClientError> {
        let params = json!({ "tx": BASE64.encode(&tx.bytes) });
        let result = self.rpc.call("broadcast_tx_sync", params).await?;

        let result: BroadcastResult = serde_json::from_value(result)
            .map_err(|e| ClientError::Malformed(format!("invalid broadcast result: {}", e)))?;

        if log::log_enabled!(log::Level::Debug) {
            debug!("broadcast_tx_sync returned code {} for {}", result.code, result.hash);
        }

        Ok(TxResponse {
            code: result.code,
            txhash: result.hash,
            raw_log: result.log,
        })
    }

    async fn profile(&self, address: &str) -> Result<Option<Value>, ClientError> {
        let path = format!("desmos/profiles/v3/profiles/{}", address);
        Ok(self
            .get_json(&path)
            .await?
            .and_then(|mut response| match response.get_mut("profile") {
                Some(Value::Null) | None => None,
                Some(profile) => Some(profile.take()),
            }))
    }
}

impl std::fmt::Debug for NodeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeClient")
            .field("rpc_url", &self.rpc.url)
            .field("query_url", &self.query_url)
            .finish()
    }
}
