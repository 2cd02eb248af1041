#![allow(dead_code)]

use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use chain_loadgen::{
    messages::{BANK_SEND_TYPE_URL, CREATE_POST_TYPE_URL, SAVE_PROFILE_TYPE_URL},
    transaction::TransactionEnvelope,
    ChainClient, ClientError, RunConfig, Session, SignedTx, Signer, TxResponse,
};
use clap::Parser;
use log::{Level, LevelFilter, Log, Metadata, Record};
use serde_json::{json, Value};

pub const GAS_USED: u64 = 50_000;
pub const GAS_PRICE: &str = "0.02udaric";
pub const INSUFFICIENT_FEE_CODE: u32 = 13;
pub const WRONG_SEQUENCE_CODE: u32 = 32;

/// A transaction the stub chain accepted.
#[derive(Debug, Clone)]
pub struct Accepted {
    pub address: String,
    pub sequence: u64,
    pub messages: Vec<Value>,
}

impl Accepted {
    pub fn type_url(&self) -> &str {
        self.messages
            .first()
            .and_then(|m| m["@type"].as_str())
            .unwrap_or_default()
    }
}

#[derive(Default)]
struct State {
    sequences: HashMap<String, u64>,
    profiles: HashSet<String>,
    accepted: Vec<Accepted>,
    post_attempts: u64,
    rejected: u64,
    mismatches: u64,
    simulations: u64,
    in_flight: usize,
    peak_in_flight: usize,
}

/// In-memory chain: checks sequences the way a node does on CheckTx and
/// records everything it accepted.
#[derive(Default)]
pub struct StubChain {
    state: Mutex<State>,
    // Reject every Nth post broadcast carrying the expected sequence with an
    // insufficient fee code
    fail_every: Option<u64>,
    fail_simulation: bool,
    fail_profile_query: bool,
    // Time every call takes
    latency: Duration,
}

impl StubChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_every(mut self, n: u64) -> Self {
        self.fail_every = Some(n);
        self
    }

    pub fn failing_simulation(mut self) -> Self {
        self.fail_simulation = true;
        self
    }

    pub fn failing_profile_query(mut self) -> Self {
        self.fail_profile_query = true;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_sequence(self, address: &str, sequence: u64) -> Self {
        self.state.lock().unwrap().sequences.insert(address.to_owned(), sequence);
        self
    }

    pub fn with_profile(self, address: &str) -> Self {
        self.state.lock().unwrap().profiles.insert(address.to_owned());
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    // Simulate a transaction sent from outside the load generator
    pub fn bump_sequence(&self, address: &str) {
        *self
            .state
            .lock()
            .unwrap()
            .sequences
            .entry(address.to_owned())
            .or_default() += 1;
    }

    pub fn sequence_of(&self, address: &str) -> u64 {
        self.state
            .lock()
            .unwrap()
            .sequences
            .get(address)
            .copied()
            .unwrap_or_default()
    }

    pub fn accepted(&self) -> Vec<Accepted> {
        self.state.lock().unwrap().accepted.clone()
    }

    pub fn accepted_of_type(&self, type_url: &str) -> Vec<Accepted> {
        self.accepted()
            .into_iter()
            .filter(|tx| tx.type_url() == type_url)
            .collect()
    }

    pub fn post_sequences(&self, address: &str) -> Vec<u64> {
        self.accepted_of_type(CREATE_POST_TYPE_URL)
            .into_iter()
            .filter(|tx| tx.address == address)
            .map(|tx| tx.sequence)
            .collect()
    }

    pub fn rejected(&self) -> u64 {
        self.state.lock().unwrap().rejected
    }

    pub fn mismatches(&self) -> u64 {
        self.state.lock().unwrap().mismatches
    }

    // Highest number of broadcasts the node was handling at once
    pub fn peak_in_flight(&self) -> usize {
        self.state.lock().unwrap().peak_in_flight
    }

    pub fn simulations(&self) -> u64 {
        self.state.lock().unwrap().simulations
    }

    pub fn has_profile(&self, address: &str) -> bool {
        self.state.lock().unwrap().profiles.contains(address)
    }

    async fn delay(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

fn decode(tx: &SignedTx) -> Result<(String, u64, Vec<Value>), ClientError> {
    let value: Value =
        serde_json::from_slice(&tx.bytes).map_err(|e| ClientError::Malformed(e.to_string()))?;
    let address = value["signer"].as_str().unwrap_or_default().to_owned();
    let sequence = value["tx"]["sequence"].as_u64().unwrap_or_default();
    let messages = value["tx"]["messages"].as_array().cloned().unwrap_or_default();
    Ok((address, sequence, messages))
}

#[async_trait]
impl ChainClient for StubChain {
    async fn account_sequence(&self, address: &str) -> Result<u64, ClientError> {
        self.delay().await;
        Ok(self.sequence_of(address))
    }

    async fn simulate(&self, tx: &SignedTx) -> Result<u64, ClientError> {
        self.delay().await;
        decode(tx)?;
        let mut state = self.state.lock().unwrap();
        state.simulations += 1;
        if self.fail_simulation {
            return Err(ClientError::Rpc {
                code: 3,
                message: "simulation failed".into(),
            });
        }
        Ok(GAS_USED)
    }

    async fn broadcast_sync(&self, tx: &SignedTx) -> Result<TxResponse, ClientError> {
        {
            let mut state = self.state.lock().unwrap();
            state.in_flight += 1;
            state.peak_in_flight = state.peak_in_flight.max(state.in_flight);
        }
        self.delay().await;
        let (address, sequence, messages) = decode(tx)?;
        let mut state = self.state.lock().unwrap();
        state.in_flight -= 1;

        let expected = state.sequences.get(&address).copied().unwrap_or_default();
        if sequence != expected {
            state.rejected += 1;
            state.mismatches += 1;
            return Ok(TxResponse {
                code: WRONG_SEQUENCE_CODE,
                txhash: String::new(),
                raw_log: format!(
                    "account sequence mismatch, expected {}, got {}: incorrect account sequence",
                    expected, sequence
                ),
            });
        }

        let is_post = messages
            .first()
            .and_then(|m| m["@type"].as_str())
            .is_some_and(|t| t == CREATE_POST_TYPE_URL);
        if is_post {
            state.post_attempts += 1;
            if let Some(n) = self.fail_every {
                if state.post_attempts % n == 0 {
                    state.rejected += 1;
                    return Ok(TxResponse {
                        code: INSUFFICIENT_FEE_CODE,
                        txhash: String::new(),
                        raw_log: "insufficient fee".into(),
                    });
                }
            }
        }

        for message in &messages {
            match message["@type"].as_str() {
                Some(SAVE_PROFILE_TYPE_URL) => {
                    state.profiles.insert(address.clone());
                }
                Some(BANK_SEND_TYPE_URL) => {
                    if let Some(to) = message["to_address"].as_str() {
                        state.sequences.entry(to.to_owned()).or_default();
                    }
                }
                _ => {}
            }
        }

        state.sequences.insert(address.clone(), sequence + 1);
        let txhash = format!("{}-{}", address, sequence);
        state.accepted.push(Accepted {
            address,
            sequence,
            messages,
        });
        Ok(TxResponse {
            code: 0,
            txhash,
            raw_log: String::new(),
        })
    }

    async fn profile(&self, address: &str) -> Result<Option<Value>, ClientError> {
        self.delay().await;
        if self.fail_profile_query {
            return Err(ClientError::Transport("connection reset".into()));
        }
        let state = self.state.lock().unwrap();
        Ok(state
            .profiles
            .contains(address)
            .then(|| json!({ "dtag": "tester", "creator": address })))
    }
}

/// Signer encoding the envelope as JSON, so the stub chain can read it back.
pub struct StubSigner {
    address: String,
    fail: bool,
}

impl StubSigner {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_owned(),
            fail: false,
        }
    }

    pub fn failing(address: &str) -> Self {
        Self {
            address: address.to_owned(),
            fail: true,
        }
    }
}

#[async_trait]
impl Signer for StubSigner {
    fn address(&self) -> &str {
        &self.address
    }

    async fn sign(&self, envelope: &TransactionEnvelope) -> Result<SignedTx, ClientError> {
        if self.fail {
            return Err(ClientError::Signer("key not found".into()));
        }
        let bytes = serde_json::to_vec(&json!({ "signer": self.address, "tx": envelope }))
            .map_err(|e| ClientError::Signer(e.to_string()))?;
        Ok(SignedTx { bytes })
    }
}

pub fn worker_address(index: usize) -> String {
    format!("desmos1worker{}", index)
}

pub fn session(chain: &Arc<StubChain>, signer: StubSigner) -> Session {
    Session::new(
        Arc::clone(chain) as Arc<dyn ChainClient>,
        Arc::new(signer),
        GAS_PRICE.parse().unwrap(),
        Duration::from_secs(5),
    )
}

pub fn sessions(chain: &Arc<StubChain>, count: usize) -> Vec<Session> {
    (0..count)
        .map(|i| session(chain, StubSigner::new(&worker_address(i))))
        .collect()
}

// Flags pinned so exported environment variables cannot change a test run
const PINNED_FLAGS: [(&str, &str); 9] = [
    ("--settle-delay", "0s"),
    ("--query-address", "http://127.0.0.1:1317"),
    ("--signer-address", "http://127.0.0.1:8090"),
    ("--dispatch-mode", "sequential"),
    ("--account-amount", "1"),
    ("--gas-adjustment", "2"),
    ("--funding-margin-percent", "20"),
    ("--request-timeout", "5s"),
    ("--hd-path-template", "44'/852'/0'/0/{index}"),
];

// Configuration with no settle delay, overridable through extra flags
pub fn run_config(round: u64, duration: &str, tick: &str, extra: &[&str]) -> RunConfig {
    let round = round.to_string();
    let mut args = vec![
        "chain-loadgen",
        "--mnemonic",
        "abandon abandon about",
        "--subspace-id",
        "1",
        "--msg-size",
        "2",
        "--round",
        &round,
        "--duration",
        duration,
        "--tick-interval",
        tick,
        "--gas-price",
        GAS_PRICE,
        "--disable-file-logging",
    ];
    for (flag, value) in PINNED_FLAGS {
        if !extra.contains(&flag) {
            args.extend_from_slice(&[flag, value]);
        }
    }
    args.extend_from_slice(extra);
    let mut config = RunConfig::try_parse_from(args).unwrap();
    // switches and optional limits can only be turned on from the command line
    if !extra.contains(&"--max-run-time") {
        config.max_run_time = None;
    }
    config.resync_on_sequence_mismatch = extra.contains(&"--resync-on-sequence-mismatch");
    config.log.log_broadcasts = extra.contains(&"--log-broadcasts");
    config.validate().unwrap();
    config
}

pub fn is_contiguous(sequences: &[u64], from: u64) -> bool {
    let mut sorted = sequences.to_vec();
    sorted.sort_unstable();
    sorted.iter().copied().eq(from..from + sequences.len() as u64)
}

thread_local! {
    static CAPTURED: RefCell<Vec<(Level, String)>> = const { RefCell::new(Vec::new()) };
}

// Keeps the records of the current thread, which is where a
// current-thread tokio test runs its futures
struct CaptureLogger;

impl Log for CaptureLogger {
    fn enabled(&self, _: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        CAPTURED.with(|c| c.borrow_mut().push((record.level(), record.args().to_string())));
    }

    fn flush(&self) {}
}

static LOGGER: CaptureLogger = CaptureLogger;

// Start recording log lines emitted on this thread
pub fn capture_logs() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Trace);
    }
    CAPTURED.with(|c| c.borrow_mut().clear());
}

pub fn captured(level: Level, containing: &str) -> usize {
    CAPTURED.with(|c| {
        c.borrow()
            .iter()
            .filter(|(l, line)| *l == level && line.contains(containing))
            .count()
    })
}
