use std::time::Duration;

use clap::{Parser, ValueEnum};
use log::LevelFilter;
use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::{node_client::parse_endpoint, node_client::NodeClientConfig, transaction::GasPrice};

/// Default values for configuration
pub mod defaults {
    pub const RPC_ADDRESS: &str = "http://127.0.0.1:26657";
    pub const QUERY_ADDRESS: &str = "http://127.0.0.1:1317";
    pub const SIGNER_ADDRESS: &str = "http://127.0.0.1:8090";
    pub const GAS_PRICE: &str = "0.02udaric";
    pub const GAS_ADJUSTMENT: f64 = 2.0;
    pub const BECH32_PREFIX: &str = "desmos";
    pub const HD_PATH_TEMPLATE: &str = "44'/852'/0'/0/{index}";
    pub const TICK_INTERVAL: &str = "100ms";
    pub const SETTLE_DELAY: &str = "5s";
    pub const REQUEST_TIMEOUT: &str = "30s";
    pub const CONNECT_TIMEOUT: &str = "10s";
    pub const FUNDING_MARGIN_PERCENT: u32 = 20;
    pub const LOGS_PATH: &str = "logs/";
    pub const FILENAME_LOG: &str = "chain-loadgen.log";

    pub const MAX_FUNDING_MARGIN_PERCENT: u32 = 1000;
    pub const MIN_GAS_ADJUSTMENT: f64 = 1.0;
}

const HD_PATH_INDEX_PLACEHOLDER: &str = "{index}";

/// How a worker spends the quota of a tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    // One broadcast at a time, each waiting for the previous one
    #[default]
    Sequential,
    // Up to the quota in flight at once, reserving from a shared sequence
    Concurrent,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, clap::Args, Serialize)]
pub struct LogConfig {
    /// Set log level
    #[clap(long, env = "LOG_LEVEL", value_enum, default_value_t)]
    pub log_level: LogLevel,
    /// Disable the log file
    #[clap(long)]
    pub disable_file_logging: bool,
    /// Disable the usage of colors in log
    #[clap(long)]
    pub disable_log_color: bool,
    /// Logs directory
    ///
    /// It must end with a / to be a valid folder.
    #[clap(long, default_value_t = String::from(defaults::LOGS_PATH))]
    pub logs_path: String,
    /// Log filename, stored in the logs directory
    #[clap(long, default_value_t = String::from(defaults::FILENAME_LOG))]
    pub filename_log: String,
    /// Log every accepted broadcast (sequence and tx hash) at info level
    #[clap(long, env = "LOG_BROADCASTS")]
    pub log_broadcasts: bool,
}

/// Validated settings of a load run.
///
/// Read once at startup from flags, environment and `.env`, then shared
/// read-only by the orchestrator and every worker.
#[derive(Debug, Clone, Parser, Serialize)]
#[command(name = "chain-loadgen")]
#[command(version)]
#[command(about = "Drive funded accounts to submit a paced stream of transactions")]
pub struct RunConfig {
    /// Recovery phrase the worker accounts are derived from
    #[clap(long, env = "ACCOUNT_RECOVERY_PHRASE", hide_env_values = true, default_value = "")]
    #[serde(serialize_with = "redact")]
    pub mnemonic: String,

    /// Node JSON-RPC endpoint used for broadcasts
    #[clap(long, env = "RPC_ADDRESS", default_value_t = String::from(defaults::RPC_ADDRESS))]
    pub rpc_address: String,

    /// Node query endpoint (accounts, simulation, profiles)
    #[clap(long, env = "GRPC_ADDRESS", default_value_t = String::from(defaults::QUERY_ADDRESS))]
    pub query_address: String,

    /// Signing service endpoint
    #[clap(long, env = "SIGNER_ADDRESS", default_value_t = String::from(defaults::SIGNER_ADDRESS))]
    pub signer_address: String,

    /// Chain id passed to the signer, resolved by the signer when absent
    #[clap(long, env = "CHAIN_ID")]
    pub chain_id: Option<String>,

    /// Address prefix of the derived accounts
    #[clap(long, env = "BECH32_PREFIX", default_value_t = String::from(defaults::BECH32_PREFIX))]
    pub bech32_prefix: String,

    /// Fee per gas unit, e.g. 0.02udaric
    #[clap(long, env = "GAS_PRICE", default_value = defaults::GAS_PRICE)]
    pub gas_price: GasPrice,

    /// Multiplier applied to simulated gas
    #[clap(long, env = "GAS_ADJUSTMENT", default_value_t = defaults::GAS_ADJUSTMENT)]
    pub gas_adjustment: f64,

    /// Subspace targeted by the generated posts
    #[clap(long, env = "SUBSPACE_ID")]
    pub subspace_id: u64,

    /// Number of messages per transaction
    #[clap(long, env = "MSG_SIZE")]
    pub msg_size: usize,

    /// Number of successful broadcasts to reach across all accounts
    #[clap(long, env = "ROUND")]
    pub round: u64,

    /// Window the round is paced over, e.g. 10s or 5m
    #[clap(long, env = "DURATION", value_parser = humantime::parse_duration)]
    pub duration: Duration,

    /// Number of concurrent worker accounts
    #[clap(long, env = "ACCOUNT_AMOUNT", default_value_t = 1)]
    pub account_amount: usize,

    /// Derivation path of worker accounts, {index} is replaced by the worker index
    #[clap(long, env = "HD_PATH_TEMPLATE", default_value_t = String::from(defaults::HD_PATH_TEMPLATE))]
    pub hd_path_template: String,

    /// Pacing clock resolution
    #[clap(long, env = "TICK_INTERVAL", value_parser = humantime::parse_duration, default_value = defaults::TICK_INTERVAL)]
    pub tick_interval: Duration,

    /// Dispatch strategy inside a tick
    #[clap(long, env = "DISPATCH_MODE", value_enum, default_value_t)]
    pub dispatch_mode: DispatchMode,

    /// Wait after funding and after bootstrap for the chain to settle
    #[clap(long, env = "SETTLE_DELAY", value_parser = humantime::parse_duration, default_value = defaults::SETTLE_DELAY)]
    pub settle_delay: Duration,

    /// Extra rounds funded to each worker, in percent
    #[clap(long, env = "FUNDING_MARGIN_PERCENT", default_value_t = defaults::FUNDING_MARGIN_PERCENT)]
    pub funding_margin_percent: u32,

    /// Timeout of every chain call
    #[clap(long, env = "REQUEST_TIMEOUT", value_parser = humantime::parse_duration, default_value = defaults::REQUEST_TIMEOUT)]
    pub request_timeout: Duration,

    /// Timeout to establish a connection
    #[clap(long, env = "CONNECT_TIMEOUT", value_parser = humantime::parse_duration, default_value = defaults::CONNECT_TIMEOUT)]
    pub connect_timeout: Duration,

    /// Stop the timed phase after this long even if the round is not reached
    #[clap(long, env = "MAX_RUN_TIME", value_parser = humantime::parse_duration)]
    pub max_run_time: Option<Duration>,

    /// Re-read the sequence from the chain when a broadcast is rejected for a wrong sequence
    #[clap(long, env = "RESYNC_ON_SEQUENCE_MISMATCH")]
    pub resync_on_sequence_mismatch: bool,

    #[command(flatten)]
    pub log: LogConfig,
}

fn redact<S: Serializer>(value: &str, s: S) -> Result<S::Ok, S::Error> {
    if value.trim().is_empty() {
        s.serialize_str("")
    } else {
        s.serialize_str("<redacted>")
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("missing account mnemonic")]
    MissingMnemonic,
    #[error("account amount must be at least 1, got {0}")]
    InvalidAccountAmount(usize),
    #[error("round must be at least 1")]
    InvalidRound,
    #[error("duration must be greater than zero")]
    InvalidDuration,
    #[error("message size must be at least 1")]
    InvalidMessageSize,
    #[error("tick interval {tick:?} must be greater than zero and at most the duration {duration:?}")]
    InvalidTickInterval { tick: Duration, duration: Duration },
    #[error("invalid {field}: '{address}' - must be a valid HTTP/HTTPS URL")]
    InvalidEndpoint { field: &'static str, address: String },
    #[error("gas adjustment {0} must be at least {min}", min = defaults::MIN_GAS_ADJUSTMENT)]
    InvalidGasAdjustment(f64),
    #[error("funding margin {0}% must be at most {max}%", max = defaults::MAX_FUNDING_MARGIN_PERCENT)]
    InvalidFundingMargin(u32),
    #[error("HD path template '{0}' must contain {{index}} when more than one account is used")]
    InvalidHdPathTemplate(String),
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mnemonic.trim().is_empty() {
            return Err(ConfigError::MissingMnemonic);
        }
        if self.account_amount < 1 {
            return Err(ConfigError::InvalidAccountAmount(self.account_amount));
        }
        if self.round < 1 {
            return Err(ConfigError::InvalidRound);
        }
        if self.duration.is_zero() {
            return Err(ConfigError::InvalidDuration);
        }
        if self.msg_size < 1 {
            return Err(ConfigError::InvalidMessageSize);
        }
        if self.tick_interval.is_zero() || self.tick_interval > self.duration {
            return Err(ConfigError::InvalidTickInterval {
                tick: self.tick_interval,
                duration: self.duration,
            });
        }

        for (field, address) in [
            ("rpc address", &self.rpc_address),
            ("query address", &self.query_address),
            ("signer address", &self.signer_address),
        ] {
            if parse_endpoint(address).is_err() {
                return Err(ConfigError::InvalidEndpoint {
                    field,
                    address: address.clone(),
                });
            }
        }

        if !(self.gas_adjustment >= defaults::MIN_GAS_ADJUSTMENT) {
            return Err(ConfigError::InvalidGasAdjustment(self.gas_adjustment));
        }
        if self.funding_margin_percent > defaults::MAX_FUNDING_MARGIN_PERCENT {
            return Err(ConfigError::InvalidFundingMargin(self.funding_margin_percent));
        }
        if self.account_amount > 1 && !self.hd_path_template.contains(HD_PATH_INDEX_PLACEHOLDER) {
            return Err(ConfigError::InvalidHdPathTemplate(self.hd_path_template.clone()));
        }

        Ok(())
    }

    pub fn hd_path(&self, index: usize) -> String {
        self.hd_path_template
            .replace(HD_PATH_INDEX_PLACEHOLDER, &index.to_string())
    }

    pub fn node_client_config(&self) -> NodeClientConfig {
        NodeClientConfig {
            request_timeout: self.request_timeout,
            connection_timeout: self.connect_timeout,
        }
    }

    // Split the round across workers, the remainder going one apiece to
    // the first workers so the shares sum to the round
    pub fn round_shares(&self) -> Vec<u64> {
        let accounts = self.account_amount.max(1) as u64;
        let base = self.round / accounts;
        let remainder = self.round % accounts;
        (0..accounts)
            .map(|i| base + u64::from(i < remainder))
            .collect()
    }

    // JSON dump with secrets redacted
    pub fn to_json_redacted(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("<unserializable: {}>", e))
    }
}
