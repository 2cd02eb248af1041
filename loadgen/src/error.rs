use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinError;

use crate::config::ConfigError;

// Response code the chain uses for "incorrect account sequence"
pub const WRONG_SEQUENCE_CODE: u32 = 32;

/// How a caller should treat a failed chain interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Abort the affected run.
    Fatal,
    /// Log it and try again with the same sequence.
    Retryable,
}

/// The context a chain call is made from.
///
/// Setup, bootstrap and funding broadcasts are single-shot: any failure there
/// is fatal. Broadcasts issued from the timed dispatch loop tolerate transport
/// blips and chain rejections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallSite {
    SingleShot,
    DispatchLoop,
}

/// Errors raised by the chain client and signer seams.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("transaction rejected with code {code}: {raw_log}")]
    Rejected { code: u32, raw_log: String },
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("signer error: {0}")]
    Signer(String),
}

impl ClientError {
    pub fn kind(&self, site: CallSite) -> ErrorKind {
        match site {
            CallSite::SingleShot => ErrorKind::Fatal,
            CallSite::DispatchLoop => match self {
                ClientError::Transport(_)
                | ClientError::Timeout(_)
                | ClientError::Rejected { .. }
                | ClientError::Rpc { .. } => ErrorKind::Retryable,
                ClientError::Malformed(_) | ClientError::Signer(_) => ErrorKind::Fatal,
            },
        }
    }

    pub fn is_sequence_mismatch(&self) -> bool {
        matches!(
            self,
            ClientError::Rejected {
                code: WRONG_SEQUENCE_CODE,
                ..
            }
        )
    }

    // label used for metrics
    pub fn outcome_label(&self) -> &'static str {
        match self {
            ClientError::Rejected { .. } | ClientError::Rpc { .. } => "rejected",
            ClientError::Transport(_) | ClientError::Timeout(_) => "transport",
            ClientError::Malformed(_) | ClientError::Signer(_) => "fatal",
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ClientError::Malformed(e.to_string())
        } else {
            ClientError::Transport(e.to_string())
        }
    }
}

/// Top level error of a load run. Every variant is fatal for the process.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("setup failed for {address}: {source}")]
    Setup {
        address: String,
        #[source]
        source: ClientError,
    },
    #[error("bootstrap failed for {address}: {source}")]
    Bootstrap {
        address: String,
        #[source]
        source: ClientError,
    },
    #[error("funding from {address} failed: {source}")]
    Funding {
        address: String,
        #[source]
        source: ClientError,
    },
    #[error("dispatch aborted for {address}: {source}")]
    Dispatch {
        address: String,
        #[source]
        source: ClientError,
    },
    #[error("worker task failed: {0}")]
    Task(#[from] JoinError),
}

impl LoadError {
    pub fn setup(address: &str, source: ClientError) -> Self {
        LoadError::Setup {
            address: address.to_owned(),
            source,
        }
    }
}
