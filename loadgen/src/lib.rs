//! Chain load generator
//!
//! Drives a set of funded accounts to submit a paced stream of post
//! transactions to a chain node, tracking account sequences locally.

pub mod bootstrap;
pub mod broadcast;
pub mod client;
pub mod config;
pub mod error;
pub mod gas;
pub mod logger;
pub mod messages;
pub mod node_client;
pub mod orchestrator;
pub mod rate;
pub mod sequence;
pub mod signer;
pub mod stats;
pub mod transaction;
pub mod worker;

pub use client::{ChainClient, Session, SignedTx, Signer, TxResponse};
pub use config::{ConfigError, DispatchMode, RunConfig};
pub use error::{CallSite, ClientError, ErrorKind, LoadError};
pub use orchestrator::Orchestrator;
pub use stats::{RunReport, WorkerReport};
