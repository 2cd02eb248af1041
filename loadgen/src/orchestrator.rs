use std::{sync::Arc, time::Duration};

use futures::future::join_all;
use log::{debug, error, info, warn};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    bootstrap::{ensure_ready, BootstrapStatus},
    broadcast::BroadcastEngine,
    client::{ChainClient, Session, Signer},
    config::RunConfig,
    error::{ClientError, LoadError},
    gas::GasEstimator,
    messages::{bank_send_batch, post_batch, save_profile},
    node_client::NodeClient,
    sequence::SequenceTracker,
    signer::{AccountKey, RemoteSigner},
    stats::RunReport,
    transaction::{Coin, GasPrice},
    worker::Worker,
};

// Rounds a worker is funded for, the configured margin included.
// Integer ceiling of round * (100 + margin) / (100 * accounts).
pub fn expected_rounds_per_worker(round: u64, accounts: usize, margin_percent: u32) -> u64 {
    let accounts = accounts.max(1) as u128;
    let numerator = round as u128 * (100 + margin_percent as u128);
    numerator.div_ceil(100 * accounts) as u64
}

/// Amount the primary account sends to every other worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundingPlan {
    pub expected_rounds: u64,
    pub post_gas: u64,
    pub profile_gas: u64,
    pub per_worker: Coin,
}

impl FundingPlan {
    // Enough fees for the expected post broadcasts plus one profile registration
    pub fn new(expected_rounds: u64, post_gas: u64, profile_gas: u64, gas_price: &GasPrice) -> Self {
        let total_gas = post_gas
            .saturating_mul(expected_rounds)
            .saturating_add(profile_gas);
        Self {
            expected_rounds,
            post_gas,
            profile_gas,
            per_worker: gas_price.fee_for(total_gas),
        }
    }
}

/// Runs a load test across all derived accounts: funding, bootstrap and the
/// timed dispatch phase.
pub struct Orchestrator {
    config: Arc<RunConfig>,
    sessions: Vec<Session>,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Validate the configuration and derive one session per account.
    pub async fn connect(config: RunConfig) -> Result<Self, LoadError> {
        config.validate()?;

        let node_config = config.node_client_config();
        let client: Arc<dyn ChainClient> = Arc::new(
            NodeClient::with_config(&config.rpc_address, &config.query_address, node_config.clone())
                .map_err(|e| LoadError::setup(&config.rpc_address, e))?,
        );

        let mut sessions = Vec::with_capacity(config.account_amount);
        for index in 0..config.account_amount {
            let hd_path = config.hd_path(index);
            let key = AccountKey {
                mnemonic: config.mnemonic.clone(),
                hd_path: hd_path.clone(),
                bech32_prefix: config.bech32_prefix.clone(),
            };
            let signer = RemoteSigner::connect(
                &config.signer_address,
                key,
                config.chain_id.clone(),
                &node_config,
            )
            .await
            .map_err(|e| LoadError::setup(&hd_path, e))?;

            info!("Account {} ({}): {}", index, hd_path, signer.address());
            sessions.push(Session::new(
                Arc::clone(&client),
                Arc::new(signer),
                config.gas_price.clone(),
                config.request_timeout,
            ));
        }

        Ok(Self::from_sessions(config, sessions))
    }

    // Build from already prepared sessions, the first one being the primary account
    pub fn from_sessions(config: RunConfig, sessions: Vec<Session>) -> Self {
        Self {
            config: Arc::new(config),
            sessions,
            cancel: CancellationToken::new(),
        }
    }

    // Cancelling it stops workers at their next tick boundary
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Send every non-primary worker enough fees for its share of the run.
    ///
    /// Returns `None` when a single account is used. Any failure is fatal.
    pub async fn fund_workers(&self) -> Result<Option<FundingPlan>, LoadError> {
        let Some((primary, recipients)) = self.sessions.split_first() else {
            return Ok(None);
        };
        if recipients.is_empty() {
            return Ok(None);
        }

        let address = primary.address().to_owned();
        let funding_err = |source: ClientError| LoadError::Funding {
            address: address.clone(),
            source,
        };

        let sequence = SequenceTracker::fetch(primary).await.map_err(funding_err)?.current();
        let estimator = GasEstimator::new(primary.clone(), self.config.gas_adjustment);

        let post_gas = estimator
            .estimate(
                &post_batch(self.config.subspace_id, self.config.msg_size, &address),
                sequence,
            )
            .await
            .map_err(funding_err)?;
        let profile = save_profile(&address, &mut rand::thread_rng());
        let profile_gas = estimator
            .estimate(&profile, sequence)
            .await
            .map_err(funding_err)?;

        let plan = FundingPlan::new(
            expected_rounds_per_worker(
                self.config.round,
                self.sessions.len(),
                self.config.funding_margin_percent,
            ),
            post_gas,
            profile_gas,
            &self.config.gas_price,
        );
        if log::log_enabled!(log::Level::Debug) {
            debug!("Funding plan: {:?}", plan);
        }

        let recipients: Vec<String> = recipients.iter().map(|s| s.address().to_owned()).collect();
        let batch = bank_send_batch(&address, &recipients, std::slice::from_ref(&plan.per_worker));
        let gas_limit = estimator.estimate(&batch, sequence).await.map_err(funding_err)?;

        let txhash = BroadcastEngine::new(primary.clone())
            .submit_once(&batch, sequence, gas_limit)
            .await
            .map_err(funding_err)?;

        info!(
            "Funded {} worker(s) with {} each for {} rounds ({})",
            recipients.len(),
            plan.per_worker,
            plan.expected_rounds,
            txhash
        );
        Ok(Some(plan))
    }

    // Register the identity record of every account that lacks one
    pub async fn bootstrap_workers(&self) -> Result<Vec<BootstrapStatus>, LoadError> {
        let gas_adjustment = self.config.gas_adjustment;
        join_all(
            self.sessions
                .iter()
                .map(|session| ensure_ready(session, gas_adjustment)),
        )
        .await
        .into_iter()
        .collect()
    }

    async fn settle(&self) {
        let delay = self.config.settle_delay;
        if delay.is_zero() {
            return;
        }
        if log::log_enabled!(log::Level::Debug) {
            debug!("Waiting {:?} for the chain to settle", delay);
        }
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = sleep(delay) => {}
        }
    }

    /// Fund, bootstrap, then run all workers in parallel until each reached
    /// its share of the round or the run is cancelled.
    ///
    /// A failing worker cancels the others; its error is returned once every
    /// worker stopped.
    pub async fn run(self) -> Result<RunReport, LoadError> {
        self.fund_workers().await?;
        self.settle().await;
        self.bootstrap_workers().await?;
        self.settle().await;

        let deadline = self
            .config
            .max_run_time
            .map(|limit| spawn_deadline(limit, self.cancel.clone()));

        let shares = self.config.round_shares();
        let start = Instant::now();
        info!(
            "Starting {} worker(s) for {} rounds over {}",
            self.sessions.len(),
            self.config.round,
            humantime::format_duration(self.config.duration)
        );

        let handles = self
            .sessions
            .into_iter()
            .zip(shares)
            .enumerate()
            .map(|(index, (session, rounds))| {
                let worker = Worker::new(index, session, rounds);
                let config = Arc::clone(&self.config);
                let cancel = self.cancel.clone();
                tokio::spawn(async move {
                    let res = worker.run(config, cancel.clone()).await;
                    if let Err(e) = &res {
                        error!("Worker {} failed: {}", index, e);
                        cancel.cancel();
                    }
                    res
                })
            });

        let mut workers = Vec::new();
        let mut first_error = None;
        for joined in join_all(handles).await {
            match joined.map_err(LoadError::from).and_then(|res| res) {
                Ok(report) => workers.push(report),
                Err(e) => {
                    self.cancel.cancel();
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(deadline) = deadline {
            deadline.abort();
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        let report = RunReport {
            workers,
            elapsed: start.elapsed(),
        };
        info!("time used: {:?}", report.elapsed);
        Ok(report)
    }
}

fn spawn_deadline(limit: Duration, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = sleep(limit) => {
                warn!("Maximum run time of {} reached, stopping workers", humantime::format_duration(limit));
                cancel.cancel();
            }
        }
    })
}
