use std::{sync::Arc, time::Duration};

use log::{debug, info, warn};
use metrics::counter;
use tokio::{task::JoinSet, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    broadcast::{BroadcastEngine, BroadcastOutcome},
    client::Session,
    config::{DispatchMode, RunConfig},
    error::{CallSite, ClientError, ErrorKind, LoadError},
    gas::GasEstimator,
    messages::{post_batch, MessageBatch},
    rate::RateController,
    sequence::{SequenceTracker, SharedSequence},
    stats::{WorkerReport, WorkerStats},
};

/// One account driving its share of the round.
pub struct Worker {
    index: usize,
    session: Session,
    rounds: u64,
}

impl Worker {
    pub fn new(index: usize, session: Session, rounds: u64) -> Self {
        Self {
            index,
            session,
            rounds,
        }
    }

    /// Fetch the sequence, estimate gas once, then pace broadcasts until
    /// `rounds` of them are accepted or the token is cancelled.
    ///
    /// Setup failures and fatal dispatch errors end the worker with an error.
    /// Retryable broadcast failures are counted and retried with the same
    /// sequence.
    pub async fn run(
        self,
        config: Arc<RunConfig>,
        cancel: CancellationToken,
    ) -> Result<WorkerReport, LoadError> {
        let address = self.session.address().to_owned();
        let batch = post_batch(config.subspace_id, config.msg_size, &address);

        let tracker = SequenceTracker::fetch(&self.session)
            .await
            .map_err(|e| LoadError::setup(&address, e))?;

        let gas_limit = GasEstimator::new(self.session.clone(), config.gas_adjustment)
            .estimate(&batch, tracker.current())
            .await
            .map_err(|e| LoadError::setup(&address, e))?;

        info!(
            "Worker {} ready: {} (sequence {}, gas limit {}, {} rounds, {:?} mode)",
            self.index,
            address,
            tracker.current(),
            gas_limit,
            self.rounds,
            config.dispatch_mode
        );

        let rate = RateController::new(self.rounds, config.duration, config.tick_interval);
        if log::log_enabled!(log::Level::Debug) {
            debug!(
                "Worker {}: {} per tick over {} ticks, at least {:?} to complete",
                self.index,
                rate.quota(),
                rate.ticks_in_duration(),
                expected_duration(&rate)
            );
        }

        let dispatcher = Arc::new(Dispatcher {
            engine: BroadcastEngine::new(self.session.clone())
                .with_broadcast_logging(config.log.log_broadcasts),
            batch,
            gas_limit,
            rate,
            stats: WorkerStats::default(),
            resync: config.resync_on_sequence_mismatch,
            address: address.clone(),
        });

        let start = Instant::now();
        let progress = match config.dispatch_mode {
            DispatchMode::Sequential => dispatcher.run_sequential(tracker, &cancel).await?,
            DispatchMode::Concurrent => {
                Arc::clone(&dispatcher)
                    .run_concurrent(tracker, &cancel)
                    .await?
            }
        };
        let elapsed = start.elapsed();

        let report = WorkerReport {
            index: self.index,
            address,
            assigned: self.rounds,
            initial_sequence: progress.initial_sequence,
            final_sequence: progress.final_sequence,
            gas_limit,
            succeeded: dispatcher.stats.succeeded(),
            failed: dispatcher.stats.failed(),
            ticks: dispatcher.stats.ticks(),
            elapsed,
            interrupted: progress.interrupted,
        };

        if report.interrupted {
            warn!(
                "Worker {} interrupted after {}/{} broadcasts",
                report.index, report.succeeded, report.assigned
            );
        } else {
            info!(
                "Worker {} done: {} broadcasts in {:?} ({} failed)",
                report.index, report.succeeded, elapsed, report.failed
            );
        }
        Ok(report)
    }
}

// Where the tracker ended up. The initial sequence moves when a resync
// found the chain ahead of the local copy.
struct Progress {
    initial_sequence: u64,
    final_sequence: u64,
    interrupted: bool,
}

impl Progress {
    fn of(tracker: &SequenceTracker, interrupted: bool) -> Self {
        Self {
            initial_sequence: tracker.initial(),
            final_sequence: tracker.confirmed(),
            interrupted,
        }
    }
}

// State shared by the dispatch loop and its in-flight tasks
struct Dispatcher {
    engine: BroadcastEngine,
    batch: MessageBatch,
    gas_limit: u64,
    rate: RateController,
    stats: WorkerStats,
    resync: bool,
    address: String,
}

impl Dispatcher {
    fn on_tick(&self) {
        self.stats.record_tick();
        counter!("loadgen_ticks_total").increment(1);
    }

    // Each tick keeps submitting until `quota` broadcasts succeeded or
    // `quota` attempts failed. Failures retry the same sequence.
    async fn run_sequential(
        &self,
        mut tracker: SequenceTracker,
        cancel: &CancellationToken,
    ) -> Result<Progress, LoadError> {
        let mut ticker = self.rate.ticker();

        while !self.rate.is_done(self.stats.succeeded()) {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(Progress::of(&tracker, true)),
                _ = ticker.tick() => {}
            }
            self.on_tick();

            let quota = self.rate.release(self.stats.succeeded());
            let (mut sent, mut failed) = (0u64, 0u64);
            while sent < quota && failed < quota {
                if cancel.is_cancelled() {
                    return Ok(Progress::of(&tracker, true));
                }
                let sequence = tracker.current();
                match self.engine.submit(&self.batch, sequence, self.gas_limit).await {
                    BroadcastOutcome::Success { .. } => {
                        tracker.advance();
                        self.stats.record_success();
                        sent += 1;
                    }
                    BroadcastOutcome::Failed { error, .. } => {
                        self.on_failure(error, sequence, &mut tracker).await?;
                        failed += 1;
                    }
                }
            }

            if log::log_enabled!(log::Level::Debug) {
                debug!(
                    "{}: tick done, {} sent, {} failed, {}/{} total",
                    self.address,
                    sent,
                    failed,
                    self.stats.succeeded(),
                    self.rate.round()
                );
            }
        }

        Ok(Progress::of(&tracker, false))
    }

    // Each tick spawns enough tasks to bring successes plus in-flight work up
    // to the next quota boundary. Tasks only take the sequence lock to reserve
    // a sequence and to settle it once the node answered, so broadcasts of
    // one tick overlap.
    async fn run_concurrent(
        self: Arc<Self>,
        tracker: SequenceTracker,
        cancel: &CancellationToken,
    ) -> Result<Progress, LoadError> {
        let shared = tracker.into_shared();
        let mut tasks: JoinSet<Result<(), LoadError>> = JoinSet::new();
        let mut ticker = self.rate.ticker();
        let mut interrupted = false;

        loop {
            let completed = self.stats.succeeded();
            if self.rate.is_done(completed) && tasks.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    interrupted = true;
                    break;
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined? {
                        tasks.shutdown().await;
                        return Err(e);
                    }
                }
                _ = ticker.tick() => {
                    self.on_tick();
                    let in_flight = tasks.len() as u64;
                    for _ in 0..self.rate.release(completed + in_flight) {
                        tasks.spawn(Arc::clone(&self).dispatch_one(Arc::clone(&shared)));
                    }
                }
            }
        }

        // Let in-flight broadcasts finish so the final sequence is accurate
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("{}: in-flight broadcast failed while stopping: {}", self.address, e),
                Err(e) => warn!("{}: in-flight task failed while stopping: {}", self.address, e),
            }
        }

        let tracker = shared.lock().await;
        Ok(Progress::of(&tracker, interrupted))
    }

    async fn dispatch_one(self: Arc<Self>, shared: SharedSequence) -> Result<(), LoadError> {
        let sequence = shared.lock().await.reserve();
        let outcome = self.engine.submit(&self.batch, sequence, self.gas_limit).await;

        let mut tracker = shared.lock().await;
        match outcome {
            BroadcastOutcome::Success { .. } => {
                tracker.confirm(sequence);
                self.stats.record_success();
                Ok(())
            }
            BroadcastOutcome::Failed { error, .. } => {
                tracker.release(sequence);
                self.on_failure(error, sequence, &mut tracker).await
            }
        }
    }

    async fn on_failure(
        &self,
        error: ClientError,
        sequence: u64,
        tracker: &mut SequenceTracker,
    ) -> Result<(), LoadError> {
        self.stats.record_failure();
        match error.kind(CallSite::DispatchLoop) {
            ErrorKind::Fatal => Err(LoadError::Dispatch {
                address: self.address.clone(),
                source: error,
            }),
            ErrorKind::Retryable => {
                warn!("{} #{} broadcast failed: {}", self.address, sequence, error);
                if self.resync && error.is_sequence_mismatch() {
                    if let Err(e) = tracker.resync(self.engine.session()).await {
                        warn!("Could not resync sequence of {}: {}", self.address, e);
                    }
                }
                Ok(())
            }
        }
    }
}

// Upper bound of the timed phase when every tick fills its quota
pub fn expected_duration(rate: &RateController) -> Duration {
    let ticks = rate.round().div_ceil(rate.quota());
    rate.tick_interval().saturating_mul(ticks.min(u32::MAX as u64) as u32)
}
