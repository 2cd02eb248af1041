mod common;

use std::{sync::Arc, time::Duration};

use chain_loadgen::{worker::Worker, LoadError};
use common::*;
use log::Level;
use proptest::prelude::*;
use tokio_util::sync::CancellationToken;

fn single_session(chain: &Arc<StubChain>) -> chain_loadgen::Session {
    session(chain, StubSigner::new(&worker_address(0)))
}

#[tokio::test(start_paused = true)]
async fn sequential_worker_reaches_round_over_configured_ticks() {
    let address = worker_address(0);
    let chain = StubChain::new().with_sequence(&address, 7).into_arc();
    let config = Arc::new(run_config(100, "10s", "1s", &[]));

    let report = Worker::new(0, single_session(&chain), 100)
        .run(config, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.succeeded, 100);
    assert_eq!(report.failed, 0);
    assert_eq!(report.ticks, 10);
    assert_eq!(report.initial_sequence, 7);
    assert_eq!(report.final_sequence, 107);
    assert_eq!(report.elapsed, Duration::from_secs(10));
    assert!(!report.interrupted);
    // simulated 50_000 gas with the default adjustment of 2
    assert_eq!(report.gas_limit, 100_000);

    assert_eq!(chain.post_sequences(&address), (7..107).collect::<Vec<_>>());
    assert_eq!(chain.sequence_of(&address), 107);
}

#[tokio::test(start_paused = true)]
async fn sequential_worker_waits_for_each_broadcast() {
    let chain = StubChain::new()
        .with_latency(Duration::from_millis(20))
        .into_arc();
    let config = Arc::new(run_config(20, "2s", "1s", &[]));

    let report = Worker::new(0, single_session(&chain), 20)
        .run(config, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.succeeded, 20);
    assert_eq!(chain.peak_in_flight(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_broadcasts_retry_the_same_sequence() {
    capture_logs();
    let address = worker_address(0);
    let chain = StubChain::new().failing_every(3).into_arc();
    let config = Arc::new(run_config(100, "10s", "1s", &[]));

    let report = Worker::new(0, single_session(&chain), 100)
        .run(config, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.succeeded, 100);
    assert!(report.failed > 0);
    assert_eq!(report.failed, chain.rejected());
    assert_eq!(chain.mismatches(), 0);
    // one warning per rejected attempt, none for accepted ones
    assert_eq!(captured(Level::Warn, "broadcast failed") as u64, report.failed);
    assert_eq!(captured(Level::Warn, "") as u64, report.failed);
    // a tick never sees as many failures as its quota here
    assert_eq!(report.ticks, 10);

    // rejected attempts do not consume sequences
    assert_eq!(chain.post_sequences(&address), (0..100).collect::<Vec<_>>());
    assert_eq!(report.final_sequence, 100);
}

#[tokio::test(start_paused = true)]
async fn final_tick_releases_only_the_remainder() {
    let chain = StubChain::new().into_arc();
    // 25 over 2 ticks: quota 12, then 12, then the last one
    let config = Arc::new(run_config(25, "2s", "1s", &[]));

    let report = Worker::new(0, single_session(&chain), 25)
        .run(config, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.succeeded, 25);
    assert_eq!(report.ticks, 3);
    assert_eq!(report.elapsed, Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn concurrent_worker_uses_distinct_contiguous_sequences() {
    let address = worker_address(0);
    let chain = StubChain::new()
        .with_sequence(&address, 3)
        .failing_every(4)
        .with_latency(Duration::from_millis(10))
        .into_arc();
    let config = Arc::new(run_config(60, "6s", "1s", &["--dispatch-mode", "concurrent"]));

    let report = Worker::new(0, single_session(&chain), 60)
        .run(config, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.succeeded, 60);
    assert_eq!(report.initial_sequence, 3);
    assert_eq!(report.final_sequence, 63);
    // an injected rejection also fails the broadcasts queued behind it
    assert_eq!(report.failed, chain.rejected());

    let sequences = chain.post_sequences(&address);
    assert_eq!(sequences.len(), 60);
    assert!(is_contiguous(&sequences, 3));
}

#[tokio::test(start_paused = true)]
async fn concurrent_broadcasts_overlap_within_a_tick() {
    let address = worker_address(0);
    let chain = StubChain::new()
        .with_latency(Duration::from_millis(100))
        .into_arc();
    let config = Arc::new(run_config(50, "5s", "1s", &["--dispatch-mode", "concurrent"]));

    let report = Worker::new(0, single_session(&chain), 50)
        .run(config, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.succeeded, 50);
    assert!(chain.peak_in_flight() > 1);
    assert!(chain.peak_in_flight() <= 10);
    assert_eq!(report.final_sequence, 50);

    let sequences = chain.post_sequences(&address);
    assert_eq!(sequences.len(), 50);
    assert!(is_contiguous(&sequences, 0));
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_at_tick_boundary() {
    let address = worker_address(0);
    let chain = StubChain::new().into_arc();
    let config = Arc::new(run_config(1000, "100s", "1s", &[]));
    let cancel = CancellationToken::new();

    let stopper = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(3500)).await;
        stopper.cancel();
    });

    let report = Worker::new(0, single_session(&chain), 1000)
        .run(config, cancel)
        .await
        .unwrap();

    assert!(report.interrupted);
    assert_eq!(report.ticks, 3);
    assert_eq!(report.succeeded, 30);
    assert_eq!(report.final_sequence, 30);
    assert!(is_contiguous(&chain.post_sequences(&address), 0));
}

#[tokio::test(start_paused = true)]
async fn concurrent_cancellation_drains_in_flight_broadcasts() {
    let address = worker_address(0);
    let chain = StubChain::new()
        .with_latency(Duration::from_millis(50))
        .into_arc();
    let config = Arc::new(run_config(1000, "100s", "1s", &["--dispatch-mode", "concurrent"]));
    let cancel = CancellationToken::new();

    let stopper = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(2200)).await;
        stopper.cancel();
    });

    let report = Worker::new(0, single_session(&chain), 1000)
        .run(config, cancel)
        .await
        .unwrap();

    assert!(report.interrupted);
    let sequences = chain.post_sequences(&address);
    assert_eq!(sequences.len() as u64, report.succeeded);
    assert_eq!(report.final_sequence, report.succeeded);
    assert!(is_contiguous(&sequences, 0));
}

#[tokio::test(start_paused = true)]
async fn sequence_mismatch_without_resync_keeps_retrying() {
    let address = worker_address(0);
    let chain = StubChain::new().into_arc();
    let config = Arc::new(run_config(20, "2s", "1s", &[]));
    let cancel = CancellationToken::new();

    let (bump_chain, bump_address, stopper) = (Arc::clone(&chain), address.clone(), cancel.clone());
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        bump_chain.bump_sequence(&bump_address);
        tokio::time::sleep(Duration::from_secs(3)).await;
        stopper.cancel();
    });

    let report = Worker::new(0, single_session(&chain), 20)
        .run(config, cancel)
        .await
        .unwrap();

    assert!(report.interrupted);
    assert_eq!(report.succeeded, 0);
    // every tick gives up after a quota worth of failures
    assert_eq!(report.failed, 30);
    assert_eq!(chain.mismatches(), 30);
    assert_eq!(report.final_sequence, 0);
}

#[tokio::test(start_paused = true)]
async fn sequence_mismatch_with_resync_recovers() {
    let address = worker_address(0);
    let chain = StubChain::new().into_arc();
    let config = Arc::new(run_config(
        20,
        "2s",
        "1s",
        &["--resync-on-sequence-mismatch"],
    ));

    let (bump_chain, bump_address) = (Arc::clone(&chain), address.clone());
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        bump_chain.bump_sequence(&bump_address);
    });

    let report = Worker::new(0, single_session(&chain), 20)
        .run(config, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.succeeded, 20);
    assert_eq!(report.failed, 1);
    // the externally sent transaction is not counted as ours
    assert_eq!(report.initial_sequence, 1);
    assert_eq!(report.final_sequence, 21);
    assert_eq!(chain.post_sequences(&address), (1..21).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn failed_simulation_is_a_setup_error() {
    let chain = StubChain::new().failing_simulation().into_arc();
    let config = Arc::new(run_config(10, "1s", "100ms", &[]));

    let err = Worker::new(0, single_session(&chain), 10)
        .run(config, CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, LoadError::Setup { .. }));
    assert!(chain.accepted().is_empty());
}

#[tokio::test(start_paused = true)]
async fn zero_rounds_broadcasts_nothing() {
    let chain = StubChain::new().into_arc();
    let config = Arc::new(run_config(1, "1s", "100ms", &[]));

    let report = Worker::new(0, single_session(&chain), 0)
        .run(config, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.succeeded, 0);
    assert_eq!(report.ticks, 0);
    assert!(chain.accepted().is_empty());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_concurrent_sequences_are_distinct_and_contiguous(
        round in 1u64..80,
        ticks in 1u64..8,
        start in 0u64..1_000,
        fail_every in 2u64..6,
        latency_ms in 0u64..20,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap();

        let (report, sequences) = runtime.block_on(async {
            let address = worker_address(0);
            let chain = StubChain::new()
                .with_sequence(&address, start)
                .failing_every(fail_every)
                .with_latency(Duration::from_millis(latency_ms))
                .into_arc();
            let duration = format!("{}s", ticks);
            let config = Arc::new(run_config(round, &duration, "1s", &["--dispatch-mode", "concurrent"]));

            let report = Worker::new(0, single_session(&chain), round)
                .run(config, CancellationToken::new())
                .await
                .unwrap();
            (report, chain.post_sequences(&address))
        });

        prop_assert_eq!(report.succeeded, round);
        prop_assert_eq!(sequences.len() as u64, round);
        prop_assert!(is_contiguous(&sequences, start));
        prop_assert_eq!(report.final_sequence, start + round);
    }
}
