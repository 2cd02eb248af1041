use std::sync::Arc;

use log::{debug, info};
use tokio::sync::Mutex;

use crate::{client::Session, error::ClientError};

/// Sequence tracker shared by the concurrent dispatch tasks of one worker.
/// Every read-and-update happens under a single lock guard.
pub type SharedSequence = Arc<Mutex<SequenceTracker>>;

/// Local copy of an account sequence.
///
/// Fetched once from the chain; afterwards the tracker is the only source of
/// truth, which holds as long as nothing else broadcasts from this account.
///
/// `next` is the sequence handed to the next broadcast, `confirmed` the one
/// the chain expects after every accepted broadcast. They only differ while
/// concurrent broadcasts are in flight.
#[derive(Debug, Clone)]
pub struct SequenceTracker {
    initial: u64,
    next: u64,
    confirmed: u64,
}

impl SequenceTracker {
    pub fn new(initial: u64) -> Self {
        Self {
            initial,
            next: initial,
            confirmed: initial,
        }
    }

    pub async fn fetch(session: &Session) -> Result<Self, ClientError> {
        let sequence = session
            .call(session.client.account_sequence(session.address()))
            .await?;
        if log::log_enabled!(log::Level::Debug) {
            debug!("Fetched sequence {} for {}", sequence, session.address());
        }
        Ok(Self::new(sequence))
    }

    pub fn current(&self) -> u64 {
        self.next
    }

    pub fn initial(&self) -> u64 {
        self.initial
    }

    pub fn confirmed(&self) -> u64 {
        self.confirmed
    }

    // Number of accepted broadcasts since the tracker was created
    pub fn advanced_by(&self) -> u64 {
        self.confirmed - self.initial
    }

    // Only call after the chain accepted a broadcast at `current()`
    pub fn advance(&mut self) {
        self.confirm(self.next);
    }

    // Hand out the next sequence to a broadcast that is about to be signed
    pub fn reserve(&mut self) -> u64 {
        let sequence = self.next;
        self.next += 1;
        sequence
    }

    pub fn confirm(&mut self, sequence: u64) {
        self.confirmed = self.confirmed.max(sequence + 1);
        self.next = self.next.max(self.confirmed);
    }

    // A reserved sequence the chain did not accept. Later reservations are
    // rejected too once it is missing, so hand it out again next, unless
    // the chain already moved past it.
    pub fn release(&mut self, sequence: u64) {
        self.next = self.next.min(sequence).max(self.confirmed);
    }

    // Re-read the sequence from the chain after a sequence mismatch.
    // The initial value is shifted so `advanced_by` keeps counting successes only.
    pub async fn resync(&mut self, session: &Session) -> Result<(), ClientError> {
        let on_chain = session
            .call(session.client.account_sequence(session.address()))
            .await?;
        if on_chain != self.confirmed || on_chain != self.next {
            info!(
                "Resynced sequence of {} from {} to {}",
                session.address(),
                self.next,
                on_chain
            );
            let advanced = self.advanced_by();
            self.next = on_chain;
            self.confirmed = on_chain;
            self.initial = on_chain.saturating_sub(advanced);
        }
        Ok(())
    }

    pub fn into_shared(self) -> SharedSequence {
        Arc::new(Mutex::new(self))
    }
}
