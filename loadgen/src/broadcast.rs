use log::{debug, info};
use metrics::counter;

use crate::{
    client::Session, error::ClientError, messages::MessageBatch,
    transaction::TransactionEnvelope,
};

/// Result of one submission.
#[derive(Debug)]
pub enum BroadcastOutcome {
    // Accepted by the node, the sequence is consumed
    Success { sequence: u64, txhash: String },
    // Not accepted, the sequence is still available
    Failed { sequence: u64, error: ClientError },
}

impl BroadcastOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, BroadcastOutcome::Success { .. })
    }

    pub fn sequence(&self) -> u64 {
        match self {
            BroadcastOutcome::Success { sequence, .. } | BroadcastOutcome::Failed { sequence, .. } => {
                *sequence
            }
        }
    }
}

/// Builds, signs and submits envelopes for one account.
#[derive(Debug, Clone)]
pub struct BroadcastEngine {
    session: Session,
    log_broadcasts: bool,
}

impl BroadcastEngine {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            log_broadcasts: false,
        }
    }

    // Print every accepted broadcast at info level instead of debug
    pub fn with_broadcast_logging(mut self, enabled: bool) -> Self {
        self.log_broadcasts = enabled;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Submit with broadcast-sync semantics and return the transaction hash.
    ///
    /// A response with a non-zero code is turned into [`ClientError::Rejected`]
    /// carrying the raw chain log.
    pub async fn submit_once(
        &self,
        batch: &MessageBatch,
        sequence: u64,
        gas_limit: u64,
    ) -> Result<String, ClientError> {
        let envelope = TransactionEnvelope::new(batch.clone())
            .with_gas_limit(gas_limit)
            .with_sequence(sequence)
            .with_fee_auto(&self.session.gas_price);

        let signed = self.session.call(self.session.signer.sign(&envelope)).await?;
        let response = self
            .session
            .call(self.session.client.broadcast_sync(&signed))
            .await?;

        if !response.is_success() {
            return Err(ClientError::Rejected {
                code: response.code,
                raw_log: response.raw_log,
            });
        }

        if self.log_broadcasts {
            info!("{} #{} {}", self.session.address(), sequence, response.txhash);
        } else if log::log_enabled!(log::Level::Debug) {
            debug!("{} #{} {}", self.session.address(), sequence, response.txhash);
        }
        Ok(response.txhash)
    }

    pub async fn submit(&self, batch: &MessageBatch, sequence: u64, gas_limit: u64) -> BroadcastOutcome {
        match self.submit_once(batch, sequence, gas_limit).await {
            Ok(txhash) => {
                counter!("loadgen_broadcast_total", "outcome" => "success").increment(1);
                BroadcastOutcome::Success { sequence, txhash }
            }
            Err(error) => {
                counter!("loadgen_broadcast_total", "outcome" => error.outcome_label()).increment(1);
                BroadcastOutcome::Failed { sequence, error }
            }
        }
    }
}
