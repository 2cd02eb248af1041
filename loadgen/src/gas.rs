use log::debug;

use crate::{
    client::Session, error::ClientError, messages::MessageBatch,
    transaction::TransactionEnvelope,
};

/// Simulation based gas estimation.
///
/// A worker runs it once, on its real batch, and reuses the result for every
/// broadcast of the run.
#[derive(Debug, Clone)]
pub struct GasEstimator {
    session: Session,
    adjustment: f64,
}

impl GasEstimator {
    pub fn new(session: Session, adjustment: f64) -> Self {
        Self {
            session,
            adjustment,
        }
    }

    pub async fn estimate(&self, batch: &MessageBatch, sequence: u64) -> Result<u64, ClientError> {
        let envelope = TransactionEnvelope::new(batch.clone())
            .with_gas_auto()
            .with_sequence(sequence)
            .with_fee_auto(&self.session.gas_price);

        let signed = self.session.call(self.session.signer.sign(&envelope)).await?;
        let gas_used = self.session.call(self.session.client.simulate(&signed)).await?;
        let gas_limit = adjust(gas_used, self.adjustment);

        if log::log_enabled!(log::Level::Debug) {
            debug!(
                "Simulated {} message(s) for {}: {} gas used, limit {}",
                batch.len(),
                self.session.address(),
                gas_used,
                gas_limit
            );
        }
        Ok(gas_limit)
    }
}

pub fn adjust(gas_used: u64, adjustment: f64) -> u64 {
    (gas_used as f64 * adjustment).ceil() as u64
}
