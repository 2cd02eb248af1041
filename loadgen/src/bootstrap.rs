use log::{debug, info, warn};

use crate::{
    broadcast::BroadcastEngine,
    client::Session,
    error::{ClientError, LoadError},
    gas::GasEstimator,
    messages::save_profile,
    sequence::SequenceTracker,
};

/// What `ensure_ready` had to do for an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapStatus {
    AlreadyReady,
    Registered { txhash: String },
}

/// Make sure the account has the on-chain identity record posts require.
///
/// Nothing is broadcast when the record already exists. A failed lookup is
/// treated as a missing record: the registration attempt then decides.
pub async fn ensure_ready(session: &Session, gas_adjustment: f64) -> Result<BootstrapStatus, LoadError> {
    let address = session.address();

    match session.call(session.client.profile(address)).await {
        Ok(Some(_)) => {
            if log::log_enabled!(log::Level::Debug) {
                debug!("Profile of {} already exists", address);
            }
            return Ok(BootstrapStatus::AlreadyReady);
        }
        Ok(None) => {}
        Err(e) => warn!("Could not query profile of {}, registering it: {}", address, e),
    }

    let txhash = register(session, gas_adjustment)
        .await
        .map_err(|source| LoadError::Bootstrap {
            address: address.to_owned(),
            source,
        })?;

    info!("Registered profile of {} ({})", address, txhash);
    Ok(BootstrapStatus::Registered { txhash })
}

async fn register(session: &Session, gas_adjustment: f64) -> Result<String, ClientError> {
    let sequence = SequenceTracker::fetch(session).await?.current();
    let batch = save_profile(session.address(), &mut rand::thread_rng());
    let gas_limit = GasEstimator::new(session.clone(), gas_adjustment)
        .estimate(&batch, sequence)
        .await?;

    BroadcastEngine::new(session.clone())
        .submit_once(&batch, sequence, gas_limit)
        .await
}
