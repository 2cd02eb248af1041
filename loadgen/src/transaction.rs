use std::{fmt, str::FromStr};

use log::debug;
use serde::{Serialize, Serializer};

use crate::messages::MessageBatch;

// Gas used to price the fee of a transaction whose gas limit is not known
// yet (simulation only, the fee of a simulated transaction is not charged)
pub const SIMULATION_GAS_PLACEHOLDER: u64 = 200_000;

/// An amount of a single denomination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Coin {
    pub denom: String,
    #[serde(serialize_with = "serialize_amount")]
    pub amount: u128,
}

fn serialize_amount<S: Serializer>(amount: &u128, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&amount.to_string())
}

impl Coin {
    pub fn new(amount: u128, denom: impl Into<String>) -> Self {
        Self {
            denom: denom.into(),
            amount,
        }
    }
}

impl fmt::Display for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.denom)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GasPriceError {
    #[error("gas price is empty")]
    Empty,
    #[error("gas price '{0}' has no denomination")]
    MissingDenom(String),
    #[error("gas price '{0}' has an invalid amount")]
    InvalidAmount(String),
    #[error("gas price '{0}' must be positive")]
    NotPositive(String),
}

/// Fee per gas unit, written the way the chain expects it: `0.02udaric`.
#[derive(Debug, Clone, PartialEq)]
pub struct GasPrice {
    amount: f64,
    denom: String,
}

impl GasPrice {
    pub fn amount(&self) -> f64 {
        self.amount
    }

    pub fn denom(&self) -> &str {
        &self.denom
    }

    // Fee for the given gas, rounded up to the next whole unit
    pub fn fee_for(&self, gas: u64) -> Coin {
        let amount = (gas as f64 * self.amount).ceil() as u128;
        Coin::new(amount, self.denom.clone())
    }
}

impl FromStr for GasPrice {
    type Err = GasPriceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(GasPriceError::Empty);
        }

        let split = s
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| GasPriceError::MissingDenom(s.to_owned()))?;
        let (amount, denom) = s.split_at(split);

        let amount: f64 = amount
            .parse()
            .map_err(|_| GasPriceError::InvalidAmount(s.to_owned()))?;
        if !amount.is_finite() || amount <= 0.0 {
            return Err(GasPriceError::NotPositive(s.to_owned()));
        }

        Ok(Self {
            amount,
            denom: denom.to_owned(),
        })
    }
}

impl fmt::Display for GasPrice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.denom)
    }
}

impl Serialize for GasPrice {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

/// Gas limit of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GasSetting {
    // Let the node figure it out through a simulation
    Auto,
    Limit(u64),
}

/// Transaction as handed to the signer.
///
/// Built per broadcast and dropped once the submission returns.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionEnvelope {
    messages: MessageBatch,
    gas: GasSetting,
    fee: Vec<Coin>,
    sequence: u64,
}

impl TransactionEnvelope {
    pub fn new(messages: MessageBatch) -> Self {
        Self {
            messages,
            gas: GasSetting::Auto,
            fee: Vec::new(),
            sequence: 0,
        }
    }

    pub fn with_gas_auto(mut self) -> Self {
        self.gas = GasSetting::Auto;
        self
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas = GasSetting::Limit(gas_limit);
        self
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    // Compute the fee from the gas setting and the gas price.
    // Must be called after the gas setting is final.
    pub fn with_fee_auto(mut self, gas_price: &GasPrice) -> Self {
        let gas = match self.gas {
            GasSetting::Auto => SIMULATION_GAS_PLACEHOLDER,
            GasSetting::Limit(limit) => limit,
        };
        let fee = gas_price.fee_for(gas);
        if log::log_enabled!(log::Level::Debug) {
            debug!("Auto fee for {} gas at {}: {}", gas, gas_price, fee);
        }
        self.fee = vec![fee];
        self
    }
}
