use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::crypto::Pubkey;
use crate::consensus::Step;
use crate::error::ConfigError;

/// Everything a validator needs to join a run. Loading it from disk is the
/// caller's business; this only defines the shape and its defaults.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenesisConfig {
    pub chain_id: String,
    pub validators: Vec<ValidatorConfig>,
    #[serde(default)]
    pub balances: Vec<GenesisAccount>,
    #[serde(default)]
    pub consensus: ConsensusConfig,
    #[serde(default)]
    pub network: NetworkConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidatorConfig {
    pub pubkey: Pubkey,
    #[serde(default = "default_power")]
    pub power: u64,
}

fn default_power() -> u64 {
    1
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenesisAccount {
    pub account: Pubkey,
    pub balance: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    pub propose_timeout_ms: u64,
    pub prevote_timeout_ms: u64,
    pub precommit_timeout_ms: u64,
    /// Pause after a commit before round 0 of the next height.
    pub commit_timeout_ms: u64,
    pub timeout_backoff_num: u64,
    pub timeout_backoff_den: u64,
    pub timeout_cap_ms: u64,
    pub max_block_txs: usize,
    pub mempool_capacity: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            propose_timeout_ms: 300,
            prevote_timeout_ms: 200,
            precommit_timeout_ms: 200,
            commit_timeout_ms: 20,
            timeout_backoff_num: 3,
            timeout_backoff_den: 2,
            timeout_cap_ms: 5_000,
            max_block_txs: 256,
            mempool_capacity: 10_000,
        }
    }
}

impl ConsensusConfig {
    /// `base * (num/den)^round`, capped. Every validator computes the same value.
    pub fn timeout(&self, step: Step, round: u64) -> Duration {
        let base = match step {
            Step::Propose => self.propose_timeout_ms,
            Step::Prevote => self.prevote_timeout_ms,
            Step::Precommit => self.precommit_timeout_ms,
            Step::NewHeight => self.commit_timeout_ms,
            Step::Commit => 0,
        };

        let mut ms = base;
        for _ in 0..round {
            if ms >= self.timeout_cap_ms {
                break;
            }
            let next = ms.saturating_mul(self.timeout_backoff_num) / self.timeout_backoff_den.max(1);
            // Integer division can stall growth at small values.
            if next <= ms {
                break;
            }
            ms = next;
        }
        Duration::from_millis(ms.min(self.timeout_cap_ms))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_backoff_den == 0 || self.timeout_backoff_num < self.timeout_backoff_den {
            return Err(ConfigError::InvalidBackoff);
        }
        for (step, ms) in [
            ("propose", self.propose_timeout_ms),
            ("prevote", self.prevote_timeout_ms),
            ("precommit", self.precommit_timeout_ms),
            ("commit", self.commit_timeout_ms),
        ] {
            if ms == 0 {
                return Err(ConfigError::ZeroTimeout(step));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub drop_probability: f64,
    pub duplicate_probability: f64,
    pub inbox_capacity: usize,
    pub seed: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 10,
            max_delay_ms: 50,
            drop_probability: 0.1,
            duplicate_probability: 0.05,
            inbox_capacity: 4_096,
            seed: 42,
        }
    }
}

impl NetworkConfig {
    /// A network that delivers everything once, after `delay_ms`.
    pub fn reliable(delay_ms: u64) -> Self {
        Self {
            min_delay_ms: delay_ms,
            max_delay_ms: delay_ms,
            drop_probability: 0.0,
            duplicate_probability: 0.0,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for p in [self.drop_probability, self.duplicate_probability] {
            if !(0.0..=1.0).contains(&p) {
                return Err(ConfigError::InvalidProbability(p));
            }
        }
        if self.min_delay_ms > self.max_delay_ms {
            return Err(ConfigError::InvalidDelayRange {
                min_ms: self.min_delay_ms,
                max_ms: self.max_delay_ms,
            });
        }
        Ok(())
    }
}

impl GenesisConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.validators.is_empty() {
            return Err(ConfigError::EmptyValidatorSet);
        }
        let mut total = 0u64;
        for v in &self.validators {
            total = total.checked_add(v.power).ok_or(ConfigError::VotingPowerOverflow)?;
        }
        if total == 0 {
            return Err(ConfigError::ZeroVotingPower);
        }
        self.consensus.validate()?;
        self.network.validate()
    }
}
