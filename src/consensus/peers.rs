use crate::common::config::ValidatorConfig;
use crate::common::crypto::Pubkey;
use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validator {
    pub index: usize,
    pub pubkey: Pubkey,
    pub power: u64,
}

/// The fixed, ordered validator set for a run. Built once and shared
/// read-only (behind an `Arc`) by every component that needs it.
#[derive(Debug, Clone)]
pub struct ValidatorSet {
    members: Vec<Validator>,
    total_power: u64,
}

impl ValidatorSet {
    pub fn new(members: Vec<(Pubkey, u64)>) -> Result<Self, ConfigError> {
        if members.is_empty() {
            return Err(ConfigError::EmptyValidatorSet);
        }

        let mut total_power = 0u64;
        for (_, power) in &members {
            total_power = total_power
                .checked_add(*power)
                .ok_or(ConfigError::VotingPowerOverflow)?;
        }
        if total_power == 0 {
            return Err(ConfigError::ZeroVotingPower);
        }
        // 3 * total must stay representable for the quorum arithmetic.
        if total_power.checked_mul(3).is_none() {
            return Err(ConfigError::VotingPowerOverflow);
        }

        let members = members
            .into_iter()
            .enumerate()
            .map(|(index, (pubkey, power))| Validator {
                index,
                pubkey,
                power,
            })
            .collect();

        Ok(ValidatorSet {
            members,
            total_power,
        })
    }

    pub fn from_config(validators: &[ValidatorConfig]) -> Result<Self, ConfigError> {
        Self::new(validators.iter().map(|v| (v.pubkey, v.power)).collect())
    }

    /// Round-robin over indices: every validator computes the same proposer
    /// for `(height, round)` without talking to anyone.
    pub fn proposer(&self, height: u64, round: u64) -> &Validator {
        let slot = height.wrapping_add(round) % self.members.len() as u64;
        &self.members[slot as usize]
    }

    pub fn get(&self, index: usize) -> Option<&Validator> {
        self.members.get(index)
    }

    pub fn members(&self) -> &[Validator] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn total_power(&self) -> u64 {
        self.total_power
    }

    pub fn power_of(&self, index: usize) -> u64 {
        self.members.get(index).map_or(0, |v| v.power)
    }

    /// Smallest power that is strictly more than 2/3 of the total.
    pub fn quorum_threshold(&self) -> u64 {
        self.total_power * 2 / 3 + 1
    }

    pub fn is_quorum(&self, power: u64) -> bool {
        power.saturating_mul(3) > self.total_power * 2
    }

    /// Strictly more than 1/3: at least one honest validator is behind it.
    pub fn is_one_third(&self, power: u64) -> bool {
        power.saturating_mul(3) > self.total_power
    }
}
