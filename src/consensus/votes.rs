use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{trace, warn};

use super::message::{Evidence, Phase, Vote};
use super::peers::ValidatorSet;
use super::qc::QuorumCertificate;
use crate::common::crypto::{short_hex, Digest};
use crate::error::VoteError;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AddVoteOutcome {
    Added,
    /// The identical vote was already counted.
    Duplicate,
}

#[derive(Default, Debug)]
struct PhaseVotes {
    by_validator: BTreeMap<usize, Vote>,
    tallies: HashMap<Option<Digest>, u64>,
}

/// Collects signed votes per `(height, round, phase)` and answers quorum
/// questions over them. Each validator counts at most once per slot; a
/// second, different vote for the same slot is kept as evidence and never
/// counted.
pub struct VoteAggregator {
    chain_id: String,
    validators: Arc<ValidatorSet>,
    slots: BTreeMap<(u64, u64, Phase), PhaseVotes>,
    evidence: Vec<Evidence>,
}

impl VoteAggregator {
    pub fn new(chain_id: impl Into<String>, validators: Arc<ValidatorSet>) -> Self {
        VoteAggregator {
            chain_id: chain_id.into(),
            validators,
            slots: BTreeMap::new(),
            evidence: Vec::new(),
        }
    }

    pub fn add_vote(&mut self, vote: Vote) -> Result<AddVoteOutcome, VoteError> {
        let validator = self
            .validators
            .get(vote.validator)
            .ok_or(VoteError::UnknownValidator(vote.validator))?;

        if !vote.verify(&validator.pubkey, &self.chain_id) {
            return Err(VoteError::InvalidSignature(vote.validator));
        }
        let power = validator.power;

        let slot = self
            .slots
            .entry((vote.height, vote.round, vote.phase))
            .or_default();

        if let Some(existing) = slot.by_validator.get(&vote.validator) {
            if existing.block_hash == vote.block_hash {
                return Ok(AddVoteOutcome::Duplicate);
            }

            let evidence = Evidence::DoubleVote {
                first: existing.clone(),
                second: vote.clone(),
            };
            if !self.evidence.contains(&evidence) {
                warn!(
                    validator = vote.validator,
                    height = vote.height,
                    round = vote.round,
                    phase = ?vote.phase,
                    "equivocation detected"
                );
                self.evidence.push(evidence);
            }
            return Err(VoteError::Equivocation {
                validator: vote.validator,
                height: vote.height,
                round: vote.round,
                phase: vote.phase,
            });
        }

        trace!(
            validator = vote.validator,
            height = vote.height,
            round = vote.round,
            phase = ?vote.phase,
            block = %vote.block_hash.as_ref().map_or_else(|| "nil".to_string(), short_hex),
            "vote added"
        );
        *slot.tallies.entry(vote.block_hash).or_insert(0) += power;
        slot.by_validator.insert(vote.validator, vote);
        Ok(AddVoteOutcome::Added)
    }

    pub fn power_for(&self, height: u64, round: u64, phase: Phase, block_hash: Option<Digest>) -> u64 {
        self.slots
            .get(&(height, round, phase))
            .and_then(|slot| slot.tallies.get(&block_hash))
            .copied()
            .unwrap_or(0)
    }

    pub fn has_quorum(&self, height: u64, round: u64, phase: Phase, block_hash: Option<Digest>) -> bool {
        self.validators
            .is_quorum(self.power_for(height, round, phase, block_hash))
    }

    /// The value, if any, that reached quorum in this slot. At most one can.
    pub fn quorum_value(&self, height: u64, round: u64, phase: Phase) -> Option<Option<Digest>> {
        let slot = self.slots.get(&(height, round, phase))?;
        slot.tallies
            .iter()
            .find(|(_, power)| self.validators.is_quorum(**power))
            .map(|(value, _)| *value)
    }

    /// Combined power of everyone who voted in this slot, whatever they voted for.
    pub fn slot_power(&self, height: u64, round: u64, phase: Phase) -> u64 {
        self.slots
            .get(&(height, round, phase))
            .map_or(0, |slot| slot.tallies.values().sum())
    }

    /// Power of distinct validators with any vote at `(height, round)`.
    pub fn round_power(&self, height: u64, round: u64) -> u64 {
        let mut voters: Vec<usize> = [Phase::Prevote, Phase::Precommit]
            .iter()
            .filter_map(|phase| self.slots.get(&(height, round, *phase)))
            .flat_map(|slot| slot.by_validator.keys().copied())
            .collect();
        voters.sort_unstable();
        voters.dedup();
        voters.iter().map(|v| self.validators.power_of(*v)).sum()
    }

    /// Rounds at `height` that hold any votes, ascending.
    pub fn rounds(&self, height: u64) -> Vec<u64> {
        let mut rounds: Vec<u64> = self
            .slots
            .range((height, 0, Phase::Prevote)..=(height, u64::MAX, Phase::Precommit))
            .map(|((_, round, _), _)| *round)
            .collect();
        rounds.dedup();
        rounds
    }

    pub fn certificate_for(
        &self,
        height: u64,
        round: u64,
        phase: Phase,
        block_hash: Option<Digest>,
    ) -> Option<QuorumCertificate> {
        if !self.has_quorum(height, round, phase, block_hash) {
            return None;
        }
        let slot = self.slots.get(&(height, round, phase))?;
        let votes = slot
            .by_validator
            .values()
            .filter(|v| v.block_hash == block_hash)
            .cloned()
            .collect();

        Some(QuorumCertificate {
            height,
            round,
            phase,
            block_hash,
            votes,
        })
    }

    /// Validators who voted for `block_hash` in the slot.
    pub fn voters_for(&self, height: u64, round: u64, phase: Phase, block_hash: Option<Digest>) -> Vec<usize> {
        self.slots
            .get(&(height, round, phase))
            .map(|slot| {
                slot.by_validator
                    .values()
                    .filter(|v| v.block_hash == block_hash)
                    .map(|v| v.validator)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drops every slot below `height`. Evidence is kept.
    pub fn prune_below(&mut self, height: u64) {
        self.slots = self.slots.split_off(&(height, 0, Phase::Prevote));
    }

    pub fn evidence(&self) -> &[Evidence] {
        &self.evidence
    }
}
