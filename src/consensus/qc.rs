use std::collections::HashSet;

use super::{message::Phase, message::Vote, peers::ValidatorSet};
use crate::common::crypto::Digest;
use crate::error::{CertificateError, VoteError};

/*
    A Quorum Certificate over a tuple ⟨height, round, phase, block_hash⟩
    is the set of distinct validator votes for exactly that tuple whose
    combined voting power exceeds 2/3 of the total. A precommit certificate
    for a concrete block hash is a commit certificate: it is stored with the
    finalized block and shipped to lagging validators during sync.
*/

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct QuorumCertificate {
    pub height: u64,
    pub round: u64,
    pub phase: Phase,
    pub block_hash: Option<Digest>,
    pub votes: Vec<Vote>,
}

impl QuorumCertificate {
    pub fn voting_power(&self, validators: &ValidatorSet) -> u64 {
        let mut seen = HashSet::new();
        self.votes
            .iter()
            .filter(|v| seen.insert(v.validator))
            .map(|v| validators.power_of(v.validator))
            .sum()
    }

    pub fn validate(&self, validators: &ValidatorSet, chain_id: &str) -> Result<(), CertificateError> {
        let mut signers = HashSet::new();
        let mut power = 0u64;

        for vote in &self.votes {
            if vote.height != self.height
                || vote.round != self.round
                || vote.phase != self.phase
                || vote.block_hash != self.block_hash
            {
                return Err(CertificateError::MixedVotes);
            }

            if !signers.insert(vote.validator) {
                return Err(CertificateError::DuplicateValidator(vote.validator));
            }

            let validator = validators
                .get(vote.validator)
                .ok_or(VoteError::UnknownValidator(vote.validator))?;
            if !vote.verify(&validator.pubkey, chain_id) {
                return Err(VoteError::InvalidSignature(vote.validator).into());
            }

            power += validator.power;
        }

        if !validators.is_quorum(power) {
            return Err(CertificateError::InsufficientPower {
                have: power,
                total: validators.total_power(),
            });
        }

        Ok(())
    }

    /// A valid precommit certificate for `block_hash` at `height`.
    pub fn validate_commit(
        &self,
        validators: &ValidatorSet,
        chain_id: &str,
        height: u64,
        block_hash: &Digest,
    ) -> Result<(), CertificateError> {
        if self.phase != Phase::Precommit
            || self.height != height
            || self.block_hash.as_ref() != Some(block_hash)
        {
            return Err(CertificateError::NotACommit);
        }
        self.validate(validators, chain_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::crypto::Keypair;

    const CHAIN: &str = "test-chain";

    fn setup() -> (Vec<Keypair>, ValidatorSet) {
        let keys: Vec<_> = (0..4u8).map(|i| Keypair::from_seed(&[i + 1; 32])).collect();
        let set = ValidatorSet::new(keys.iter().map(|k| (k.pubkey(), 1)).collect()).unwrap();
        (keys, set)
    }

    fn precommit(keys: &[Keypair], validator: usize, hash: Digest) -> Vote {
        Vote::new_signed(&keys[validator], CHAIN, 5, 0, Phase::Precommit, Some(hash), validator)
    }

    fn certificate(votes: Vec<Vote>) -> QuorumCertificate {
        QuorumCertificate {
            height: 5,
            round: 0,
            phase: Phase::Precommit,
            block_hash: Some([7u8; 32]),
            votes,
        }
    }

    #[test]
    fn test_validate_qc() {
        let (keys, set) = setup();
        let qc = certificate((0..3).map(|i| precommit(&keys, i, [7u8; 32])).collect());

        assert_eq!(qc.validate(&set, CHAIN), Ok(()));
        assert_eq!(qc.voting_power(&set), 3);
        assert_eq!(qc.validate_commit(&set, CHAIN, 5, &[7u8; 32]), Ok(()));
        assert_eq!(
            qc.validate_commit(&set, CHAIN, 6, &[7u8; 32]),
            Err(CertificateError::NotACommit)
        );
    }

    #[test]
    fn test_qc_needs_supermajority() {
        let (keys, set) = setup();
        let qc = certificate((0..2).map(|i| precommit(&keys, i, [7u8; 32])).collect());

        assert_eq!(
            qc.validate(&set, CHAIN),
            Err(CertificateError::InsufficientPower { have: 2, total: 4 })
        );
    }

    #[test]
    fn test_qc_rejects_duplicates_and_mixed_votes() {
        let (keys, set) = setup();
        let mut votes: Vec<_> = (0..3).map(|i| precommit(&keys, i, [7u8; 32])).collect();
        votes.push(votes[0].clone());
        assert_eq!(
            certificate(votes).validate(&set, CHAIN),
            Err(CertificateError::DuplicateValidator(0))
        );

        let mut votes: Vec<_> = (0..3).map(|i| precommit(&keys, i, [7u8; 32])).collect();
        votes[2] = precommit(&keys, 2, [8u8; 32]);
        assert_eq!(
            certificate(votes).validate(&set, CHAIN),
            Err(CertificateError::MixedVotes)
        );
    }

    #[test]
    fn test_qc_rejects_forged_vote() {
        let (keys, set) = setup();
        let mut votes: Vec<_> = (0..3).map(|i| precommit(&keys, i, [7u8; 32])).collect();
        // Validator 3 signs, but claims to be validator 2.
        votes[2] = precommit(&keys, 3, [7u8; 32]);
        votes[2].validator = 2;
        assert_eq!(
            certificate(votes).validate(&set, CHAIN),
            Err(CertificateError::Vote(VoteError::InvalidSignature(2)))
        );
    }
}
