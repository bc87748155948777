use super::qc::QuorumCertificate;
use crate::common::crypto::{
    domain_tag, hash, Digest, Keypair, Pubkey, Signature, PROPOSAL_DOMAIN, VOTE_DOMAIN, ZERO_DIGEST,
};
use crate::execution::Transaction;

/*
    Everything a validator sends is one of the `Message` variants below and
    is consumed by a single exhaustive match in the engine. Votes and
    proposals are signed over a fixed big-endian encoding of their fields,
    prefixed by the chain-scoped domain tag.
*/

pub trait Hashable {
    fn hash(&self) -> Digest;
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub enum Phase {
    Prevote,
    Precommit,
}

impl AsRef<[u8]> for Phase {
    fn as_ref(&self) -> &[u8] {
        match self {
            Phase::Prevote => &[1u8],
            Phase::Precommit => &[2u8],
        }
    }
}

#[derive(Clone, Debug)]
pub enum Message {
    Proposal(Proposal),
    Vote(Vote),
    Transaction(Transaction),
    SyncRequest { height: u64 },
    SyncResponse {
        block: Block,
        certificate: QuorumCertificate,
    },
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Proposal(_) => "proposal",
            Message::Vote(_) => "vote",
            Message::Transaction(_) => "transaction",
            Message::SyncRequest { .. } => "sync_request",
            Message::SyncResponse { .. } => "sync_response",
        }
    }
}

/// `round` and `proposer` name the slot that first produced this block. A
/// locked proposer re-proposes the block unchanged in a later round.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct BlockHeader {
    pub height: u64,
    pub parent_hash: Digest,
    pub state_hash: Digest,
    pub tx_root: Digest,
    pub proposer: usize,
    pub round: u64,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn genesis(state_hash: Digest) -> Self {
        Block {
            header: BlockHeader {
                height: 0,
                parent_hash: ZERO_DIGEST,
                state_hash,
                tx_root: tx_root(&[]),
                proposer: 0,
                round: 0,
            },
            transactions: Vec::new(),
        }
    }
}

impl Hashable for BlockHeader {
    fn hash(&self) -> Digest {
        hash(&[
            &self.height.to_be_bytes()[..],
            &self.parent_hash[..],
            &self.state_hash[..],
            &self.tx_root[..],
            &(self.proposer as u64).to_be_bytes()[..],
            &self.round.to_be_bytes()[..],
        ])
    }
}

impl Hashable for Block {
    fn hash(&self) -> Digest {
        self.header.hash()
    }
}

/// Binary Merkle root over transaction hashes; an odd node is paired with itself.
pub fn tx_root(transactions: &[Transaction]) -> Digest {
    if transactions.is_empty() {
        return ZERO_DIGEST;
    }
    let mut level: Vec<Digest> = transactions.iter().map(|tx| tx.hash()).collect();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| hash(&[&pair[0][..], &pair.get(1).unwrap_or(&pair[0])[..]]))
            .collect();
    }
    level[0]
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Proposal {
    pub height: u64,
    pub round: u64,
    pub block: Block,
    pub proposer: usize,
    pub signature: Signature,
}

impl Proposal {
    pub fn new_signed(
        keypair: &Keypair,
        chain_id: &str,
        round: u64,
        block: Block,
        proposer: usize,
    ) -> Self {
        let height = block.header.height;
        let payload = Self::payload(height, round, &block.hash(), proposer);
        let signature = keypair.sign(&domain_tag(PROPOSAL_DOMAIN, chain_id), &payload);
        Proposal {
            height,
            round,
            block,
            proposer,
            signature,
        }
    }

    fn payload(height: u64, round: u64, block_hash: &Digest, proposer: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + 8 + 32 + 8);
        out.extend_from_slice(&height.to_be_bytes());
        out.extend_from_slice(&round.to_be_bytes());
        out.extend_from_slice(block_hash);
        out.extend_from_slice(&(proposer as u64).to_be_bytes());
        out
    }

    pub fn verify(&self, pubkey: &Pubkey, chain_id: &str) -> bool {
        let payload = Self::payload(self.height, self.round, &self.block.hash(), self.proposer);
        pubkey.verify(&domain_tag(PROPOSAL_DOMAIN, chain_id), &payload, &self.signature)
    }

    pub fn block_hash(&self) -> Digest {
        self.block.hash()
    }
}

/// A signed prevote or precommit. `block_hash == None` is a vote for nil.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Vote {
    pub height: u64,
    pub round: u64,
    pub phase: Phase,
    pub block_hash: Option<Digest>,
    pub validator: usize,
    pub signature: Signature,
}

impl Vote {
    pub fn new_signed(
        keypair: &Keypair,
        chain_id: &str,
        height: u64,
        round: u64,
        phase: Phase,
        block_hash: Option<Digest>,
        validator: usize,
    ) -> Self {
        let payload = Self::payload(height, round, phase, block_hash.as_ref(), validator);
        let signature = keypair.sign(&domain_tag(VOTE_DOMAIN, chain_id), &payload);
        Vote {
            height,
            round,
            phase,
            block_hash,
            validator,
            signature,
        }
    }

    pub fn signing_payload(&self) -> Vec<u8> {
        Self::payload(
            self.height,
            self.round,
            self.phase,
            self.block_hash.as_ref(),
            self.validator,
        )
    }

    fn payload(
        height: u64,
        round: u64,
        phase: Phase,
        block_hash: Option<&Digest>,
        validator: usize,
    ) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + 8 + 1 + 1 + 32 + 8);
        out.extend_from_slice(&height.to_be_bytes());
        out.extend_from_slice(&round.to_be_bytes());
        out.extend_from_slice(phase.as_ref());
        match block_hash {
            Some(hash) => {
                out.push(1);
                out.extend_from_slice(hash);
            }
            None => out.push(0),
        }
        out.extend_from_slice(&(validator as u64).to_be_bytes());
        out
    }

    pub fn verify(&self, pubkey: &Pubkey, chain_id: &str) -> bool {
        pubkey.verify(
            &domain_tag(VOTE_DOMAIN, chain_id),
            &self.signing_payload(),
            &self.signature,
        )
    }
}

/// Proof that a validator signed two conflicting messages for one slot.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Evidence {
    DoubleVote { first: Vote, second: Vote },
    DoubleProposal {
        first: Box<Proposal>,
        second: Box<Proposal>,
    },
}

impl Evidence {
    pub fn offender(&self) -> usize {
        match self {
            Evidence::DoubleVote { first, .. } => first.validator,
            Evidence::DoubleProposal { first, .. } => first.proposer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::crypto::TX_DOMAIN;

    #[test]
    fn test_vote_signature() {
        let keypair = Keypair::from_seed(&[1u8; 32]);
        let vote = Vote::new_signed(&keypair, "test-chain", 5, 0, Phase::Precommit, Some([4u8; 32]), 2);

        assert!(vote.verify(&keypair.pubkey(), "test-chain"));
        assert!(!vote.verify(&keypair.pubkey(), "other-chain"));

        let mut nil = vote.clone();
        nil.block_hash = None;
        assert!(!nil.verify(&keypair.pubkey(), "test-chain"));

        let mut other_phase = vote.clone();
        other_phase.phase = Phase::Prevote;
        assert!(!other_phase.verify(&keypair.pubkey(), "test-chain"));
    }

    #[test]
    fn test_transaction_domain_signature_rejected_as_vote() {
        let keypair = Keypair::from_seed(&[1u8; 32]);
        let mut vote = Vote::new_signed(&keypair, "test-chain", 1, 0, Phase::Prevote, None, 0);
        vote.signature = keypair.sign(&domain_tag(TX_DOMAIN, "test-chain"), &vote.signing_payload());

        assert!(!vote.verify(&keypair.pubkey(), "test-chain"));
    }

    #[test]
    fn test_proposal_signature_covers_block() {
        let keypair = Keypair::from_seed(&[1u8; 32]);
        let mut block = Block::genesis([0u8; 32]);
        block.header.height = 1;
        let mut proposal = Proposal::new_signed(&keypair, "test-chain", 0, block, 1);
        assert!(proposal.verify(&keypair.pubkey(), "test-chain"));

        proposal.block.header.state_hash = [1u8; 32];
        assert!(!proposal.verify(&keypair.pubkey(), "test-chain"));
    }

    #[test]
    fn test_block_hash_covers_origin() {
        let mut block = Block::genesis([0u8; 32]);
        let genesis_hash = block.hash();
        block.header.round = 1;
        assert_ne!(block.hash(), genesis_hash);
    }

    #[test]
    fn test_tx_root() {
        let alice = Keypair::from_seed(&[1u8; 32]);
        let txs: Vec<_> = (1..=3)
            .map(|n| Transaction::new_signed(&alice, alice.pubkey(), 1, n, "test-chain"))
            .collect();

        assert_eq!(tx_root(&[]), ZERO_DIGEST);
        assert_eq!(tx_root(&txs[..1]), txs[0].hash());
        assert_ne!(tx_root(&txs), tx_root(&txs[..2]));

        let mut reordered = txs.clone();
        reordered.swap(0, 1);
        assert_ne!(tx_root(&txs), tx_root(&reordered));
    }
}
