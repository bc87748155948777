use thiserror::Error;

use crate::consensus::Phase;

/// Rejection of a single transaction, either at mempool admission or while
/// executing a block.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransactionError {
    #[error("invalid transaction signature")]
    InvalidSignature,

    #[error("invalid nonce: expected {expected}, got {got}")]
    InvalidNonce { expected: u64, got: u64 },

    #[error("insufficient balance: have {balance}, need {amount}")]
    InsufficientBalance { balance: u64, amount: u64 },

    #[error("recipient balance would overflow")]
    BalanceOverflow,

    #[error("transaction already pending")]
    AlreadyPending,

    #[error("transaction pool is full ({capacity} entries)")]
    PoolFull { capacity: usize },
}

/// A block that cannot be applied. No partial effects survive one of these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlockError {
    #[error("transaction {index} rejected: {source}")]
    Transaction {
        index: usize,
        #[source]
        source: TransactionError,
    },

    #[error("state hash mismatch: declared {declared}, computed {computed}")]
    StateHashMismatch { declared: String, computed: String },

    #[error("tx root does not commit to the block body")]
    TxRootMismatch,

    #[error("block height {got} does not follow {expected}")]
    HeightMismatch { expected: u64, got: u64 },

    #[error("block parent does not match the finalized tip")]
    ParentMismatch,
}

/// The InvalidProposal family. Any of these makes the validator prevote nil.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProposalError {
    #[error("proposal from validator {got}, designated proposer is {expected}")]
    WrongProposer { expected: usize, got: usize },

    #[error("invalid proposal signature")]
    InvalidSignature,

    #[error("proposal for height {got}, expected {expected}")]
    HeightMismatch { expected: u64, got: u64 },

    #[error("proposal parent does not match the finalized tip")]
    ParentMismatch,

    #[error("block origin (round {round}, proposer {proposer}) is not a valid proposer slot")]
    OriginMismatch { round: u64, proposer: usize },

    #[error(transparent)]
    Block(#[from] BlockError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VoteError {
    #[error("vote from unknown validator {0}")]
    UnknownValidator(usize),

    #[error("invalid vote signature from validator {0}")]
    InvalidSignature(usize),

    #[error("validator {validator} equivocated at height {height} round {round} {phase:?}")]
    Equivocation {
        validator: usize,
        height: u64,
        round: u64,
        phase: Phase,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CertificateError {
    #[error("certificate vote does not match the certified tuple")]
    MixedVotes,

    #[error("validator {0} appears twice in the certificate")]
    DuplicateValidator(usize),

    #[error(transparent)]
    Vote(#[from] VoteError),

    #[error("insufficient voting power: {have} of {total}")]
    InsufficientPower { have: u64, total: u64 },

    #[error("certificate is not a precommit for a concrete block")]
    NotACommit,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("validator set is empty")]
    EmptyValidatorSet,

    #[error("total voting power is zero")]
    ZeroVotingPower,

    #[error("total voting power overflows")]
    VotingPowerOverflow,

    #[error("probability {0} is outside [0, 1]")]
    InvalidProbability(f64),

    #[error("delay range {min_ms}..={max_ms} ms is inverted")]
    InvalidDelayRange { min_ms: u64, max_ms: u64 },

    #[error("validator index {index} out of range for {count} validators")]
    UnknownValidator { index: usize, count: usize },

    #[error("keypair does not match validator {0} in the genesis set")]
    KeyMismatch(usize),

    #[error("timeout back-off must be a ratio of at least 1 with a non-zero denominator")]
    InvalidBackoff,

    #[error("{0} timeout must be non-zero")]
    ZeroTimeout(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    /// Commit-time execution failed after a precommit quorum. Fatal to the validator.
    #[error("state corruption at height {height}: {source}")]
    StateCorruption {
        height: u64,
        #[source]
        source: BlockError,
    },

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error("node has stopped")]
    Stopped,
}
