use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::mempool::Mempool;
use super::message::{tx_root, Block, BlockHeader, Evidence, Hashable, Message, Phase, Proposal, Vote};
use super::peers::ValidatorSet;
use super::qc::QuorumCertificate;
use super::store::{Ledger, LedgerReader};
use super::votes::{AddVoteOutcome, VoteAggregator};
use crate::common::config::{ConsensusConfig, GenesisConfig};
use crate::common::crypto::{short_hex, Digest, Keypair};
use crate::error::{BlockError, ConfigError, NodeError, ProposalError, TransactionError, VoteError};
use crate::execution::{ExecutionState, Transaction};

/*
    Per-validator Tendermint-style state machine:

        NewHeight -> Propose -> Prevote -> Precommit -> Commit -> NewHeight
                        ^                      |
                        +------ round + 1 -----+   (timeout / nil quorum)

    The engine is synchronous and owns no I/O. Messages it wants sent pile
    up in an outbox, and each step it enters schedules a `Timeout` that the
    runner feeds back once it elapses. Timeouts for a (height, round, step)
    that is no longer current are ignored, so a quorum that arrived first
    always wins over a late timer.

    Safety across rounds comes from locking: after precommitting block B the
    validator prevotes only B at this height, unless it sees a prevote
    quorum for something else in a newer round.
*/

/// Buffered messages for heights we have not reached yet.
const FUTURE_BUFFER_LIMIT: usize = 1024;

/// Finalized blocks shipped per sync request.
const SYNC_BATCH: u64 = 8;

/// Votes and proposals more than this many rounds ahead are not stored.
const ROUND_WINDOW: u64 = 8;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Step {
    NewHeight,
    Propose,
    Prevote,
    Precommit,
    Commit,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Timeout {
    pub height: u64,
    pub round: u64,
    pub step: Step,
    pub duration: Duration,
}

#[derive(Clone, Debug)]
pub enum Outbound {
    Broadcast(Message),
    Send { to: usize, message: Message },
}

pub struct ConsensusEngine {
    index: usize,
    keypair: Keypair,
    chain_id: String,
    validators: Arc<ValidatorSet>,
    config: ConsensusConfig,

    state: ExecutionState,
    ledger: Ledger,
    votes: VoteAggregator,
    mempool: Mempool,

    height: u64,
    round: u64,
    step: Step,
    /// First correctly signed proposal per round at this height.
    proposals: HashMap<u64, Proposal>,
    /// Every block seen in a proposal at this height.
    blocks: HashMap<Digest, Block>,
    locked: Option<(u64, Block)>,
    voted: HashSet<(u64, Phase)>,
    future: VecDeque<(usize, Message)>,
    sync_asked: HashSet<usize>,
    /// Highest round each validator was seen voting in past the window.
    far_rounds: HashMap<usize, u64>,
    proposal_evidence: Vec<Evidence>,

    outbox: Vec<Outbound>,
    scheduled: Option<Timeout>,
}

impl ConsensusEngine {
    pub fn new(
        index: usize,
        keypair: Keypair,
        genesis: &GenesisConfig,
        validators: Arc<ValidatorSet>,
    ) -> Result<Self, ConfigError> {
        let validator = validators.get(index).ok_or(ConfigError::UnknownValidator {
            index,
            count: validators.len(),
        })?;
        if validator.pubkey != keypair.pubkey() {
            return Err(ConfigError::KeyMismatch(index));
        }

        let state = ExecutionState::genesis(
            genesis.chain_id.clone(),
            genesis.balances.iter().map(|a| (a.account, a.balance)),
        );
        let ledger = Ledger::new(Block::genesis(state.commitment_hash()));

        Ok(ConsensusEngine {
            index,
            keypair,
            chain_id: genesis.chain_id.clone(),
            votes: VoteAggregator::new(genesis.chain_id.clone(), validators.clone()),
            validators,
            config: genesis.consensus.clone(),
            state,
            ledger,
            mempool: Mempool::new(genesis.consensus.mempool_capacity),
            height: 1,
            round: 0,
            step: Step::NewHeight,
            proposals: HashMap::new(),
            blocks: HashMap::new(),
            locked: None,
            voted: HashSet::new(),
            future: VecDeque::new(),
            sync_asked: HashSet::new(),
            far_rounds: HashMap::new(),
            proposal_evidence: Vec::new(),
            outbox: Vec::new(),
            scheduled: None,
        })
    }

    /// Begins round 0 of the first unfinalized height right away.
    pub fn start(&mut self) -> Result<(), NodeError> {
        self.reset_height(self.ledger.height() + 1);
        self.enter_round(0)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn state(&self) -> &ExecutionState {
        &self.state
    }

    pub fn ledger_reader(&self) -> LedgerReader {
        self.ledger.reader()
    }

    pub fn locked_block(&self) -> Option<Digest> {
        self.locked.as_ref().map(|(_, block)| block.hash())
    }

    pub fn evidence(&self) -> Vec<Evidence> {
        let mut all = self.votes.evidence().to_vec();
        all.extend(self.proposal_evidence.iter().cloned());
        all
    }

    pub fn take_outbound(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbox)
    }

    /// The timer for the step most recently entered, if not yet taken.
    pub fn take_timeout(&mut self) -> Option<Timeout> {
        self.scheduled.take()
    }

    /// Admits a locally submitted transaction and gossips it to peers.
    pub fn submit_transaction(&mut self, tx: Transaction) -> Result<Digest, TransactionError> {
        let hash = self.mempool.insert(tx.clone(), &self.state)?;
        debug!(validator = self.index, tx = %short_hex(&hash), "transaction admitted");
        self.outbox.push(Outbound::Broadcast(Message::Transaction(tx)));
        Ok(hash)
    }

    pub fn handle_message(&mut self, from: usize, message: Message) -> Result<(), NodeError> {
        match message {
            Message::Proposal(proposal) => self.on_proposal(from, proposal),
            Message::Vote(vote) => self.on_vote(from, vote),
            Message::Transaction(tx) => {
                if let Err(e) = self.mempool.insert(tx, &self.state) {
                    debug!(validator = self.index, from, error = %e, "gossiped transaction not admitted");
                }
                Ok(())
            }
            Message::SyncRequest { height } => {
                self.on_sync_request(from, height);
                Ok(())
            }
            Message::SyncResponse { block, certificate } => {
                self.on_sync_response(from, block, certificate)
            }
        }
    }

    pub fn on_timeout(&mut self, timeout: Timeout) -> Result<(), NodeError> {
        if timeout.height != self.height || timeout.round != self.round || timeout.step != self.step {
            return Ok(());
        }
        debug!(
            validator = self.index,
            height = self.height,
            round = self.round,
            step = ?self.step,
            "timeout"
        );
        self.sync_asked.clear();

        match timeout.step {
            Step::NewHeight => self.enter_round(0),
            Step::Propose => self.prevote(),
            Step::Prevote => {
                // A quorum that is already here beats the timer.
                self.check_prevote_quorum()?;
                if self.at(timeout.height, timeout.round, Step::Prevote) {
                    info!(
                        validator = self.index,
                        height = self.height,
                        round = self.round,
                        "no prevote quorum, advancing round"
                    );
                    if !self.voted.contains(&(self.round, Phase::Precommit)) {
                        self.cast_vote(Phase::Precommit, None);
                    }
                    self.enter_round(timeout.round + 1)?;
                }
                Ok(())
            }
            Step::Precommit => {
                self.check_commit(timeout.round)?;
                if self.at(timeout.height, timeout.round, Step::Precommit) {
                    info!(
                        validator = self.index,
                        height = self.height,
                        round = self.round,
                        "no precommit quorum, advancing round"
                    );
                    self.enter_round(timeout.round + 1)?;
                }
                Ok(())
            }
            Step::Commit => Ok(()),
        }
    }

    fn at(&self, height: u64, round: u64, step: Step) -> bool {
        self.height == height && self.round == round && self.step == step
    }

    // ─── Transitions ───

    fn reset_height(&mut self, height: u64) {
        self.height = height;
        self.round = 0;
        self.step = Step::NewHeight;
        self.votes.prune_below(height);
        self.proposals.clear();
        self.blocks.clear();
        self.locked = None;
        self.voted.clear();
        self.sync_asked.clear();
        self.far_rounds.clear();
        debug!(validator = self.index, height, "new height");
    }

    /// Round 0 starts when the commit timeout fires. Messages for the new
    /// height are still collected in the meantime.
    fn enter_new_height(&mut self, height: u64) -> Result<(), NodeError> {
        self.reset_height(height);
        self.schedule(Step::NewHeight);

        let buffered = std::mem::take(&mut self.future);
        for (from, message) in buffered {
            self.handle_message(from, message)?;
        }
        Ok(())
    }

    fn enter_round(&mut self, round: u64) -> Result<(), NodeError> {
        let height = self.height;
        self.round = round;
        self.step = Step::Propose;
        self.schedule(Step::Propose);
        if round > 0 {
            debug!(validator = self.index, height, round, "entering round");
        }

        let proposer = self.validators.proposer(height, round).index;
        if proposer == self.index && !self.proposals.contains_key(&round) {
            let block = match &self.locked {
                Some((_, block)) => block.clone(),
                None => self.build_block(),
            };
            let proposal = Proposal::new_signed(&self.keypair, &self.chain_id, round, block, self.index);
            info!(
                validator = self.index,
                height,
                round,
                block = %short_hex(&proposal.block_hash()),
                txs = proposal.block.transactions.len(),
                "proposing block"
            );
            self.outbox.push(Outbound::Broadcast(Message::Proposal(proposal.clone())));
            self.on_proposal(self.index, proposal)?;
        } else if self.proposals.contains_key(&round) {
            self.prevote()?;
        }

        // Votes for this round may have arrived before we got here.
        if self.height == height && self.round == round {
            self.check_prevote_quorum()?;
        }
        if self.height == height && self.round == round {
            self.check_commit(round)?;
        }
        Ok(())
    }

    fn build_block(&self) -> Block {
        let (transactions, next) = self.mempool.select(&self.state, self.config.max_block_txs);
        Block {
            header: BlockHeader {
                height: self.height,
                parent_hash: self.ledger.tip_hash(),
                state_hash: next.commitment_hash(),
                tx_root: tx_root(&transactions),
                proposer: self.index,
                round: self.round,
            },
            transactions,
        }
    }

    fn prevote(&mut self) -> Result<(), NodeError> {
        if self.step != Step::Propose || self.voted.contains(&(self.round, Phase::Prevote)) {
            return Ok(());
        }

        let value = match self.proposals.get(&self.round) {
            None => None,
            Some(proposal) => match self.validate_proposal(proposal) {
                Ok(()) => {
                    let hash = proposal.block_hash();
                    if self.can_vote_for(&hash) {
                        Some(hash)
                    } else {
                        debug!(
                            validator = self.index,
                            height = self.height,
                            round = self.round,
                            "locked on a different block"
                        );
                        None
                    }
                }
                Err(e) => {
                    warn!(
                        validator = self.index,
                        height = self.height,
                        round = self.round,
                        error = %e,
                        "rejecting proposal"
                    );
                    None
                }
            },
        };

        self.step = Step::Prevote;
        self.schedule(Step::Prevote);
        self.cast_vote(Phase::Prevote, value);
        self.check_prevote_quorum()
    }

    /// Unlocked, or locked on `hash`, or a newer prevote quorum for `hash`
    /// releases the lock.
    fn can_vote_for(&self, hash: &Digest) -> bool {
        let Some((lock_round, block)) = &self.locked else {
            return true;
        };
        if block.hash() == *hash {
            return true;
        }
        self.votes
            .rounds(self.height)
            .into_iter()
            .filter(|r| *r > *lock_round && *r < self.round)
            .any(|r| self.votes.quorum_value(self.height, r, Phase::Prevote) == Some(Some(*hash)))
    }

    fn validate_proposal(&self, proposal: &Proposal) -> Result<(), ProposalError> {
        let header = &proposal.block.header;
        if header.height != self.height {
            return Err(ProposalError::HeightMismatch {
                expected: self.height,
                got: header.height,
            });
        }
        if header.parent_hash != self.ledger.tip_hash() {
            return Err(ProposalError::ParentMismatch);
        }
        if header.round > proposal.round
            || self.validators.proposer(header.height, header.round).index != header.proposer
        {
            return Err(ProposalError::OriginMismatch {
                round: header.round,
                proposer: header.proposer,
            });
        }
        self.state.preview_block(&proposal.block)?;
        Ok(())
    }

    fn check_prevote_quorum(&mut self) -> Result<(), NodeError> {
        if self.step != Step::Prevote || self.voted.contains(&(self.round, Phase::Precommit)) {
            return Ok(());
        }
        let Some(value) = self.votes.quorum_value(self.height, self.round, Phase::Prevote) else {
            return Ok(());
        };

        match value {
            Some(hash) => {
                // Without the block we cannot lock; wait for the proposal or the timer.
                let Some(block) = self.blocks.get(&hash).cloned() else {
                    return Ok(());
                };
                debug!(
                    validator = self.index,
                    height = self.height,
                    round = self.round,
                    block = %short_hex(&hash),
                    "prevote quorum, locking"
                );
                self.locked = Some((self.round, block));
            }
            None => {
                if self.locked.is_some() {
                    debug!(validator = self.index, height = self.height, round = self.round, "nil prevote quorum, unlocking");
                }
                self.locked = None;
            }
        }

        self.step = Step::Precommit;
        self.schedule(Step::Precommit);
        self.cast_vote(Phase::Precommit, value);
        self.check_commit(self.round)
    }

    fn check_commit(&mut self, round: u64) -> Result<(), NodeError> {
        match self.votes.quorum_value(self.height, round, Phase::Precommit) {
            Some(Some(hash)) => {
                let Some(block) = self.blocks.get(&hash).cloned() else {
                    let voters = self.votes.voters_for(self.height, round, Phase::Precommit, Some(hash));
                    self.request_sync(&voters);
                    return Ok(());
                };
                let Some(certificate) =
                    self.votes.certificate_for(self.height, round, Phase::Precommit, Some(hash))
                else {
                    return Ok(());
                };
                self.commit(block, certificate)
            }
            Some(None) if round == self.round => {
                info!(
                    validator = self.index,
                    height = self.height,
                    round,
                    "nil precommit quorum, advancing round"
                );
                self.enter_round(round + 1)
            }
            _ => Ok(()),
        }
    }

    fn commit(&mut self, block: Block, certificate: QuorumCertificate) -> Result<(), NodeError> {
        self.step = Step::Commit;
        let height = block.header.height;

        if height != self.height || block.header.parent_hash != self.ledger.tip_hash() {
            let source = if height != self.height {
                BlockError::HeightMismatch {
                    expected: self.height,
                    got: height,
                }
            } else {
                BlockError::ParentMismatch
            };
            error!(validator = self.index, height, error = %source, "certified block does not extend the ledger");
            return Err(NodeError::StateCorruption { height, source });
        }

        if let Err(source) = self.state.apply_block(&block) {
            error!(validator = self.index, height, error = %source, "certified block failed to execute");
            return Err(NodeError::StateCorruption { height, source });
        }

        info!(
            validator = self.index,
            height,
            round = certificate.round,
            block = %short_hex(&block.hash()),
            txs = block.transactions.len(),
            state = %short_hex(&block.header.state_hash),
            "finalized block"
        );
        self.ledger.append(block, certificate);
        self.mempool.prune(&self.state);
        self.enter_new_height(height + 1)
    }

    // ─── Inbound ───

    fn on_proposal(&mut self, from: usize, proposal: Proposal) -> Result<(), NodeError> {
        if proposal.height < self.height {
            return Ok(());
        }
        if proposal.height > self.height {
            self.buffer_future(from, Message::Proposal(proposal));
            self.request_sync(&[from]);
            return Ok(());
        }
        if proposal.round > self.round.saturating_add(ROUND_WINDOW) {
            debug!(validator = self.index, from, round = proposal.round, "ignoring proposal too far ahead");
            return Ok(());
        }

        let expected = self.validators.proposer(proposal.height, proposal.round).index;
        if proposal.proposer != expected {
            let e = ProposalError::WrongProposer {
                expected,
                got: proposal.proposer,
            };
            warn!(validator = self.index, from, round = proposal.round, error = %e, "dropping proposal");
            return Ok(());
        }
        let Some(proposer) = self.validators.get(proposal.proposer) else {
            return Ok(());
        };
        if !proposal.verify(&proposer.pubkey, &self.chain_id) {
            warn!(validator = self.index, from, round = proposal.round, error = %ProposalError::InvalidSignature, "dropping proposal");
            return Ok(());
        }

        let hash = proposal.block_hash();
        let round = proposal.round;
        if let Some(first) = self.proposals.get(&round) {
            if first.block_hash() == hash {
                return Ok(());
            }
            // Signed by the proposer, so a certificate may still form on it.
            self.blocks.insert(hash, proposal.block.clone());

            // Until this round's prevote is cast, a valid proposal takes the
            // place of an invalid one.
            let replace = !self.voted.contains(&(round, Phase::Prevote))
                && self.validate_proposal(first).is_err()
                && self.validate_proposal(&proposal).is_ok();

            let evidence = Evidence::DoubleProposal {
                first: Box::new(first.clone()),
                second: Box::new(proposal.clone()),
            };
            if !self.proposal_evidence.contains(&evidence) {
                warn!(
                    validator = self.index,
                    proposer = expected,
                    height = self.height,
                    round = evidence_round(&evidence),
                    "proposer equivocation detected"
                );
                self.proposal_evidence.push(evidence);
            }

            if replace {
                debug!(
                    validator = self.index,
                    height = self.height,
                    round,
                    block = %short_hex(&hash),
                    "replacing invalid proposal"
                );
                self.proposals.insert(round, proposal);
            }
            return self.on_new_block(round, hash);
        }

        debug!(
            validator = self.index,
            height = self.height,
            round,
            block = %short_hex(&hash),
            "received proposal"
        );
        self.blocks.insert(hash, proposal.block.clone());
        self.proposals.insert(round, proposal);
        self.on_new_block(round, hash)
    }

    /// Re-runs whatever may have been waiting on the proposal for `round`
    /// or on block `hash`.
    fn on_new_block(&mut self, round: u64, hash: Digest) -> Result<(), NodeError> {
        let height = self.height;
        if round == self.round {
            self.prevote()?;
            if self.height == height && self.round == round {
                self.check_prevote_quorum()?;
            }
        }
        // A precommit quorum may have been waiting on this block.
        if self.height == height {
            for r in self.votes.rounds(height) {
                if self.height != height {
                    break;
                }
                if self.votes.quorum_value(height, r, Phase::Precommit) == Some(Some(hash)) {
                    self.check_commit(r)?;
                }
            }
        }
        Ok(())
    }

    fn on_vote(&mut self, from: usize, vote: Vote) -> Result<(), NodeError> {
        if vote.height < self.height {
            return Ok(());
        }
        if vote.height > self.height {
            self.buffer_future(from, Message::Vote(vote));
            self.request_sync(&[from]);
            return Ok(());
        }
        if vote.round > self.round.saturating_add(ROUND_WINDOW) {
            return self.on_far_vote(from, vote);
        }

        let (round, phase) = (vote.round, vote.phase);
        match self.votes.add_vote(vote) {
            Ok(AddVoteOutcome::Added) => {}
            Ok(AddVoteOutcome::Duplicate) => return Ok(()),
            Err(e) => {
                warn!(validator = self.index, from, error = %e, "vote rejected");
                return Ok(());
            }
        }

        if round > self.round
            && self
                .validators
                .is_one_third(self.votes.round_power(self.height, round))
        {
            info!(
                validator = self.index,
                height = self.height,
                from_round = self.round,
                to_round = round,
                "skipping to round"
            );
            return self.enter_round(round);
        }

        match phase {
            Phase::Prevote if round == self.round => self.check_prevote_quorum(),
            Phase::Prevote => Ok(()),
            Phase::Precommit => self.check_commit(round),
        }
    }

    /// Votes too far ahead are not kept. Only each validator's highest round
    /// is remembered, which is enough to skip ahead once more than 1/3 of
    /// the power is past us.
    fn on_far_vote(&mut self, from: usize, vote: Vote) -> Result<(), NodeError> {
        let Some(validator) = self.validators.get(vote.validator) else {
            warn!(validator = self.index, from, error = %VoteError::UnknownValidator(vote.validator), "vote rejected");
            return Ok(());
        };
        if !vote.verify(&validator.pubkey, &self.chain_id) {
            warn!(validator = self.index, from, error = %VoteError::InvalidSignature(vote.validator), "vote rejected");
            return Ok(());
        }
        let seen = self.far_rounds.entry(vote.validator).or_insert(vote.round);
        *seen = (*seen).max(vote.round);

        let mut latest: Vec<(u64, u64)> = self
            .far_rounds
            .iter()
            .map(|(v, r)| (*r, self.validators.power_of(*v)))
            .collect();
        latest.sort_unstable_by(|a, b| b.cmp(a));

        let mut power = 0u64;
        for (round, p) in latest {
            power = power.saturating_add(p);
            if self.validators.is_one_third(power) {
                if round > self.round {
                    info!(
                        validator = self.index,
                        height = self.height,
                        from_round = self.round,
                        to_round = round,
                        "skipping to round"
                    );
                    return self.enter_round(round);
                }
                break;
            }
        }
        Ok(())
    }

    fn on_sync_request(&mut self, from: usize, height: u64) {
        let tip = self.ledger.height();
        if height == 0 || height > tip {
            return;
        }
        let last = tip.min(height + SYNC_BATCH - 1);
        for h in height..=last {
            let Some(entry) = self.ledger.get(h) else {
                break;
            };
            let Some(certificate) = entry.certificate else {
                continue;
            };
            self.outbox.push(Outbound::Send {
                to: from,
                message: Message::SyncResponse {
                    block: entry.block,
                    certificate,
                },
            });
        }
        debug!(validator = self.index, to = from, from_height = height, to_height = last, "served sync request");
    }

    fn on_sync_response(
        &mut self,
        from: usize,
        block: Block,
        certificate: QuorumCertificate,
    ) -> Result<(), NodeError> {
        let height = block.header.height;
        if height < self.height {
            return Ok(());
        }
        if height > self.height {
            self.buffer_future(from, Message::SyncResponse { block, certificate });
            return Ok(());
        }

        let hash = block.hash();
        if let Err(e) = certificate.validate_commit(&self.validators, &self.chain_id, height, &hash) {
            warn!(validator = self.index, from, height, error = %e, "invalid sync certificate");
            return Ok(());
        }
        if block.header.parent_hash != self.ledger.tip_hash() {
            warn!(validator = self.index, from, height, "sync block does not extend our ledger");
            return Ok(());
        }

        info!(validator = self.index, from, height, block = %short_hex(&hash), "catching up from sync");
        self.commit(block, certificate)
    }

    // ─── Outbound ───

    fn cast_vote(&mut self, phase: Phase, block_hash: Option<Digest>) {
        self.voted.insert((self.round, phase));
        let vote = Vote::new_signed(
            &self.keypair,
            &self.chain_id,
            self.height,
            self.round,
            phase,
            block_hash,
            self.index,
        );
        debug!(
            validator = self.index,
            height = self.height,
            round = self.round,
            phase = ?phase,
            block = %block_hash.as_ref().map_or_else(|| "nil".to_string(), short_hex),
            "casting vote"
        );
        if let Err(e) = self.votes.add_vote(vote.clone()) {
            warn!(validator = self.index, error = %e, "own vote rejected");
        }
        self.outbox.push(Outbound::Broadcast(Message::Vote(vote)));
    }

    fn request_sync(&mut self, peers: &[usize]) {
        let Some(peer) = peers
            .iter()
            .copied()
            .find(|p| *p != self.index && !self.sync_asked.contains(p))
        else {
            return;
        };
        self.sync_asked.insert(peer);
        debug!(validator = self.index, peer, height = self.height, "requesting sync");
        self.outbox.push(Outbound::Send {
            to: peer,
            message: Message::SyncRequest {
                height: self.height,
            },
        });
    }

    fn buffer_future(&mut self, from: usize, message: Message) {
        if self.future.len() >= FUTURE_BUFFER_LIMIT {
            self.future.pop_front();
        }
        self.future.push_back((from, message));
    }

    fn schedule(&mut self, step: Step) {
        self.scheduled = Some(Timeout {
            height: self.height,
            round: self.round,
            step,
            duration: self.config.timeout(step, self.round),
        });
    }
}

fn evidence_round(evidence: &Evidence) -> u64 {
    match evidence {
        Evidence::DoubleVote { first, .. } => first.round,
        Evidence::DoubleProposal { first, .. } => first.round,
    }
}
