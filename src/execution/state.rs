use std::collections::BTreeMap;

use tracing::trace;

use super::transaction::Transaction;
use crate::common::crypto::{hash, Digest, Pubkey};
use crate::consensus::{tx_root, Block};
use crate::error::{BlockError, TransactionError};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Account {
    pub balance: u64,
    /// Nonce of the last applied transaction from this account, 0 if none.
    pub nonce: u64,
}

/// Balance ledger replicated by every validator.
///
/// Only a finalized block may mutate a validator's canonical copy. Proposal
/// checks run against a [`snapshot`](ExecutionState::snapshot), which is
/// dropped afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionState {
    chain_id: String,
    accounts: BTreeMap<Pubkey, Account>,
}

impl ExecutionState {
    pub fn new(chain_id: impl Into<String>) -> Self {
        ExecutionState {
            chain_id: chain_id.into(),
            accounts: BTreeMap::new(),
        }
    }

    pub fn genesis(
        chain_id: impl Into<String>,
        balances: impl IntoIterator<Item = (Pubkey, u64)>,
    ) -> Self {
        let mut state = Self::new(chain_id);
        for (account, balance) in balances {
            state.accounts.entry(account).or_default().balance = balance;
        }
        state
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    pub fn account(&self, id: &Pubkey) -> Account {
        self.accounts.get(id).copied().unwrap_or_default()
    }

    pub fn balance(&self, id: &Pubkey) -> u64 {
        self.account(id).balance
    }

    pub fn nonce(&self, id: &Pubkey) -> u64 {
        self.account(id).nonce
    }

    /// Checks a transaction against the current state without applying it.
    pub fn check_transaction(&self, tx: &Transaction) -> Result<(), TransactionError> {
        if !tx.verify(&self.chain_id) {
            return Err(TransactionError::InvalidSignature);
        }

        let sender = self.account(&tx.sender);
        let expected = sender.nonce + 1;
        if tx.nonce != expected {
            return Err(TransactionError::InvalidNonce {
                expected,
                got: tx.nonce,
            });
        }

        if sender.balance < tx.amount {
            return Err(TransactionError::InsufficientBalance {
                balance: sender.balance,
                amount: tx.amount,
            });
        }

        if tx.sender != tx.recipient {
            let recipient = self.account(&tx.recipient);
            if recipient.balance.checked_add(tx.amount).is_none() {
                return Err(TransactionError::BalanceOverflow);
            }
        }

        Ok(())
    }

    /// Applies one transfer. On error the state is untouched.
    pub fn apply_transaction(&mut self, tx: &Transaction) -> Result<(), TransactionError> {
        self.check_transaction(tx)?;

        let sender = self.accounts.entry(tx.sender).or_default();
        sender.balance -= tx.amount;
        sender.nonce = tx.nonce;

        let recipient = self.accounts.entry(tx.recipient).or_default();
        recipient.balance += tx.amount;

        trace!(sender = %tx.sender, recipient = %tx.recipient, amount = tx.amount, nonce = tx.nonce, "applied transaction");
        Ok(())
    }

    /// An isolated copy for speculative execution.
    pub fn snapshot(&self) -> ExecutionState {
        self.clone()
    }

    /// Runs `transactions` in order on a snapshot and returns the result.
    pub fn execute(&self, transactions: &[Transaction]) -> Result<ExecutionState, BlockError> {
        let mut scratch = self.snapshot();
        for (index, tx) in transactions.iter().enumerate() {
            scratch
                .apply_transaction(tx)
                .map_err(|source| BlockError::Transaction { index, source })?;
        }
        Ok(scratch)
    }

    /// Commits to the full account map. Accounts are kept sorted, so the
    /// digest depends only on contents, never on insertion order.
    pub fn commitment_hash(&self) -> Digest {
        let mut bytes = Vec::with_capacity(13 + self.accounts.len() * 48);
        bytes.extend_from_slice(b"STATE");
        bytes.extend_from_slice(&(self.accounts.len() as u64).to_be_bytes());
        for (id, account) in &self.accounts {
            bytes.extend_from_slice(id.as_ref());
            bytes.extend_from_slice(&account.balance.to_be_bytes());
            bytes.extend_from_slice(&account.nonce.to_be_bytes());
        }
        hash(&[&bytes[..]])
    }

    /// Applies a whole block or nothing. The resulting commitment must equal
    /// the header's declared `state_hash`.
    pub fn apply_block(&mut self, block: &Block) -> Result<(), BlockError> {
        let next = self.preview_block(block)?;
        *self = next;
        Ok(())
    }

    /// The state `block` would produce, leaving `self` untouched.
    pub fn preview_block(&self, block: &Block) -> Result<ExecutionState, BlockError> {
        if tx_root(&block.transactions) != block.header.tx_root {
            return Err(BlockError::TxRootMismatch);
        }

        let next = self.execute(&block.transactions)?;
        let computed = next.commitment_hash();
        if computed != block.header.state_hash {
            return Err(BlockError::StateHashMismatch {
                declared: hex::encode(block.header.state_hash),
                computed: hex::encode(computed),
            });
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::crypto::{Keypair, ZERO_DIGEST};
    use crate::consensus::BlockHeader;

    const CHAIN: &str = "test-chain";

    fn funded(alice: &Keypair, balance: u64) -> ExecutionState {
        ExecutionState::genesis(CHAIN, [(alice.pubkey(), balance)])
    }

    fn block_for(state: &ExecutionState, transactions: Vec<Transaction>) -> Block {
        let next = state.execute(&transactions).unwrap();
        Block {
            header: BlockHeader {
                height: 1,
                parent_hash: ZERO_DIGEST,
                state_hash: next.commitment_hash(),
                tx_root: tx_root(&transactions),
                proposer: 0,
                round: 0,
            },
            transactions,
        }
    }

    #[test]
    fn test_transfer_then_replay_rejected() {
        let alice = Keypair::from_seed(&[1u8; 32]);
        let bob = Keypair::from_seed(&[2u8; 32]);
        let mut state = funded(&alice, 100);

        let tx = Transaction::new_signed(&alice, bob.pubkey(), 50, 1, CHAIN);
        state.apply_transaction(&tx).unwrap();

        assert_eq!(state.balance(&alice.pubkey()), 50);
        assert_eq!(state.nonce(&alice.pubkey()), 1);
        assert_eq!(state.balance(&bob.pubkey()), 50);

        assert_eq!(
            state.apply_transaction(&tx),
            Err(TransactionError::InvalidNonce { expected: 2, got: 1 })
        );
        assert_eq!(state.balance(&alice.pubkey()), 50);
    }

    #[test]
    fn test_nonce_must_be_next() {
        let alice = Keypair::from_seed(&[1u8; 32]);
        let bob = Keypair::from_seed(&[2u8; 32]);
        let mut state = funded(&alice, 100);

        for nonce in [0, 2, 7] {
            let tx = Transaction::new_signed(&alice, bob.pubkey(), 1, nonce, CHAIN);
            assert!(matches!(
                state.apply_transaction(&tx),
                Err(TransactionError::InvalidNonce { expected: 1, .. })
            ));
        }
    }

    #[test]
    fn test_insufficient_balance() {
        let alice = Keypair::from_seed(&[1u8; 32]);
        let bob = Keypair::from_seed(&[2u8; 32]);
        let mut state = funded(&alice, 10);

        let tx = Transaction::new_signed(&alice, bob.pubkey(), 11, 1, CHAIN);
        assert_eq!(
            state.apply_transaction(&tx),
            Err(TransactionError::InsufficientBalance {
                balance: 10,
                amount: 11
            })
        );
        assert_eq!(state.nonce(&alice.pubkey()), 0);
    }

    #[test]
    fn test_bad_signature_rejected() {
        let alice = Keypair::from_seed(&[1u8; 32]);
        let mallory = Keypair::from_seed(&[3u8; 32]);
        let mut state = funded(&alice, 100);

        let mut tx = Transaction::new_signed(&mallory, mallory.pubkey(), 10, 1, CHAIN);
        tx.sender = alice.pubkey();
        assert_eq!(
            state.apply_transaction(&tx),
            Err(TransactionError::InvalidSignature)
        );
    }

    #[test]
    fn test_commitment_is_order_independent() {
        let a = Keypair::from_seed(&[1u8; 32]).pubkey();
        let b = Keypair::from_seed(&[2u8; 32]).pubkey();
        let s1 = ExecutionState::genesis(CHAIN, [(a, 5), (b, 7)]);
        let s2 = ExecutionState::genesis(CHAIN, [(b, 7), (a, 5)]);

        assert_eq!(s1.commitment_hash(), s2.commitment_hash());
        assert_ne!(
            s1.commitment_hash(),
            ExecutionState::genesis(CHAIN, [(a, 5), (b, 8)]).commitment_hash()
        );
    }

    #[test]
    fn test_execution_is_deterministic() {
        let alice = Keypair::from_seed(&[1u8; 32]);
        let bob = Keypair::from_seed(&[2u8; 32]);
        let state = funded(&alice, 1_000);
        let txs: Vec<_> = (1..=5)
            .map(|n| Transaction::new_signed(&alice, bob.pubkey(), 10 * n, n, CHAIN))
            .collect();

        let first = state.execute(&txs).unwrap().commitment_hash();
        let second = state.execute(&txs).unwrap().commitment_hash();
        assert_eq!(first, second);
    }

    #[test]
    fn test_snapshot_is_isolated() {
        let alice = Keypair::from_seed(&[1u8; 32]);
        let bob = Keypair::from_seed(&[2u8; 32]);
        let state = funded(&alice, 100);
        let before = state.commitment_hash();

        let mut scratch = state.snapshot();
        scratch
            .apply_transaction(&Transaction::new_signed(&alice, bob.pubkey(), 40, 1, CHAIN))
            .unwrap();

        assert_eq!(state.commitment_hash(), before);
        assert_ne!(scratch.commitment_hash(), before);
    }

    #[test]
    fn test_apply_block_is_atomic() {
        let alice = Keypair::from_seed(&[1u8; 32]);
        let bob = Keypair::from_seed(&[2u8; 32]);
        let mut state = funded(&alice, 100);
        let before = state.clone();

        let good = Transaction::new_signed(&alice, bob.pubkey(), 30, 1, CHAIN);
        let mut block = block_for(&state, vec![good.clone()]);
        // Second transaction overspends; the first must not survive either.
        block
            .transactions
            .push(Transaction::new_signed(&alice, bob.pubkey(), 500, 2, CHAIN));
        block.header.tx_root = tx_root(&block.transactions);

        assert!(matches!(
            state.apply_block(&block),
            Err(BlockError::Transaction { index: 1, .. })
        ));
        assert_eq!(state, before);
    }

    #[test]
    fn test_apply_block_checks_state_hash() {
        let alice = Keypair::from_seed(&[1u8; 32]);
        let bob = Keypair::from_seed(&[2u8; 32]);
        let mut state = funded(&alice, 100);

        let mut block = block_for(
            &state,
            vec![Transaction::new_signed(&alice, bob.pubkey(), 30, 1, CHAIN)],
        );
        let good_hash = block.header.state_hash;
        block.header.state_hash = [9u8; 32];
        assert!(matches!(
            state.apply_block(&block),
            Err(BlockError::StateHashMismatch { .. })
        ));
        assert_eq!(state.balance(&alice.pubkey()), 100);

        block.header.state_hash = good_hash;
        state.apply_block(&block).unwrap();
        assert_eq!(state.balance(&bob.pubkey()), 30);
        assert_eq!(state.commitment_hash(), good_hash);
    }

    #[test]
    fn test_apply_block_checks_tx_root() {
        let alice = Keypair::from_seed(&[1u8; 32]);
        let bob = Keypair::from_seed(&[2u8; 32]);
        let mut state = funded(&alice, 100);

        let mut block = block_for(
            &state,
            vec![Transaction::new_signed(&alice, bob.pubkey(), 30, 1, CHAIN)],
        );
        block.transactions.clear();
        assert_eq!(state.apply_block(&block), Err(BlockError::TxRootMismatch));
    }
}
