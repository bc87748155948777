use std::collections::{HashSet, VecDeque};

use super::message::Hashable;
use crate::common::crypto::{Digest, Pubkey};
use crate::error::TransactionError;
use crate::execution::{ExecutionState, Transaction};

/// How far past the committed nonce a sender may queue transactions.
pub const MAX_NONCE_GAP: u64 = 16;

/// Pending transactions in arrival order.
///
/// At most one transaction per `(sender, nonce)` is held, and only nonces
/// within [`MAX_NONCE_GAP`] of the committed one, so a single sender can
/// never occupy more than that many slots.
pub struct Mempool {
    pending: VecDeque<Transaction>,
    hashes: HashSet<Digest>,
    slots: HashSet<(Pubkey, u64)>,
    capacity: usize,
}

impl Mempool {
    pub fn new(capacity: usize) -> Self {
        Mempool {
            pending: VecDeque::new(),
            hashes: HashSet::new(),
            slots: HashSet::new(),
            capacity,
        }
    }

    /// Admits `tx` against the committed `state`.
    ///
    /// A transaction for the sender's next nonce must apply cleanly right
    /// now, so an unfunded transfer is refused with `InsufficientBalance`.
    /// Later nonces wait their turn, but each must still be affordable from
    /// the committed balance. When the pool is full, a transaction that can
    /// apply immediately displaces the newest one that cannot.
    pub fn insert(&mut self, tx: Transaction, state: &ExecutionState) -> Result<Digest, TransactionError> {
        if !tx.verify(state.chain_id()) {
            return Err(TransactionError::InvalidSignature);
        }

        let account = state.account(&tx.sender);
        let expected = account.nonce + 1;
        if tx.nonce < expected || tx.nonce > account.nonce.saturating_add(MAX_NONCE_GAP) {
            return Err(TransactionError::InvalidNonce {
                expected,
                got: tx.nonce,
            });
        }

        let hash = tx.hash();
        if self.hashes.contains(&hash) || self.slots.contains(&(tx.sender, tx.nonce)) {
            return Err(TransactionError::AlreadyPending);
        }

        let ready = tx.nonce == expected;
        if ready {
            state.check_transaction(&tx)?;
        } else if account.balance < tx.amount {
            return Err(TransactionError::InsufficientBalance {
                balance: account.balance,
                amount: tx.amount,
            });
        }

        if self.pending.len() >= self.capacity && !(ready && self.evict_waiting(state)) {
            return Err(TransactionError::PoolFull {
                capacity: self.capacity,
            });
        }

        self.hashes.insert(hash);
        self.slots.insert((tx.sender, tx.nonce));
        self.pending.push_back(tx);
        Ok(hash)
    }

    /// Drops the newest transaction that cannot apply on `state` yet.
    fn evict_waiting(&mut self, state: &ExecutionState) -> bool {
        let position = self
            .pending
            .iter()
            .rposition(|tx| tx.nonce != state.nonce(&tx.sender) + 1);
        match position.and_then(|i| self.pending.remove(i)) {
            Some(tx) => {
                self.forget(&tx);
                true
            }
            None => false,
        }
    }

    fn forget(&mut self, tx: &Transaction) {
        self.hashes.remove(&tx.hash());
        self.slots.remove(&(tx.sender, tx.nonce));
    }

    /// Picks up to `max` transactions that apply cleanly, in order, on top
    /// of `state`. Returns them with the post-execution state.
    pub fn select(&self, state: &ExecutionState, max: usize) -> (Vec<Transaction>, ExecutionState) {
        let mut scratch = state.snapshot();
        let mut selected = Vec::new();

        // Later transactions may unblock earlier ones (nonce order), so sweep
        // until a pass makes no progress.
        let mut taken = vec![false; self.pending.len()];
        loop {
            let mut progressed = false;
            for (i, tx) in self.pending.iter().enumerate() {
                if selected.len() >= max {
                    return (selected, scratch);
                }
                if taken[i] {
                    continue;
                }
                if scratch.apply_transaction(tx).is_ok() {
                    taken[i] = true;
                    selected.push(tx.clone());
                    progressed = true;
                }
            }
            if !progressed {
                return (selected, scratch);
            }
        }
    }

    /// Drops transactions that were included, fell out of the nonce window,
    /// or are next in line for their sender but no longer apply.
    pub fn prune(&mut self, state: &ExecutionState) {
        let pending = std::mem::take(&mut self.pending);
        for tx in pending {
            let committed = state.nonce(&tx.sender);
            let keep = if tx.nonce == committed + 1 {
                state.check_transaction(&tx).is_ok()
            } else {
                tx.nonce > committed && tx.nonce <= committed.saturating_add(MAX_NONCE_GAP)
            };
            if keep {
                self.pending.push_back(tx);
            } else {
                self.forget(&tx);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::crypto::Keypair;

    const CHAIN: &str = "test-chain";

    fn setup() -> (Keypair, Keypair, ExecutionState) {
        let alice = Keypair::from_seed(&[1u8; 32]);
        let bob = Keypair::from_seed(&[2u8; 32]);
        let state = ExecutionState::genesis(CHAIN, [(alice.pubkey(), 100)]);
        (alice, bob, state)
    }

    #[test]
    fn test_insert_rejects_stale_and_duplicate() {
        let (alice, bob, mut state) = setup();
        let mut pool = Mempool::new(16);

        let tx = Transaction::new_signed(&alice, bob.pubkey(), 10, 1, CHAIN);
        pool.insert(tx.clone(), &state).unwrap();
        assert_eq!(pool.insert(tx.clone(), &state), Err(TransactionError::AlreadyPending));

        // Same nonce, different transfer.
        let rival = Transaction::new_signed(&alice, bob.pubkey(), 20, 1, CHAIN);
        assert_eq!(pool.insert(rival, &state), Err(TransactionError::AlreadyPending));

        state.apply_transaction(&tx).unwrap();
        pool.prune(&state);
        assert!(pool.is_empty());

        // Replays after commit are stale, however often they arrive.
        for _ in 0..3 {
            assert_eq!(
                pool.insert(tx.clone(), &state),
                Err(TransactionError::InvalidNonce { expected: 2, got: 1 })
            );
        }
    }

    #[test]
    fn test_insert_rejects_forgery_and_respects_capacity() {
        let (alice, bob, state) = setup();
        let mut pool = Mempool::new(1);

        let mut forged = Transaction::new_signed(&bob, bob.pubkey(), 10, 1, CHAIN);
        forged.sender = alice.pubkey();
        assert_eq!(pool.insert(forged, &state), Err(TransactionError::InvalidSignature));

        pool.insert(Transaction::new_signed(&alice, bob.pubkey(), 1, 1, CHAIN), &state)
            .unwrap();
        assert_eq!(
            pool.insert(Transaction::new_signed(&alice, bob.pubkey(), 1, 2, CHAIN), &state),
            Err(TransactionError::PoolFull { capacity: 1 })
        );
    }

    #[test]
    fn test_unfunded_sender_is_told_at_submission() {
        let (_, bob, state) = setup();
        let mut pool = Mempool::new(16);
        let carol = Keypair::from_seed(&[3u8; 32]);

        assert_eq!(
            pool.insert(Transaction::new_signed(&carol, bob.pubkey(), 5, 1, CHAIN), &state),
            Err(TransactionError::InsufficientBalance { balance: 0, amount: 5 })
        );
        assert_eq!(
            pool.insert(Transaction::new_signed(&carol, bob.pubkey(), 5, 3, CHAIN), &state),
            Err(TransactionError::InsufficientBalance { balance: 0, amount: 5 })
        );
        assert!(pool.is_empty());
    }

    #[test]
    fn test_nonce_window() {
        let (alice, bob, state) = setup();
        let mut pool = Mempool::new(64);

        let last = Transaction::new_signed(&alice, bob.pubkey(), 1, MAX_NONCE_GAP, CHAIN);
        pool.insert(last, &state).unwrap();
        assert_eq!(
            pool.insert(Transaction::new_signed(&alice, bob.pubkey(), 1, MAX_NONCE_GAP + 1, CHAIN), &state),
            Err(TransactionError::InvalidNonce {
                expected: 1,
                got: MAX_NONCE_GAP + 1
            })
        );
    }

    #[test]
    fn test_waiting_flood_does_not_lock_out_ready_transactions() {
        let (alice, bob, state) = setup();
        let mallory = Keypair::from_seed(&[4u8; 32]);
        let mut pool = Mempool::new(8);

        // Zero-value transfers from an empty account with nonces that never
        // become applicable.
        for nonce in 2..=9 {
            pool.insert(Transaction::new_signed(&mallory, bob.pubkey(), 0, nonce, CHAIN), &state)
                .unwrap();
        }
        assert_eq!(pool.len(), 8);

        let honest = Transaction::new_signed(&alice, bob.pubkey(), 10, 1, CHAIN);
        let hash = pool.insert(honest, &state).unwrap();
        assert_eq!(pool.len(), 8);

        let (selected, _) = pool.select(&state, 10);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].hash(), hash);

        // A waiting transaction does not get to displace anything.
        assert_eq!(
            pool.insert(Transaction::new_signed(&alice, bob.pubkey(), 10, 2, CHAIN), &state),
            Err(TransactionError::PoolFull { capacity: 8 })
        );
    }

    #[test]
    fn test_prune_drops_transactions_that_no_longer_apply() {
        let (alice, bob, mut state) = setup();
        let mut pool = Mempool::new(16);

        let first = Transaction::new_signed(&alice, bob.pubkey(), 60, 1, CHAIN);
        pool.insert(first.clone(), &state).unwrap();
        pool.insert(Transaction::new_signed(&alice, bob.pubkey(), 60, 2, CHAIN), &state)
            .unwrap();
        pool.insert(Transaction::new_signed(&alice, bob.pubkey(), 10, 3, CHAIN), &state)
            .unwrap();

        state.apply_transaction(&first).unwrap();
        pool.prune(&state);

        // Nonce 2 now overspends; nonce 3 waits behind it.
        let nonces: Vec<u64> = pool.pending.iter().map(|tx| tx.nonce).collect();
        assert_eq!(nonces, vec![3]);
    }

    #[test]
    fn test_select_orders_nonces_and_skips_invalid() {
        let (alice, bob, state) = setup();
        let mut pool = Mempool::new(16);

        // Arrives out of nonce order; the third overspends once the first two apply.
        pool.insert(Transaction::new_signed(&alice, bob.pubkey(), 30, 2, CHAIN), &state).unwrap();
        pool.insert(Transaction::new_signed(&alice, bob.pubkey(), 30, 3, CHAIN), &state).unwrap();
        pool.insert(Transaction::new_signed(&alice, bob.pubkey(), 60, 1, CHAIN), &state).unwrap();

        let (selected, next) = pool.select(&state, 10);
        let nonces: Vec<u64> = selected.iter().map(|tx| tx.nonce).collect();
        assert_eq!(nonces, vec![1, 2]);
        assert_eq!(next.balance(&bob.pubkey()), 90);
        assert_eq!(state.balance(&bob.pubkey()), 0);
        assert_eq!(state.execute(&selected).unwrap(), next);

        let (limited, _) = pool.select(&state, 1);
        assert_eq!(limited.len(), 1);
    }
}
