use std::sync::Arc;

use parking_lot::RwLock;

use super::message::{Block, Hashable};
use super::qc::QuorumCertificate;
use crate::common::crypto::Digest;

#[derive(Clone, Debug)]
pub struct FinalizedBlock {
    pub block: Block,
    /// Precommit quorum that finalized the block. `None` only for genesis.
    pub certificate: Option<QuorumCertificate>,
}

/// Append-only sequence of finalized blocks, genesis first. The owning
/// engine appends; any number of [`LedgerReader`]s read concurrently.
pub struct Ledger {
    blocks: Arc<RwLock<Vec<FinalizedBlock>>>,
}

#[derive(Clone)]
pub struct LedgerReader {
    blocks: Arc<RwLock<Vec<FinalizedBlock>>>,
}

impl Ledger {
    pub fn new(genesis: Block) -> Self {
        Ledger {
            blocks: Arc::new(RwLock::new(vec![FinalizedBlock {
                block: genesis,
                certificate: None,
            }])),
        }
    }

    pub fn append(&mut self, block: Block, certificate: QuorumCertificate) {
        self.blocks.write().push(FinalizedBlock {
            block,
            certificate: Some(certificate),
        });
    }

    pub fn reader(&self) -> LedgerReader {
        LedgerReader {
            blocks: self.blocks.clone(),
        }
    }

    pub fn height(&self) -> u64 {
        self.reader().height()
    }

    pub fn tip_hash(&self) -> Digest {
        self.reader().tip_hash()
    }

    pub fn get(&self, height: u64) -> Option<FinalizedBlock> {
        self.reader().get(height)
    }
}

impl LedgerReader {
    /// Height of the last finalized block (0 = genesis only).
    pub fn height(&self) -> u64 {
        self.blocks.read().len() as u64 - 1
    }

    pub fn tip_hash(&self) -> Digest {
        let blocks = self.blocks.read();
        blocks
            .last()
            .map(|entry| entry.block.hash())
            .unwrap_or_default()
    }

    pub fn get(&self, height: u64) -> Option<FinalizedBlock> {
        self.blocks.read().get(height as usize).cloned()
    }

    /// Copy of the finalized chain so far. Calling again restarts the read.
    pub fn blocks(&self) -> Vec<Block> {
        self.blocks
            .read()
            .iter()
            .map(|entry| entry.block.clone())
            .collect()
    }

    pub fn block_hashes(&self) -> Vec<Digest> {
        self.blocks
            .read()
            .iter()
            .map(|entry| entry.block.hash())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::Phase;

    #[test]
    fn test_append_and_read() {
        let genesis = Block::genesis([1u8; 32]);
        let mut ledger = Ledger::new(genesis.clone());
        let reader = ledger.reader();
        assert_eq!(reader.height(), 0);
        assert_eq!(reader.tip_hash(), genesis.hash());

        let mut next = Block::genesis([2u8; 32]);
        next.header.height = 1;
        next.header.parent_hash = genesis.hash();
        let qc = QuorumCertificate {
            height: 1,
            round: 0,
            phase: Phase::Precommit,
            block_hash: Some(next.hash()),
            votes: Vec::new(),
        };
        ledger.append(next.clone(), qc);

        assert_eq!(reader.height(), 1);
        assert_eq!(reader.blocks(), vec![genesis, next.clone()]);
        assert_eq!(ledger.tip_hash(), next.hash());
        assert!(ledger.get(1).unwrap().certificate.is_some());
        assert!(ledger.get(2).is_none());
    }
}
