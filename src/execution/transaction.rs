use crate::common::crypto::{domain_tag, hash, Digest, Keypair, Pubkey, Signature, TX_DOMAIN};
use crate::consensus::Hashable;

/// A signed balance transfer. The signature covers `"TX:<chain_id>" ‖ payload`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Transaction {
    pub sender: Pubkey,
    pub recipient: Pubkey,
    pub amount: u64,
    pub nonce: u64,
    pub signature: Signature,
}

impl Transaction {
    pub fn new_signed(
        keypair: &Keypair,
        recipient: Pubkey,
        amount: u64,
        nonce: u64,
        chain_id: &str,
    ) -> Self {
        let sender = keypair.pubkey();
        let payload = Self::payload(&sender, &recipient, amount, nonce);
        let signature = keypair.sign(&domain_tag(TX_DOMAIN, chain_id), &payload);

        Transaction {
            sender,
            recipient,
            amount,
            nonce,
            signature,
        }
    }

    pub fn signing_payload(&self) -> Vec<u8> {
        Self::payload(&self.sender, &self.recipient, self.amount, self.nonce)
    }

    fn payload(sender: &Pubkey, recipient: &Pubkey, amount: u64, nonce: u64) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 + 32 + 8 + 8);
        out.extend_from_slice(sender.as_ref());
        out.extend_from_slice(recipient.as_ref());
        out.extend_from_slice(&amount.to_be_bytes());
        out.extend_from_slice(&nonce.to_be_bytes());
        out
    }

    pub fn verify(&self, chain_id: &str) -> bool {
        self.sender.verify(
            &domain_tag(TX_DOMAIN, chain_id),
            &self.signing_payload(),
            &self.signature,
        )
    }
}

impl Hashable for Transaction {
    fn hash(&self) -> Digest {
        hash(&[&self.signing_payload()[..], &self.signature.sig[..]])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::crypto::VOTE_DOMAIN;

    #[test]
    fn test_signed_transaction_verifies() {
        let alice = Keypair::from_seed(&[1u8; 32]);
        let bob = Keypair::from_seed(&[2u8; 32]);
        let tx = Transaction::new_signed(&alice, bob.pubkey(), 50, 1, "test-chain");

        assert!(tx.verify("test-chain"));
        assert!(!tx.verify("other-chain"));
    }

    #[test]
    fn test_tampered_transaction_fails() {
        let alice = Keypair::from_seed(&[1u8; 32]);
        let bob = Keypair::from_seed(&[2u8; 32]);
        let mut tx = Transaction::new_signed(&alice, bob.pubkey(), 50, 1, "test-chain");
        tx.amount = 5_000;

        assert!(!tx.verify("test-chain"));
    }

    #[test]
    fn test_vote_domain_signature_rejected_as_transaction() {
        let alice = Keypair::from_seed(&[1u8; 32]);
        let bob = Keypair::from_seed(&[2u8; 32]);
        let mut tx = Transaction::new_signed(&alice, bob.pubkey(), 50, 1, "test-chain");
        tx.signature = alice.sign(&domain_tag(VOTE_DOMAIN, "test-chain"), &tx.signing_payload());

        assert!(!tx.verify("test-chain"));
    }

    #[test]
    fn test_hash_covers_nonce() {
        let alice = Keypair::from_seed(&[1u8; 32]);
        let bob = Keypair::from_seed(&[2u8; 32]);
        let tx1 = Transaction::new_signed(&alice, bob.pubkey(), 50, 1, "test-chain");
        let tx2 = Transaction::new_signed(&alice, bob.pubkey(), 50, 2, "test-chain");

        assert_ne!(tx1.hash(), tx2.hash());
        assert_eq!(tx1.hash(), tx1.clone().hash());
    }
}
