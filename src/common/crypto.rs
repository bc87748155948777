use std::fmt;

use ed25519_dalek::{ed25519, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest as ShaDigest, Sha256};

/*
    Every signature covers `domain ‖ payload`, where the domain is a kind
    tag joined to the chain id ("TX:<chain>", "VOTE:<chain>", "BLOCK:<chain>").
    A vote signature therefore never verifies as a transaction signature, and
    nothing signed for one chain verifies on another.
*/

pub type Digest = [u8; 32];

pub const ZERO_DIGEST: Digest = [0u8; 32];

pub const TX_DOMAIN: &str = "TX";
pub const VOTE_DOMAIN: &str = "VOTE";
pub const PROPOSAL_DOMAIN: &str = "BLOCK";

pub fn domain_tag(kind: &str, chain_id: &str) -> String {
    format!("{}:{}", kind, chain_id)
}

/// SHA-256 over the concatenation of `parts`.
pub fn hash(parts: &[&[u8]]) -> Digest {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Short hex prefix used in log fields.
pub fn short_hex(digest: &Digest) -> String {
    hex::encode(&digest[..6])
}

pub struct Keypair {
    pubkey: Pubkey,
    dalek_signer: SigningKey,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pubkey {
    #[serde(with = "hex::serde")]
    pub key: [u8; 32],
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    pub sig: [u8; 64],
}

impl Keypair {
    pub fn new_pair() -> Self {
        let mut csprng = OsRng;
        Self::from_signing_key(SigningKey::generate(&mut csprng))
    }

    /// Deterministic keypair, used by configs and tests that need stable identities.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(seed))
    }

    fn from_signing_key(dalek_signer: SigningKey) -> Self {
        let pubkey = Pubkey::from(&dalek_signer.verifying_key().to_bytes());
        Keypair {
            pubkey,
            dalek_signer,
        }
    }

    pub fn sign(&self, domain: &str, payload: &[u8]) -> Signature {
        let sig = self
            .dalek_signer
            .sign(&signing_bytes(domain, payload))
            .to_bytes();

        Signature { sig }
    }

    pub fn pubkey(&self) -> Pubkey {
        self.pubkey
    }
}

impl Clone for Keypair {
    fn clone(&self) -> Self {
        Self::from_signing_key(self.dalek_signer.clone())
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair").field("pubkey", &self.pubkey).finish()
    }
}

impl Pubkey {
    /// Fails closed: a malformed key or signature is a failed verification.
    pub fn verify(&self, domain: &str, payload: &[u8], signature: &Signature) -> bool {
        let Ok(dalek_pubkey) = VerifyingKey::from_bytes(&self.key) else {
            return false;
        };
        let dalek_sig = ed25519::Signature::from_bytes(&signature.sig);
        dalek_pubkey
            .verify_strict(&signing_bytes(domain, payload), &dalek_sig)
            .is_ok()
    }
}

fn signing_bytes(domain: &str, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(domain.len() + payload.len());
    bytes.extend_from_slice(domain.as_bytes());
    bytes.extend_from_slice(payload);
    bytes
}

impl AsRef<[u8]> for Pubkey {
    fn as_ref(&self) -> &[u8] {
        &self.key
    }
}

impl From<&[u8; 32]> for Pubkey {
    fn from(bytes: &[u8; 32]) -> Self {
        Pubkey { key: *bytes }
    }
}

impl fmt::Debug for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pubkey({})", hex::encode(&self.key[..6]))
    }
}

impl fmt::Display for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.key[..6]))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", hex::encode(&self.sig[..6]))
    }
}
