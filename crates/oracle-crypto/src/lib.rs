#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
        clippy::indexing_slicing
    )
)]

//! Deterministic signing and peer-identity primitives.
//!
//! Mirrors the Signer capability surface of the source protocol
//! (`sign`/`verify`/public-and-private-key handles), but builds it directly
//! on `libp2p::identity::Keypair` rather than a bespoke key type: a peer's
//! gossip identity (its `PeerId`) and its signing key are the same key pair,
//! exactly as in the source's use of `libp2p` `crypto.PrivKey` for both.
//!
//! Ed25519 peer IDs whose protobuf-encoded public key is no larger than 42
//! bytes (true for Ed25519, whose encoding is well under that) use libp2p's
//! "identity" multihash, which means the public key is recoverable directly
//! from the `PeerId` string with no separate key-exchange step. `verify`
//! exploits this to check a signature against nothing but a signer's
//! identity string, matching how `signers[i]` is represented on the wire.

use libp2p::identity::{Keypair, PeerId, PublicKey};
use libp2p::multihash::Multihash;
use std::str::FromStr;
use thiserror::Error;

/// The multihash function code for "identity" (the digest is the preimage
/// itself, unhashed) — used by libp2p for public keys short enough to embed
/// inline rather than hash.
const IDENTITY_MULTIHASH_CODE: u64 = 0x00;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid hex signature: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("malformed peer id: {0}")]
    MalformedPeerId(String),

    #[error("peer id does not embed a recoverable public key (not an identity multihash)")]
    UnrecoverablePublicKey,

    #[error("failed to decode public key from peer id: {0}")]
    InvalidPublicKey(String),
}

/// Holds this peer's signing keypair. Generated fresh per process start
/// (an ephemeral peer identity), as the protocol allows.
pub struct Signer {
    keypair: Keypair,
}

impl Signer {
    /// Generates a fresh Ed25519 keypair for this process.
    pub fn generate() -> Self {
        Self {
            keypair: Keypair::generate_ed25519(),
        }
    }

    /// This peer's identity string, used as `publisher`/`signers[i]` on the wire.
    pub fn node_id(&self) -> String {
        self.keypair.public().to_peer_id().to_string()
    }

    /// Signs `message` bytes with this peer's private key, returning a
    /// hex-encoded signature.
    pub fn sign(&self, message: &[u8]) -> Result<String, CryptoError> {
        let sig = self
            .keypair
            .sign(message)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
        Ok(hex::encode(sig))
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }
}

/// Verifies that `hex_signature` is a valid signature over `message` under
/// the public key embedded in `peer_id_str`.
pub fn verify(message: &[u8], hex_signature: &str, peer_id_str: &str) -> Result<bool, CryptoError> {
    let sig_bytes = hex::decode(hex_signature)?;
    let public_key = public_key_from_peer_id(peer_id_str)?;
    Ok(public_key.verify(message, &sig_bytes))
}

/// Recovers a signer's [`PublicKey`] directly from its [`PeerId`] string.
fn public_key_from_peer_id(peer_id_str: &str) -> Result<PublicKey, CryptoError> {
    let peer_id = PeerId::from_str(peer_id_str)
        .map_err(|e| CryptoError::MalformedPeerId(e.to_string()))?;
    let multihash: Multihash<64> = Multihash::from_bytes(&peer_id.to_bytes())
        .map_err(|e| CryptoError::MalformedPeerId(e.to_string()))?;
    if multihash.code() != IDENTITY_MULTIHASH_CODE {
        return Err(CryptoError::UnrecoverablePublicKey);
    }
    PublicKey::try_decode_protobuf(multihash.digest())
        .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
}
