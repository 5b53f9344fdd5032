#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! The wire format and structural invariants of a price observation.
//!
//! An [`Observation`] is the sole protocol object exchanged over the gossip
//! topic. Its shape and field semantics mirror the `PriceMessage` struct of
//! the `chainlink-lite` prototype this crate's protocol is modeled on.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use validator::Validate;

/// A single signed price observation, gossiped over the shared topic.
///
/// `writer` and `timestamp` are set only once a [`Self`] has been durably
/// committed; they are never present on the wire (see `Serialize`/`Deserialize`
/// below, which map `created_at` onto the wire key `timestamp` and omit the
/// commit-time fields entirely).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Observation {
    /// Opaque identifier, unique per origination. Gates deduplication for
    /// logging/tracing only — it never gates aggregation.
    #[serde(rename = "message_id")]
    #[validate(length(min = 1))]
    pub id: String,

    /// The signed payload: a decimal string, never a float, used verbatim as
    /// the signing input.
    #[validate(length(min = 1))]
    pub price: String,

    /// Identity of the peer that originated this observation.
    #[validate(length(min = 1))]
    pub publisher: String,

    /// Identity of the peer that committed the durable record. Empty until
    /// commit; never serialized onto the wire.
    #[serde(skip)]
    pub writer: String,

    /// Peers who have attested to `price`, in attestation order.
    #[validate(length(min = 1))]
    pub signers: Vec<String>,

    /// Hex-encoded signatures over `price`, one per entry in `signers`, in
    /// the same order.
    #[validate(length(min = 1))]
    pub signatures: Vec<String>,

    /// Origination time, set by the publisher. Wire name is `timestamp` for
    /// compatibility with the protocol's historical naming; semantically
    /// this is `created_at`.
    #[serde(rename = "timestamp")]
    pub created_at: i64,

    /// Commit time, set by the writer. Never serialized onto the wire.
    #[serde(skip)]
    pub timestamp: Option<i64>,
}

impl fmt::Display for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{id: {}, price: {}, publisher: {}, writer: {}, signers: {:?}, created_at: {}, timestamp: {:?}}}",
            self.id, self.price, self.publisher, self.writer, self.signers, self.created_at, self.timestamp
        )
    }
}

/// Failure modes for structural validation of an incoming [`Observation`].
///
/// Cryptographic verification of individual signatures is the responsibility
/// of `oracle-crypto`; this type covers only the shape-level invariants from
/// the protocol's data model.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ObservationError {
    /// A required field (`message_id`, `publisher`, `signers`, or
    /// `signatures`) is missing or empty.
    #[error("required field missing or empty: {0}")]
    MissingField(&'static str),

    /// `len(signers) != len(signatures)`.
    #[error("signers length ({signers}) does not match signatures length ({signatures})")]
    SignerSignatureMismatch {
        /// Number of entries in `signers`.
        signers: usize,
        /// Number of entries in `signatures`.
        signatures: usize,
    },

    /// `signers[0] != publisher`.
    #[error("signers[0] ({signer}) does not match publisher ({publisher})")]
    PublisherMismatch {
        /// The first entry of `signers`.
        signer: String,
        /// The declared `publisher`.
        publisher: String,
    },

    /// `price` does not parse as a non-negative, finite number.
    #[error("price is not a non-negative number: {0}")]
    InvalidPrice(String),
}

impl Observation {
    /// Structural validation per the protocol's data-model invariants:
    ///
    /// 1. `len(signers) == len(signatures)`, both non-empty.
    /// 2. `signers[0] == publisher`.
    /// 3. `price` parses as a non-negative number.
    ///
    /// Signature verification against each signer's public key is deliberately
    /// not performed here — it belongs to `oracle-crypto`, which can recover a
    /// signer's public key from its identity string.
    pub fn validate_structural(&self) -> Result<(), ObservationError> {
        if self.validate().is_err() {
            return Err(ObservationError::MissingField(
                "message_id/publisher/signers/signatures",
            ));
        }
        if self.signers.len() != self.signatures.len() {
            return Err(ObservationError::SignerSignatureMismatch {
                signers: self.signers.len(),
                signatures: self.signatures.len(),
            });
        }
        let first_signer = self
            .signers
            .first()
            .ok_or(ObservationError::MissingField("signers"))?;
        if *first_signer != self.publisher {
            return Err(ObservationError::PublisherMismatch {
                signer: first_signer.clone(),
                publisher: self.publisher.clone(),
            });
        }
        match self.price.parse::<f64>() {
            Ok(p) if p.is_finite() && p >= 0.0 => {}
            _ => return Err(ObservationError::InvalidPrice(self.price.clone())),
        }
        Ok(())
    }

    /// `true` once self has appended its own signature, determined by
    /// identity membership in `signers` rather than by re-signing — the
    /// safer of the two tests, since it carries no dependency on the
    /// signing scheme being deterministic.
    pub fn already_signed_by(&self, peer_id: &str) -> bool {
        self.signers.iter().any(|s| s == peer_id)
    }

    /// Number of distinct attestations currently carried by this observation.
    pub fn signature_count(&self) -> usize {
        self.signatures.len()
    }
}
