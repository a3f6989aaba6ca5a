//! Crypto error types.

use thiserror::Error;

/// Failures across all crypto primitives.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("invalid private key")]
    InvalidPrivateKey,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("public key is the identity point")]
    IdentityPublicKey,

    #[error("invalid signature encoding")]
    InvalidSignature,

    #[error("signature verification failed")]
    SignatureVerificationFailed,

    #[error("aggregation failed")]
    AggregationFailed,

    #[error("invalid input: {0}")]
    InvalidInput(String),
}
