//! Signing and verification algorithms
//!
//! Algorithms are modelled as a pair of capability traits consumed by the
//! signer and the verifier. The shipped implementations are all backed by
//! `ring`; anything implementing the traits can be plugged in instead,
//! e.g. an algorithm delegating the actual signing to a remote KMS.

use crate::{digest::Digester, Attributes};
use miette::Diagnostic;
use std::future::Future;
use thiserror::Error;

pub use self::ecdsa::{P256Signer, P256Verifier, P384Signer, P384Verifier};
pub use self::ed25519::{Ed25519Signer, Ed25519Verifier};
pub use self::hmac::HmacSha256;
pub use self::rsa::{RsaPkcs1V15Signer, RsaPkcs1V15Verifier, RsaPssSigner, RsaPssVerifier};

mod ecdsa;
mod ed25519;
mod hmac;
mod rsa;

/// Registry name of the ECDSA P-256 SHA-256 algorithm
pub const ECDSA_P256_SHA256: &str = "ecdsa-p256-sha256";

/// Registry name of the ECDSA P-384 SHA-384 algorithm
pub const ECDSA_P384_SHA384: &str = "ecdsa-p384-sha384";

/// Registry name of the Ed25519 algorithm
pub const ED25519: &str = "ed25519";

/// Registry name of the RSASSA-PKCS1-v1_5 SHA-256 algorithm
pub const RSA_V1_5_SHA256: &str = "rsa-v1_5-sha256";

/// Registry name of the RSASSA-PSS SHA-512 algorithm
pub const RSA_PSS_SHA512: &str = "rsa-pss-sha512";

/// Registry name of the HMAC SHA-256 algorithm
pub const HMAC_SHA256: &str = "hmac-sha256";

#[derive(Debug, Diagnostic, Error)]
pub enum AlgorithmError {
    #[error("expected a {expected} byte signature but got {actual} bytes")]
    SignatureLength { expected: usize, actual: usize },

    #[error("invalid signing key")]
    InvalidKey(#[source] ring::error::KeyRejected),

    #[error("signing failed")]
    SigningFailed,

    #[error("signature verification failed")]
    VerificationFailed,
}

/// Algorithm used to sign outgoing requests
///
/// The name must be a valid entry in the HTTP Signature Algorithms
/// registry.
///
/// See: <https://www.rfc-editor.org/rfc/rfc9421.html#name-initial-contents>
pub trait SigningAlgorithm: Send + Sync {
    /// Registry name of the algorithm, used as the `alg` parameter
    fn name(&self) -> &str;

    /// Digest configuration used when covering the `content-digest`
    /// component
    fn content_digest(&self) -> Digester;

    /// Sign the canonical signature base
    fn sign(&self, base: &str) -> impl Future<Output = Result<Vec<u8>, AlgorithmError>> + Send;
}

/// Algorithm used to verify incoming requests
pub trait VerifyingAlgorithm: Send + Sync {
    /// Registry name of the algorithm
    ///
    /// An incoming `alg` parameter differing from this name fails
    /// verification.
    fn name(&self) -> &str;

    /// Digest configuration used when recreating the `content-digest`
    /// component
    fn content_digest(&self) -> Digester;

    /// Verify a signature over the recreated signature base
    fn verify(
        &self,
        base: &str,
        signature: &[u8],
    ) -> impl Future<Output = Result<(), AlgorithmError>> + Send;

    /// Server-side attributes associated with the signing key
    ///
    /// The verifying middleware attaches these to the request extensions,
    /// letting handlers map the verified key back to an identity.
    fn attributes(&self) -> Option<Attributes> {
        None
    }
}
