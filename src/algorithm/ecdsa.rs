//! ECDSA algorithms over the P-256 and P-384 curves
//!
//! Signatures are the fixed-width concatenation `r ‖ s`, both big-endian
//! and left-zero-padded to the curve's coordinate width (32 bytes for
//! P-256, 48 for P-384), as required by the RFC 9421 wire format. The
//! `ring` `*_FIXED` algorithms produce and consume exactly this encoding.

use super::{AlgorithmError, SigningAlgorithm, VerifyingAlgorithm};
use crate::{digest::Digester, Attributes};
use ring::{
    rand::SystemRandom,
    signature::{
        EcdsaKeyPair, KeyPair, UnparsedPublicKey, ECDSA_P256_SHA256_FIXED,
        ECDSA_P256_SHA256_FIXED_SIGNING, ECDSA_P384_SHA384_FIXED, ECDSA_P384_SHA384_FIXED_SIGNING,
    },
};

const P256_SIGNATURE_LEN: usize = 64;
const P384_SIGNATURE_LEN: usize = 96;

/// ECDSA P-256 SHA-256 signing key
pub struct P256Signer {
    key_pair: EcdsaKeyPair,
}

impl P256Signer {
    /// Construct from a PKCS#8 document
    pub fn from_pkcs8(pkcs8: &[u8]) -> Result<Self, AlgorithmError> {
        let key_pair =
            EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8, &SystemRandom::new())
                .map_err(AlgorithmError::InvalidKey)?;

        Ok(Self { key_pair })
    }

    /// Public key as an uncompressed SEC1 point
    #[must_use]
    pub fn public_key(&self) -> Vec<u8> {
        self.key_pair.public_key().as_ref().to_vec()
    }
}

impl SigningAlgorithm for P256Signer {
    fn name(&self) -> &str {
        super::ECDSA_P256_SHA256
    }

    fn content_digest(&self) -> Digester {
        Digester::SHA256
    }

    async fn sign(&self, base: &str) -> Result<Vec<u8>, AlgorithmError> {
        let signature = self
            .key_pair
            .sign(&SystemRandom::new(), base.as_bytes())
            .map_err(|_| AlgorithmError::SigningFailed)?;

        Ok(signature.as_ref().to_vec())
    }
}

/// ECDSA P-256 SHA-256 verification key
#[derive(Clone, Debug)]
pub struct P256Verifier {
    public_key: Vec<u8>,
    attributes: Option<Attributes>,
}

impl P256Verifier {
    /// Construct from an uncompressed SEC1 point
    #[must_use]
    pub fn new(public_key: Vec<u8>) -> Self {
        Self {
            public_key,
            attributes: None,
        }
    }

    /// Attach server-side attributes to the key
    #[must_use]
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = Some(attributes);
        self
    }
}

impl VerifyingAlgorithm for P256Verifier {
    fn name(&self) -> &str {
        super::ECDSA_P256_SHA256
    }

    fn content_digest(&self) -> Digester {
        Digester::SHA256
    }

    async fn verify(&self, base: &str, signature: &[u8]) -> Result<(), AlgorithmError> {
        if signature.len() != P256_SIGNATURE_LEN {
            return Err(AlgorithmError::SignatureLength {
                expected: P256_SIGNATURE_LEN,
                actual: signature.len(),
            });
        }

        UnparsedPublicKey::new(&ECDSA_P256_SHA256_FIXED, &self.public_key)
            .verify(base.as_bytes(), signature)
            .map_err(|_| AlgorithmError::VerificationFailed)
    }

    fn attributes(&self) -> Option<Attributes> {
        self.attributes.clone()
    }
}

/// ECDSA P-384 SHA-384 signing key
pub struct P384Signer {
    key_pair: EcdsaKeyPair,
}

impl P384Signer {
    /// Construct from a PKCS#8 document
    pub fn from_pkcs8(pkcs8: &[u8]) -> Result<Self, AlgorithmError> {
        let key_pair =
            EcdsaKeyPair::from_pkcs8(&ECDSA_P384_SHA384_FIXED_SIGNING, pkcs8, &SystemRandom::new())
                .map_err(AlgorithmError::InvalidKey)?;

        Ok(Self { key_pair })
    }

    /// Public key as an uncompressed SEC1 point
    #[must_use]
    pub fn public_key(&self) -> Vec<u8> {
        self.key_pair.public_key().as_ref().to_vec()
    }
}

impl SigningAlgorithm for P384Signer {
    fn name(&self) -> &str {
        super::ECDSA_P384_SHA384
    }

    fn content_digest(&self) -> Digester {
        Digester::SHA384
    }

    async fn sign(&self, base: &str) -> Result<Vec<u8>, AlgorithmError> {
        let signature = self
            .key_pair
            .sign(&SystemRandom::new(), base.as_bytes())
            .map_err(|_| AlgorithmError::SigningFailed)?;

        Ok(signature.as_ref().to_vec())
    }
}

/// ECDSA P-384 SHA-384 verification key
#[derive(Clone)]
pub struct P384Verifier {
    public_key: Vec<u8>,
    attributes: Option<Attributes>,
}

impl P384Verifier {
    /// Construct from an uncompressed SEC1 point
    #[must_use]
    pub fn new(public_key: Vec<u8>) -> Self {
        Self {
            public_key,
            attributes: None,
        }
    }

    /// Attach server-side attributes to the key
    #[must_use]
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = Some(attributes);
        self
    }
}

impl VerifyingAlgorithm for P384Verifier {
    fn name(&self) -> &str {
        super::ECDSA_P384_SHA384
    }

    fn content_digest(&self) -> Digester {
        Digester::SHA384
    }

    async fn verify(&self, base: &str, signature: &[u8]) -> Result<(), AlgorithmError> {
        if signature.len() != P384_SIGNATURE_LEN {
            return Err(AlgorithmError::SignatureLength {
                expected: P384_SIGNATURE_LEN,
                actual: signature.len(),
            });
        }

        UnparsedPublicKey::new(&ECDSA_P384_SHA384_FIXED, &self.public_key)
            .verify(base.as_bytes(), signature)
            .map_err(|_| AlgorithmError::VerificationFailed)
    }

    fn attributes(&self) -> Option<Attributes> {
        self.attributes.clone()
    }
}
