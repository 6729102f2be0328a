//! RSA algorithms
//!
//! Two variants ship: RSASSA-PKCS1-v1_5 with SHA-256 and RSASSA-PSS with
//! SHA-512. Verification keys are PKCS#1 `RSAPublicKey` documents, which
//! is what [`RsaPkcs1V15Signer::public_key`] and [`RsaPssSigner::public_key`]
//! hand out.

use super::{AlgorithmError, SigningAlgorithm, VerifyingAlgorithm};
use crate::{digest::Digester, Attributes};
use ring::{
    rand::SystemRandom,
    signature::{
        KeyPair, RsaKeyPair, UnparsedPublicKey, RSA_PKCS1_2048_8192_SHA256, RSA_PKCS1_SHA256,
        RSA_PSS_2048_8192_SHA512, RSA_PSS_SHA512,
    },
};

fn sign(key_pair: &RsaKeyPair, padding: &'static dyn ring::signature::RsaEncoding, base: &str) -> Result<Vec<u8>, AlgorithmError> {
    let mut signature = vec![0; key_pair.public().modulus_len()];
    key_pair
        .sign(padding, &SystemRandom::new(), base.as_bytes(), &mut signature)
        .map_err(|_| AlgorithmError::SigningFailed)?;

    Ok(signature)
}

/// RSASSA-PKCS1-v1_5 SHA-256 signing key
pub struct RsaPkcs1V15Signer {
    key_pair: RsaKeyPair,
}

impl RsaPkcs1V15Signer {
    /// Construct from a PKCS#8 document
    pub fn from_pkcs8(pkcs8: &[u8]) -> Result<Self, AlgorithmError> {
        let key_pair = RsaKeyPair::from_pkcs8(pkcs8).map_err(AlgorithmError::InvalidKey)?;
        Ok(Self { key_pair })
    }

    /// Construct from a PKCS#1 `RSAPrivateKey` document
    pub fn from_der(der: &[u8]) -> Result<Self, AlgorithmError> {
        let key_pair = RsaKeyPair::from_der(der).map_err(AlgorithmError::InvalidKey)?;
        Ok(Self { key_pair })
    }

    /// Public key as a PKCS#1 `RSAPublicKey` document
    #[must_use]
    pub fn public_key(&self) -> Vec<u8> {
        self.key_pair.public_key().as_ref().to_vec()
    }
}

impl SigningAlgorithm for RsaPkcs1V15Signer {
    fn name(&self) -> &str {
        super::RSA_V1_5_SHA256
    }

    fn content_digest(&self) -> Digester {
        Digester::SHA256
    }

    async fn sign(&self, base: &str) -> Result<Vec<u8>, AlgorithmError> {
        sign(&self.key_pair, &RSA_PKCS1_SHA256, base)
    }
}

/// RSASSA-PKCS1-v1_5 SHA-256 verification key
#[derive(Clone)]
pub struct RsaPkcs1V15Verifier {
    public_key: Vec<u8>,
    attributes: Option<Attributes>,
}

impl RsaPkcs1V15Verifier {
    /// Construct from a PKCS#1 `RSAPublicKey` document
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

impl VerifyingAlgorithm for RsaPkcs1V15Verifier {
    fn name(&self) -> &str {
        super::RSA_V1_5_SHA256
    }

    fn content_digest(&self) -> Digester {
        Digester::SHA256
    }

    async fn verify(&self, base: &str, signature: &[u8]) -> Result<(), AlgorithmError> {
        UnparsedPublicKey::new(&RSA_PKCS1_2048_8192_SHA256, &self.public_key)
            .verify(base.as_bytes(), signature)
            .map_err(|_| AlgorithmError::VerificationFailed)
    }

    fn attributes(&self) -> Option<Attributes> {
        self.attributes.clone()
    }
}

/// RSASSA-PSS SHA-512 signing key
pub struct RsaPssSigner {
    key_pair: RsaKeyPair,
}

impl RsaPssSigner {
    /// Construct from a PKCS#8 document
    pub fn from_pkcs8(pkcs8: &[u8]) -> Result<Self, AlgorithmError> {
        let key_pair = RsaKeyPair::from_pkcs8(pkcs8).map_err(AlgorithmError::InvalidKey)?;
        Ok(Self { key_pair })
    }

    /// Construct from a PKCS#1 `RSAPrivateKey` document
    pub fn from_der(der: &[u8]) -> Result<Self, AlgorithmError> {
        let key_pair = RsaKeyPair::from_der(der).map_err(AlgorithmError::InvalidKey)?;
        Ok(Self { key_pair })
    }

    /// Public key as a PKCS#1 `RSAPublicKey` document
    #[must_use]
    pub fn public_key(&self) -> Vec<u8> {
        self.key_pair.public_key().as_ref().to_vec()
    }
}

impl SigningAlgorithm for RsaPssSigner {
    fn name(&self) -> &str {
        super::RSA_PSS_SHA512
    }

    fn content_digest(&self) -> Digester {
        Digester::SHA512
    }

    async fn sign(&self, base: &str) -> Result<Vec<u8>, AlgorithmError> {
        sign(&self.key_pair, &RSA_PSS_SHA512, base)
    }
}

/// RSASSA-PSS SHA-512 verification key
#[derive(Clone)]
pub struct RsaPssVerifier {
    public_key: Vec<u8>,
    attributes: Option<Attributes>,
}

impl RsaPssVerifier {
    /// Construct from a PKCS#1 `RSAPublicKey` document
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

impl VerifyingAlgorithm for RsaPssVerifier {
    fn name(&self) -> &str {
        super::RSA_PSS_SHA512
    }

    fn content_digest(&self) -> Digester {
        Digester::SHA512
    }

    async fn verify(&self, base: &str, signature: &[u8]) -> Result<(), AlgorithmError> {
        UnparsedPublicKey::new(&RSA_PSS_2048_8192_SHA512, &self.public_key)
            .verify(base.as_bytes(), signature)
            .map_err(|_| AlgorithmError::VerificationFailed)
    }

    fn attributes(&self) -> Option<Attributes> {
        self.attributes.clone()
    }
}
