//! Ed25519 algorithm

use super::{AlgorithmError, SigningAlgorithm, VerifyingAlgorithm};
use crate::{digest::Digester, Attributes};
use ring::signature::{Ed25519KeyPair, KeyPair, UnparsedPublicKey};

const SIGNATURE_LEN: usize = 64;

/// Ed25519 signing key
pub struct Ed25519Signer {
    key_pair: Ed25519KeyPair,
}

impl Ed25519Signer {
    /// Construct from a PKCS#8 v2 document
    pub fn from_pkcs8(pkcs8: &[u8]) -> Result<Self, AlgorithmError> {
        let key_pair = Ed25519KeyPair::from_pkcs8(pkcs8).map_err(AlgorithmError::InvalidKey)?;
        Ok(Self { key_pair })
    }

    /// Raw 32 byte public key
    #[must_use]
    pub fn public_key(&self) -> Vec<u8> {
        self.key_pair.public_key().as_ref().to_vec()
    }
}

impl SigningAlgorithm for Ed25519Signer {
    fn name(&self) -> &str {
        super::ED25519
    }

    fn content_digest(&self) -> Digester {
        Digester::SHA512
    }

    async fn sign(&self, base: &str) -> Result<Vec<u8>, AlgorithmError> {
        Ok(self.key_pair.sign(base.as_bytes()).as_ref().to_vec())
    }
}

/// Ed25519 verification key
#[derive(Clone)]
pub struct Ed25519Verifier {
    public_key: Vec<u8>,
    attributes: Option<Attributes>,
}

impl Ed25519Verifier {
    /// Construct from a raw 32 byte public key
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

impl VerifyingAlgorithm for Ed25519Verifier {
    fn name(&self) -> &str {
        super::ED25519
    }

    fn content_digest(&self) -> Digester {
        Digester::SHA512
    }

    async fn verify(&self, base: &str, signature: &[u8]) -> Result<(), AlgorithmError> {
        if signature.len() != SIGNATURE_LEN {
            return Err(AlgorithmError::SignatureLength {
                expected: SIGNATURE_LEN,
                actual: signature.len(),
            });
        }

        UnparsedPublicKey::new(&ring::signature::ED25519, &self.public_key)
            .verify(base.as_bytes(), signature)
            .map_err(|_| AlgorithmError::VerificationFailed)
    }

    fn attributes(&self) -> Option<Attributes> {
        self.attributes.clone()
    }
}

#[cfg(test)]
mod test {
    use super::{Ed25519Signer, Ed25519Verifier};
    use crate::algorithm::{SigningAlgorithm, VerifyingAlgorithm};
    use ring::{rand::SystemRandom, signature::Ed25519KeyPair};

    #[tokio::test]
    async fn sign_verify() {
        let document = Ed25519KeyPair::generate_pkcs8(&SystemRandom::new()).unwrap();
        let signer = Ed25519Signer::from_pkcs8(document.as_ref()).unwrap();
        let verifier = Ed25519Verifier::new(signer.public_key());

        let signature = signer.sign("base").await.unwrap();
        assert_eq!(signature.len(), 64);

        verifier.verify("base", &signature).await.unwrap();
        verifier.verify("tampered", &signature).await.unwrap_err();
    }
}
