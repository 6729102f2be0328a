//! Symmetric HMAC SHA-256 algorithm
//!
//! One key both signs and verifies, so the same value implements both
//! capability traits. Verification goes through `ring::hmac::verify`,
//! which compares in constant time.

use super::{AlgorithmError, SigningAlgorithm, VerifyingAlgorithm};
use crate::{digest::Digester, Attributes};
use ring::hmac;

/// HMAC SHA-256 key
#[derive(Clone)]
pub struct HmacSha256 {
    key: hmac::Key,
    attributes: Option<Attributes>,
}

impl HmacSha256 {
    /// Construct from the raw shared secret
    #[must_use]
    pub fn new(key: &[u8]) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, key),
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

impl SigningAlgorithm for HmacSha256 {
    fn name(&self) -> &str {
        super::HMAC_SHA256
    }

    fn content_digest(&self) -> Digester {
        Digester::SHA256
    }

    async fn sign(&self, base: &str) -> Result<Vec<u8>, AlgorithmError> {
        Ok(hmac::sign(&self.key, base.as_bytes()).as_ref().to_vec())
    }
}

impl VerifyingAlgorithm for HmacSha256 {
    fn name(&self) -> &str {
        super::HMAC_SHA256
    }

    fn content_digest(&self) -> Digester {
        Digester::SHA256
    }

    async fn verify(&self, base: &str, signature: &[u8]) -> Result<(), AlgorithmError> {
        hmac::verify(&self.key, base.as_bytes(), signature)
            .map_err(|_| AlgorithmError::VerificationFailed)
    }

    fn attributes(&self) -> Option<Attributes> {
        self.attributes.clone()
    }
}

#[cfg(test)]
mod test {
    use super::HmacSha256;
    use crate::algorithm::{SigningAlgorithm, VerifyingAlgorithm};

    #[tokio::test]
    async fn sign_verify() {
        let key = HmacSha256::new(b"shared-secret");

        let signature = key.sign("base").await.unwrap();
        key.verify("base", &signature).await.unwrap();
        key.verify("tampered", &signature).await.unwrap_err();

        let other = HmacSha256::new(b"other-secret");
        other.verify("base", &signature).await.unwrap_err();
    }
}
