//! RFC 9530 content digests over buffered request bodies

use bytes::Bytes;
use miette::Diagnostic;
use sfv::SerializeValue;
use sha2::{Digest, Sha256, Sha384, Sha512};
use strum::IntoStaticStr;
use thiserror::Error;

/// Default limit on the amount of body bytes fed into a digest (10MB)
pub const DEFAULT_MAX_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Diagnostic, Error)]
pub enum Error {
    #[error("request body exceeds the digest limit of {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("serialising the digest dictionary failed")]
    Serialise,
}

/// Hash algorithm used for the `content-digest` component
#[derive(Clone, Copy, Debug, Eq, IntoStaticStr, PartialEq)]
#[non_exhaustive]
pub enum DigestAlgorithm {
    #[strum(serialize = "sha-256")]
    Sha256,

    #[strum(serialize = "sha-384")]
    Sha384,

    #[strum(serialize = "sha-512")]
    Sha512,
}

impl DigestAlgorithm {
    fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha256 => Sha256::digest(data).to_vec(),
            Self::Sha384 => Sha384::digest(data).to_vec(),
            Self::Sha512 => Sha512::digest(data).to_vec(),
        }
    }
}

/// Computes an RFC 9530 `Content-Digest` value over a request body
///
/// The digest is a single-entry structured field dictionary in the form
/// `sha-256=:<base64 of the hash>:`. To bound the amount of work an
/// attacker can cause, bodies larger than `max_bytes` are rejected with a
/// distinguished error which the verifying middleware maps to HTTP 413.
#[derive(Clone, Copy)]
pub struct Digester {
    algorithm: DigestAlgorithm,
    max_bytes: usize,
}

impl Digester {
    /// SHA-256 digester with the default byte limit
    pub const SHA256: Self = Self::new(DigestAlgorithm::Sha256, DEFAULT_MAX_BYTES);

    /// SHA-384 digester with the default byte limit
    pub const SHA384: Self = Self::new(DigestAlgorithm::Sha384, DEFAULT_MAX_BYTES);

    /// SHA-512 digester with the default byte limit
    pub const SHA512: Self = Self::new(DigestAlgorithm::Sha512, DEFAULT_MAX_BYTES);

    #[must_use]
    pub const fn new(algorithm: DigestAlgorithm, max_bytes: usize) -> Self {
        Self {
            algorithm,
            max_bytes,
        }
    }

    /// Dictionary key of the digest (e.g. `sha-256`)
    #[must_use]
    pub fn key(&self) -> &'static str {
        self.algorithm.into()
    }

    /// Digest the buffered body of a request
    ///
    /// An empty body digests as the hash of the empty byte string.
    pub fn digest_request(&self, req: &http::Request<Bytes>) -> Result<String, Error> {
        let body = req.body();
        if body.len() > self.max_bytes {
            return Err(Error::BodyTooLarge {
                limit: self.max_bytes,
            });
        }

        let digest = self.algorithm.digest(body);

        let mut dict = sfv::Dictionary::new();
        dict.insert(
            sfv::KeyRef::constant(self.key()).to_owned(),
            sfv::ListEntry::Item(sfv::Item::new(sfv::BareItem::ByteSequence(digest))),
        );

        dict.serialize_value().ok_or(Error::Serialise)
    }
}
