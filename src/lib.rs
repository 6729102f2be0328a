#![doc = include_str!("../README.md")]

#[macro_use]
extern crate tracing;

use http::header::HeaderName;
use std::{any::Any, fmt, sync::Arc};

pub use self::algorithm::{AlgorithmError, SigningAlgorithm, VerifyingAlgorithm};
pub use self::digest::{DigestAlgorithm, Digester};
pub use self::nonce::{InMemoryNonceStorage, NonceStorage};
pub use self::params::{Params, ValidateOpts};
pub use self::set::{Message, SignatureSet};
pub use self::signer::{SignLayer, SignService, Signer};
pub use self::verifier::{
    BodyNotCovered, KeyDirectory, StaticKeyDirectory, VerifiedBody, Verifier, VerifyLayer,
    VerifyService,
};

pub mod algorithm;
pub mod ascii;
pub mod base;
pub mod digest;
pub mod nonce;
pub mod params;
pub mod set;
pub mod signer;
pub mod verifier;

/// Boxed error for failures produced by user-supplied collaborators
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

static SIGNATURE: HeaderName = HeaderName::from_static("signature");
static SIGNATURE_INPUT: HeaderName = HeaderName::from_static("signature-input");

/// Component identifiers covered by default when signing a request
///
/// Covering `content-length` and `content-digest` is what allows the verifier
/// to hand the request body to downstream handlers as trusted.
pub const DEFAULT_COVERED_COMPONENTS: &[&str] = &[
    "@method",
    "@target-uri",
    "content-type",
    "content-length",
    "content-digest",
];

/// [`DEFAULT_COVERED_COMPONENTS`] as an owned vector
#[must_use]
pub fn default_covered_components() -> Vec<String> {
    DEFAULT_COVERED_COMPONENTS
        .iter()
        .map(|identifier| (*identifier).to_owned())
        .collect()
}

/// Opaque server-side attributes associated with a verified signing key
///
/// The verifying middleware inserts this value into the request extensions,
/// so handlers behind it can read `request.extensions().get::<Attributes>()`
/// and downcast to whatever type their key directory attached.
#[derive(Clone)]
pub struct Attributes(Arc<dyn Any + Send + Sync>);

impl Attributes {
    /// Wrap a value into an opaque attributes handle
    pub fn new<T>(value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        Self(Arc::new(value))
    }

    /// Downcast back to the concrete type the attributes were created with
    #[must_use]
    pub fn downcast_ref<T>(&self) -> Option<&T>
    where
        T: Any,
    {
        self.0.downcast_ref()
    }
}

impl fmt::Debug for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(std::any::type_name::<Self>())
            .finish_non_exhaustive()
    }
}
