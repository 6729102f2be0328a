//! Request signing
//!
//! [`Signer`] derives a signature message for a buffered request.
//! [`SignLayer`] wraps it into a `tower` middleware for HTTP clients,
//! mirroring the verifying middleware on the server side.
//!
//! See: <https://www.rfc-editor.org/rfc/rfc9421.html#name-creating-a-signature>

use crate::{
    algorithm::{AlgorithmError, SigningAlgorithm},
    base::Base,
    params::Params,
    set::{Message, SignatureSet},
    BoxError,
};
use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::Request;
use http_body::Body;
use http_body_util::{BodyExt, Full};
use miette::Diagnostic;
use ring::rand::{SecureRandom, SystemRandom};
use std::{mem, sync::Arc, task};
use thiserror::Error;
use tower::{Layer, Service};
use typed_builder::TypedBuilder;

type NonceFn = Box<dyn Fn() -> Result<String, BoxError> + Send + Sync>;
type SigningStringHook = Box<dyn Fn(&str) + Send + Sync>;

const NONCE_LEN: usize = 32;

#[derive(Debug, Diagnostic, Error)]
pub enum Error {
    #[error("generating nonce failed")]
    Nonce(#[source] BoxError),

    #[error("reading the request body failed")]
    Body(#[source] BoxError),

    #[error(transparent)]
    Set(#[from] crate::set::Error),

    #[error(transparent)]
    Base(#[from] crate::base::Error),

    #[error(transparent)]
    Algorithm(#[from] AlgorithmError),
}

/// Signs HTTP requests with a configured algorithm and key
#[derive(TypedBuilder)]
pub struct Signer<A> {
    /// Algorithm used for signing
    algorithm: A,

    /// Identifier of the signing key, communicated as the `keyid` parameter
    #[builder(default, setter(strip_option))]
    key_id: Option<String>,

    /// Application-specific tag, used by the verifier to select this
    /// signature
    #[builder(default, setter(strip_option))]
    tag: Option<String>,

    /// Ordered set of component identifiers to cover
    ///
    /// Defaults to [`crate::DEFAULT_COVERED_COMPONENTS`].
    #[builder(default = crate::default_covered_components())]
    covered_components: Vec<String>,

    /// Override the built-in nonce generation
    ///
    /// Returning an empty string omits the nonce from the signature.
    /// Including a nonce is recommended, overriding the default is not.
    #[builder(default, setter(strip_option))]
    get_nonce: Option<NonceFn>,

    /// Observation hook invoked with the derived signing string
    ///
    /// Useful to debug signature mismatches by comparing the base between
    /// client and server. Must not change outcomes.
    #[builder(default, setter(strip_option))]
    on_signing_string: Option<SigningStringHook>,
}

impl<A> Signer<A>
where
    A: SigningAlgorithm,
{
    /// Derive a signature message for the request
    ///
    /// The `created` timestamp is read from the ambient
    /// [`tick_tock_mock`] clock, which tests can mock.
    #[instrument(skip_all)]
    pub async fn sign(&self, req: &Request<Bytes>) -> Result<Message, Error> {
        let nonce = self.nonce()?;

        let params = Params {
            key_id: self.key_id.clone(),
            tag: self.tag.clone(),
            alg: Some(self.algorithm.name().to_owned()),
            covered_components: self.covered_components.clone(),
            nonce: (!nonce.is_empty()).then_some(nonce),
            created: Some(tick_tock_mock::now()),
            expires: None,
        };

        let base = Base::derive(&params, req, self.algorithm.content_digest())?;
        let signing_string = base.canonical_string(&params)?;

        if let Some(hook) = &self.on_signing_string {
            hook(&signing_string);
        }

        let signature = self.algorithm.sign(&signing_string).await?;

        Ok(Message {
            input: params,
            signature,
        })
    }

    fn nonce(&self) -> Result<String, Error> {
        if let Some(get_nonce) = &self.get_nonce {
            return get_nonce().map_err(Error::Nonce);
        }

        random_nonce()
    }
}

/// 32 random bytes, URL-safe base64 (padded)
fn random_nonce() -> Result<String, Error> {
    let mut buf = [0_u8; NONCE_LEN];
    SystemRandom::new()
        .fill(&mut buf)
        .map_err(|error| Error::Nonce(error.into()))?;

    Ok(base64_simd::URL_SAFE.encode_to_string(buf))
}

/// Layer attaching HTTP message signatures to outgoing requests
pub struct SignLayer<A> {
    signer: Arc<Signer<A>>,
}

impl<A> SignLayer<A> {
    pub fn new(signer: Signer<A>) -> Self {
        Self {
            signer: Arc::new(signer),
        }
    }
}

impl<A> Clone for SignLayer<A> {
    fn clone(&self) -> Self {
        Self {
            signer: Arc::clone(&self.signer),
        }
    }
}

impl<S, A> Layer<S> for SignLayer<A> {
    type Service = SignService<S, A>;

    fn layer(&self, inner: S) -> Self::Service {
        SignService {
            inner,
            signer: Arc::clone(&self.signer),
        }
    }
}

/// Service signing every request before it reaches the inner service
///
/// The request body is buffered to compute the content digest; the inner
/// service receives the buffered copy. Signatures already present on the
/// request are preserved, the new signature is added to the set.
pub struct SignService<S, A> {
    inner: S,
    signer: Arc<Signer<A>>,
}

impl<S, A> Clone for SignService<S, A>
where
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            signer: Arc::clone(&self.signer),
        }
    }
}

impl<S, A, B> Service<Request<B>> for SignService<S, A>
where
    S: Service<Request<Full<Bytes>>> + Clone + Send + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send,
    A: SigningAlgorithm + 'static,
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut task::Context<'_>) -> task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let signer = Arc::clone(&self.signer);
        let clone = self.inner.clone();
        let mut inner = mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let (parts, body) = req.into_parts();
            let body = body
                .collect()
                .await
                .map_err(|error| Error::Body(error.into()))?
                .to_bytes();
            let req = Request::from_parts(parts, body);

            // parse any signatures already on the request so chained
            // signers keep working
            let mut set = SignatureSet::from_headers(req.headers()).map_err(Error::from)?;
            let message = signer.sign(&req).await?;
            set.add(message);

            let (mut parts, body) = req.into_parts();
            set.apply(&mut parts.headers).map_err(Error::from)?;

            inner
                .call(Request::from_parts(parts, Full::new(body)))
                .await
                .map_err(Into::into)
        })
    }
}

#[cfg(test)]
mod test {
    use super::Signer;
    use crate::{algorithm::SigningAlgorithm, digest::Digester, params::Params};
    use bytes::Bytes;
    use http::Request;

    struct MockAlgorithm;

    impl SigningAlgorithm for MockAlgorithm {
        fn name(&self) -> &str {
            "ecdsa-p256-sha256"
        }

        fn content_digest(&self) -> Digester {
            Digester::SHA256
        }

        async fn sign(&self, _base: &str) -> Result<Vec<u8>, crate::AlgorithmError> {
            Ok(b"MOCK_SIGNATURE".to_vec())
        }
    }

    #[tokio::test]
    async fn sign() {
        let signer = Signer::builder()
            .algorithm(MockAlgorithm)
            .key_id("testkey-123".to_owned())
            .tag("example-app".to_owned())
            .covered_components(vec!["@method".to_owned(), "@target-uri".to_owned()])
            .get_nonce(Box::new(|| Ok("MOCKNONCE".to_owned())))
            .build();

        let req = Request::builder()
            .method("POST")
            .uri("https://example.com")
            .body(Bytes::new())
            .unwrap();

        let message = signer.sign(&req).await.unwrap();

        assert_eq!(
            message.input,
            Params {
                key_id: Some("testkey-123".to_owned()),
                tag: Some("example-app".to_owned()),
                alg: Some("ecdsa-p256-sha256".to_owned()),
                covered_components: vec!["@method".to_owned(), "@target-uri".to_owned()],
                nonce: Some("MOCKNONCE".to_owned()),
                created: message.input.created,
                expires: None,
            }
        );
        assert!(message.input.created.is_some());
        assert_eq!(message.signature, b"MOCK_SIGNATURE");
    }

    #[tokio::test]
    async fn empty_nonce_is_omitted() {
        let signer = Signer::builder()
            .algorithm(MockAlgorithm)
            .covered_components(vec!["@method".to_owned()])
            .get_nonce(Box::new(|| Ok(String::new())))
            .build();

        let req = Request::builder()
            .method("GET")
            .uri("https://example.com")
            .body(Bytes::new())
            .unwrap();

        let message = signer.sign(&req).await.unwrap();
        assert!(message.input.nonce.is_none());
    }

    #[test]
    fn random_nonce_is_padded_base64() {
        let nonce = super::random_nonce().unwrap();
        assert_eq!(nonce.len(), 44);
        assert!(nonce.ends_with('='));
    }
}
