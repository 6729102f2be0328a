//! Request verification
//!
//! [`Verifier::parse`] takes a buffered request and either produces a
//! rewritten request whose headers and body are restricted to what the
//! signature actually covered, or an error. [`VerifyLayer`] wraps it into
//! a `tower` middleware which answers rejected requests with
//! `401 Unauthorized`, or `413 Content Too Large` when the body exceeded
//! the read limit.
//!
//! See: <https://www.rfc-editor.org/rfc/rfc9421.html#name-verifying-a-signature>

use crate::{
    algorithm::{AlgorithmError, VerifyingAlgorithm},
    base::Base,
    nonce::NonceStorage,
    params::ValidateOpts,
    set::SignatureSet,
    BoxError,
};
use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::{
    header::HOST,
    uri::{Authority, PathAndQuery, Scheme},
    Request, Response, StatusCode, Uri,
};
use http_body::{Body, Frame, SizeHint};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use miette::Diagnostic;
use pin_project_lite::pin_project;
use std::{
    future::Future,
    mem,
    pin::Pin,
    sync::Arc,
    task::{self, Poll},
    time::SystemTime,
};
use thiserror::Error;
use tower::{Layer, Service};
use typed_builder::TypedBuilder;

type SigningStringHook = Box<dyn Fn(&str) + Send + Sync>;
type ValidationErrorHook = Box<dyn Fn(&Error) + Send + Sync>;

#[derive(Debug, Diagnostic, Error)]
pub enum Error {
    #[error("request host {host:?} was not equal to expected authority {authority:?}")]
    HostMismatch { host: String, authority: String },

    #[error("rebuilding the request URI failed")]
    Uri(#[source] http::uri::InvalidUriParts),

    #[error("invalid signature parameters")]
    Validation(#[source] crate::params::Error),

    #[error("nonce has already been seen")]
    NonceReplay,

    #[error("checking nonce storage failed")]
    NonceStorage(#[source] BoxError),

    #[error("looking up the signing key failed")]
    GetKey(#[source] BoxError),

    #[error("invalid algorithm signature parameter: wanted {expected:?} but got {actual:?}")]
    AlgorithmMismatch { expected: String, actual: String },

    #[error("request body exceeds the read limit of {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("reading the request body failed")]
    Body(#[source] BoxError),

    #[error(transparent)]
    Set(#[from] crate::set::Error),

    #[error(transparent)]
    Base(#[from] crate::base::Error),

    #[error(transparent)]
    Algorithm(#[from] AlgorithmError),
}

impl Error {
    /// Whether this failure maps to HTTP 413 instead of 401
    #[must_use]
    pub fn is_body_too_large(&self) -> bool {
        matches!(self, Self::BodyTooLarge { .. })
            || matches!(
                self,
                Self::Base(crate::base::Error::Digest(
                    crate::digest::Error::BodyTooLarge { .. }
                ))
            )
    }
}

/// Directory resolving key identifiers to verification keys
pub trait KeyDirectory: Send + Sync {
    type Algorithm: VerifyingAlgorithm;

    /// Look up a verification key based on the key ID
    ///
    /// `client_specified_alg` is the raw `alg` parameter from the
    /// request. It is attacker-controlled; relying on it for algorithm
    /// selection is not recommended, it is provided to adhere to the RFC.
    fn get_key(
        &self,
        key_id: &str,
        client_specified_alg: Option<&str>,
    ) -> impl Future<Output = Result<Self::Algorithm, BoxError>> + Send;
}

/// Key directory returning one static key regardless of the key ID
#[derive(Clone)]
pub struct StaticKeyDirectory<A> {
    algorithm: A,
}

impl<A> StaticKeyDirectory<A> {
    pub fn new(algorithm: A) -> Self {
        Self { algorithm }
    }
}

impl<A> KeyDirectory for StaticKeyDirectory<A>
where
    A: VerifyingAlgorithm + Clone,
{
    type Algorithm = A;

    async fn get_key(
        &self,
        _key_id: &str,
        _client_specified_alg: Option<&str>,
    ) -> Result<Self::Algorithm, BoxError> {
        Ok(self.algorithm.clone())
    }
}

/// Verifies message signatures on incoming HTTP requests
#[derive(TypedBuilder)]
pub struct Verifier<K, N> {
    /// Directory used to look up verification keys by key ID
    key_directory: K,

    /// Storage consulted for nonce replay
    nonce_storage: N,

    /// Tag selecting which signature on the request is ours
    ///
    /// Must be non-empty; requests must carry exactly one signature
    /// matching it.
    tag: String,

    /// Expected URL scheme the verifier is served under
    ///
    /// Should be `https` in production.
    scheme: Scheme,

    /// Expected authority the verifier is served under
    authority: Authority,

    /// Policy applied to the signature parameters
    #[builder(default = ValidateOpts::recommended())]
    validation: ValidateOpts,

    /// Observation hook invoked with the recreated signing string
    #[builder(default, setter(strip_option))]
    on_signing_string: Option<SigningStringHook>,
}

impl<K, N> Verifier<K, N>
where
    K: KeyDirectory,
    N: NonceStorage,
{
    /// Verify the signature on a buffered request
    ///
    /// On success returns the verified request and the key it was signed
    /// with. The returned request is not the input request: its headers
    /// are replaced with the covered subset, and unless both
    /// `content-length` and `content-digest` were covered, its body is an
    /// unreadable sentinel.
    #[instrument(skip_all)]
    pub async fn parse(
        &self,
        req: Request<Bytes>,
        now: SystemTime,
    ) -> Result<(Request<VerifiedBody>, K::Algorithm), Error> {
        let host = request_host(&req);
        if host != Some(self.authority.as_str()) {
            return Err(Error::HostMismatch {
                host: host.unwrap_or_default().to_owned(),
                authority: self.authority.to_string(),
            });
        }

        // force our expected scheme and authority onto the URI so that
        // they drive `@target-uri` and `@authority` during base
        // recreation. An attacker-controlled URL must not change what
        // was signed.
        let req = self.rewrite_uri(req)?;

        let set = SignatureSet::from_headers(req.headers())?;
        let message = set.find(&self.tag)?.clone();

        message
            .input
            .validate(&self.validation, now)
            .map_err(Error::Validation)?;

        let nonce = message.input.nonce.as_deref().unwrap_or_default();
        if self
            .nonce_storage
            .seen(nonce)
            .await
            .map_err(Error::NonceStorage)?
        {
            return Err(Error::NonceReplay);
        }

        let key = self
            .key_directory
            .get_key(
                message.input.key_id.as_deref().unwrap_or_default(),
                message.input.alg.as_deref(),
            )
            .await
            .map_err(Error::GetKey)?;

        // if the algorithm is specified in more than one location, the
        // resolved algorithms must agree
        if let Some(alg) = message.input.alg.as_deref() {
            if alg != key.name() {
                return Err(Error::AlgorithmMismatch {
                    expected: key.name().to_owned(),
                    actual: alg.to_owned(),
                });
            }
        }

        let base = Base::derive(&message.input, &req, key.content_digest())?;
        let signing_string = base.canonical_string(&message.input)?;

        if let Some(hook) = &self.on_signing_string {
            hook(&signing_string);
        }

        key.verify(&signing_string, &message.signature).await?;

        let body_is_covered = base.body_is_covered();
        let (mut parts, body) = req.into_parts();

        // only the headers actually covered by the signature survive
        parts.headers = base.into_header();

        let body = if body_is_covered {
            VerifiedBody::covered(body)
        } else {
            VerifiedBody::uncovered()
        };

        Ok((Request::from_parts(parts, body), key))
    }

    fn rewrite_uri(&self, req: Request<Bytes>) -> Result<Request<Bytes>, Error> {
        let (mut parts, body) = req.into_parts();

        let mut uri_parts = parts.uri.into_parts();
        uri_parts.scheme = Some(self.scheme.clone());
        uri_parts.authority = Some(self.authority.clone());
        if uri_parts.path_and_query.is_none() {
            uri_parts.path_and_query = Some(PathAndQuery::from_static("/"));
        }
        parts.uri = Uri::from_parts(uri_parts).map_err(Error::Uri)?;

        Ok(Request::from_parts(parts, body))
    }
}

fn request_host(req: &Request<Bytes>) -> Option<&str> {
    if let Some(host) = req.headers().get(HOST) {
        return host.to_str().ok();
    }

    req.uri().authority().map(Authority::as_str)
}

/// Error returned when reading a request body that was not covered by
/// the message signature
///
/// Cover `content-digest` and `content-length` to make the body
/// readable.
#[derive(Clone, Copy, Debug, Diagnostic, Error)]
#[error("the body cannot be read because it is not covered by a HTTP signature")]
pub struct BodyNotCovered;

pin_project! {
    #[project = VerifiedBodyProj]
    /// Body of a request returned by [`Verifier::parse`]
    ///
    /// Either the buffered body bytes when the signature covered them, or
    /// a sentinel failing every read, guarding applications against
    /// treating an unsigned body as trusted.
    #[derive(Debug)]
    pub enum VerifiedBody {
        Covered { data: Option<Bytes> },
        Uncovered,
    }
}

impl VerifiedBody {
    fn covered(data: Bytes) -> Self {
        Self::Covered { data: Some(data) }
    }

    fn uncovered() -> Self {
        Self::Uncovered
    }

    /// Buffered body bytes, if the signature covered the body
    pub fn try_into_bytes(self) -> Result<Bytes, BodyNotCovered> {
        match self {
            Self::Covered { data } => Ok(data.unwrap_or_default()),
            Self::Uncovered => Err(BodyNotCovered),
        }
    }
}

impl Body for VerifiedBody {
    type Data = Bytes;
    type Error = BodyNotCovered;

    fn poll_frame(
        self: Pin<&mut Self>,
        _cx: &mut task::Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.project() {
            VerifiedBodyProj::Covered { data } => {
                Poll::Ready(data.take().map(|data| Ok(Frame::data(data))))
            }
            VerifiedBodyProj::Uncovered => Poll::Ready(Some(Err(BodyNotCovered))),
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            Self::Covered { data } => data.is_none(),
            Self::Uncovered => false,
        }
    }

    fn size_hint(&self) -> SizeHint {
        match self {
            Self::Covered { data: Some(data) } => SizeHint::with_exact(data.len() as u64),
            Self::Covered { data: None } => SizeHint::with_exact(0),
            Self::Uncovered => SizeHint::default(),
        }
    }
}

/// Layer verifying HTTP message signatures on incoming requests
pub struct VerifyLayer<K, N> {
    verifier: Arc<Verifier<K, N>>,
    body_limit: usize,
    on_validation_error: Option<Arc<ValidationErrorHook>>,
}

impl<K, N> VerifyLayer<K, N> {
    pub fn new(verifier: Verifier<K, N>) -> Self {
        Self {
            verifier: Arc::new(verifier),
            body_limit: crate::digest::DEFAULT_MAX_BYTES,
            on_validation_error: None,
        }
    }

    /// Limit on the number of body bytes read before verification
    ///
    /// Requests with larger bodies are rejected with HTTP 413.
    #[must_use]
    pub fn body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    /// Observation hook invoked with every verification error
    #[must_use]
    pub fn on_validation_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.on_validation_error = Some(Arc::new(Box::new(hook)));
        self
    }
}

impl<K, N> Clone for VerifyLayer<K, N> {
    fn clone(&self) -> Self {
        Self {
            verifier: Arc::clone(&self.verifier),
            body_limit: self.body_limit,
            on_validation_error: self.on_validation_error.clone(),
        }
    }
}

impl<S, K, N> Layer<S> for VerifyLayer<K, N> {
    type Service = VerifyService<S, K, N>;

    fn layer(&self, inner: S) -> Self::Service {
        VerifyService {
            inner,
            verifier: Arc::clone(&self.verifier),
            body_limit: self.body_limit,
            on_validation_error: self.on_validation_error.clone(),
        }
    }
}

/// Service verifying every request before it reaches the inner service
///
/// The inner service only ever sees requests whose signature verified;
/// its request headers are the covered subset and its body errors unless
/// the signature covered it. The key's attributes, if any, are attached
/// to the request extensions as [`crate::Attributes`].
pub struct VerifyService<S, K, N> {
    inner: S,
    verifier: Arc<Verifier<K, N>>,
    body_limit: usize,
    on_validation_error: Option<Arc<ValidationErrorHook>>,
}

impl<S, K, N> Clone for VerifyService<S, K, N>
where
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            verifier: Arc::clone(&self.verifier),
            body_limit: self.body_limit,
            on_validation_error: self.on_validation_error.clone(),
        }
    }
}

impl<S, K, N, B, ResBody> Service<Request<B>> for VerifyService<S, K, N>
where
    S: Service<Request<VerifiedBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send,
    K: KeyDirectory + Send + Sync + 'static,
    K::Algorithm: 'static,
    N: NonceStorage + Send + Sync + 'static,
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
    ResBody: From<Bytes>,
{
    type Response = Response<ResBody>;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let verifier = Arc::clone(&self.verifier);
        let body_limit = self.body_limit;
        let on_validation_error = self.on_validation_error.clone();
        let clone = self.inner.clone();
        let mut inner = mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let (parts, body) = req.into_parts();
            let body = match Limited::new(body, body_limit).collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(error) => {
                    let error = if error.downcast_ref::<LengthLimitError>().is_some() {
                        Error::BodyTooLarge { limit: body_limit }
                    } else {
                        Error::Body(error)
                    };

                    return Ok(reject(&error, on_validation_error.as_deref()));
                }
            };
            let req = Request::from_parts(parts, body);

            match verifier.parse(req, tick_tock_mock::now()).await {
                Ok((mut req, key)) => {
                    if let Some(attributes) = key.attributes() {
                        req.extensions_mut().insert(attributes);
                    }

                    inner.call(req).await.map_err(Into::into)
                }
                Err(error) => Ok(reject(&error, on_validation_error.as_deref())),
            }
        })
    }
}

fn reject<ResBody>(error: &Error, hook: Option<&ValidationErrorHook>) -> Response<ResBody>
where
    ResBody: From<Bytes>,
{
    if let Some(hook) = hook {
        hook(error);
    }

    debug!(?error, "rejecting request");

    let status = if error.is_body_too_large() {
        StatusCode::PAYLOAD_TOO_LARGE
    } else {
        StatusCode::UNAUTHORIZED
    };

    let body = Bytes::from(status.canonical_reason().unwrap_or_default());
    let mut response = Response::new(ResBody::from(body));
    *response.status_mut() = status;

    response
}
