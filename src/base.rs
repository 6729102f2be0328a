//! Signature base derivation
//!
//! The signature base is the canonical ASCII string that is actually
//! signed. It is a deterministic function of the covered components and
//! the signature parameters.
//!
//! See: <https://www.rfc-editor.org/rfc/rfc9421.html#name-creating-the-signature-base>

use crate::{ascii, digest::Digester, params::Params};
use bytes::Bytes;
use http::{
    header::{HeaderName, ToStrError},
    HeaderMap, Request, Uri,
};
use miette::Diagnostic;
use sfv::SerializeValue;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Debug, Diagnostic, Error)]
pub enum Error {
    #[error("the covered component {identifier:?} appears more than once")]
    DuplicateCoveredComponent { identifier: String },

    #[error("covered component {identifier:?} did not have a corresponding value")]
    MissingComponentValue { identifier: String },

    #[error("component identifier was empty")]
    EmptyIdentifier,

    #[error("component identifier {identifier:?} must be lowercase")]
    NotLowercase { identifier: String },

    #[error("@signature-params may not be included in the covered components")]
    SignatureParamsCovered,

    #[error("unknown derived component {identifier:?}")]
    UnknownDerivedComponent { identifier: String },

    #[error("request value for {identifier:?} was empty")]
    EmptyComponent { identifier: &'static str },

    #[error("HTTP field {identifier:?} was not present on the request")]
    MissingField { identifier: String },

    #[error("invalid HTTP field name {identifier:?}")]
    InvalidFieldName { identifier: String },

    #[error("content length is out of range for a structured field integer")]
    ContentLengthRange,

    #[error(transparent)]
    NonAscii(#[from] ascii::NonAsciiByte),

    #[error(transparent)]
    Digest(#[from] crate::digest::Error),

    #[error(transparent)]
    Params(#[from] crate::params::Error),

    #[error(transparent)]
    ToStr(#[from] ToStrError),
}

/// Canonicalized component values of a single message
///
/// `header` records the raw field values of the covered HTTP fields, so
/// middleware can present the covered subset of headers as trusted. The
/// values are copied as-is from the input request; whitespace trimming and
/// obsolete line folding are not applied to them.
pub struct Base {
    values: HashMap<String, String>,
    header: HeaderMap,
}

impl Base {
    /// Derive the signature base for a request
    ///
    /// Walks the covered components in order, resolving each identifier to
    /// its canonical value. Repeated identifiers are an error.
    pub fn derive(
        params: &Params,
        req: &Request<Bytes>,
        digester: Digester,
    ) -> Result<Self, Error> {
        let mut base = Self {
            values: HashMap::new(),
            header: HeaderMap::new(),
        };

        for identifier in &params.covered_components {
            if base.values.contains_key(identifier) {
                return Err(Error::DuplicateCoveredComponent {
                    identifier: identifier.clone(),
                });
            }

            let value = component_value(identifier, req, digester)?;
            base.values.insert(identifier.clone(), value);

            // body-derived components have no raw header counterpart
            if !identifier.starts_with('@')
                && identifier != "content-digest"
                && identifier != "content-length"
            {
                let name = HeaderName::from_bytes(identifier.as_bytes()).map_err(|_| {
                    Error::InvalidFieldName {
                        identifier: identifier.clone(),
                    }
                })?;

                for value in req.headers().get_all(&name) {
                    base.header.append(name.clone(), value.clone());
                }
            }
        }

        Ok(base)
    }

    /// Emit the canonical signing string
    ///
    /// One `"identifier": value` line per covered component, in the order
    /// of the parameters, terminated by the `"@signature-params"` line.
    /// No trailing newline. Everything is forced through the ASCII writer.
    pub fn canonical_string(&self, params: &Params) -> Result<String, Error> {
        let mut output = ascii::Writer::new();
        let mut already_covered = HashSet::new();

        for identifier in &params.covered_components {
            if !already_covered.insert(identifier.as_str()) {
                return Err(Error::DuplicateCoveredComponent {
                    identifier: identifier.clone(),
                });
            }

            let value = self
                .values
                .get(identifier)
                .ok_or_else(|| Error::MissingComponentValue {
                    identifier: identifier.clone(),
                })?;

            output.write_str("\"")?;
            output.write_str(identifier)?;
            output.write_str("\": ")?;
            output.write_str(value)?;
            output.write_str("\n")?;
        }

        output.write_str("\"@signature-params\": ")?;
        output.write_str(&params.marshal_text()?)?;

        Ok(output.into_string())
    }

    /// Whether the signature covers the request body
    ///
    /// True iff both `content-length` and `content-digest` contributed to
    /// the base.
    #[must_use]
    pub fn body_is_covered(&self) -> bool {
        self.values
            .get("content-length")
            .is_some_and(|value| !value.is_empty())
            && self
                .values
                .get("content-digest")
                .is_some_and(|value| !value.is_empty())
    }

    /// Canonical component values, keyed by identifier
    #[must_use]
    pub fn values(&self) -> &HashMap<String, String> {
        &self.values
    }

    /// Raw values of the covered HTTP fields
    #[must_use]
    pub fn header(&self) -> &HeaderMap {
        &self.header
    }

    /// Consume the base, returning the covered header subset
    #[must_use]
    pub fn into_header(self) -> HeaderMap {
        self.header
    }
}

/// Resolve the canonical value for a component identifier
///
/// Derived components (`@`-prefixed) follow the rules of RFC 9421
/// section 2.2; everything else is canonicalized as an HTTP field per
/// section 2.1. Only bare component names are supported, identifier
/// parameters are not.
fn component_value(
    identifier: &str,
    req: &Request<Bytes>,
    digester: Digester,
) -> Result<String, Error> {
    if identifier.is_empty() {
        return Err(Error::EmptyIdentifier);
    }

    if identifier.chars().any(char::is_uppercase) {
        return Err(Error::NotLowercase {
            identifier: identifier.to_owned(),
        });
    }

    match identifier {
        "@signature-params" => return Err(Error::SignatureParamsCovered),
        "@method" => {
            return Ok(req.method().as_str().to_owned());
        }
        "@authority" => {
            let authority = req
                .uri()
                .authority()
                .map(|authority| authority.as_str().to_owned())
                .or_else(|| host_header(req));

            return authority.ok_or(Error::EmptyComponent {
                identifier: "@authority",
            });
        }
        "@scheme" => {
            return req
                .uri()
                .scheme_str()
                .map(ToOwned::to_owned)
                .ok_or(Error::EmptyComponent {
                    identifier: "@scheme",
                });
        }
        "@target-uri" => return target_uri(req.uri()),
        "content-length" => {
            let length = i64::try_from(req.body().len())
                .ok()
                .and_then(|length| sfv::Integer::try_from(length).ok())
                .ok_or(Error::ContentLengthRange)?;

            return Ok(sfv::Item::new(sfv::BareItem::Integer(length)).serialize_value());
        }
        "content-digest" => return Ok(digester.digest_request(req)?),
        _ => (),
    }

    if identifier.starts_with('@') {
        return Err(Error::UnknownDerivedComponent {
            identifier: identifier.to_owned(),
        });
    }

    let mut values = Vec::new();
    for value in req.headers().get_all(identifier) {
        values.push(fold_value(value.to_str()?));
    }

    if values.is_empty() {
        return Err(Error::MissingField {
            identifier: identifier.to_owned(),
        });
    }

    Ok(values.join(", "))
}

/// Collapse obsolete line folding into single spaces and strip
/// surrounding whitespace, per RFC 9421 section 2.1
fn fold_value(value: &str) -> String {
    value
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<&str>>()
        .join(" ")
}

fn host_header(req: &Request<Bytes>) -> Option<String> {
    req.headers()
        .get(http::header::HOST)
        .and_then(|host| host.to_str().ok())
        .map(ToOwned::to_owned)
}

/// Serialize the target URI, normalizing an empty path to `/`
///
/// The normalization avoids clients and servers deriving different
/// target URIs for requests against the bare authority.
fn target_uri(uri: &Uri) -> Result<String, Error> {
    let scheme = uri.scheme_str().ok_or(Error::EmptyComponent {
        identifier: "@scheme",
    })?;
    let authority = uri.authority().ok_or(Error::EmptyComponent {
        identifier: "@authority",
    })?;

    let path_and_query = uri
        .path_and_query()
        .map_or("/", http::uri::PathAndQuery::as_str);
    let path_and_query = if path_and_query.is_empty() {
        "/"
    } else {
        path_and_query
    };

    Ok(format!("{scheme}://{authority}{path_and_query}"))
}

#[cfg(test)]
mod test {
    use super::{Base, Error};
    use crate::{digest::Digester, params::Params};
    use bytes::Bytes;
    use http::{HeaderMap, Request};
    use std::{
        collections::HashMap,
        time::{Duration, UNIX_EPOCH},
    };

    fn params(covered_components: &[&str]) -> Params {
        Params {
            key_id: Some("testkey-123".to_owned()),
            alg: Some("ecdsa-p256-sha256".to_owned()),
            tag: Some("example-app".to_owned()),
            covered_components: covered_components
                .iter()
                .map(|identifier| (*identifier).to_owned())
                .collect(),
            created: Some(UNIX_EPOCH + Duration::from_secs(1_704_254_706)),
            ..Params::default()
        }
    }

    fn base(values: &[(&str, &str)]) -> Base {
        Base {
            values: values
                .iter()
                .map(|(identifier, value)| ((*identifier).to_owned(), (*value).to_owned()))
                .collect::<HashMap<String, String>>(),
            header: HeaderMap::new(),
        }
    }

    #[test]
    fn canonical_string() {
        let testcases = [
            (
                base(&[("@method", "POST"), ("@target-uri", "https://example.com")]),
                params(&["@method", "@target-uri"]),
                "\"@method\": POST\n\
                 \"@target-uri\": https://example.com\n\
                 \"@signature-params\": (\"@method\" \"@target-uri\");keyid=\"testkey-123\";alg=\"ecdsa-p256-sha256\";tag=\"example-app\";created=1704254706",
            ),
            (
                base(&[
                    ("@method", "POST"),
                    ("@target-uri", "https://example.com/"),
                    ("content-type", "application/json"),
                ]),
                params(&["@method", "@target-uri", "content-type"]),
                "\"@method\": POST\n\
                 \"@target-uri\": https://example.com/\n\
                 \"content-type\": application/json\n\
                 \"@signature-params\": (\"@method\" \"@target-uri\" \"content-type\");keyid=\"testkey-123\";alg=\"ecdsa-p256-sha256\";tag=\"example-app\";created=1704254706",
            ),
            (
                base(&[("content-length", "5")]),
                params(&["content-length"]),
                "\"content-length\": 5\n\
                 \"@signature-params\": (\"content-length\");keyid=\"testkey-123\";alg=\"ecdsa-p256-sha256\";tag=\"example-app\";created=1704254706",
            ),
        ];

        for (base, params, want) in testcases {
            assert_eq!(base.canonical_string(&params).unwrap(), want);
        }
    }

    #[test]
    fn canonical_string_rejects_duplicates() {
        let base = base(&[("@method", "POST")]);
        let error = base
            .canonical_string(&params(&["@method", "@method"]))
            .unwrap_err();

        assert!(matches!(error, Error::DuplicateCoveredComponent { .. }));
    }

    #[test]
    fn derive_covers_headers() {
        let req = Request::builder()
            .method("POST")
            .uri("https://example.com/foo?param=value")
            .header("Content-Type", "application/json")
            .header("X-Custom", "one")
            .body(Bytes::from_static(br#"{"hello": "world"}"#))
            .unwrap();

        let base = Base::derive(
            &params(&[
                "@method",
                "@target-uri",
                "content-type",
                "content-length",
                "content-digest",
            ]),
            &req,
            Digester::SHA256,
        )
        .unwrap();

        assert_eq!(base.values()["@method"], "POST");
        assert_eq!(
            base.values()["@target-uri"],
            "https://example.com/foo?param=value"
        );
        assert_eq!(base.values()["content-length"], "18");
        assert_eq!(
            base.values()["content-digest"],
            "sha-256=:X48E9qOokqqrvdts8nOJRJN3OWDUoyWxBf7kbu9DBPE=:"
        );

        // only the covered HTTP fields end up in the header subset
        assert_eq!(base.header().get("content-type").unwrap(), "application/json");
        assert!(base.header().get("x-custom").is_none());
        assert!(base.header().get("content-length").is_none());

        assert!(base.body_is_covered());
    }

    #[test]
    fn derive_rejections() {
        let req = Request::builder()
            .uri("https://example.com/")
            .body(Bytes::new())
            .unwrap();

        let duplicate = Base::derive(
            &params(&["@method", "@method"]),
            &req,
            Digester::SHA256,
        )
        .unwrap_err();
        assert!(matches!(duplicate, Error::DuplicateCoveredComponent { .. }));

        let unknown = Base::derive(&params(&["@frobnicate"]), &req, Digester::SHA256).unwrap_err();
        assert!(matches!(unknown, Error::UnknownDerivedComponent { .. }));

        let uppercase =
            Base::derive(&params(&["Content-Type"]), &req, Digester::SHA256).unwrap_err();
        assert!(matches!(uppercase, Error::NotLowercase { .. }));

        let reserved =
            Base::derive(&params(&["@signature-params"]), &req, Digester::SHA256).unwrap_err();
        assert!(matches!(reserved, Error::SignatureParamsCovered));

        let missing = Base::derive(&params(&["x-missing"]), &req, Digester::SHA256).unwrap_err();
        assert!(matches!(missing, Error::MissingField { .. }));
    }

    #[test]
    fn folds_obsolete_line_folding() {
        assert_eq!(
            super::fold_value("Obsolete\n  line folding."),
            "Obsolete line folding."
        );
    }

    #[test]
    fn joins_multiple_field_values() {
        let req = Request::builder()
            .uri("https://example.com/")
            .header("Cache-Control", "max-age=60")
            .header("Cache-Control", "  must-revalidate")
            .body(Bytes::new())
            .unwrap();

        let base = Base::derive(&params(&["cache-control"]), &req, Digester::SHA256).unwrap();

        assert_eq!(
            base.values()["cache-control"],
            "max-age=60, must-revalidate"
        );
    }

    #[test]
    fn target_uri_gets_normalized() {
        let req = Request::builder()
            .uri("https://example.com")
            .body(Bytes::new())
            .unwrap();

        let base = Base::derive(&params(&["@target-uri"]), &req, Digester::SHA256).unwrap();

        assert_eq!(base.values()["@target-uri"], "https://example.com/");
    }

    #[test]
    fn body_is_covered_requires_both_components() {
        let only_length = base(&[("content-length", "5")]);
        assert!(!only_length.body_is_covered());

        let both = base(&[
            ("content-length", "5"),
            ("content-digest", "sha-256=:abc=:"),
        ]);
        assert!(both.body_is_covered());
    }
}
