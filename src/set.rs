//! Sets of HTTP message signatures
//!
//! A message may carry multiple labelled signatures across its
//! `Signature-Input` and `Signature` headers. Both fields must carry the
//! same labels; a label present in one but not the other is an error.

use crate::{params::Params, SIGNATURE, SIGNATURE_INPUT};
use http::{
    header::{HeaderName, InvalidHeaderValue, ToStrError},
    HeaderMap, HeaderValue,
};
use indexmap::IndexMap;
use miette::Diagnostic;
use sfv::SerializeValue;
use thiserror::Error;

#[derive(Debug, Diagnostic, Error)]
pub enum Error {
    #[error("{header} header is malformed")]
    Malformed {
        header: &'static str,
        #[source]
        source: sfv::Error,
    },

    #[error("signature input {label:?} was not an inner list")]
    InputNotInnerList { label: String },

    #[error("signature {label:?} was not a byte sequence item")]
    SignatureNotBytes { label: String },

    #[error("signature input {label:?} had no corresponding signature")]
    MissingSignature { label: String },

    #[error("signature {label:?} did not have a corresponding signature input")]
    OrphanSignature { label: String },

    #[error("label {label:?} is not a valid structured field key")]
    InvalidLabel { label: String },

    #[error("tag to find was empty")]
    EmptyTag,

    #[error("could not find a signature matching the tag {tag:?}")]
    NoMatch { tag: String },

    #[error("found multiple signatures for tag {tag:?}: {first:?} and {second:?}")]
    MultipleSignatures {
        tag: String,
        first: String,
        second: String,
    },

    #[error("serialising the signature set failed")]
    Serialise,

    #[error(transparent)]
    Params(#[from] crate::params::Error),

    #[error(transparent)]
    ToStr(#[from] ToStrError),

    #[error(transparent)]
    InvalidHeaderValue(#[from] InvalidHeaderValue),
}

/// A single HTTP message signature
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Message {
    /// Parameters carried in the `Signature-Input` header
    pub input: Params,

    /// Signature bytes carried in the `Signature` header
    pub signature: Vec<u8>,
}

/// Labelled signatures of one HTTP message
///
/// Labels are chosen by the signer and carry no meaning beyond tying the
/// two headers together. Don't rely on them when verifying, use the tag
/// inside the signature params instead.
#[derive(Debug, Default)]
pub struct SignatureSet {
    messages: IndexMap<String, Message>,
}

impl SignatureSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the signature set out of the `Signature-Input` and
    /// `Signature` headers
    ///
    /// Malformed structured field values in either header are a hard
    /// error, as is any label mismatch between the two.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, Error> {
        let input_dict = parse_dictionary(headers, &SIGNATURE_INPUT, "Signature-Input")?;
        let signature_dict = parse_dictionary(headers, &SIGNATURE, "Signature")?;

        let mut messages = IndexMap::new();
        for (label, entry) in &input_dict {
            let sfv::ListEntry::InnerList(inner) = entry else {
                return Err(Error::InputNotInnerList {
                    label: label.as_str().to_owned(),
                });
            };

            let input = Params::from_inner_list(inner)?;

            let signature = signature_dict
                .get(label)
                .ok_or_else(|| Error::MissingSignature {
                    label: label.as_str().to_owned(),
                })?;
            let sfv::ListEntry::Item(sfv::Item {
                bare_item: sfv::BareItem::ByteSequence(signature),
                ..
            }) = signature
            else {
                return Err(Error::SignatureNotBytes {
                    label: label.as_str().to_owned(),
                });
            };

            messages.insert(
                label.as_str().to_owned(),
                Message {
                    input,
                    signature: signature.clone(),
                },
            );
        }

        for label in signature_dict.keys() {
            if !messages.contains_key(label.as_str()) {
                return Err(Error::OrphanSignature {
                    label: label.as_str().to_owned(),
                });
            }
        }

        Ok(Self { messages })
    }

    /// Add a message under an auto-assigned label
    ///
    /// Labels are generated as `sig1`, `sig2`, … in insertion order. Use
    /// [`SignatureSet::insert`] to pick the label yourself.
    pub fn add(&mut self, message: Message) {
        let label = format!("sig{}", self.messages.len() + 1);
        self.messages.insert(label, message);
    }

    /// Add a message under a custom label
    pub fn insert(&mut self, label: impl Into<String>, message: Message) {
        self.messages.insert(label.into(), message);
    }

    #[must_use]
    pub fn get(&self, label: &str) -> Option<&Message> {
        self.messages.get(label)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Message)> {
        self.messages.iter()
    }

    /// Find the single message whose params carry the given tag
    ///
    /// The verifier is configured with exactly one expected tag, so two or
    /// more matches are refused rather than silently resolved.
    pub fn find(&self, tag: &str) -> Result<&Message, Error> {
        if tag.is_empty() {
            return Err(Error::EmptyTag);
        }

        let mut found: Option<(&String, &Message)> = None;
        for (label, message) in &self.messages {
            if message.input.tag.as_deref() != Some(tag) {
                continue;
            }

            if let Some((first, _)) = found {
                return Err(Error::MultipleSignatures {
                    tag: tag.to_owned(),
                    first: first.clone(),
                    second: label.clone(),
                });
            }

            found = Some((label, message));
        }

        found
            .map(|(_, message)| message)
            .ok_or_else(|| Error::NoMatch {
                tag: tag.to_owned(),
            })
    }

    /// Serialize the set into the `Signature-Input` and `Signature`
    /// headers, overwriting existing values
    ///
    /// Both dictionaries are emitted from a single label iteration, so
    /// their label order always matches.
    pub fn apply(&self, headers: &mut HeaderMap) -> Result<(), Error> {
        let mut input_dict = sfv::Dictionary::new();
        let mut signature_dict = sfv::Dictionary::new();

        for (label, message) in &self.messages {
            let key = sfv::KeyRef::from_str(label)
                .map_err(|_| Error::InvalidLabel {
                    label: label.clone(),
                })?
                .to_owned();

            input_dict.insert(
                key.clone(),
                sfv::ListEntry::InnerList(message.input.to_inner_list()?),
            );
            signature_dict.insert(
                key,
                sfv::ListEntry::Item(sfv::Item::new(sfv::BareItem::ByteSequence(
                    message.signature.clone(),
                ))),
            );
        }

        let Some(input_value) = input_dict.serialize_value() else {
            headers.remove(&SIGNATURE_INPUT);
            headers.remove(&SIGNATURE);
            return Ok(());
        };
        let signature_value = signature_dict.serialize_value().ok_or(Error::Serialise)?;

        headers.insert(&SIGNATURE_INPUT, HeaderValue::from_str(&input_value)?);
        headers.insert(&SIGNATURE, HeaderValue::from_str(&signature_value)?);

        Ok(())
    }
}

fn parse_dictionary(
    headers: &HeaderMap,
    name: &HeaderName,
    display_name: &'static str,
) -> Result<sfv::Dictionary, Error> {
    let mut dict = sfv::Dictionary::new();
    for value in headers.get_all(name) {
        let parsed = sfv::Parser::new(value.to_str()?)
            .parse_dictionary()
            .map_err(|source| Error::Malformed {
                header: display_name,
                source,
            })?;

        dict.extend(parsed);
    }

    Ok(dict)
}

#[cfg(test)]
mod test {
    use super::{Error, Message, SignatureSet};
    use crate::params::Params;
    use http::HeaderMap;
    use std::time::{Duration, UNIX_EPOCH};

    fn message(tag: &str, signature: &[u8]) -> Message {
        Message {
            input: Params {
                key_id: Some("testkey-123".to_owned()),
                alg: Some("ecdsa-p256-sha256".to_owned()),
                tag: Some(tag.to_owned()),
                covered_components: vec!["@method".to_owned(), "@target-uri".to_owned()],
                created: Some(UNIX_EPOCH + Duration::from_secs(1_704_254_706)),
                ..Params::default()
            },
            signature: signature.to_vec(),
        }
    }

    #[test]
    fn round_trip() {
        let mut set = SignatureSet::new();
        set.add(message("example-app", b"MOCK_SIGNATURE"));
        set.add(message("other-app", b"SECOND"));

        let mut headers = HeaderMap::new();
        set.apply(&mut headers).unwrap();

        let reparsed = SignatureSet::from_headers(&headers).unwrap();

        assert_eq!(reparsed.len(), 2);
        assert_eq!(reparsed.get("sig1"), set.get("sig1"));
        assert_eq!(reparsed.get("sig2"), set.get("sig2"));
    }

    #[test]
    fn auto_labels_are_sequential() {
        let mut set = SignatureSet::new();
        set.add(message("a", b"1"));
        set.add(message("b", b"2"));

        assert!(set.get("sig1").is_some());
        assert!(set.get("sig2").is_some());
    }

    #[test]
    fn custom_labels() {
        let mut set = SignatureSet::new();
        set.insert("proxy", message("a", b"1"));

        let mut headers = HeaderMap::new();
        set.apply(&mut headers).unwrap();

        let reparsed = SignatureSet::from_headers(&headers).unwrap();
        assert!(reparsed.get("proxy").is_some());
    }

    #[test]
    fn orphan_signature_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert("signature", "sig1=:TU9DS19TSUdOQVRVUkU=:".parse().unwrap());

        let error = SignatureSet::from_headers(&headers).unwrap_err();
        assert!(matches!(error, Error::OrphanSignature { .. }));
    }

    #[test]
    fn input_without_signature_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "signature-input",
            r#"sig1=("@method");keyid="testkey-123";created=1704254706"#
                .parse()
                .unwrap(),
        );

        let error = SignatureSet::from_headers(&headers).unwrap_err();
        assert!(matches!(error, Error::MissingSignature { .. }));
    }

    #[test]
    fn malformed_header_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert("signature-input", "sig1=(((".parse().unwrap());

        let error = SignatureSet::from_headers(&headers).unwrap_err();
        assert!(matches!(error, Error::Malformed { .. }));
    }

    #[test]
    fn missing_headers_parse_as_empty_set() {
        let set = SignatureSet::from_headers(&HeaderMap::new()).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn find() {
        let mut set = SignatureSet::new();
        set.add(message("example-app", b"1"));
        set.add(message("other-app", b"2"));

        let found = set.find("example-app").unwrap();
        assert_eq!(found.signature, b"1");

        assert!(matches!(set.find(""), Err(Error::EmptyTag)));
        assert!(matches!(set.find("unknown"), Err(Error::NoMatch { .. })));
    }

    #[test]
    fn find_rejects_duplicate_tags() {
        let mut set = SignatureSet::new();
        set.add(message("example-app", b"1"));
        set.add(message("example-app", b"2"));

        let error = set.find("example-app").unwrap_err();
        assert!(matches!(
            error,
            Error::MultipleSignatures {
                ref first,
                ref second,
                ..
            } if first == "sig1" && second == "sig2"
        ));
    }
}
