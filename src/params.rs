//! Signature parameters
//!
//! Struct representation of the `@signature-params` component, carried on
//! the wire as the dictionary values of the `Signature-Input` header
//!
//! See: <https://www.rfc-editor.org/rfc/rfc9421.html#name-signature-parameters>

use miette::Diagnostic;
use sfv::SerializeValue;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Debug, Diagnostic, Error)]
pub enum Error {
    #[error("covered component was not a string item")]
    ComponentNotString,

    #[error("covered component {identifier:?} is not a valid structured field string")]
    InvalidComponent { identifier: String },

    #[error("parameter {name:?} is not a valid structured field string")]
    InvalidParameter { name: &'static str },

    #[error("parameter {name:?} had an unexpected kind")]
    UnexpectedParameterKind { name: &'static str },

    #[error("timestamp is out of range for a structured field integer")]
    TimestampRange,

    #[error("serialising the signature parameters failed")]
    Serialise,

    #[error("client side alg specification is forbidden but alg {alg:?} was provided")]
    ClientSideAlgForbidden { alg: String },

    #[error("expires timestamp was before the created timestamp")]
    ExpiresBeforeCreated,

    #[error("created timestamp was earlier than the earliest allowed value")]
    CreatedTooOld,

    #[error("created timestamp was after the latest allowed value")]
    CreatedInFuture,

    #[error("expires timestamp was before the latest allowed value")]
    Expired,

    #[error("nonce is required")]
    NonceRequired,

    #[error("required covered component {identifier:?} was not present")]
    MissingCoveredComponent { identifier: String },
}

/// HTTP message signing parameters
///
/// `covered_components` is an ordered set of component identifiers for
/// HTTP fields and derived components. The order is preserved and
/// communicated between the signer and verifier to facilitate
/// reconstruction of the signature base. `@signature-params` itself is
/// never a member of the set.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Params {
    /// Identifier of the key the message was signed with
    pub key_id: Option<String>,

    /// Application-specific tag, used by the verifier to select
    /// the signature relevant to it
    pub tag: Option<String>,

    /// Name of the signing algorithm from the HTTP Signature Algorithms registry
    pub alg: Option<String>,

    /// Ordered set of component identifiers covered by the signature
    pub covered_components: Vec<String>,

    /// Unique value included to defend against signature replay
    pub nonce: Option<String>,

    /// Instant the signature was created
    pub created: Option<SystemTime>,

    /// Instant the signature expires
    pub expires: Option<SystemTime>,
}

impl Params {
    /// Serialize into the exact byte sequence used as the value of
    /// `"@signature-params"` in the signature base
    pub fn marshal_text(&self) -> Result<String, Error> {
        let list = vec![sfv::ListEntry::InnerList(self.to_inner_list()?)];
        list.serialize_value().ok_or(Error::Serialise)
    }

    /// Structured field representation as carried inside `Signature-Input`
    ///
    /// Parameters are appended in the fixed order `keyid`, `alg`, `tag`,
    /// `nonce`, `created`, `expires`, skipping unset fields.
    pub fn to_inner_list(&self) -> Result<sfv::InnerList, Error> {
        let mut items = Vec::with_capacity(self.covered_components.len());
        for identifier in &self.covered_components {
            let identifier =
                sfv::StringRef::from_str(identifier).map_err(|_| Error::InvalidComponent {
                    identifier: identifier.clone(),
                })?;

            items.push(sfv::Item::new(identifier));
        }

        let mut params = sfv::Parameters::new();

        if let Some(key_id) = self.key_id.as_deref() {
            params.insert(
                sfv::KeyRef::constant("keyid").to_owned(),
                string_item("keyid", key_id)?,
            );
        }
        if let Some(alg) = self.alg.as_deref() {
            params.insert(
                sfv::KeyRef::constant("alg").to_owned(),
                string_item("alg", alg)?,
            );
        }
        if let Some(tag) = self.tag.as_deref() {
            params.insert(
                sfv::KeyRef::constant("tag").to_owned(),
                string_item("tag", tag)?,
            );
        }
        if let Some(nonce) = self.nonce.as_deref() {
            params.insert(
                sfv::KeyRef::constant("nonce").to_owned(),
                string_item("nonce", nonce)?,
            );
        }
        if let Some(created) = self.created {
            params.insert(
                sfv::KeyRef::constant("created").to_owned(),
                sfv::BareItem::Integer(unix_timestamp(created)?),
            );
        }
        if let Some(expires) = self.expires {
            params.insert(
                sfv::KeyRef::constant("expires").to_owned(),
                sfv::BareItem::Integer(unix_timestamp(expires)?),
            );
        }

        Ok(sfv::InnerList::with_params(items, params))
    }

    /// Parse parameters out of a `Signature-Input` dictionary value
    pub fn from_inner_list(input: &sfv::InnerList) -> Result<Self, Error> {
        let mut covered_components = Vec::with_capacity(input.items.len());
        for item in &input.items {
            let identifier = item
                .bare_item
                .as_string()
                .ok_or(Error::ComponentNotString)?;

            covered_components.push(identifier.as_str().to_owned());
        }

        Ok(Self {
            key_id: optional_string(&input.params, "keyid")?,
            tag: optional_string(&input.params, "tag")?,
            alg: optional_string(&input.params, "alg")?,
            covered_components,
            nonce: optional_string(&input.params, "nonce")?,
            created: optional_timestamp(&input.params, "created")?,
            expires: optional_timestamp(&input.params, "expires")?,
        })
    }

    /// Validate the parameters against the verifier's policy
    pub fn validate(&self, opts: &ValidateOpts, now: SystemTime) -> Result<(), Error> {
        if opts.forbid_client_side_alg {
            if let Some(alg) = &self.alg {
                return Err(Error::ClientSideAlgForbidden { alg: alg.clone() });
            }
        }

        // an absent creation timestamp behaves like the epoch, so it always
        // falls out of the acceptance window
        let created = self.created.unwrap_or(UNIX_EPOCH);

        if let Some(expires) = self.expires {
            if expires < created {
                return Err(Error::ExpiresBeforeCreated);
            }
        }

        let not_before = now.checked_sub(opts.before_duration).unwrap_or(UNIX_EPOCH);
        if created < not_before {
            return Err(Error::CreatedTooOld);
        }

        let not_after = now.checked_add(opts.after_duration).unwrap_or(now);
        if created > not_after {
            return Err(Error::CreatedInFuture);
        }

        if let Some(expires) = self.expires {
            if expires < not_after {
                return Err(Error::Expired);
            }
        }

        if opts.require_nonce && self.nonce.as_deref().map_or(true, str::is_empty) {
            return Err(Error::NonceRequired);
        }

        for identifier in &opts.required_covered_components {
            if !self.covered_components.contains(identifier) {
                return Err(Error::MissingCoveredComponent {
                    identifier: identifier.clone(),
                });
            }
        }

        Ok(())
    }
}

/// Policy applied to incoming signature parameters
#[derive(Clone, Debug, Default)]
pub struct ValidateOpts {
    /// Require that the client did not send an `alg` parameter
    ///
    /// Useful when the algorithm is always determined from the key
    /// material and a client-specified value would only widen the
    /// attack surface.
    pub forbid_client_side_alg: bool,

    /// Allowed clock skew into the past. Keep this small in production,
    /// in the order of a minute.
    pub before_duration: Duration,

    /// Allowed clock skew into the future. Should be zero in production
    /// to reject future-dated signatures.
    pub after_duration: Duration,

    /// Component identifiers which must be covered by the signature
    pub required_covered_components: Vec<String>,

    /// Require the `nonce` parameter to be present and non-empty
    pub require_nonce: bool,
}

impl ValidateOpts {
    /// Sensible defaults for the verifying middleware
    #[must_use]
    pub fn recommended() -> Self {
        Self {
            forbid_client_side_alg: false,
            before_duration: Duration::from_secs(60),
            after_duration: Duration::ZERO,
            required_covered_components: crate::default_covered_components(),
            require_nonce: true,
        }
    }
}

fn string_item(name: &'static str, value: &str) -> Result<sfv::BareItem, Error> {
    let value = sfv::StringRef::from_str(value).map_err(|_| Error::InvalidParameter { name })?;
    Ok(sfv::BareItem::String(value.to_owned()))
}

fn unix_timestamp(instant: SystemTime) -> Result<sfv::Integer, Error> {
    let secs = instant
        .duration_since(UNIX_EPOCH)
        .map_err(|_| Error::TimestampRange)?
        .as_secs();

    i64::try_from(secs)
        .ok()
        .and_then(|secs| sfv::Integer::try_from(secs).ok())
        .ok_or(Error::TimestampRange)
}

fn optional_string(
    params: &sfv::Parameters,
    name: &'static str,
) -> Result<Option<String>, Error> {
    let Some(value) = params.get(name) else {
        return Ok(None);
    };
    let value = value
        .as_string()
        .ok_or(Error::UnexpectedParameterKind { name })?;

    Ok(Some(value.as_str().to_owned()))
}

fn optional_timestamp(
    params: &sfv::Parameters,
    name: &'static str,
) -> Result<Option<SystemTime>, Error> {
    let Some(value) = params.get(name) else {
        return Ok(None);
    };
    let value = value
        .as_integer()
        .ok_or(Error::UnexpectedParameterKind { name })?;

    let secs = i64::from(value);
    let instant = if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs.unsigned_abs())
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs())
    };

    Ok(Some(instant))
}
