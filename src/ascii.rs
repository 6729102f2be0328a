//! String builder that refuses non-ASCII bytes
//!
//! The signature base is bit-exact ASCII. Silently transcoding (or passing
//! through) non-ASCII bytes would make clients and servers disagree about
//! what was signed, so the writer hard-errors instead.

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Diagnostic, Error)]
#[error("cannot write a non-ASCII byte (character code {code})")]
pub struct NonAsciiByte {
    /// Value of the offending byte
    pub code: u8,
}

/// Append-only string builder which only accepts ASCII bytes
#[derive(Default)]
pub struct Writer {
    output: String,
}

impl Writer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a string, byte by byte
    ///
    /// Returns the number of accepted bytes. Bytes preceding the first
    /// non-ASCII byte stay in the buffer; callers are expected to discard
    /// the writer when this errors.
    pub fn write_str(&mut self, s: &str) -> Result<usize, NonAsciiByte> {
        for byte in s.bytes() {
            if !byte.is_ascii() {
                return Err(NonAsciiByte { code: byte });
            }

            self.output.push(byte as char);
        }

        Ok(s.len())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.output
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.output
    }
}
