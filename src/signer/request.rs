// mtadkim – DKIM signing and verification for mail transfer agents
// Copyright © 2022–2023 David Bürgin <dbuergin@gluet.ch>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later
// version.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.

use crate::header::FieldName;
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
};
use tracing::debug;

/// The per-message signing identity: domain, selector, private key and the
/// names of the headers to sign.
#[derive(Clone, Default, Eq, PartialEq)]
pub struct SigningProperties {
    /// The signing domain for the *d=* tag.
    pub domain: String,
    /// The selector for the *s=* tag.
    pub selector: String,
    /// The private key as PEM text.
    pub private_key: String,
    /// Lower-cased, deduplicated names of the headers to sign; always contains
    /// `from`.
    pub headers: Vec<FieldName>,
}

impl SigningProperties {
    pub fn new(
        domain: impl Into<String>,
        selector: impl Into<String>,
        private_key: impl Into<String>,
        configured_headers: &str,
    ) -> Self {
        Self {
            domain: domain.into(),
            selector: selector.into(),
            private_key: private_key.into(),
            headers: headers_to_sign(configured_headers),
        }
    }

    /// Checks that private key, selector and domain are all present, naming
    /// the first missing one otherwise.
    pub fn check_key_data(&self) -> Result<(), MissingKeyData> {
        if self.private_key.is_empty() {
            return Err(MissingKeyData::PrivateKey);
        }
        if self.selector.is_empty() {
            return Err(MissingKeyData::Selector);
        }
        if self.domain.is_empty() {
            return Err(MissingKeyData::Domain);
        }
        Ok(())
    }

    /// Whether these properties are complete enough for signing.
    pub fn has_key_data(&self) -> bool {
        match self.check_key_data() {
            Ok(()) => true,
            Err(e) => {
                debug!(domain = %self.domain, "skip signing: {e}");
                false
            }
        }
    }
}

// The private key never appears in debug output.
impl fmt::Debug for SigningProperties {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningProperties")
            .field("domain", &self.domain)
            .field("selector", &self.selector)
            .field("private_key", &if self.private_key.is_empty() { "<empty>" } else { "<redacted>" })
            .field("headers", &self.headers)
            .finish()
    }
}

/// The key data field that is missing from some [`SigningProperties`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum MissingKeyData {
    PrivateKey,
    Selector,
    Domain,
}

impl Display for MissingKeyData {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::PrivateKey => write!(f, "missing private key"),
            Self::Selector => write!(f, "missing selector"),
            Self::Domain => write!(f, "missing domain"),
        }
    }
}

impl Error for MissingKeyData {}

/// Turns a configured header list into the list of header names to sign.
///
/// Names are separated by commas or whitespace, lower-cased and deduplicated
/// preserving order; `from` is appended when absent. Names that cannot be
/// signed are dropped.
pub fn headers_to_sign(configured: &str) -> Vec<FieldName> {
    let mut result: Vec<FieldName> = vec![];

    let names = configured
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty());

    for name in names {
        match FieldName::new(name.to_ascii_lowercase()) {
            Ok(name) => {
                if !result.contains(&name) {
                    result.push(name);
                }
            }
            Err(_) => {
                debug!(name, "ignoring invalid header name in signed headers");
            }
        }
    }

    if !result.iter().any(|name| *name == "from") {
        result.extend(FieldName::new("from"));
    }

    result
}
