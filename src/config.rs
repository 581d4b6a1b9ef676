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

//! Typed configuration for signing and verification.

use crate::{
    crypto::SigningKeyError,
    header::FieldName,
    signature::Canonicalization,
    signer, verifier,
};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    io,
    path::PathBuf,
};

/// The default list of headers to sign.
pub const DEFAULT_SIGNED_HEADERS: &str =
    "From, Sender, Reply-To, Subject, Date, Message-ID, To, Cc, MIME-Version";

/// Configuration of the complete DKIM stage.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DkimConfig {
    pub sign: SignConfig,
    pub verify: verifier::Config,
}

/// Signing configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SignConfig {
    /// Whether outbound messages are signed at all.
    pub enabled: bool,
    /// The selector of the default identity.
    pub selector: String,
    /// The domain of the default identity.
    pub domain: String,
    /// Names of the headers to sign, separated by commas or whitespace.
    pub headers: String,
    /// The directory holding one key directory per signing domain.
    pub key_dir: PathBuf,
    /// The PEM file of the default identity's private key.
    pub default_key_path: Option<PathBuf>,
    pub canonicalization: Canonicalization,
}

impl SignConfig {
    /// Returns the lower-cased, deduplicated header names to sign; `from` is
    /// always included.
    pub fn headers_to_sign(&self) -> Vec<FieldName> {
        signer::headers_to_sign(&self.headers)
    }
}

impl Default for SignConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            selector: "mail".into(),
            domain: "example.com".into(),
            headers: DEFAULT_SIGNED_HEADERS.into(),
            key_dir: PathBuf::from("config/dkim"),
            default_key_path: Some(PathBuf::from("config/dkim/private/key")),
            canonicalization: Canonicalization::relaxed_simple(),
        }
    }
}

/// An error that occurs when loading the configured key material.
#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// The default private key file could not be read.
    DefaultKeyUnreadable { path: PathBuf, kind: io::ErrorKind },
    /// The default private key is not a usable RSA key.
    InvalidDefaultKey(SigningKeyError),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::DefaultKeyUnreadable { path, kind } => {
                write!(f, "cannot read default private key {}: {kind}", path.display())
            }
            Self::InvalidDefaultKey(e) => write!(f, "invalid default private key: {e}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::DefaultKeyUnreadable { .. } => None,
            Self::InvalidDefaultKey(e) => Some(e),
        }
    }
}
