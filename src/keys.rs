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

//! Resolution of the per-domain signing identity.
//!
//! Keys are kept in one directory per signing domain below a root key
//! directory, each containing a `private` file with the PEM private key and a
//! `selector` file with the selector:
//!
//! ```text
//! config/dkim/
//! ├── example.com/
//! │   ├── private
//! │   └── selector
//! └── mail.example.org/
//!     ├── private
//!     └── selector
//! ```
//!
//! A message from `a.mail.example.org` is signed with the key of the nearest
//! enclosing domain that has a directory, here `mail.example.org`.

use crate::{
    config::{ConfigError, SignConfig},
    crypto::SigningKey,
    header::FieldName,
    signer::SigningProperties,
};
use std::{
    fmt::{self, Display, Formatter},
    future::Future,
    io,
    path::{Path, PathBuf},
    pin::Pin,
};
use tracing::{debug, info, trace, warn};

/// Access to the key directories.
pub trait KeyStore: Send + Sync {
    /// The future resolving to whether a directory exists.
    type DirExists<'a>: Future<Output = bool> + Send + 'a
    where
        Self: 'a;
    /// The future resolving to the contents of a file.
    type ReadFile<'a>: Future<Output = io::Result<String>> + Send + 'a
    where
        Self: 'a;

    fn dir_exists<'a>(&'a self, path: &'a Path) -> Self::DirExists<'a>;

    fn read_to_string<'a>(&'a self, path: &'a Path) -> Self::ReadFile<'a>;
}

/// A key store on the file system.
#[derive(Clone, Copy, Debug, Default)]
pub struct FsKeyStore;

impl KeyStore for FsKeyStore {
    type DirExists<'a> = Pin<Box<dyn Future<Output = bool> + Send + 'a>>;
    type ReadFile<'a> = Pin<Box<dyn Future<Output = io::Result<String>> + Send + 'a>>;

    fn dir_exists<'a>(&'a self, path: &'a Path) -> Self::DirExists<'a> {
        Box::pin(async move {
            tokio::fs::metadata(path)
                .await
                .map_or(false, |m| m.is_dir())
        })
    }

    fn read_to_string<'a>(&'a self, path: &'a Path) -> Self::ReadFile<'a> {
        Box::pin(tokio::fs::read_to_string(path))
    }
}

/// A non-fatal finding recorded while resolving a signing identity.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum KeyNote {
    /// The key directory has no readable `private` file.
    MissingPrivateKey(PathBuf),
    /// The key directory has no readable, non-empty `selector` file.
    MissingSelector(PathBuf),
}

impl Display for KeyNote {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingPrivateKey(dir) => write!(f, "no private key in {}", dir.display()),
            Self::MissingSelector(dir) => write!(f, "no selector in {}", dir.display()),
        }
    }
}

/// The signing identity found for a domain.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct KeyResolution {
    /// The signing properties; empty when no identity applies.
    pub properties: SigningProperties,
    /// The key directory used, if any.
    pub key_dir: Option<PathBuf>,
    pub notes: Vec<KeyNote>,
}

/// Returns the domains to check for a key directory, most specific first.
///
/// `a.b.com` gives `a.b.com`, `b.com`, `com`.
pub fn key_dir_candidates(domain: &str) -> Vec<String> {
    let domain = domain.trim().trim_end_matches('.').to_lowercase();

    if domain.is_empty() {
        return vec![];
    }

    let labels: Vec<_> = domain.split('.').collect();

    if labels.iter().any(|l| l.is_empty() || l.contains(|c: char| c == '/' || c == '\\')) {
        trace!(domain, "not usable as key directory name");
        return vec![];
    }

    (0..labels.len()).map(|i| labels[i..].join(".")).collect()
}

/// A resolver of signing identities.
///
/// The default identity is read once on construction and reused for all
/// messages; per-domain keys are read afresh for every message.
pub struct KeyResolver<S = FsKeyStore> {
    store: S,
    key_dir: PathBuf,
    headers: Vec<FieldName>,
    default_properties: SigningProperties,
}

impl<S: KeyStore> KeyResolver<S> {
    /// Creates a resolver, loading the default private key when signing is
    /// enabled.
    pub async fn load(store: S, config: &SignConfig) -> Result<Self, ConfigError> {
        let headers = config.headers_to_sign();

        let private_key = match &config.default_key_path {
            Some(path) if config.enabled => {
                let pem = store.read_to_string(path).await.map_err(|e| {
                    warn!(path = %path.display(), "cannot read default private key: {e}");
                    ConfigError::DefaultKeyUnreadable {
                        path: path.clone(),
                        kind: e.kind(),
                    }
                })?;
                let pem = pem.trim().to_owned();

                SigningKey::from_pem(&pem).map_err(ConfigError::InvalidDefaultKey)?;

                pem
            }
            _ => String::new(),
        };

        let default_properties = SigningProperties {
            domain: config.domain.trim().to_lowercase(),
            selector: config.selector.trim().to_owned(),
            private_key,
            headers: headers.clone(),
        };

        Ok(Self::new(store, config.key_dir.clone(), headers, default_properties))
    }

    /// Creates a resolver from its parts.
    pub fn new(
        store: S,
        key_dir: impl Into<PathBuf>,
        headers: Vec<FieldName>,
        default_properties: SigningProperties,
    ) -> Self {
        Self {
            store,
            key_dir: key_dir.into(),
            headers,
            default_properties,
        }
    }

    pub fn default_properties(&self) -> &SigningProperties {
        &self.default_properties
    }

    /// Finds the key directory for a domain: the first existing directory
    /// among the candidates, most specific first.
    pub async fn get_key_dir(&self, domain: &str) -> Option<PathBuf> {
        for candidate in key_dir_candidates(domain) {
            let dir = self.key_dir.join(&candidate);

            if self.store.dir_exists(&dir).await {
                trace!(dir = %dir.display(), "found key directory");
                return Some(dir);
            }
        }

        trace!(domain, "no key directory");

        None
    }

    /// Resolves the signing properties for a sender domain.
    ///
    /// Without a matching key directory the default identity applies if it is
    /// complete; otherwise the result has empty properties, and signing is
    /// skipped.
    pub async fn get_sign_properties(&self, domain: Option<&str>) -> KeyResolution {
        let key_dir = match domain {
            Some(domain) => self.get_key_dir(domain).await,
            None => None,
        };

        let Some(key_dir) = key_dir else {
            return self.default_resolution();
        };

        let mut notes = vec![];

        let private_key = match self.read_key_file(&key_dir, "private").await {
            Some(s) => s,
            None => {
                notes.push(KeyNote::MissingPrivateKey(key_dir.clone()));
                String::new()
            }
        };
        let selector = match self.read_key_file(&key_dir, "selector").await {
            Some(s) => s,
            None => {
                notes.push(KeyNote::MissingSelector(key_dir.clone()));
                String::new()
            }
        };

        for note in &notes {
            info!("key validation: {note}");
        }

        let properties = if notes.is_empty() {
            let domain = key_dir
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();

            debug!(domain, selector, "using per-domain signing key");

            SigningProperties {
                domain,
                selector,
                private_key,
                headers: self.headers.clone(),
            }
        } else {
            SigningProperties::default()
        };

        KeyResolution {
            properties,
            key_dir: Some(key_dir),
            notes,
        }
    }

    fn default_resolution(&self) -> KeyResolution {
        let properties = if self.default_properties.check_key_data().is_ok() {
            debug!(domain = %self.default_properties.domain, "using default signing key");
            self.default_properties.clone()
        } else {
            trace!("default signing identity incomplete");
            SigningProperties::default()
        };

        KeyResolution {
            properties,
            key_dir: None,
            notes: vec![],
        }
    }

    async fn read_key_file(&self, dir: &Path, name: &str) -> Option<String> {
        let path = dir.join(name);

        match self.store.read_to_string(&path).await {
            Ok(s) => {
                let s = s.trim();
                (!s.is_empty()).then(|| s.to_owned())
            }
            Err(e) => {
                trace!(path = %path.display(), "cannot read key file: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_dir_candidates_most_specific_first() {
        assert_eq!(key_dir_candidates("a.b.com"), ["a.b.com", "b.com", "com"]);
        assert_eq!(key_dir_candidates("Example.COM."), ["example.com", "com"]);
        assert_eq!(key_dir_candidates("localhost"), ["localhost"]);
    }

    #[test]
    fn key_dir_candidates_unusable() {
        assert!(key_dir_candidates("").is_empty());
        assert!(key_dir_candidates("a..com").is_empty());
        assert!(key_dir_candidates("../etc").is_empty());
    }
}
