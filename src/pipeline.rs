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

//! The DKIM stage of a mail transfer pipeline.
//!
//! [`DkimPipeline`] ties together sender domain determination, key resolution
//! and the signer for outbound messages, and hands out verifiers for inbound
//! messages. The owning server passes each message's envelope and headers in
//! and gets back either a ready [`Signer`] or the reason signing was skipped.

use crate::{
    config::{ConfigError, DkimConfig},
    header::HeaderFields,
    keys::{FsKeyStore, KeyNote, KeyResolver, KeyStore},
    sender::{self, Envelope},
    signature::{DkimSignature, DomainName, DKIM_SIGNATURE_NAME},
    signer::{MissingKeyData, Signer},
    verifier::Verifier,
};
use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};
use tracing::{debug, info, Instrument, Span};

/// The reason an outbound message is not signed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SignSkipped {
    /// Signing is disabled in the configuration.
    Disabled,
    /// The envelope marks the message as signed, or it already carries a
    /// DKIM-Signature for the signing domain.
    AlreadySigned,
    /// No complete signing identity was found for the sender domain.
    MissingKeyData {
        domain: Option<String>,
        missing: MissingKeyData,
        notes: Vec<KeyNote>,
    },
}

impl Display for SignSkipped {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "signing disabled"),
            Self::AlreadySigned => write!(f, "message already signed"),
            Self::MissingKeyData { domain: Some(domain), missing, .. } => {
                write!(f, "{missing} for {domain}")
            }
            Self::MissingKeyData { domain: None, missing, .. } => missing.fmt(f),
        }
    }
}

/// The DKIM stage, holding configuration and the default signing identity.
pub struct DkimPipeline<S = FsKeyStore> {
    config: DkimConfig,
    keys: KeyResolver<S>,
}

impl DkimPipeline<FsKeyStore> {
    /// Creates the stage with keys on the file system.
    pub async fn load(config: DkimConfig) -> Result<Self, ConfigError> {
        Self::with_key_store(config, FsKeyStore).await
    }
}

impl<S: KeyStore> DkimPipeline<S> {
    /// Creates the stage with the given key store. The default private key is
    /// read once here.
    pub async fn with_key_store(config: DkimConfig, store: S) -> Result<Self, ConfigError> {
        let keys = KeyResolver::load(store, &config.sign).await?;
        Ok(Self { config, keys })
    }

    pub fn config(&self) -> &DkimConfig {
        &self.config
    }

    pub fn key_resolver(&self) -> &KeyResolver<S> {
        &self.keys
    }

    /// Prepares signing of an outbound message.
    ///
    /// The sender domain is determined from envelope and headers, then the
    /// signing identity for it is resolved. The returned signer runs in the
    /// given span and still needs the message body.
    pub async fn prepare_signer(
        &self,
        envelope: &Envelope,
        headers: HeaderFields,
        span: Span,
    ) -> Result<Signer, SignSkipped> {
        let signer = self
            .resolve_signer(envelope, headers)
            .instrument(span.clone())
            .await?;

        Ok(signer.instrument(span))
    }

    async fn resolve_signer(&self, envelope: &Envelope, headers: HeaderFields) -> Result<Signer, SignSkipped> {
        if !self.config.sign.enabled {
            debug!("signing disabled");
            return Err(SignSkipped::Disabled);
        }

        if envelope.already_signed {
            debug!("message already signed");
            return Err(SignSkipped::AlreadySigned);
        }

        let domain = sender::get_sender_domain(envelope, &headers);

        debug!(?domain, "sender domain");

        let resolution = self.keys.get_sign_properties(domain.as_deref()).await;

        if is_signed_by(&headers, &resolution.properties.domain) {
            debug!(domain = %resolution.properties.domain, "message already signed for domain");
            return Err(SignSkipped::AlreadySigned);
        }

        if let Err(missing) = resolution.properties.check_key_data() {
            info!(?domain, "skip signing: {missing}");
            return Err(SignSkipped::MissingKeyData {
                domain,
                missing,
                notes: resolution.notes,
            });
        }

        Ok(Signer::new(resolution.properties, headers)
            .with_canonicalization(self.config.sign.canonicalization))
    }

    /// Returns a verifier for one inbound message.
    pub fn verifier(&self, span: Span) -> Verifier {
        Verifier::new(self.config.verify.clone()).instrument(span)
    }
}

// Whether some DKIM-Signature, even a malformed one, names `domain` in d=.
fn is_signed_by(headers: &HeaderFields, domain: &str) -> bool {
    let Ok(domain) = DomainName::new(domain) else {
        return false;
    };

    headers.get_all(DKIM_SIGNATURE_NAME).any(|value| {
        let d = match DkimSignature::from_str(&value.to_str_lossy()) {
            Ok(sig) => Some(sig.domain),
            Err(e) => e.domain,
        };
        d.as_ref() == Some(&domain)
    })
}
