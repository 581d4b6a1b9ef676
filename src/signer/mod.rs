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

//! Signer and supporting types.

mod format;
mod request;

pub use crate::signer::{
    format::LINE_WIDTH,
    request::{headers_to_sign, MissingKeyData, SigningProperties},
};

use crate::{
    body_hash::StreamingBodyHasher,
    canonicalize,
    crypto::{self, SigningError, SigningKey, SigningKeyError},
    header::{FieldName, HeaderFields},
    signature::{
        Canonicalization, DkimSignature, DomainName, Identity, Selector, SignatureAlgorithm,
        DKIM_SIGNATURE_NAME,
    },
};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    mem,
    time::{Duration, SystemTime},
};
use tracing::{debug, trace, Span};

/// An error that occurs when using a [`Signer`].
#[derive(Debug, PartialEq, Eq)]
pub enum SignerError {
    /// Private key, selector or domain is missing.
    MissingKeyData(MissingKeyData),
    InvalidDomain,
    InvalidSelector,
    /// The *i=* identity is not in the signing domain.
    DomainMismatch,
    /// The message has no From header.
    MissingFromHeader,
    /// The private key cannot be read.
    InvalidKey(SigningKeyError),
    SigningFailure(SigningError),
}

impl Display for SignerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingKeyData(e) => e.fmt(f),
            Self::InvalidDomain => write!(f, "invalid signing domain"),
            Self::InvalidSelector => write!(f, "invalid selector"),
            Self::DomainMismatch => write!(f, "identity not in signing domain"),
            Self::MissingFromHeader => write!(f, "no From header"),
            Self::InvalidKey(e) => write!(f, "invalid private key: {e}"),
            Self::SigningFailure(e) => e.fmt(f),
        }
    }
}

impl Error for SignerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::MissingKeyData(e) => Some(e),
            Self::InvalidKey(e) => Some(e),
            Self::SigningFailure(e) => Some(e),
            _ => None,
        }
    }
}

/// A generator for the timestamp tag.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum Timestamp {
    /// Record the signing time.
    #[default]
    Now,
    Exact(u64),
}

/// A produced signature.
#[derive(Debug, PartialEq)]
pub struct SigningOutput {
    pub signature: DkimSignature,
    /// The header name, `DKIM-Signature`.
    pub header_name: String,
    /// The formatted header value, folded with CRLF and tab; begins with a
    /// space.
    pub header_value: String,
}

impl SigningOutput {
    /// Formats the complete header field, without final CRLF.
    ///
    /// Name and value are joined with only a colon: any other whitespace
    /// would break *simple* header canonicalization.
    pub fn format_header(&self) -> String {
        format!("{}:{}", self.header_name, self.header_value)
    }
}

/// A signer for an email message.
///
/// The signer is fed the body in chunks and produces the DKIM-Signature header
/// in [`Signer::finish`]. Dropping it discards all state.
///
/// # Examples
///
/// ```
/// use mtadkim::{header::HeaderFields, signer::{Signer, SigningProperties}};
///
/// let headers: HeaderFields = "From: me@example.com\r\nSubject: hi\r\n".parse().unwrap();
/// let props = SigningProperties::new("example.com", "mail", "", "from, subject");
///
/// let mut signer = Signer::new(props, headers);
/// signer.body_chunk(b"Hello!\r\n");
///
/// // without a private key no signature is made
/// assert!(signer.finish().is_err());
/// ```
pub struct Signer {
    properties: SigningProperties,
    headers: HeaderFields,
    canonicalization: Canonicalization,
    user_id: Option<Identity>,
    timestamp: Option<Timestamp>,
    valid_duration: Option<Duration>,
    body_hasher: StreamingBodyHasher,
    span: Span,
}

impl Signer {
    /// Prepares signing of a message with the given headers. The
    /// canonicalization is *relaxed/simple*, and *t=* records the signing
    /// time.
    pub fn new(properties: SigningProperties, headers: HeaderFields) -> Self {
        let canonicalization = Canonicalization::relaxed_simple();

        Self {
            properties,
            headers,
            canonicalization,
            user_id: None,
            timestamp: Some(Timestamp::Now),
            valid_duration: None,
            body_hasher: StreamingBodyHasher::new(canonicalization.body),
            span: Span::none(),
        }
    }

    /// Sets the canonicalization for the *c=* tag.
    pub fn with_canonicalization(mut self, canonicalization: Canonicalization) -> Self {
        self.canonicalization = canonicalization;
        self.body_hasher = StreamingBodyHasher::new(canonicalization.body);
        self
    }

    /// Sets the agent or user identifier for the *i=* tag.
    pub fn with_user_id(mut self, user_id: Identity) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Sets the timestamp for the *t=* tag, or omits the tag.
    pub fn with_timestamp(mut self, timestamp: Option<Timestamp>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Sets the validity duration for the *x=* tag.
    pub fn with_valid_duration(mut self, duration: Duration) -> Self {
        self.valid_duration = Some(duration);
        self
    }

    /// Runs all work of this signer in the given span.
    pub fn instrument(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn properties(&self) -> &SigningProperties {
        &self.properties
    }

    /// Processes a chunk of the message body.
    ///
    /// Note that the chunk is canonicalised and hashed, but not otherwise
    /// retained in memory.
    pub fn body_chunk(&mut self, chunk: &[u8]) {
        let _enter = self.span.enter();
        self.body_hasher.update(chunk);
    }

    /// Finishes the body and produces the signature.
    pub fn finish(mut self) -> Result<SigningOutput, SignerError> {
        let _enter = self.span.enter();

        let body_hasher = mem::replace(&mut self.body_hasher, StreamingBodyHasher::new(self.canonicalization.body));
        let (body_hash, body_len) = body_hasher.finish_digest();

        debug!(domain = %self.properties.domain, body_len, "body hashed, signing");

        let result = self.sign(body_hash);

        match &result {
            Ok(output) => {
                debug!(
                    domain = %output.signature.domain,
                    selector = %output.signature.selector,
                    "message signed"
                );
            }
            Err(e) => {
                debug!(domain = %self.properties.domain, "signing failed: {e}");
            }
        }

        result
    }

    fn sign(&self, body_hash: Box<[u8]>) -> Result<SigningOutput, SignerError> {
        let props = &self.properties;

        props.check_key_data().map_err(SignerError::MissingKeyData)?;

        let domain = DomainName::new(&props.domain).map_err(|_| SignerError::InvalidDomain)?;
        let selector = Selector::new(&props.selector).map_err(|_| SignerError::InvalidSelector)?;

        if let Some(user_id) = &self.user_id {
            if !user_id.domain_part.eq_or_subdomain_of(&domain) {
                return Err(SignerError::DomainMismatch);
            }
        }

        let signing_key = SigningKey::from_pem(&props.private_key).map_err(|e| {
            debug!(%domain, "cannot read private key: {e}");
            SignerError::InvalidKey(e)
        })?;

        let signed_headers = select_signed_headers(&self.headers, &props.headers);
        if !signed_headers.iter().any(|name| *name == "from") {
            return Err(SignerError::MissingFromHeader);
        }

        let timestamp = self.timestamp.map(|t| match t {
            Timestamp::Now => now_unix_secs(),
            Timestamp::Exact(t) => t,
        });
        let expiration = self
            .valid_duration
            .map(|d| timestamp.unwrap_or_else(now_unix_secs).saturating_add(d.as_secs()));

        let mut signature = DkimSignature {
            algorithm: SignatureAlgorithm::RsaSha256,
            signature_data: Box::default(),
            body_hash,
            canonicalization: self.canonicalization,
            domain,
            selector,
            signed_headers: signed_headers.into(),
            user_id: self.user_id.clone(),
            timestamp,
            expiration,
        };

        let mut folder = format::format_unsigned(&signature, DKIM_SIGNATURE_NAME);

        let input = canonicalize::header_signing_input(
            signature.canonicalization.header,
            &self.headers,
            &signature.signed_headers,
            DKIM_SIGNATURE_NAME,
            folder.as_str(),
        );
        let digest = crypto::sha256([input]);

        let signature_data = signing_key.sign(&digest).map_err(|e| {
            trace!("RSA signing failed: {e}");
            SignerError::SigningFailure(e)
        })?;

        folder.base64(&signature_data);
        signature.signature_data = signature_data.into();

        Ok(SigningOutput {
            signature,
            header_name: DKIM_SIGNATURE_NAME.into(),
            header_value: folder.into_string(),
        })
    }
}

/// Selects the configured header names that occur in the message, in the
/// configured order.
pub fn select_signed_headers(headers: &HeaderFields, names: &[FieldName]) -> Vec<FieldName> {
    names
        .iter()
        .filter(|name| headers.get(name.as_ref()).is_some())
        .cloned()
        .collect()
}

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |t| t.as_secs())
}
