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


//! The DKIM-Signature header field.

mod names;

pub use names::{DomainName, Identity, ParseNameError, Selector};

use crate::{
    header::FieldName,
    tag_list::{self, TagList},
    util::CanonicalStr,
};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    str::FromStr,
};

pub const DKIM_SIGNATURE_NAME: &str = "DKIM-Signature";

/// The signature algorithm; only *rsa-sha256* is supported.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SignatureAlgorithm {
    RsaSha256,
}

impl CanonicalStr for SignatureAlgorithm {
    fn canonical_str(&self) -> &'static str {
        match self {
            Self::RsaSha256 => "rsa-sha256",
        }
    }
}

impl Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_str())
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = DkimSignatureErrorKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("rsa-sha256") {
            Ok(Self::RsaSha256)
        } else {
            Err(DkimSignatureErrorKind::UnsupportedAlgorithm)
        }
    }
}

/// A header or body canonicalization algorithm.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum CanonicalizationAlgorithm {
    #[default]
    Simple,
    Relaxed,
}

impl CanonicalStr for CanonicalizationAlgorithm {
    fn canonical_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Relaxed => "relaxed",
        }
    }
}

impl FromStr for CanonicalizationAlgorithm {
    type Err = DkimSignatureErrorKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Self::Simple, Self::Relaxed]
            .into_iter()
            .find(|alg| s.eq_ignore_ascii_case(alg.canonical_str()))
            .ok_or(DkimSignatureErrorKind::UnsupportedCanonicalization)
    }
}

/// The *c=* tag: header and body canonicalization.
///
/// A single algorithm name applies to the header, the body then uses
/// *simple*; an absent tag means *simple/simple*.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct Canonicalization {
    pub header: CanonicalizationAlgorithm,
    pub body: CanonicalizationAlgorithm,
}

impl Canonicalization {
    /// *relaxed/simple*, the default for signing.
    pub fn relaxed_simple() -> Self {
        Self {
            header: CanonicalizationAlgorithm::Relaxed,
            body: CanonicalizationAlgorithm::Simple,
        }
    }
}

impl Display for Canonicalization {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.header.canonical_str(), self.body.canonical_str())
    }
}

impl FromStr for Canonicalization {
    type Err = DkimSignatureErrorKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (header, body) = s.split_once('/').unwrap_or((s, "simple"));

        Ok(Self {
            header: header.parse()?,
            body: body.parse()?,
        })
    }
}

/// The reason a DKIM-Signature header field is malformed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DkimSignatureErrorKind {
    InvalidTagList,
    MissingTag(&'static str),
    Utf8Encoding,
    UnsupportedVersion,
    UnsupportedAlgorithm,
    UnsupportedCanonicalization,
    UnsupportedQueryMethod,
    InvalidBase64,
    InvalidDomain,
    InvalidSelector,
    InvalidSignedHeaders,
    FromHeaderNotSigned,
    InvalidUserId,
    DomainMismatch,
    InvalidTimestamp,
    ExpirationNotAfterTimestamp,
}

impl Display for DkimSignatureErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTagList => write!(f, "invalid tag-list"),
            Self::MissingTag(name) => write!(f, "{name}= tag missing"),
            Self::Utf8Encoding => write!(f, "invalid UTF-8 in header value"),
            Self::UnsupportedVersion => write!(f, "unsupported version"),
            Self::UnsupportedAlgorithm => write!(f, "unsupported algorithm"),
            Self::UnsupportedCanonicalization => write!(f, "unsupported canonicalization"),
            Self::UnsupportedQueryMethod => write!(f, "query method not supported"),
            Self::InvalidBase64 => write!(f, "invalid Base64 value"),
            Self::InvalidDomain => write!(f, "invalid domain"),
            Self::InvalidSelector => write!(f, "invalid selector"),
            Self::InvalidSignedHeaders => write!(f, "invalid signed headers"),
            Self::FromHeaderNotSigned => write!(f, "From header not signed"),
            Self::InvalidUserId => write!(f, "invalid user ID"),
            Self::DomainMismatch => write!(f, "i= not within d="),
            Self::InvalidTimestamp => write!(f, "invalid timestamp"),
            Self::ExpirationNotAfterTimestamp => write!(f, "expiration not after timestamp"),
        }
    }
}

/// A malformed DKIM-Signature header field, with the domain and selector when
/// those could still be read.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DkimSignatureError {
    pub domain: Option<DomainName>,
    pub selector: Option<Selector>,
    pub kind: DkimSignatureErrorKind,
}

impl DkimSignatureError {
    pub fn new(kind: DkimSignatureErrorKind) -> Self {
        Self { domain: None, selector: None, kind }
    }
}

impl Display for DkimSignatureError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "malformed signature: {}", self.kind)
    }
}

impl Error for DkimSignatureError {}

/// A parsed DKIM signature.
///
/// The *l=* body length tag is not used: the body hash always covers the
/// whole body.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DkimSignature {
    pub algorithm: SignatureAlgorithm,
    pub signature_data: Box<[u8]>,
    pub body_hash: Box<[u8]>,
    pub canonicalization: Canonicalization,
    pub domain: DomainName,
    pub selector: Selector,
    /// Names from *h=*; never empty, always includes *From*.
    pub signed_headers: Box<[FieldName]>,
    pub user_id: Option<Identity>,
    pub timestamp: Option<u64>,
    pub expiration: Option<u64>,
}

impl DkimSignature {
    fn from_tags(tags: &TagList<'_>) -> Result<Self, DkimSignatureErrorKind> {
        use DkimSignatureErrorKind::*;

        let required = |name: &'static str| tags.get(name).ok_or(MissingTag(name));
        let base64 = |name: &'static str| -> Result<Box<[u8]>, DkimSignatureErrorKind> {
            let value = required(name)?;
            tag_list::decode_base64_value(value).map(Into::into).map_err(|_| InvalidBase64)
        };
        let number = |name: &str| {
            tags.get(name)
                .map(|v| v.parse::<u64>().map_err(|_| InvalidTimestamp))
                .transpose()
        };

        if required("v")? != "1" {
            return Err(UnsupportedVersion);
        }

        let algorithm = required("a")?.parse()?;
        let signature_data = base64("b")?;
        let body_hash = base64("bh")?;
        let domain = DomainName::new(required("d")?).map_err(|_| InvalidDomain)?;
        let selector = Selector::new(required("s")?).map_err(|_| InvalidSelector)?;

        let signed_headers = tag_list::split_colons(required("h")?)
            .map(FieldName::new)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| InvalidSignedHeaders)?;
        if !signed_headers.iter().any(|name| *name == "from") {
            return Err(FromHeaderNotSigned);
        }

        let canonicalization = match tags.get("c") {
            Some(c) => c.parse()?,
            None => Canonicalization::default(),
        };

        if let Some(q) = tags.get("q") {
            if !tag_list::split_colons(q).any(|m| m.eq_ignore_ascii_case("dns/txt")) {
                return Err(UnsupportedQueryMethod);
            }
        }

        let user_id = match tags.get("i") {
            Some(i) => {
                let id = Identity::new(i).map_err(|_| InvalidUserId)?;
                if !id.domain_part.eq_or_subdomain_of(&domain) {
                    return Err(DomainMismatch);
                }
                Some(id)
            }
            None => None,
        };

        let timestamp = number("t")?;
        let expiration = number("x")?;
        if matches!((timestamp, expiration), (Some(t), Some(x)) if x <= t) {
            return Err(ExpirationNotAfterTimestamp);
        }

        Ok(Self {
            algorithm,
            signature_data,
            body_hash,
            canonicalization,
            domain,
            selector,
            signed_headers: signed_headers.into(),
            user_id,
            timestamp,
            expiration,
        })
    }

    /// The *i=* identity, or `@` and the signing domain when absent.
    pub fn identity(&self) -> String {
        match &self.user_id {
            Some(id) => id.to_string(),
            None => format!("@{}", self.domain),
        }
    }
}

impl FromStr for DkimSignature {
    type Err = DkimSignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tags = TagList::parse(s)
            .map_err(|_| DkimSignatureError::new(DkimSignatureErrorKind::InvalidTagList))?;

        Self::from_tags(&tags).map_err(|kind| DkimSignatureError {
            domain: tags.get("d").and_then(|d| DomainName::new(d).ok()),
            selector: tags.get("s").and_then(|s| Selector::new(s).ok()),
            kind,
        })
    }
}
