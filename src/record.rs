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


//! DKIM public key record.

use crate::tag_list::{self, TagList};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    str::FromStr,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DkimKeyRecordParseError {
    RecordSyntax,
    TagListSyntax,
    UnsupportedVersion,
    UnsupportedKeyType,
    Sha256NotAllowed,
    RevokedKey,
    MissingKeyTag,
    InvalidBase64,
}

impl Display for DkimKeyRecordParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::RecordSyntax => write!(f, "ill-formed key record"),
            Self::TagListSyntax => write!(f, "invalid tag-list"),
            Self::UnsupportedVersion => write!(f, "unsupported version"),
            Self::UnsupportedKeyType => write!(f, "unsupported key type"),
            Self::Sha256NotAllowed => write!(f, "sha256 not allowed"),
            Self::RevokedKey => write!(f, "key revoked"),
            Self::MissingKeyTag => write!(f, "p= tag missing"),
            Self::InvalidBase64 => write!(f, "invalid Base64 string"),
        }
    }
}

impl Error for DkimKeyRecordParseError {}

/// A DKIM public key record, as published in DNS at
/// `<selector>._domainkey.<domain>`.
///
/// Only RSA keys usable with SHA-256 are accepted. Unknown tags are ignored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DkimKeyRecord {
    pub key_data: Box<[u8]>,
    /// The *t=y* flag: the domain is testing DKIM.
    pub testing: bool,
}

impl DkimKeyRecord {
    fn from_tags(tags: &TagList<'_>) -> Result<Self, DkimKeyRecordParseError> {
        use DkimKeyRecordParseError::*;

        // v=, when present, must come first
        match tags.iter().position(|(name, _)| name == "v") {
            None => {}
            Some(0) if tags.get("v") == Some("DKIM1") => {}
            Some(_) => return Err(UnsupportedVersion),
        }

        if let Some(k) = tags.get("k") {
            if !k.eq_ignore_ascii_case("rsa") {
                return Err(UnsupportedKeyType);
            }
        }

        if let Some(h) = tags.get("h") {
            if !tag_list::split_colons(h).any(|alg| alg.eq_ignore_ascii_case("sha256")) {
                return Err(Sha256NotAllowed);
            }
        }

        let key_data = match tags.get("p") {
            None => return Err(MissingKeyTag),
            Some("") => return Err(RevokedKey),
            Some(p) => tag_list::decode_base64_value(p).map_err(|_| InvalidBase64)?,
        };

        let testing = tags
            .get("t")
            .map_or(false, |t| tag_list::split_colons(t).any(|flag| flag.eq_ignore_ascii_case("y")));

        Ok(Self {
            key_data: key_data.into(),
            testing,
        })
    }

    /// Whether the domain is testing DKIM.
    pub fn is_testing(&self) -> bool {
        self.testing
    }
}

impl FromStr for DkimKeyRecord {
    type Err = DkimKeyRecordParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tags = TagList::parse(s).map_err(|_| DkimKeyRecordParseError::TagListSyntax)?;

        Self::from_tags(&tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_record_ok() {
        let record = DkimKeyRecord::from_str("v=DKIM1; h=sha1:sha256; p=YWJj; n = for testing only;").unwrap();

        assert_eq!(record.key_data.as_ref(), b"abc");
        assert!(!record.is_testing());

        let record = DkimKeyRecord::from_str("k=rsa; t=s:y; p=YW\r\n\tJj").unwrap();

        assert_eq!(record.key_data.as_ref(), b"abc");
        assert!(record.is_testing());
    }

    #[test]
    fn key_record_errors() {
        use DkimKeyRecordParseError::*;

        assert_eq!(DkimKeyRecord::from_str("v=DKIM1; k=ed25519; p=YWJj"), Err(UnsupportedKeyType));
        assert_eq!(DkimKeyRecord::from_str("v=DKIM1; k=rsa; p="), Err(RevokedKey));
        assert_eq!(DkimKeyRecord::from_str("v=DKIM1; k=rsa"), Err(MissingKeyTag));
        assert_eq!(DkimKeyRecord::from_str("k=rsa; v=DKIM1; p=YWJj"), Err(UnsupportedVersion));
        assert_eq!(DkimKeyRecord::from_str("v=DKIM2; p=YWJj"), Err(UnsupportedVersion));
        assert_eq!(DkimKeyRecord::from_str("v=DKIM1; h=sha1; p=YWJj"), Err(Sha256NotAllowed));
        assert_eq!(DkimKeyRecord::from_str("v=DKIM1; p=Y*Jj"), Err(InvalidBase64));
        assert_eq!(DkimKeyRecord::from_str("not a record"), Err(TagListSyntax));
    }
}
