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

//! Representation of email header data.

use bstr::ByteSlice;
use std::{
    error::Error,
    fmt::{self, Debug, Display, Formatter},
    hash::{Hash, Hasher},
    str::FromStr,
};

/// An error indicating that a header field or header section is ill-formed.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct HeaderFieldError;

impl Display for HeaderFieldError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "ill-formed header field")
    }
}

impl Error for HeaderFieldError {}

/// A header field, consisting of name and (raw, unfolded) body.
pub type HeaderField = (FieldName, FieldBody);

/// A non-empty, ordered collection of header fields.
///
/// Lookup by name is case-insensitive. The order of the header fields is the
/// order in the message, top to bottom.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HeaderFields(Box<[HeaderField]>);

impl HeaderFields {
    pub fn new(value: impl Into<Box<[HeaderField]>>) -> Result<Self, HeaderFieldError> {
        let value = value.into();
        if value.is_empty() {
            return Err(HeaderFieldError);
        }
        Ok(Self(value))
    }

    pub fn from_vec(value: Vec<(String, Vec<u8>)>) -> Result<Self, HeaderFieldError> {
        let value: Vec<_> = value
            .into_iter()
            .map(|(name, value)| {
                let name = FieldName::new(name)?;
                let body = FieldBody::new(value)?;
                Ok((name, body))
            })
            .collect::<Result<_, _>>()?;
        Self::new(value)
    }

    /// Parses a raw header section.
    ///
    /// Lines may be terminated with CRLF or with a bare LF; the stored field
    /// bodies always use CRLF between folded lines. A final empty line ends
    /// the header section.
    pub fn from_bytes(input: &[u8]) -> Result<Self, HeaderFieldError> {
        let mut fields: Vec<(FieldName, Vec<u8>)> = vec![];

        let input = input.strip_suffix(b"\n").unwrap_or(input);

        let mut ended = false;

        for line in input.split_str("\n") {
            let line = line.strip_suffix(b"\r").unwrap_or(line);

            if ended {
                return Err(HeaderFieldError);
            }
            if line.is_empty() {
                ended = true;
                continue;
            }

            if line.starts_with(b" ") || line.starts_with(b"\t") {
                let (_, body) = fields.last_mut().ok_or(HeaderFieldError)?;
                body.extend(b"\r\n");
                body.extend(line);
            } else {
                let i = line.find_byte(b':').ok_or(HeaderFieldError)?;
                // obsolete syntax allows WSP before the colon
                let name = line[..i].trim_end_with(|c| matches!(c, ' ' | '\t'));
                let name = name.to_str().map_err(|_| HeaderFieldError)?;
                let name = FieldName::new(name)?;
                fields.push((name, line[(i + 1)..].to_vec()));
            }
        }

        let fields: Vec<_> = fields
            .into_iter()
            .map(|(name, body)| Ok((name, FieldBody::new(body)?)))
            .collect::<Result<_, _>>()?;

        Self::new(fields)
    }

    /// Returns the body of the first header field with the given name.
    pub fn get<'a>(&'a self, name: &'a str) -> Option<&'a FieldBody> {
        self.get_all(name).next()
    }

    /// Returns the bodies of all header fields with the given name, in order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl DoubleEndedIterator<Item = &'a FieldBody> + 'a {
        self.0
            .iter()
            .filter(move |(n, _)| *n == name)
            .map(|(_, body)| body)
    }
}

impl AsRef<[HeaderField]> for HeaderFields {
    fn as_ref(&self) -> &[HeaderField] {
        &self.0
    }
}

impl From<HeaderFields> for Vec<HeaderField> {
    fn from(header_fields: HeaderFields) -> Self {
        header_fields.0.into_vec()
    }
}

impl FromStr for HeaderFields {
    type Err = HeaderFieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_bytes(s.as_bytes())
    }
}

/// A header field name.
///
/// Comparison is case-insensitive.
#[derive(Clone, Eq)]
pub struct FieldName(Box<str>);

impl FieldName {
    pub fn new(value: impl Into<Box<str>>) -> Result<Self, HeaderFieldError> {
        let value = value.into();
        if value.is_empty() {
            return Err(HeaderFieldError);
        }
        // ';' is valid in RFC 5322 but cannot appear in a DKIM h= tag
        if !value.chars().all(|c| c.is_ascii_graphic() && c != ':' && c != ';') {
            return Err(HeaderFieldError);
        }
        Ok(Self(value))
    }
}

impl AsRef<str> for FieldName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for FieldName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Debug for FieldName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

impl PartialEq for FieldName {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl PartialEq<&str> for FieldName {
    fn eq(&self, other: &&str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

impl Hash for FieldName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_ascii_lowercase().hash(state);
    }
}

/// A header field body: the raw bytes after the colon, with CRLF only between
/// folded lines.
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct FieldBody(Box<[u8]>);

impl FieldBody {
    pub fn new(value: impl Into<Box<[u8]>>) -> Result<Self, HeaderFieldError> {
        let value = value.into();
        // only folded continuation lines:
        if !(value.split_str("\r\n").skip(1).all(|line| line.starts_with(b" ") || line.starts_with(b"\t"))) {
            return Err(HeaderFieldError);
        }
        // no empty or blank lines past the first one, no trailing CRLF:
        if !(value.split_str("\r\n").skip(1).all(|line| !line.trim_with(|c| matches!(c, ' ' | '\t')).is_empty())) {
            return Err(HeaderFieldError);
        }
        // no stray CR and LF
        if !(value.split_str("\r\n").all(|line| !line.contains(&b'\r') && !line.contains(&b'\n'))) {
            return Err(HeaderFieldError);
        }
        // other bytes are allowed, UTF-8 is not required
        Ok(Self(value))
    }

    /// Returns the body as a string, replacing invalid UTF-8 sequences.
    pub fn to_str_lossy(&self) -> std::borrow::Cow<'_, str> {
        self.0.to_str_lossy()
    }
}

impl AsRef<[u8]> for FieldBody {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Debug for FieldBody {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FieldBody")
            .field(&self.0.as_bstr())
            .finish()
    }
}
