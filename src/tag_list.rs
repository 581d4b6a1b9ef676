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


//! The tag=value list syntax of DKIM-Signature header fields and key records.

use crate::util::{self, Base64Error};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TagListError {
    Syntax,
    DuplicateTag,
}

impl Display for TagListError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syntax => write!(f, "ill-formed tag-list"),
            Self::DuplicateTag => write!(f, "duplicate tag"),
        }
    }
}

impl Error for TagListError {}

/// A non-empty list of tags with unique names, in input order.
#[derive(Debug, Eq, PartialEq)]
pub struct TagList<'a>(Vec<(&'a str, &'a str)>);

impl<'a> TagList<'a> {
    /// Parses a tag-list. Names and values are returned without surrounding
    /// whitespace; a single trailing `;` is accepted.
    pub fn parse(input: &'a str) -> Result<Self, TagListError> {
        let mut tags: Vec<(&str, &str)> = vec![];
        let mut specs = input.split(';').peekable();

        while let Some(spec) = specs.next() {
            if specs.peek().is_none() && !tags.is_empty() && trim_fws(spec).is_empty() {
                break;
            }

            let (name, value) = spec.split_once('=').ok_or(TagListError::Syntax)?;
            let (name, value) = (trim_fws(name), trim_fws(value));

            if !is_tag_name(name) || !value.chars().all(|c| is_tval_char(c) || is_fws_char(c)) {
                return Err(TagListError::Syntax);
            }
            if tags.iter().any(|&(n, _)| n == name) {
                return Err(TagListError::DuplicateTag);
            }

            tags.push((name, value));
        }

        Ok(Self(tags))
    }

    /// Returns the value of the named tag.
    pub fn get(&self, name: &str) -> Option<&'a str> {
        self.0.iter().find(|&&(n, _)| n == name).map(|&(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'a str, &'a str)> + '_ {
        self.0.iter().copied()
    }
}

fn is_fws_char(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n')
}

fn trim_fws(s: &str) -> &str {
    s.trim_matches(is_fws_char)
}

fn is_tag_name(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Printable ASCII except `;`, or any non-ASCII character.
pub fn is_tval_char(c: char) -> bool {
    matches!(c, '!'..=':' | '<'..='~') || !c.is_ascii()
}

/// Splits a colon-separated value such as *h=*, trimming each item.
pub fn split_colons(value: &str) -> impl Iterator<Item = &str> {
    value.split(':').map(trim_fws)
}

/// Decodes a Base64 value that may contain folding whitespace.
pub fn decode_base64_value(value: &str) -> Result<Vec<u8>, Base64Error> {
    let compact: String = value.chars().filter(|&c| !is_fws_char(c)).collect();
    util::decode_base64(&compact)
}

/// Returns the raw tag-list with the value of the named tag removed, keeping
/// all other text including whitespace exactly as it was.
pub fn with_empty_value(input: &str, tag: &str) -> String {
    let mut found = false;

    let specs: Vec<&str> = input
        .split(';')
        .map(|spec| match spec.split_once('=') {
            Some((name, _)) if !found && trim_fws(name) == tag => {
                found = true;
                &spec[..=name.len()]
            }
            _ => spec,
        })
        .collect();

    specs.join(";")
}
