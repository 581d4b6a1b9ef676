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

//! Determination of the sender domain of an outbound message.
//!
//! The sender domain selects the signing identity. It is taken from the
//! *From* header when that names a single mailbox, from *Sender* when *From*
//! names several, and from the envelope sender otherwise.

use crate::{header::HeaderFields, parse};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    str::FromStr,
};
use tracing::{debug, trace};

/// An error that occurs when parsing an email address.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum AddressError {
    Syntax,
    /// The input is a valid address list, but not a single mailbox.
    NotSingleMailbox,
}

impl Display for AddressError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syntax => write!(f, "syntax error in address"),
            Self::NotSingleMailbox => write!(f, "not a single mailbox"),
        }
    }
}

impl Error for AddressError {}

/// A parsed mailbox address.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Address {
    /// The local part, in its original form (a quoted string keeps its
    /// quotes).
    pub local_part: String,
    /// The domain part, as written.
    pub host: String,
}

impl Address {
    pub fn new(local_part: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            local_part: local_part.into(),
            host: host.into(),
        }
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local_part, self.host)
    }
}

/// Parses a single mailbox, such as `me@example.com`, `<me@example.com>` or
/// `Me <me@example.com>`.
impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut addrs = parse_address_list(s)?;
        match addrs.len() {
            1 => Ok(addrs.remove(0)),
            _ => Err(AddressError::NotSingleMailbox),
        }
    }
}

/// The envelope of an outbound message.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Envelope {
    /// The envelope sender (MAIL FROM); `None` for the null reverse-path.
    pub sender: Option<Address>,
    /// Whether the message is forwarded; header addresses are then not
    /// trusted.
    pub forwarded: bool,
    /// Whether an earlier stage has already signed the message.
    pub already_signed: bool,
}

impl Envelope {
    pub fn new(sender: Option<Address>) -> Self {
        Self {
            sender,
            forwarded: false,
            already_signed: false,
        }
    }
}

/// Determines the sender domain for an outbound message, lower-cased.
///
/// The envelope sender's host is the fallback. Unless the message is
/// forwarded, a *From* header with one mailbox overrides it; a *From* header
/// with several mailboxes defers to a single mailbox in *Sender*. Parse
/// failures keep the fallback.
pub fn get_sender_domain(envelope: &Envelope, headers: &HeaderFields) -> Option<String> {
    let fallback = envelope.sender.as_ref().map(|a| a.host.to_lowercase());

    if envelope.forwarded {
        trace!("forwarded message, using envelope sender domain");
        return fallback;
    }

    let Some(from) = headers.get("From") else {
        return fallback;
    };

    let addrs = match parse_address_list(&from.to_str_lossy()) {
        Ok(addrs) => addrs,
        Err(e) => {
            debug!("cannot parse From header: {e}");
            return fallback;
        }
    };

    match addrs.as_slice() {
        [] => {
            trace!("no mailbox in From header");
            fallback
        }
        [addr] => Some(addr.host.to_lowercase()),
        _ => {
            let Some(sender) = headers.get("Sender") else {
                trace!("several mailboxes in From header and no Sender header");
                return fallback;
            };
            match Address::from_str(&sender.to_str_lossy()) {
                Ok(addr) => Some(addr.host.to_lowercase()),
                Err(e) => {
                    debug!("cannot use Sender header: {e}");
                    fallback
                }
            }
        }
    }
}

/// Parses an RFC 5322 address list, returning all mailboxes in order.
///
/// Groups (RFC 6854) contribute their member mailboxes; an empty group
/// contributes none.
pub fn parse_address_list(input: &str) -> Result<Vec<Address>, AddressError> {
    let mut result = vec![];
    let mut s = strip_opt_cfws(input);

    loop {
        // obsolete syntax allows empty list elements
        if let Some(snext) = s.strip_prefix(',') {
            s = strip_opt_cfws(snext);
            continue;
        }
        if s.is_empty() {
            break;
        }

        let (addrs, rest) = strip_address(s).ok_or(AddressError::Syntax)?;
        result.extend(addrs);

        s = strip_opt_cfws(rest);
        match s.strip_prefix(',') {
            Some(snext) => s = strip_opt_cfws(snext),
            None if s.is_empty() => break,
            None => return Err(AddressError::Syntax),
        }
    }

    Ok(result)
}

fn strip_opt_cfws(input: &str) -> &str {
    parse::strip_cfws(input).unwrap_or(input)
}

// address = mailbox / group
fn strip_address(input: &str) -> Option<(Vec<Address>, &str)> {
    if let Some((addr, s)) = strip_mailbox(input) {
        return Some((vec![addr], s));
    }
    strip_group(input)
}

// mailbox = name-addr / addr-spec
fn strip_mailbox(input: &str) -> Option<(Address, &str)> {
    if let Some((addr, s)) = strip_addr_spec(input) {
        if s.is_empty() || s.starts_with(|c: char| c == ',' || c == ';') {
            return Some((addr, s));
        }
    }

    let s = strip_phrase(input).unwrap_or(input);
    strip_angle_addr(s)
}

// group = display-name ":" [group-list] ";" [CFWS]
fn strip_group(input: &str) -> Option<(Vec<Address>, &str)> {
    let s = strip_phrase(input)?;
    let mut s = s.strip_prefix(':')?;

    let mut addrs = vec![];

    loop {
        s = strip_opt_cfws(s);
        if let Some(snext) = s.strip_prefix(';') {
            return Some((addrs, strip_opt_cfws(snext)));
        }
        if let Some(snext) = s.strip_prefix(',') {
            s = snext;
            continue;
        }
        let (addr, snext) = strip_mailbox(s)?;
        addrs.push(addr);
        s = snext;
    }
}

// angle-addr = [CFWS] "<" addr-spec ">" [CFWS]
fn strip_angle_addr(input: &str) -> Option<(Address, &str)> {
    let s = strip_opt_cfws(input).strip_prefix('<')?;
    let (addr, s) = strip_addr_spec(s)?;
    let s = s.strip_prefix('>')?;
    Some((addr, strip_opt_cfws(s)))
}

// addr-spec = local-part "@" domain
fn strip_addr_spec(input: &str) -> Option<(Address, &str)> {
    let s = strip_opt_cfws(input);
    let rest = parse::strip_dot_atom_text(s).or_else(|| parse::strip_quoted_string(s))?;
    let local_part = &s[..(s.len() - rest.len())];

    let s = strip_opt_cfws(rest).strip_prefix('@')?;

    let s = strip_opt_cfws(s);
    let rest = parse::strip_dot_atom_text(s).or_else(|| parse::strip_domain_literal(s))?;
    let host = &s[..(s.len() - rest.len())];

    Some((Address::new(local_part, host), strip_opt_cfws(rest)))
}

// phrase = 1*word / obs-phrase, where obs-phrase also allows "."
fn strip_phrase(input: &str) -> Option<&str> {
    let mut s = strip_word(input)?;

    loop {
        if let Some(snext) = strip_word(s) {
            s = snext;
        } else if let Some(snext) = s.strip_prefix('.') {
            s = strip_opt_cfws(snext);
        } else {
            break;
        }
    }

    Some(s)
}

// word = atom / quoted-string, with surrounding CFWS
fn strip_word(input: &str) -> Option<&str> {
    let s = strip_opt_cfws(input);
    let s = parse::strip_atext(s).or_else(|| parse::strip_quoted_string(s))?;
    Some(strip_opt_cfws(s))
}
