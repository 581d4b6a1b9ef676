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

use std::{future::Future, io};

/// A DNS TXT record lookup, as provided by the mail server’s resolver.
///
/// Errors of kind [`io::ErrorKind::NotFound`] mean that no record exists for
/// the name; any other error is a failed lookup.
pub trait LookupTxt: Send + Sync {
    /// The answer consisting of TXT records found.
    ///
    /// Each item is one TXT record with its character-string fragments
    /// concatenated.
    type Answer: IntoIterator<Item = io::Result<Vec<u8>>>;
    /// The future resolving to the query’s answer.
    type Query<'a>: Future<Output = io::Result<Self::Answer>> + Send + 'a
    where
        Self: 'a;

    /// Looks up the domain’s TXT records in DNS.
    ///
    /// The domain will be passed to this trait as a string in A-label (ASCII)
    /// format (eg `selector._domainkey.example.com`).
    ///
    /// Note that according to RFC 6376, the final answer is expected to contain
    /// only a single TXT record (but DNS allows > 1).
    fn lookup_txt(&self, domain: &str) -> Self::Query<'_>;
}
