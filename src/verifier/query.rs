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

use crate::{
    signature::{DomainName, Selector},
    verifier::LookupTxt,
};
use std::io::{self, ErrorKind};
use tracing::trace;

pub type QueryResult = io::Result<Vec<io::Result<String>>>;

/// Returns the DNS name of the key record for a domain and selector.
pub fn key_record_name(domain: &DomainName, selector: &Selector) -> String {
    format!("{}._domainkey.{}", selector.to_ascii(), domain.to_ascii())
}

/// Looks up the key records for a domain and selector.
pub async fn look_up_records<T: LookupTxt + ?Sized>(
    resolver: &T,
    domain: &DomainName,
    selector: &Selector,
) -> QueryResult {
    fn parse_utf8(txt: io::Result<Vec<u8>>) -> io::Result<String> {
        txt.and_then(|s| String::from_utf8(s).map_err(|_| ErrorKind::InvalidData.into()))
    }

    let dname = key_record_name(domain, selector);

    trace!(%dname, "looking up key record");

    let txts = resolver.lookup_txt(&dname).await?;

    // §3.6.2.2: ‘TXT RRs MUST be unique for a particular selector name; […] if
    // there are multiple records in an RRset, the results are undefined.’
    // However, note §6.1.2: ‘If the query for the public key returns multiple
    // key records, the Verifier can choose one of the key records or may cycle
    // through the key records […].’ At most three records are tried.

    let result = txts.into_iter().take(3).map(parse_utf8).collect();

    Ok(result)
}
