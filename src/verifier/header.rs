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
    header::HeaderFields,
    signature::{DkimSignature, DkimSignatureError, DkimSignatureErrorKind, DKIM_SIGNATURE_NAME},
};
use bstr::ByteSlice;
use std::str::{self, FromStr};
use tracing::trace;

/// Splits a raw message arriving in chunks into header section and body.
///
/// The header section is buffered until the empty line that ends it; the
/// empty line may be split across chunks.
#[derive(Default)]
pub struct HeaderSplitter {
    buf: Vec<u8>,
    scanned: usize,
}

impl HeaderSplitter {
    pub fn new() -> Self {
        Default::default()
    }

    /// Feeds a chunk. When the end of the header section is found, returns
    /// the header section (with its final line ending) and the part of the
    /// chunk that belongs to the body.
    pub fn push<'c>(&mut self, chunk: &'c [u8]) -> Option<(Vec<u8>, &'c [u8])> {
        let old_len = self.buf.len();
        self.buf.extend_from_slice(chunk);

        // a header section cannot begin with an empty line; such input is left
        // to fail header parsing
        if let Some((header_end, body_start)) = find_header_end(&self.buf, self.scanned) {
            let rest = &chunk[(body_start - old_len)..];
            let mut header = std::mem::take(&mut self.buf);
            header.truncate(header_end);
            return Some((header, rest));
        }

        // the terminator is at most three bytes long
        self.scanned = self.buf.len().saturating_sub(2);

        None
    }

    /// Returns the buffered header when the message ended before the empty
    /// line: the message has a header section only.
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

// Returns the end of the header section (just past its last line ending) and
// the start of the body.
fn find_header_end(buf: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;

    while let Some(n) = buf.get(i..).and_then(|s| s.find_byte(b'\n')) {
        let lf = i + n;
        let rest = &buf[(lf + 1)..];
        if rest.starts_with(b"\r\n") {
            return Some((lf + 1, lf + 3));
        }
        if rest.starts_with(b"\n") {
            return Some((lf + 1, lf + 2));
        }
        i = lf + 1;
    }

    None
}

/// A DKIM-Signature header field found in the header section.
pub struct SignatureHeader {
    pub index: usize,
    pub name: Box<str>,
    pub value: Box<str>,
    pub signature: Result<DkimSignature, DkimSignatureError>,
}

/// Finds and parses all DKIM-Signature header fields, in order.
pub fn find_signatures(headers: &HeaderFields) -> Vec<SignatureHeader> {
    let dkim_headers = headers
        .as_ref()
        .iter()
        .enumerate()
        .filter(|(_, (name, _))| *name == DKIM_SIGNATURE_NAME);

    let mut result = vec![];

    for (index, (name, value)) in dkim_headers {
        // well-formed DKIM-Signature contain only UTF-8
        let (value, signature): (Box<str>, _) = match str::from_utf8(value.as_ref()) {
            Ok(value) => (value.into(), DkimSignature::from_str(value)),
            Err(_) => {
                let error = DkimSignatureError::new(DkimSignatureErrorKind::Utf8Encoding);
                (value.to_str_lossy().into(), Err(error))
            }
        };

        if let Err(e) = &signature {
            trace!(index, "malformed DKIM-Signature: {}", e.kind);
        }

        result.push(SignatureHeader {
            index,
            name: name.as_ref().into(),
            value,
            signature,
        });
    }

    result
}
