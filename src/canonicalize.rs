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


//! Canonicalization algorithms for header and body.
//!
//! Both the *simple* and the *relaxed* algorithms of RFC 6376, section 3.4,
//! are implemented. The body is canonicalized line by line as chunks arrive.
//!
//! Body lines may end in CRLF or in a bare LF; either is emitted as CRLF. A
//! CR not followed by LF is an ordinary byte.

use crate::{
    header::{FieldName, HeaderFields},
    signature::{CanonicalizationAlgorithm, DKIM_SIGNATURE_NAME},
};
use std::{borrow::Cow, mem};

const CR: u8 = b'\r';
const LF: u8 = b'\n';
const SP: u8 = b' ';
const CRLF: &[u8] = b"\r\n";

fn is_wsp(b: u8) -> bool {
    matches!(b, b' ' | b'\t')
}

// Runs of WSP become one SP, trailing WSP is dropped.
fn relax_line(line: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(line.len());
    let mut space = false;

    for &b in line {
        if is_wsp(b) {
            space = true;
        } else {
            if space {
                out.push(SP);
                space = false;
            }
            out.push(b);
        }
    }

    out
}

/// An incremental body canonicalizer.
///
/// Output is produced a line at a time. Between calls the canonicalizer holds
/// back the incomplete current line and a count of empty lines, which are
/// written only once a non-empty line follows.
#[derive(Clone, Debug)]
pub struct BodyCanonicalizer {
    kind: CanonicalizationAlgorithm,
    line: Vec<u8>,
    pending_cr: bool,
    blank_lines: usize,
    content_seen: bool,
}

impl BodyCanonicalizer {
    pub fn new(kind: CanonicalizationAlgorithm) -> Self {
        Self {
            kind,
            line: vec![],
            pending_cr: false,
            blank_lines: 0,
            content_seen: false,
        }
    }

    pub fn simple() -> Self {
        Self::new(CanonicalizationAlgorithm::Simple)
    }

    pub fn relaxed() -> Self {
        Self::new(CanonicalizationAlgorithm::Relaxed)
    }

    /// Canonicalizes a chunk of the body, returning the completed lines.
    pub fn canonicalize_chunk(&mut self, bytes: &[u8]) -> Vec<u8> {
        let mut result = Vec::with_capacity(bytes.len() + 2);

        for &b in bytes {
            if b == LF {
                self.pending_cr = false;
                self.end_line(&mut result);
                continue;
            }
            if mem::take(&mut self.pending_cr) {
                self.line.push(CR);
            }
            if b == CR {
                self.pending_cr = true;
            } else {
                self.line.push(b);
            }
        }

        result
    }

    /// Finishes canonicalization, returning the final piece of output.
    ///
    /// An unterminated last line gets its CRLF; trailing empty lines are
    /// dropped. An empty *simple* body becomes a single CRLF, an empty
    /// *relaxed* body stays empty.
    pub fn finish(mut self) -> Vec<u8> {
        let mut result = vec![];

        if mem::take(&mut self.pending_cr) {
            self.line.push(CR);
        }
        if !self.line.is_empty() {
            self.end_line(&mut result);
        }

        if self.kind == CanonicalizationAlgorithm::Simple && !self.content_seen {
            result.extend(CRLF);
        }

        result
    }

    fn end_line(&mut self, result: &mut Vec<u8>) {
        let line = match self.kind {
            CanonicalizationAlgorithm::Simple => Cow::Borrowed(&self.line[..]),
            CanonicalizationAlgorithm::Relaxed => Cow::Owned(relax_line(&self.line)),
        };

        if line.is_empty() {
            self.blank_lines += 1;
        } else {
            for _ in 0..self.blank_lines {
                result.extend(CRLF);
            }
            result.extend(line.iter());
            result.extend(CRLF);
            self.blank_lines = 0;
            self.content_seen = true;
        }

        self.line.clear();
    }
}

/// Canonicalizes a complete body in one go.
pub fn canonicalize_body(algorithm: CanonicalizationAlgorithm, body: &[u8]) -> Vec<u8> {
    let mut canonicalizer = BodyCanonicalizer::new(algorithm);
    let mut result = canonicalizer.canonicalize_chunk(body);
    result.extend(canonicalizer.finish());
    result
}

/// Canonicalizes the selected header fields, each followed by CRLF.
///
/// Every occurrence of a name in `selected` consumes the bottom-most field of
/// that name not consumed yet. Names with no such field contribute nothing.
pub fn canonicalize_headers(
    algorithm: CanonicalizationAlgorithm,
    headers: &HeaderFields,
    selected: &[FieldName],
) -> Vec<u8> {
    let fields = headers.as_ref();
    let mut used = vec![false; fields.len()];
    let mut result = vec![];

    for name in selected {
        let found = (0..fields.len())
            .rev()
            .find(|&i| !used[i] && fields[i].0 == *name);

        if let Some(i) = found {
            used[i] = true;
            let (name, body) = &fields[i];
            canonicalize_header(&mut result, algorithm, name, body);
            result.extend(CRLF);
        }
    }

    result
}

/// Appends one canonicalized header field to `result`, without a final CRLF.
pub fn canonicalize_header(
    result: &mut Vec<u8>,
    algorithm: CanonicalizationAlgorithm,
    name: impl AsRef<str>,
    value: impl AsRef<[u8]>,
) {
    let (name, value) = (name.as_ref(), value.as_ref());

    match algorithm {
        CanonicalizationAlgorithm::Simple => {
            result.extend(name.bytes());
            result.push(b':');
            result.extend(value);
        }
        CanonicalizationAlgorithm::Relaxed => {
            result.extend(name.trim_end().to_ascii_lowercase().bytes());
            result.push(b':');

            // unfold, then compress WSP runs and trim both ends
            let unfolded: Vec<u8> = value.iter().copied().filter(|&b| b != CR && b != LF).collect();
            let relaxed = relax_line(&unfolded);
            result.extend(relaxed.strip_prefix(b" ").unwrap_or(&relaxed[..]));
        }
    }
}

/// Produces the header signing input: the selected header fields, then the
/// DKIM-Signature header field itself with an empty *b=* value and no final
/// CRLF.
pub fn header_signing_input(
    algorithm: CanonicalizationAlgorithm,
    headers: &HeaderFields,
    selected: &[FieldName],
    sig_name: &str,
    sig_value: &str,
) -> Vec<u8> {
    debug_assert!(sig_name.eq_ignore_ascii_case(DKIM_SIGNATURE_NAME));

    let mut input = canonicalize_headers(algorithm, headers, selected);
    canonicalize_header(&mut input, algorithm, sig_name, sig_value);
    input
}
