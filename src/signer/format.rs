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


//! Formatting of the DKIM-Signature header value.

use crate::{
    signature::DkimSignature,
    util::{self, CanonicalStr},
};

/// The maximum line width of the formatted header field.
pub const LINE_WIDTH: usize = 75;

/// A header value under construction that folds itself at the line width.
///
/// Columns count characters, starting after the header name and colon.
/// Continuation lines start with a tab, counted as one column.
pub struct Folder {
    out: String,
    column: usize,
    width: usize,
}

impl Folder {
    pub fn new(header_name: &str) -> Self {
        Self {
            out: String::new(),
            column: header_name.chars().count() + 1,
            width: LINE_WIDTH,
        }
    }

    fn fold(&mut self) {
        self.out.push_str("\r\n\t");
        self.column = 1;
    }

    /// Appends a space and `s`, or a line break and `s`. `reserve` columns
    /// after `s` must fit on the line as well.
    pub fn word(&mut self, s: &str, reserve: usize) {
        let len = s.chars().count();

        if self.column + 1 + len + reserve <= self.width {
            self.out.push(' ');
            self.column += 1;
        } else {
            self.fold();
        }

        self.out.push_str(s);
        self.column += len;
    }

    /// Appends `s` directly, folding before it if it does not fit.
    pub fn glued(&mut self, s: &str) {
        let len = s.chars().count();

        if self.column + len > self.width {
            self.fold();
        }

        self.out.push_str(s);
        self.column += len;
    }

    /// Appends `s` unconditionally; a closing `;` may run one past the width.
    pub fn push(&mut self, s: &str) {
        self.out.push_str(s);
        self.column += s.chars().count();
    }

    /// Appends data as Base64, filling each line up to the width.
    pub fn base64(&mut self, data: &[u8]) {
        let encoded = util::encode_base64(data);
        let mut rest = encoded.as_str();

        while !rest.is_empty() {
            if self.column >= self.width {
                self.fold();
            }
            // Base64 is ASCII, bytes are characters
            let (chunk, tail) = rest.split_at(rest.len().min(self.width - self.column));
            self.push(chunk);
            rest = tail;
        }
    }

    pub fn as_str(&self) -> &str {
        &self.out
    }

    pub fn into_string(self) -> String {
        self.out
    }
}

/// Formats all tags of a signature, ending in an empty *b=* tag that the
/// signature data is to be appended to.
///
/// Tag order is *v a c d s i t x h bh b*. Names are written in A-label form.
pub fn format_unsigned(sig: &DkimSignature, header_name: &str) -> Folder {
    let mut folder = Folder::new(header_name);

    fn tag(folder: &mut Folder, name: &str, value: &str) {
        folder.word(&format!("{name}={value};"), 0);
    }

    tag(&mut folder, "v", "1");
    tag(&mut folder, "a", sig.algorithm.canonical_str());
    tag(&mut folder, "c", &sig.canonicalization.to_string());
    tag(&mut folder, "d", &sig.domain.to_ascii());
    tag(&mut folder, "s", &sig.selector.to_ascii());
    if let Some(id) = &sig.user_id {
        let local_part = id.local_part.as_deref().unwrap_or_default();
        tag(&mut folder, "i", &format!("{local_part}@{}", id.domain_part.to_ascii()));
    }
    if let Some(t) = sig.timestamp {
        tag(&mut folder, "t", &t.to_string());
    }
    if let Some(x) = sig.expiration {
        tag(&mut folder, "x", &x.to_string());
    }

    let count = sig.signed_headers.len();
    for (n, name) in sig.signed_headers.iter().enumerate() {
        let sep = if n + 1 == count { ';' } else { ':' };
        if n == 0 {
            folder.word(&format!("h={name}{sep}"), 0);
        } else {
            folder.glued(&format!("{name}{sep}"));
        }
    }

    // keep at least one character of each value on the tag's line
    folder.word("bh=", 1);
    folder.base64(&sig.body_hash);
    folder.push(";");
    folder.word("b=", 1);

    folder
}
