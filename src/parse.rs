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

//! Lexical parsing of RFC 5322 address syntax.
//!
//! All functions follow the same idiom: `strip_` functions eat as much of a
//! valid production as possible from the start of the input, and return the
//! remaining input, or `None` if nothing could be consumed.

const CRLF: &str = "\r\n";

// FWS = ([*WSP CRLF] 1*WSP)

/// Strips one occurrence of folding whitespace.
fn strip_fws(input: &str) -> Option<&str> {
    if let Some(s) = strip_wsp(input) {
        s.strip_prefix(CRLF).and_then(strip_wsp).or(Some(s))
    } else {
        input.strip_prefix(CRLF).and_then(strip_wsp)
    }
}

// RFC 5234, appendix B.1

fn strip_wsp(input: &str) -> Option<&str> {
    input
        .strip_prefix(is_wsp)
        .map(|s| s.trim_start_matches(is_wsp))
}

fn is_wsp(c: char) -> bool {
    matches!(c, ' ' | '\t')
}

// RFC 5322, section 3.2.2

// CFWS = (1*([FWS] comment) [FWS]) / FWS

/// Strips any sequence of folding whitespace and comments.
pub fn strip_cfws(input: &str) -> Option<&str> {
    let mut s = input;
    let mut consumed = false;

    loop {
        if let Some(snext) = strip_fws(s) {
            s = snext;
            consumed = true;
        }
        match strip_comment(s) {
            Some(snext) => {
                s = snext;
                consumed = true;
            }
            None => break,
        }
    }

    consumed.then_some(s)
}

/// Strips one, possibly nested, comment.
fn strip_comment(input: &str) -> Option<&str> {
    let mut s = input.strip_prefix('(')?;
    let mut depth = 1;

    while depth > 0 {
        if let Some(snext) = strip_fws(s) {
            s = snext;
            continue;
        }

        let mut chars = s.chars();
        match chars.next()? {
            '(' => depth += 1,
            ')' => depth -= 1,
            '\\' => {
                strip_quoted_pair_tail(&mut chars)?;
            }
            c if is_ctext(c) => {}
            _ => return None,
        }
        s = chars.as_str();
    }

    Some(s)
}

/// Strips one quoted string, including the enclosing double quotes.
pub fn strip_quoted_string(input: &str) -> Option<&str> {
    let mut s = input.strip_prefix('"')?;

    loop {
        if let Some(snext) = strip_fws(s) {
            s = snext;
            continue;
        }

        let mut chars = s.chars();
        match chars.next()? {
            '"' => return Some(chars.as_str()),
            '\\' => {
                strip_quoted_pair_tail(&mut chars)?;
            }
            c if is_qtext(c) => {}
            _ => return None,
        }
        s = chars.as_str();
    }
}

fn strip_quoted_pair_tail(chars: &mut std::str::Chars<'_>) -> Option<()> {
    match chars.next()? {
        c if is_vchar(c) || is_wsp(c) => Some(()),
        _ => None,
    }
}

/// Strips one atom, without the surrounding CFWS.
pub fn strip_atext(input: &str) -> Option<&str> {
    input
        .strip_prefix(is_atext)
        .map(|s| s.trim_start_matches(is_atext))
}

/// Strips a dot-atom-text, a sequence of atoms separated by single dots.
pub fn strip_dot_atom_text(input: &str) -> Option<&str> {
    let mut s = strip_atext(input)?;

    while let Some(snext) = s.strip_prefix('.').and_then(strip_atext) {
        s = snext;
    }

    Some(s)
}

/// Strips a domain literal such as `[192.0.2.1]`.
pub fn strip_domain_literal(input: &str) -> Option<&str> {
    let mut s = input.strip_prefix('[')?;

    loop {
        if let Some(snext) = strip_fws(s) {
            s = snext;
            continue;
        }

        let mut chars = s.chars();
        match chars.next()? {
            ']' => return Some(chars.as_str()),
            c if is_dtext(c) => {}
            _ => return None,
        }
        s = chars.as_str();
    }
}

// RFC 5322 and RFC 6532: non-ASCII UTF-8 is permitted in all text productions

fn is_atext(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            '!' | '#' | '$' | '%' | '&' | '\'' | '*' | '+' | '-' | '/' | '=' | '?' | '^' | '_'
            | '`' | '{' | '|' | '}' | '~'
        )
        || !c.is_ascii()
}

fn is_vchar(c: char) -> bool {
    c.is_ascii_graphic() || !c.is_ascii()
}

fn is_ctext(c: char) -> bool {
    is_vchar(c) && !matches!(c, '(' | ')' | '\\')
}

fn is_qtext(c: char) -> bool {
    is_vchar(c) && !matches!(c, '"' | '\\')
}

fn is_dtext(c: char) -> bool {
    is_vchar(c) && !matches!(c, '[' | ']' | '\\')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_fws_ok() {
        assert_eq!(strip_fws(""), None);
        assert_eq!(strip_fws("x"), None);
        assert_eq!(strip_fws(" x"), Some("x"));
        assert_eq!(strip_fws("\r\n"), None);
        assert_eq!(strip_fws(" \r\n"), Some("\r\n"));
        assert_eq!(strip_fws(" \r\n x"), Some("x"));
        assert_eq!(strip_fws("\r\n x"), Some("x"));
    }

    #[test]
    fn strip_cfws_ok() {
        assert_eq!(strip_cfws("x"), None);
        assert_eq!(strip_cfws(" (a comment) x"), Some("x"));
        assert_eq!(strip_cfws("(nested (comment \\) here))x"), Some("x"));
        assert_eq!(strip_cfws("(unclosed x"), None);
        assert_eq!(strip_cfws(" \r\n (a)\r\n\t(b) x"), Some("x"));
    }

    #[test]
    fn strip_quoted_string_ok() {
        assert_eq!(strip_quoted_string("\"Joe Q. Public\" <"), Some(" <"));
        assert_eq!(strip_quoted_string("\"a \\\" b\"x"), Some("x"));
        assert_eq!(strip_quoted_string("\"open"), None);
        assert_eq!(strip_quoted_string("x\"\""), None);
    }

    #[test]
    fn strip_dot_atom_text_ok() {
        assert_eq!(strip_dot_atom_text("john.q.public@"), Some("@"));
        assert_eq!(strip_dot_atom_text("a..b"), Some("..b"));
        assert_eq!(strip_dot_atom_text(".a"), None);
        assert_eq!(strip_domain_literal("[192.0.2.1]>"), Some(">"));
    }
}
