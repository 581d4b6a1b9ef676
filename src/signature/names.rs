use crate::parse;
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    hash::{Hash, Hasher},
    str::FromStr,
};

/// A domain name, selector or identity failed validation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ParseNameError;

impl Display for ParseNameError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "invalid name")
    }
}

impl Error for ParseNameError {}

// Non-ASCII is accepted so that U-labels pass; underscores occur in
// selectors.
fn is_label(s: &str) -> bool {
    (1..=63).contains(&s.len())
        && !s.starts_with('-')
        && !s.ends_with('-')
        && s.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_') || !c.is_ascii())
}

fn to_ascii(s: &str) -> String {
    idna::domain_to_ascii(s).unwrap_or_else(|_| s.to_ascii_lowercase())
}

/// A domain name, as used in the *d=* and *i=* tags.
///
/// Comparison is ASCII case-insensitive.
#[derive(Clone, Eq)]
pub struct DomainName(Box<str>);

impl DomainName {
    pub fn new(s: &str) -> Result<Self, ParseNameError> {
        let labels: Vec<_> = s.split('.').collect();

        let valid = s.len() <= 253
            && labels.len() >= 2
            && labels.iter().all(|l| is_label(l))
            && labels.last().map_or(false, |tld| !tld.chars().all(|c| c.is_ascii_digit()));

        if valid {
            Ok(Self(s.into()))
        } else {
            Err(ParseNameError)
        }
    }

    /// Returns the A-label form, lower-cased, for use in DNS queries and in
    /// formatted signatures.
    pub fn to_ascii(&self) -> String {
        to_ascii(&self.0)
    }

    /// Whether this domain equals `parent` or lies below it.
    pub fn eq_or_subdomain_of(&self, parent: &DomainName) -> bool {
        let (name, parent) = (self.to_ascii(), parent.to_ascii());

        name == parent
            || name
                .strip_suffix(parent.as_str())
                .map_or(false, |sub| sub.ends_with('.'))
    }
}

impl FromStr for DomainName {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for DomainName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for DomainName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for DomainName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl PartialEq for DomainName {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Hash for DomainName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_ascii_lowercase().hash(state);
    }
}

/// A selector, the *s=* tag: one or more labels naming a key of a domain.
#[derive(Clone, Eq)]
pub struct Selector(Box<str>);

impl Selector {
    pub fn new(s: &str) -> Result<Self, ParseNameError> {
        if s.split('.').all(is_label) {
            Ok(Self(s.into()))
        } else {
            Err(ParseNameError)
        }
    }

    pub fn to_ascii(&self) -> String {
        to_ascii(&self.0)
    }
}

impl FromStr for Selector {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for Selector {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for Selector {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl PartialEq for Selector {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Hash for Selector {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_ascii_lowercase().hash(state);
    }
}

/// The agent or user identifier of the *i=* tag: an address whose local-part
/// may be omitted.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Identity {
    pub local_part: Option<Box<str>>,
    pub domain_part: DomainName,
}

impl Identity {
    pub fn new(s: &str) -> Result<Self, ParseNameError> {
        let (local_part, domain) = s.rsplit_once('@').ok_or(ParseNameError)?;

        let local_part = match local_part {
            "" => None,
            l if parse::strip_dot_atom_text(l) == Some("")
                || parse::strip_quoted_string(l) == Some("") =>
            {
                Some(l.into())
            }
            _ => return Err(ParseNameError),
        };

        Ok(Self {
            local_part,
            domain_part: DomainName::new(domain)?,
        })
    }
}

impl Display for Identity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if let Some(l) = &self.local_part {
            f.write_str(l)?;
        }
        write!(f, "@{}", self.domain_part)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_names() {
        assert!(DomainName::new("example.com").is_ok());
        assert!(DomainName::new("mail-1.example.com").is_ok());
        assert!(DomainName::new("☕.example.中国").is_ok());

        assert!(DomainName::new("example").is_err());
        assert!(DomainName::new("example.com.").is_err());
        assert!(DomainName::new("-bad.example.com").is_err());
        assert!(DomainName::new("example.123").is_err());
        assert!(DomainName::new("exa mple.com").is_err());

        assert_eq!(DomainName::new("Example.COM"), DomainName::new("example.com"));
    }

    #[test]
    fn subdomains() {
        let parent = DomainName::new("example.com").unwrap();
        let check = |s: &str| DomainName::new(s).unwrap().eq_or_subdomain_of(&parent);

        assert!(check("EXAMPLE.com"));
        assert!(check("mail.example.com"));
        assert!(!check("badexample.com"));
        assert!(!check("example.org"));
    }

    #[test]
    fn a_label_forms() {
        let domain = DomainName::new("☕.Example.中国").unwrap();
        let selector = Selector::new("Mail").unwrap();

        assert_eq!(domain.to_ascii(), "xn--53h.example.xn--fiqs8s");
        assert_eq!(selector.to_ascii(), "mail");
    }

    #[test]
    fn selectors() {
        assert!(Selector::new("sel").is_ok());
        assert!(Selector::new("dkim_2023.eu").is_ok());

        assert!(Selector::new("").is_err());
        assert!(Selector::new("a..b").is_err());
        assert!(Selector::new("sel.").is_err());
    }

    #[test]
    fn identities() {
        let id = Identity::new("@eng.example.net").unwrap();
        assert_eq!(id.local_part, None);
        assert_eq!(id.to_string(), "@eng.example.net");

        assert_eq!(Identity::new("joe.q@example.net").unwrap().to_string(), "joe.q@example.net");
        assert!(Identity::new("\"joe q\"@example.net").is_ok());

        assert!(Identity::new("example.net").is_err());
        assert!(Identity::new("a..b@example.net").is_err());
        assert!(Identity::new("joe@").is_err());
    }
}
