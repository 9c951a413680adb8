//! Email address types.

use crate::error::{Error, Result};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

const MAX_LOCAL_PART: usize = 64;
const MAX_DOMAIN: usize = 255;
const MAX_LABEL: usize = 63;
const IPV6_TAG: &str = "IPv6:";

/// Characters that may not appear unquoted in a local part.
const LOCAL_SPECIALS: &[char] = &['(', ')', ',', ':', ';', '<', '>', '[', ']', '\\', '"'];

/// Email address for SMTP envelope (`local-part@domain`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address(String);

impl Address {
    /// Creates a new address from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid.
    pub fn new(addr: impl Into<String>) -> Result<Self> {
        let addr = addr.into();
        Self::validate(&addr)?;
        Ok(Self(addr))
    }

    /// Returns the address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the part after the `@`.
    #[must_use]
    pub fn domain(&self) -> &str {
        self.0.rsplit_once('@').map_or("", |(_, domain)| domain)
    }

    /// Returns true if the address is plain ASCII (no SMTPUTF8 needed).
    #[must_use]
    pub fn is_ascii(&self) -> bool {
        self.0.is_ascii()
    }

    fn validate(addr: &str) -> Result<()> {
        let invalid = |reason: &str| Err(Error::InvalidAddress(format!("{addr:?}: {reason}")));

        if addr.is_empty() {
            return invalid("address cannot be empty");
        }
        if addr.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return invalid("address must not contain whitespace");
        }

        let Some((local, domain)) = addr.rsplit_once('@') else {
            return invalid("address must contain @");
        };
        if local.contains('@') {
            return invalid("address must have exactly one @");
        }
        if local.is_empty() || domain.is_empty() {
            return invalid("local and domain parts cannot be empty");
        }

        if local.len() > MAX_LOCAL_PART {
            return invalid("local part is longer than 64 octets");
        }
        if local.contains(LOCAL_SPECIALS) {
            return invalid("local part contains a reserved character");
        }
        if local.split('.').any(str::is_empty) {
            return invalid("local part has an empty dot-separated atom");
        }

        if domain.len() > MAX_DOMAIN {
            return invalid("domain is longer than 255 octets");
        }
        if let Some(literal) = domain.strip_prefix('[') {
            return match literal.strip_suffix(']') {
                Some(literal) if is_valid_domain_literal(literal) => Ok(()),
                _ => invalid("domain literal is malformed"),
            };
        }
        for label in domain.split('.') {
            if label.is_empty() || label.len() > MAX_LABEL {
                return invalid("domain has an empty or oversized label");
            }
            if label.starts_with('-') || label.ends_with('-') {
                return invalid("domain label cannot start or end with a hyphen");
            }
            if !label.chars().all(|c| c.is_alphanumeric() || c == '-') {
                return invalid("domain contains an invalid character");
            }
        }

        Ok(())
    }
}

/// Checks the text between the brackets of an address literal: IPv4,
/// `IPv6:` followed by an IPv6 address, or `tag:content` (RFC 5321 4.1.3).
fn is_valid_domain_literal(literal: &str) -> bool {
    if literal.parse::<Ipv4Addr>().is_ok() {
        return true;
    }
    if literal
        .get(..IPV6_TAG.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(IPV6_TAG))
    {
        return literal[IPV6_TAG.len()..].parse::<Ipv6Addr>().is_ok();
    }

    let Some((tag, content)) = literal.split_once(':') else {
        return false;
    };
    let tag_ok = !tag.is_empty()
        && !tag.ends_with('-')
        && tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    // dcontent, minus the angle brackets that would end the SMTP path
    let content_ok = !content.is_empty()
        && content
            .bytes()
            .all(|b| matches!(b, 33..=90 | 94..=126) && b != b'<' && b != b'>');
    tag_ok && content_ok
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// Mailbox (optional display name + address).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    /// Display name (optional).
    pub name: Option<String>,
    /// Email address.
    pub address: Address,
}

impl Mailbox {
    /// Creates a new mailbox with just an address.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid.
    pub fn new(address: impl Into<String>) -> Result<Self> {
        Ok(Self {
            name: None,
            address: Address::new(address)?,
        })
    }

    /// Creates a new mailbox with a display name and address.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid.
    pub fn with_name(name: impl Into<String>, address: impl Into<String>) -> Result<Self> {
        Ok(Self {
            name: Some(name.into()),
            address: Address::new(address)?,
        })
    }

    /// Parses the mailbox forms found in message headers:
    ///
    /// - `user@example.com`
    /// - `<user@example.com>`
    /// - `Jane Doe <user@example.com>`
    /// - `"Doe, Jane" <user@example.com>`
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not a single valid mailbox.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();

        let Some(rest) = input.strip_suffix('>') else {
            return Self::new(input);
        };
        let Some((name, address)) = rest.rsplit_once('<') else {
            return Err(Error::InvalidAddress(format!("{input:?}: unbalanced angle brackets")));
        };

        let name = unquote(name.trim())?;
        Ok(Self {
            name: (!name.is_empty()).then_some(name),
            address: Address::new(address.trim())?,
        })
    }
}

impl fmt::Display for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) if name.contains(|c: char| LOCAL_SPECIALS.contains(&c) || c == '.' || c == '@') => {
                let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
                write!(f, "\"{escaped}\" <{}>", self.address)
            }
            Some(name) => write!(f, "{name} <{}>", self.address),
            None => write!(f, "{}", self.address),
        }
    }
}

impl FromStr for Mailbox {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Strips one level of double quotes from a display name.
fn unquote(name: &str) -> Result<String> {
    let Some(inner) = name.strip_prefix('"') else {
        if name.contains(['<', '>', '"']) {
            return Err(Error::InvalidAddress(format!("{name:?}: invalid display name")));
        }
        return Ok(name.to_string());
    };
    let Some(inner) = inner.strip_suffix('"') else {
        return Err(Error::InvalidAddress(format!("{name:?}: unterminated quoted name")));
    };

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.extend(chars.next()),
            '"' => {
                return Err(Error::InvalidAddress(format!("{name:?}: stray quote in display name")));
            }
            _ => out.push(c),
        }
    }
    Ok(out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_valid_address() {
        let addr = Address::new("user@example.com").unwrap();
        assert_eq!(addr.as_str(), "user@example.com");
        assert_eq!(addr.domain(), "example.com");
        assert!(addr.is_ascii());
    }

    #[test]
    fn test_valid_address_forms() {
        for ok in [
            "first.last@example.com",
            "user+tag@sub.example.co.uk",
            "a@x.com",
            "postmaster@[192.0.2.1]",
            "postmaster@[IPv6:2001:db8::1]",
            "postmaster@[ipv6:::1]",
            "postmaster@[x-tag:opaque.value]",
            "jörg@bücher.example",
        ] {
            assert!(Address::new(ok).is_ok(), "{ok} should parse");
        }
    }

    #[test]
    fn test_invalid_addresses() {
        for bad in [
            "",
            "userexample.com",
            "@example.com",
            "user@",
            "a@b@c.com",
            "user name@example.com",
            "user@exa mple.com",
            ".user@example.com",
            "user.@example.com",
            "us..er@example.com",
            "user@-example.com",
            "user@example..com",
            "<user@example.com>",
            "user,other@example.com",
            "user@exa_mple.com",
            "a@[]",
            "a@[x>]",
            "a@[foo]bar]",
            "a@[192.0.2.1",
            "a@[999.1.1.1]",
            "a@[IPv6:not-an-address]",
            "a@[tag:]",
            "a@[:content]",
            "a@[tag:a>b]",
            "a@[tag:a[b]",
        ] {
            assert!(Address::new(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_length_limits() {
        let local = "a".repeat(65);
        assert!(Address::new(format!("{local}@example.com")).is_err());
        let label = "b".repeat(64);
        assert!(Address::new(format!("user@{label}.com")).is_err());
    }

    #[test]
    fn test_mailbox_new() {
        let mailbox = Mailbox::new("user@example.com").unwrap();
        assert_eq!(mailbox.address.as_str(), "user@example.com");
        assert!(mailbox.name.is_none());
    }

    #[test]
    fn test_mailbox_parse_forms() {
        let bare = Mailbox::parse("  b@y.com ").unwrap();
        assert_eq!(bare, Mailbox::new("b@y.com").unwrap());

        let angled = Mailbox::parse("<b@y.com>").unwrap();
        assert_eq!(angled, Mailbox::new("b@y.com").unwrap());

        let named = Mailbox::parse("John Doe <john@example.com>").unwrap();
        assert_eq!(named.name.as_deref(), Some("John Doe"));
        assert_eq!(named.address.as_str(), "john@example.com");

        let quoted = Mailbox::parse(r#""Doe, \"JD\" John" <john@example.com>"#).unwrap();
        assert_eq!(quoted.name.as_deref(), Some(r#"Doe, "JD" John"#));
    }

    #[test]
    fn test_mailbox_parse_rejects() {
        for bad in ["John <john@example.com", "John john@example.com>", "\"John <j@x.com>", "not an address"] {
            assert!(Mailbox::parse(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_mailbox_display() {
        assert_eq!(Mailbox::new("a@x.com").unwrap().to_string(), "a@x.com");
        assert_eq!(
            Mailbox::with_name("Ann", "a@x.com").unwrap().to_string(),
            "Ann <a@x.com>"
        );
        assert_eq!(
            Mailbox::with_name("Doe, Ann", "a@x.com").unwrap().to_string(),
            "\"Doe, Ann\" <a@x.com>"
        );
    }

    #[test]
    fn mailbox_rejects_malformed_domain_literal() {
        for bad in ["a@[]", "a@[x>]", "a@[foo]bar]", "Name <a@[]>"] {
            assert!(Mailbox::parse(bad).is_err(), "{bad:?} should be rejected");
        }
        let mailbox = Mailbox::parse("Ops <ops@[192.0.2.1]>").unwrap();
        assert_eq!(mailbox.address.domain(), "[192.0.2.1]");
    }

    proptest! {
        #[test]
        fn simple_addresses_parse(local in "[a-z0-9]{1,20}", domain in "[a-z]{1,20}", tld in "[a-z]{2,6}") {
            let raw = format!("{local}@{domain}.{tld}");
            let addr = Address::new(raw.clone()).unwrap();
            prop_assert_eq!(addr.as_str(), raw.as_str());
            let mailbox = Mailbox::parse(&format!("Someone <{raw}>")).unwrap();
            prop_assert_eq!(mailbox.address, addr);
        }

        #[test]
        fn whitespace_is_never_accepted(local in "[a-z]{1,8}", pad in "[ \t]{1,3}", domain in "[a-z]{1,8}") {
            let raw = format!("{local}{pad}x@{domain}.com");
            prop_assert!(Address::new(raw).is_err());
        }
    }
}
