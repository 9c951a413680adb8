//! SMTP connection management with type-state pattern.

mod client;
mod stream;

pub use client::{Authenticated, Client, Connected, Data, MailTransaction, RecipientAdded};
pub use stream::{MAX_LINE_LENGTH, SmtpStream, Transport, connect, connect_tls};

use crate::types::{AuthMechanism, Extension};
use std::collections::HashSet;

/// Server capabilities from EHLO response.
#[derive(Debug, Clone, Default)]
pub struct ServerInfo {
    /// Server hostname from greeting.
    pub hostname: String,
    /// Supported extensions.
    pub extensions: HashSet<Extension>,
}

impl ServerInfo {
    /// Replaces the known extensions with those listed in an EHLO reply.
    ///
    /// The first reply line is the server greeting and carries no keyword.
    pub fn update_from_ehlo(&mut self, lines: &[String]) {
        self.extensions = lines.iter().skip(1).map(|line| Extension::parse(line)).collect();
    }

    /// Checks if the server supports an extension.
    #[must_use]
    pub fn supports(&self, ext: &Extension) -> bool {
        self.extensions.contains(ext)
    }

    /// Checks if STARTTLS is supported.
    #[must_use]
    pub fn supports_starttls(&self) -> bool {
        self.supports(&Extension::StartTls)
    }

    /// Returns the maximum message size, if the server advertised a limit.
    ///
    /// `SIZE 0` means the server declares no fixed limit.
    #[must_use]
    pub fn max_message_size(&self) -> Option<usize> {
        self.extensions.iter().find_map(|ext| match ext {
            Extension::Size(Some(size)) if *size > 0 => Some(*size),
            _ => None,
        })
    }

    /// Returns the usable authentication mechanisms from the `AUTH`
    /// keyword, or `None` if the server did not advertise `AUTH` at all.
    ///
    /// `Some` with an empty list means only mechanisms this client cannot
    /// speak were offered.
    #[must_use]
    pub fn auth_mechanisms(&self) -> Option<Vec<AuthMechanism>> {
        self.extensions.iter().find_map(|ext| match ext {
            Extension::Auth(mechanisms) => Some(mechanisms.clone()),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(lines: &[&str]) -> ServerInfo {
        let lines: Vec<String> = lines.iter().map(ToString::to_string).collect();
        let mut info = ServerInfo::default();
        info.update_from_ehlo(&lines);
        info
    }

    #[test]
    fn ehlo_greeting_line_is_skipped() {
        let info = info(&["mail.example.com Hello", "STARTTLS"]);
        assert_eq!(info.extensions.len(), 1);
        assert!(info.supports_starttls());
    }

    #[test]
    fn size_zero_means_unlimited() {
        assert_eq!(info(&["hi", "SIZE 0"]).max_message_size(), None);
        assert_eq!(info(&["hi", "SIZE 1000"]).max_message_size(), Some(1000));
        assert_eq!(info(&["hi"]).max_message_size(), None);
    }

    #[test]
    fn auth_mechanisms_listed() {
        let info = info(&["hi", "AUTH LOGIN PLAIN"]);
        assert_eq!(
            info.auth_mechanisms(),
            Some(vec![AuthMechanism::Login, AuthMechanism::Plain])
        );
        assert_eq!(ServerInfo::default().auth_mechanisms(), None);
    }

    #[test]
    fn unusable_auth_is_not_missing_auth() {
        let info = info(&["hi", "AUTH CRAM-MD5 XOAUTH2"]);
        assert_eq!(info.auth_mechanisms(), Some(vec![]));
    }
}
