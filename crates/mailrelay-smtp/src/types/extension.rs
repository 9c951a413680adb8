//! EHLO keywords the relay acts on.

/// One capability line from an EHLO reply.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Extension {
    /// `STARTTLS` (RFC 3207).
    StartTls,
    /// `AUTH` with the mechanisms this client can use.
    Auth(Vec<AuthMechanism>),
    /// `SIZE`, with the advertised limit if one was given.
    Size(Option<usize>),
    /// `8BITMIME` (RFC 6152).
    EightBitMime,
    /// `SMTPUTF8` (RFC 6531).
    SmtpUtf8,
    /// Any other keyword, kept verbatim.
    Other(String),
}

impl Extension {
    /// Parses one EHLO capability line. Keywords are case-insensitive.
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let mut words = line.split_whitespace();
        let keyword = words.next().map(str::to_ascii_uppercase);

        match keyword.as_deref() {
            Some("STARTTLS") => Self::StartTls,
            Some("AUTH") => Self::Auth(words.filter_map(AuthMechanism::parse).collect()),
            Some("SIZE") => Self::Size(words.next().and_then(|limit| limit.parse().ok())),
            Some("8BITMIME") => Self::EightBitMime,
            Some("SMTPUTF8") => Self::SmtpUtf8,
            _ => Self::Other(line.to_string()),
        }
    }
}

/// SASL mechanisms supported for password authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMechanism {
    /// `PLAIN` (RFC 4616).
    Plain,
    /// `LOGIN`, for servers that offer nothing better.
    Login,
}

impl AuthMechanism {
    /// Parses a mechanism name, ignoring ones this client cannot use.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("PLAIN") {
            Some(Self::Plain)
        } else if name.eq_ignore_ascii_case("LOGIN") {
            Some(Self::Login)
        } else {
            None
        }
    }

    /// Name as sent in `AUTH`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
        }
    }
}
