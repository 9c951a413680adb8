//! Transport strategies tried when opening a session.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How the connection is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecurityMode {
    /// Plaintext greeting upgraded in place with `STARTTLS`.
    StartTls,
    /// TLS from the first byte.
    ImplicitTls,
}

impl SecurityMode {
    /// Get display name for the security mode.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::StartTls => "STARTTLS",
            Self::ImplicitTls => "SSL/TLS",
        }
    }
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// One `(port, security mode)` pair the negotiator may try.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransportStrategy {
    /// TCP port.
    pub port: u16,
    /// Security mode used on that port.
    pub mode: SecurityMode,
}

impl TransportStrategy {
    /// Creates a strategy.
    #[must_use]
    pub const fn new(port: u16, mode: SecurityMode) -> Self {
        Self { port, mode }
    }
}

impl fmt::Display for TransportStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port {} ({})", self.port, self.mode)
    }
}

/// Submission on 587 with STARTTLS, then the legacy implicit-TLS port 465.
pub const DEFAULT_STRATEGIES: [TransportStrategy; 2] = [
    TransportStrategy::new(587, SecurityMode::StartTls),
    TransportStrategy::new(465, SecurityMode::ImplicitTls),
];

/// Which connection failures move the negotiator on to the next strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FallbackPolicy {
    /// Only a negative reply from the server is a reason to fall back;
    /// everything else aborts negotiation.
    #[default]
    ProtocolRefusal,
    /// Any failure to open a session falls back, including refused or
    /// unreachable TCP connections and TLS handshake failures.
    AnyFailure,
}

impl FallbackPolicy {
    /// Returns true if a failed attempt with this error should fall back.
    #[must_use]
    pub const fn falls_back_on(self, error: &mailrelay_smtp::Error) -> bool {
        match self {
            Self::ProtocolRefusal => error.is_protocol_refusal(),
            Self::AnyFailure => true,
        }
    }
}

impl FromStr for FallbackPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "protocolrefusal" => Ok(Self::ProtocolRefusal),
            "anyfailure" => Ok(Self::AnyFailure),
            _ => Err(s.to_string()),
        }
    }
}
