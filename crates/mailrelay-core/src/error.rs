//! Error taxonomy for negotiation and dispatch.

use std::error::Error as StdError;
use std::fmt;

use crate::strategy::TransportStrategy;

/// Which side of the envelope an address belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressField {
    /// The sender (`from`).
    From,
    /// The recipient (`to`).
    To,
}

impl fmt::Display for AddressField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::From => "sender",
            Self::To => "recipient",
        })
    }
}

/// Failure to open a session with the mail host.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Every configured strategy was refused by the server.
    #[error(
        "failed to connect to SMTP server {host}: all configured ports/modes failed ({})",
        describe(.attempted)
    )]
    Exhausted {
        /// Mail host.
        host: String,
        /// Strategies tried, in order.
        attempted: Vec<TransportStrategy>,
        /// Failure of the last attempt.
        #[source]
        source: mailrelay_smtp::Error,
    },

    /// An attempt failed for a reason that does not warrant fallback.
    #[error("failed to connect to SMTP server {host} on {strategy}")]
    Fatal {
        /// Mail host.
        host: String,
        /// Strategy that was being tried.
        strategy: TransportStrategy,
        /// Underlying failure.
        #[source]
        source: mailrelay_smtp::Error,
    },

    /// Nothing to try.
    #[error("no connection strategies configured for {host}")]
    NoStrategies {
        /// Mail host.
        host: String,
    },
}

fn describe(strategies: &[TransportStrategy]) -> String {
    strategies
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Classified outcome of a failed dispatch.
///
/// Display messages name the category only; causes are reachable through
/// [`std::error::Error::source`] and belong in logs, not in replies.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// `from` or `to` is not a mailbox address. No connection was attempted.
    #[error("invalid {field} address")]
    InvalidAddress {
        /// Offending field.
        field: AddressField,
        /// Parse failure.
        #[source]
        source: mailrelay_smtp::Error,
    },

    /// Every connection strategy was refused.
    #[error("mail transport unavailable")]
    TransportUnavailable(#[source] ConnectionError),

    /// The server rejected the account credentials.
    #[error("SMTP authentication failed")]
    AuthenticationFailed(#[source] mailrelay_smtp::Error),

    /// The message was not accepted.
    #[error("message transmission failed")]
    TransmissionFailed(#[source] mailrelay_smtp::Error),

    /// Negotiation hit a fault that is not a server refusal.
    #[error("unexpected failure while connecting to the mail server")]
    Unexpected(#[source] ConnectionError),
}

impl DispatchError {
    /// Returns true when the caller sent bad input rather than the relay failing.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidAddress { .. })
    }
}

impl From<ConnectionError> for DispatchError {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::Exhausted { .. } => Self::TransportUnavailable(err),
            ConnectionError::Fatal { .. } | ConnectionError::NoStrategies { .. } => {
                Self::Unexpected(err)
            }
        }
    }
}

/// Displays an error followed by its chain of sources, `outer: inner: root`.
pub struct ErrorChain<'a>(pub &'a (dyn StdError + 'static));

impl fmt::Display for ErrorChain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = self.0.source();
        while let Some(err) = source {
            write!(f, ": {err}")?;
            source = err.source();
        }
        Ok(())
    }
}
