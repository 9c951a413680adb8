//! # mailrelay-core
//!
//! Mail dispatch core for `mailrelay`.
//!
//! This crate provides:
//! - Relay configuration (settings file plus environment overrides)
//! - Message envelopes and their RFC 5322 rendering
//! - Connection negotiation across ordered port/security strategies
//! - The [`Dispatcher`], which sends one message per call and always
//!   closes its session

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod config;
pub mod dispatcher;
pub mod envelope;
mod error;
pub mod negotiator;
pub mod session;
pub mod strategy;

#[cfg(test)]
mod testing;

pub use config::{ConfigError, RelayConfig, ValidationError};
pub use dispatcher::{Delivery, Dispatcher};
pub use envelope::{Envelope, SendRequest};
pub use error::{AddressField, ConnectionError, DispatchError, ErrorChain};
pub use negotiator::{Connector, Negotiator, SmtpConnector};
pub use session::{MailSession, SmtpSession};
pub use strategy::{DEFAULT_STRATEGIES, FallbackPolicy, SecurityMode, TransportStrategy};
