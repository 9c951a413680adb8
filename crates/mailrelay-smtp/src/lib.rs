//! # mailrelay-smtp
//!
//! Async SMTP submission client implementing the parts of RFC 5321 a relay
//! needs to hand one message to an upstream MTA.
//!
//! ## Features
//!
//! - **Type-state connection management**: compile-time enforcement of valid
//!   SMTP state transitions
//! - **TLS**: implicit TLS (port 465) and in-place STARTTLS upgrade (port 587)
//! - **Authentication**: PLAIN, with LOGIN for servers that offer nothing else
//! - **Extensions**: SIZE, 8BITMIME and SMTPUTF8 declared on `MAIL FROM`
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailrelay_smtp::{Address, Client};
//! use mailrelay_smtp::connection::connect;
//!
//! #[tokio::main]
//! async fn main() -> mailrelay_smtp::Result<()> {
//!     let stream = connect("smtp.example.com", 587).await?;
//!     let client = Client::from_stream(stream)
//!         .await?
//!         .ehlo("relay.example.com")
//!         .await?
//!         .starttls("smtp.example.com")
//!         .await?
//!         .authenticate("user@example.com", "password")
//!         .await?;
//!
//!     let from = Address::new("sender@example.com")?;
//!     let to = Address::new("recipient@example.com")?;
//!     let client = client
//!         .send_mail(&from, &[to], b"Subject: Test\r\n\r\nHello, World!\r\n")
//!         .await?;
//!
//!     client.quit().await
//! }
//! ```
//!
//! ## Connection States
//!
//! ```text
//! ┌──────────────┐
//! │  Connected   │ ─── ehlo() / starttls() ───┐
//! └──────────────┘                            │
//!        │ authenticate()  ◄──────────────────┘
//!        ▼
//! Authenticated ─── mail_from() ───→ MailTransaction ───→ RecipientAdded ───→ Data
//!        ▲                                                                   │
//!        └──────────────────────────── send_message() ──────────────────────┘
//! ```
//!
//! Errors separate server refusals ([`Error::is_protocol_refusal`]) from
//! local and network faults so callers can decide what is worth retrying.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
pub mod connection;
mod error;
pub mod parser;
pub mod types;

pub use connection::{
    Authenticated, Client, Connected, Data, MailTransaction, RecipientAdded, ServerInfo,
    SmtpStream, Transport,
};
pub use error::{Error, Result};
pub use types::{Address, AuthMechanism, Extension, Mailbox, Reply, ReplyClass, ReplyCode};
