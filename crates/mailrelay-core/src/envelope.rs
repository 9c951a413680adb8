//! Validated messages and their RFC 5322 rendering.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Local, TimeZone};
use mailrelay_smtp::Mailbox;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{AddressField, DispatchError};

/// Longest line allowed by RFC 5322, excluding CRLF.
const MAX_LINE: usize = 998;

/// Base64 line width for bodies (RFC 2045).
const BASE64_LINE: usize = 76;

/// Raw bytes per encoded-word so each word stays under 75 columns.
const ENCODED_WORD_BYTES: usize = 45;

/// Subjects longer than this are encoded so they can be folded.
const MAX_PLAIN_SUBJECT: usize = 900;

/// A send request as it arrives from a caller, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SendRequest {
    /// Sender mailbox.
    #[serde(alias = "From")]
    pub from: String,
    /// Recipient mailbox.
    #[serde(alias = "To")]
    pub to: String,
    /// Subject line.
    #[serde(alias = "Subject")]
    pub subject: String,
    /// HTML body.
    #[serde(alias = "Body")]
    pub body: String,
}

impl SendRequest {
    /// Builds a request from its four fields.
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
        }
    }
}

/// A message whose sender and recipient have been validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Sender.
    pub from: Mailbox,
    /// Recipient.
    pub to: Mailbox,
    /// Subject, unencoded.
    pub subject: String,
    /// HTML body, sent unmodified.
    pub html_body: String,
}

impl Envelope {
    /// Parses both mailboxes, sender first.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidAddress`] naming the first field that
    /// does not parse.
    pub fn new(
        from: &str,
        to: &str,
        subject: impl Into<String>,
        html_body: impl Into<String>,
    ) -> Result<Self, DispatchError> {
        let from = Mailbox::parse(from).map_err(|source| DispatchError::InvalidAddress {
            field: AddressField::From,
            source,
        })?;
        let to = Mailbox::parse(to).map_err(|source| DispatchError::InvalidAddress {
            field: AddressField::To,
            source,
        })?;

        Ok(Self {
            from,
            to,
            subject: subject.into(),
            html_body: html_body.into(),
        })
    }

    /// Validates a [`SendRequest`].
    ///
    /// # Errors
    ///
    /// See [`Envelope::new`].
    pub fn from_request(request: &SendRequest) -> Result<Self, DispatchError> {
        Self::new(&request.from, &request.to, &request.subject, &request.body)
    }

    /// Renders the message with the current local time and a fresh Message-ID.
    #[must_use]
    pub fn render(&self) -> Vec<u8> {
        let message_id = format!("{}@{}", Uuid::new_v4(), self.from.address.domain());
        self.render_at(&Local::now(), &message_id)
    }

    /// Renders the message with a fixed date and Message-ID.
    #[must_use]
    pub fn render_at<Tz>(&self, date: &DateTime<Tz>, message_id: &str) -> Vec<u8>
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        let encoding = TransferEncoding::for_body(&self.html_body);

        let mut out = String::with_capacity(self.html_body.len() * 4 / 3 + 512);
        push_header(&mut out, "Date", &date.to_rfc2822());
        push_header(&mut out, "Message-ID", &format!("<{message_id}>"));
        push_header(&mut out, "From", &encode_mailbox(&self.from));
        push_header(&mut out, "To", &encode_mailbox(&self.to));
        push_header(&mut out, "Subject", &encode_subject(&self.subject));
        push_header(&mut out, "MIME-Version", "1.0");
        push_header(&mut out, "Content-Type", "text/html; charset=utf-8");
        push_header(&mut out, "Content-Transfer-Encoding", encoding.header_value());
        out.push_str("\r\n");

        match encoding {
            TransferEncoding::SevenBit => out.push_str(&self.html_body),
            TransferEncoding::Base64 => {
                let encoded = BASE64.encode(self.html_body.as_bytes());
                for line in encoded.as_bytes().chunks(BASE64_LINE) {
                    // Base64 output is ASCII, so every chunk is valid UTF-8.
                    out.push_str(&String::from_utf8_lossy(line));
                    out.push_str("\r\n");
                }
            }
        }

        out.into_bytes()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransferEncoding {
    SevenBit,
    Base64,
}

impl TransferEncoding {
    fn for_body(body: &str) -> Self {
        let plain = body.is_ascii()
            && !body.contains('\0')
            && body.lines().all(|line| line.len() <= MAX_LINE && !line.contains('\r'));
        if plain { Self::SevenBit } else { Self::Base64 }
    }

    const fn header_value(self) -> &'static str {
        match self {
            Self::SevenBit => "7bit",
            Self::Base64 => "base64",
        }
    }
}

fn push_header(out: &mut String, name: &str, value: &str) {
    out.push_str(name);
    out.push_str(": ");
    out.push_str(value);
    out.push_str("\r\n");
}

fn needs_encoding(text: &str) -> bool {
    !text.is_ascii() || text.chars().any(char::is_control)
}

fn encode_subject(subject: &str) -> String {
    if needs_encoding(subject) || subject.len() > MAX_PLAIN_SUBJECT {
        encoded_words(subject)
    } else {
        subject.to_string()
    }
}

fn encode_mailbox(mailbox: &Mailbox) -> String {
    match &mailbox.name {
        Some(name) if needs_encoding(name) => {
            format!("{} <{}>", encoded_words(name), mailbox.address)
        }
        _ => mailbox.to_string(),
    }
}

/// RFC 2047 base64 encoded-words, folded between words.
///
/// Splits only on character boundaries so no word carries half a code point.
fn encoded_words(text: &str) -> String {
    let mut words = Vec::new();
    let mut start = 0;
    let mut end = 0;
    for (idx, ch) in text.char_indices() {
        let next = idx + ch.len_utf8();
        if next - start > ENCODED_WORD_BYTES && end > start {
            words.push(&text[start..end]);
            start = end;
        }
        end = next;
    }
    if end > start || words.is_empty() {
        words.push(&text[start..end]);
    }

    words
        .iter()
        .map(|word| format!("=?UTF-8?B?{}?=", BASE64.encode(word.as_bytes())))
        .collect::<Vec<_>>()
        .join("\r\n ")
}
