//! Live mail sessions.

use std::mem;

use async_trait::async_trait;
use mailrelay_smtp::{Authenticated, Client, Connected, Error, Result};

use crate::envelope::Envelope;

/// One open connection to the mail host.
///
/// A session is owned by exactly one dispatch: it is authenticated once,
/// used for one transmission and then consumed by [`MailSession::close`].
#[async_trait]
pub trait MailSession: Send {
    /// Authenticates with the account credentials.
    async fn authenticate(&mut self, username: &str, password: &str) -> Result<()>;

    /// Transmits one message.
    async fn send(&mut self, envelope: &Envelope) -> Result<()>;

    /// Ends the session.
    async fn close(self: Box<Self>) -> Result<()>;
}

enum State {
    Connected(Client<Connected>),
    Authenticated(Client<Authenticated>),
    /// Only seen while a command is in flight, or after one was cancelled.
    Dropped,
}

/// [`MailSession`] backed by the type-state SMTP client.
///
/// A rejected command leaves the client in place, so [`MailSession::close`]
/// still says `QUIT` after failed authentication or a refused message.
pub struct SmtpSession {
    state: State,
}

impl SmtpSession {
    /// Wraps a client that has completed its greeting (and TLS, if any).
    #[must_use]
    pub const fn new(client: Client<Connected>) -> Self {
        Self {
            state: State::Connected(client),
        }
    }
}

#[async_trait]
impl MailSession for SmtpSession {
    async fn authenticate(&mut self, username: &str, password: &str) -> Result<()> {
        match mem::replace(&mut self.state, State::Dropped) {
            State::Connected(client) => match client.try_authenticate(username, password).await {
                Ok(client) => {
                    self.state = State::Authenticated(client);
                    Ok(())
                }
                Err((client, err)) => {
                    self.state = State::Connected(client);
                    Err(err)
                }
            },
            other => {
                self.state = other;
                Err(Error::InvalidState("session is not awaiting authentication".into()))
            }
        }
    }

    async fn send(&mut self, envelope: &Envelope) -> Result<()> {
        match mem::replace(&mut self.state, State::Dropped) {
            State::Authenticated(client) => {
                let message = envelope.render();
                let recipients = [envelope.to.address.clone()];
                let (client, outcome) = match client
                    .try_send_mail(&envelope.from.address, &recipients, &message)
                    .await
                {
                    Ok(client) => (client, Ok(())),
                    Err((client, err)) => (client, Err(err)),
                };
                self.state = State::Authenticated(client);
                outcome
            }
            other => {
                self.state = other;
                Err(Error::InvalidState("session is not authenticated".into()))
            }
        }
    }

    async fn close(self: Box<Self>) -> Result<()> {
        match self.state {
            State::Connected(client) => client.quit().await,
            State::Authenticated(client) => client.quit().await,
            State::Dropped => {
                tracing::debug!("connection was dropped mid-command, nothing to close");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use mailrelay_smtp::SmtpStream;
    use tokio_test::io::Builder;

    async fn connected(mock: tokio_test::io::Mock) -> Client<Connected> {
        Client::from_stream(SmtpStream::plain(mock))
            .await
            .unwrap()
            .ehlo("relay.test")
            .await
            .unwrap()
    }

    fn envelope() -> Envelope {
        Envelope::new("a@example.com", "b@example.com", "s", "b").unwrap()
    }

    #[tokio::test]
    async fn send_requires_authentication_and_close_still_quits() {
        let mock = Builder::new()
            .read(b"220 mx.test ESMTP\r\n")
            .write(b"EHLO relay.test\r\n")
            .read(b"250-mx.test\r\n250 AUTH PLAIN\r\n")
            .write(b"QUIT\r\n")
            .read(b"221 bye\r\n")
            .build();
        let mut session = SmtpSession::new(connected(mock).await);

        let err = session.send(&envelope()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));

        Box::new(session).close().await.unwrap();
    }

    #[tokio::test]
    async fn rejected_credentials_still_quit() {
        let mock = Builder::new()
            .read(b"220 mx.test ESMTP\r\n")
            .write(b"EHLO relay.test\r\n")
            .read(b"250-mx.test\r\n250 AUTH PLAIN LOGIN\r\n")
            .write(b"AUTH PLAIN AHUAcA==\r\n")
            .read(b"535 5.7.8 authentication failed\r\n")
            .write(b"QUIT\r\n")
            .read(b"221 bye\r\n")
            .build();
        let mut session = SmtpSession::new(connected(mock).await);

        let err = session.authenticate("u", "p").await.unwrap_err();
        assert_eq!(err.reply_code(), Some(535));

        Box::new(session).close().await.unwrap();
    }

    #[tokio::test]
    async fn refused_recipient_still_quits() {
        let mock = Builder::new()
            .read(b"220 mx.test ESMTP\r\n")
            .write(b"EHLO relay.test\r\n")
            .read(b"250-mx.test\r\n250 AUTH PLAIN\r\n")
            .write(b"AUTH PLAIN AHUAcA==\r\n")
            .read(b"235 ok\r\n")
            .write(b"MAIL FROM:<a@example.com>\r\n")
            .read(b"250 ok\r\n")
            .write(b"RCPT TO:<b@example.com>\r\n")
            .read(b"550 5.1.1 no such user\r\n")
            .write(b"RSET\r\n")
            .read(b"250 ok\r\n")
            .write(b"QUIT\r\n")
            .read(b"221 bye\r\n")
            .build();
        let mut session = SmtpSession::new(connected(mock).await);

        session.authenticate("u", "p").await.unwrap();
        let err = session.send(&envelope()).await.unwrap_err();
        assert_eq!(err.reply_code(), Some(550));

        Box::new(session).close().await.unwrap();
    }

    #[tokio::test]
    async fn second_authentication_is_rejected_locally() {
        let mock = Builder::new()
            .read(b"220 mx.test ESMTP\r\n")
            .write(b"EHLO relay.test\r\n")
            .read(b"250 mx.test\r\n")
            .write(b"AUTH PLAIN AHUAcA==\r\n")
            .read(b"235 ok\r\n")
            .write(b"QUIT\r\n")
            .read(b"221 bye\r\n")
            .build();
        let mut session = SmtpSession::new(connected(mock).await);

        session.authenticate("u", "p").await.unwrap();
        let err = session.authenticate("u", "p").await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));

        Box::new(session).close().await.unwrap();
    }
}
