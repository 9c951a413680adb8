//! Type-state SMTP client.

use super::{ServerInfo, SmtpStream};
use crate::command::{BodyType, Command, MailParams, encode_message_data, message_size};
use crate::error::{Error, Result};
use crate::parser::{is_last_reply_line, parse_reply};
use crate::types::{Address, AuthMechanism, Extension, Reply, ReplyCode};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::marker::PhantomData;

/// Type-state marker for connected state.
#[derive(Debug)]
pub struct Connected;

/// Type-state marker for authenticated state.
#[derive(Debug)]
pub struct Authenticated;

/// Type-state marker for mail transaction started.
#[derive(Debug)]
pub struct MailTransaction;

/// Type-state marker for recipient added.
#[derive(Debug)]
pub struct RecipientAdded;

/// Type-state marker for data mode.
#[derive(Debug)]
pub struct Data;

/// SMTP client with type-state pattern.
#[derive(Debug)]
pub struct Client<State> {
    stream: SmtpStream,
    server_info: ServerInfo,
    client_hostname: String,
    _state: PhantomData<State>,
}

impl Client<Connected> {
    /// Creates a client from a stream and reads the server greeting.
    ///
    /// # Errors
    ///
    /// Returns an error if reading the greeting fails or if the server
    /// greets with a negative reply (e.g. `554 No service`).
    pub async fn from_stream(mut stream: SmtpStream) -> Result<Self> {
        let greeting = read_reply(&mut stream).await?;
        let greeting = ensure_success(greeting)?;

        // First word after the code is the server's announced name
        let hostname = greeting
            .message
            .first()
            .and_then(|msg| msg.split_whitespace().next())
            .unwrap_or("unknown")
            .to_string();
        tracing::debug!(server = %hostname, "smtp greeting received");

        Ok(Self {
            stream,
            server_info: ServerInfo {
                hostname,
                ..ServerInfo::default()
            },
            client_hostname: String::from("localhost"),
            _state: PhantomData,
        })
    }

    /// Sends EHLO and discovers server capabilities.
    ///
    /// # Errors
    ///
    /// Returns an error if the EHLO command fails.
    pub async fn ehlo(mut self, client_hostname: &str) -> Result<Self> {
        self.client_hostname = client_hostname.to_string();
        self.refresh_capabilities().await?;
        Ok(self)
    }

    /// Upgrades the connection to TLS using STARTTLS, then repeats EHLO
    /// because capabilities announced in plaintext are discarded.
    ///
    /// # Errors
    ///
    /// Returns an error if STARTTLS is not advertised, if the server refuses
    /// it, or if the handshake fails.
    pub async fn starttls(mut self, server_hostname: &str) -> Result<Self> {
        if !self.server_info.supports_starttls() {
            return Err(Error::NotSupported("STARTTLS".into()));
        }

        self.command(Command::StartTls).await?;
        self.stream = self.stream.upgrade_to_tls(server_hostname).await?;
        self.refresh_capabilities().await?;
        Ok(self)
    }

    /// Authenticates with the best mechanism the server offers.
    ///
    /// PLAIN is preferred; LOGIN is used when it is the only supported
    /// option. Servers that do not advertise `AUTH` at all are tried with
    /// PLAIN.
    ///
    /// # Errors
    ///
    /// Returns an error if the advertised mechanisms include neither PLAIN
    /// nor LOGIN, or if the server rejects the credentials.
    pub async fn authenticate(
        self,
        username: &str,
        password: &str,
    ) -> Result<Client<Authenticated>> {
        self.try_authenticate(username, password)
            .await
            .map_err(|(_, err)| err)
    }

    /// Same as [`Client::authenticate`], but a failure hands the client
    /// back so the connection can still be closed with `QUIT`.
    ///
    /// # Errors
    ///
    /// Returns the unauthenticated client together with the error.
    #[allow(clippy::result_large_err)]
    pub async fn try_authenticate(
        mut self,
        username: &str,
        password: &str,
    ) -> std::result::Result<Client<Authenticated>, (Self, Error)> {
        let exchange = match self.select_mechanism() {
            Ok(AuthMechanism::Plain) => self.plain_exchange(username, password).await,
            Ok(AuthMechanism::Login) => self.login_exchange(username, password).await,
            Err(err) => Err(err),
        };
        match exchange {
            Ok(()) => Ok(self.transition()),
            Err(err) => Err((self, err)),
        }
    }

    /// Authenticates using PLAIN mechanism.
    ///
    /// # Errors
    ///
    /// Returns an error if authentication fails.
    pub async fn auth_plain(
        mut self,
        username: &str,
        password: &str,
    ) -> Result<Client<Authenticated>> {
        self.plain_exchange(username, password).await?;
        Ok(self.transition())
    }

    /// Authenticates using the LOGIN mechanism.
    ///
    /// # Errors
    ///
    /// Returns an error if authentication fails.
    pub async fn auth_login(
        mut self,
        username: &str,
        password: &str,
    ) -> Result<Client<Authenticated>> {
        self.login_exchange(username, password).await?;
        Ok(self.transition())
    }

    fn select_mechanism(&self) -> Result<AuthMechanism> {
        match self.server_info.auth_mechanisms() {
            None => Ok(AuthMechanism::Plain),
            Some(offered) if offered.contains(&AuthMechanism::Plain) => Ok(AuthMechanism::Plain),
            Some(offered) if offered.contains(&AuthMechanism::Login) => Ok(AuthMechanism::Login),
            Some(_) => Err(Error::NotSupported(
                "AUTH PLAIN or LOGIN (server offers neither)".into(),
            )),
        }
    }

    async fn plain_exchange(&mut self, username: &str, password: &str) -> Result<()> {
        let credentials = format!("\0{username}\0{password}");
        let cmd = Command::Auth {
            mechanism: AuthMechanism::Plain,
            initial_response: Some(STANDARD.encode(credentials.as_bytes())),
        };
        self.command(cmd).await?;
        tracing::debug!(mechanism = "PLAIN", "smtp authentication accepted");
        Ok(())
    }

    async fn login_exchange(&mut self, username: &str, password: &str) -> Result<()> {
        let start = Command::Auth {
            mechanism: AuthMechanism::Login,
            initial_response: None,
        };
        self.challenge(start).await?;
        self.challenge(Command::AuthResponse {
            data: STANDARD.encode(username.as_bytes()),
        })
        .await?;
        self.command(Command::AuthResponse {
            data: STANDARD.encode(password.as_bytes()),
        })
        .await?;
        tracing::debug!(mechanism = "LOGIN", "smtp authentication accepted");
        Ok(())
    }

    async fn refresh_capabilities(&mut self) -> Result<()> {
        let cmd = Command::Ehlo {
            hostname: self.client_hostname.clone(),
        };
        let reply = self.command(cmd).await?;
        self.server_info.update_from_ehlo(&reply.message);
        Ok(())
    }

    async fn challenge(&mut self, cmd: Command) -> Result<Reply> {
        let verb = cmd.verb();
        let reply = self.send_command(cmd).await?;
        if reply.code == ReplyCode::AUTH_CONTINUE {
            Ok(reply)
        } else {
            tracing::debug!(command = verb, code = %reply.code, "authentication challenge refused");
            Err(Error::smtp_error(reply.code.as_u16(), reply.message_text()))
        }
    }
}

impl Client<Authenticated> {
    /// Computes the `MAIL FROM` parameters for a message and its envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if the message exceeds the advertised `SIZE`, or if
    /// an address needs SMTPUTF8 and the server does not offer it.
    pub fn mail_params(&self, addresses: &[&Address], message: &[u8]) -> Result<MailParams> {
        let info = &self.server_info;
        let mut params = MailParams::default();

        if let Some(limit) = info.max_message_size() {
            let size = message_size(message);
            if size > limit {
                return Err(Error::MessageTooLarge { size, limit });
            }
            params.size = Some(size);
        }

        if !message.is_ascii() && info.supports(&Extension::EightBitMime) {
            params.body = Some(BodyType::EightBitMime);
        }

        if addresses.iter().any(|addr| !addr.is_ascii()) {
            if !info.supports(&Extension::SmtpUtf8) {
                return Err(Error::NotSupported("SMTPUTF8".into()));
            }
            params.smtputf8 = true;
        }

        Ok(params)
    }

    /// Starts a mail transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the MAIL FROM command fails.
    pub async fn mail_from(
        mut self,
        from: Address,
        params: MailParams,
    ) -> Result<Client<MailTransaction>> {
        self.command(Command::MailFrom { from, params }).await?;
        Ok(self.transition())
    }

    /// Runs a complete transaction: `MAIL FROM`, one `RCPT TO` per
    /// recipient, `DATA` and the message content.
    ///
    /// # Errors
    ///
    /// Returns an error if there are no recipients, if the message cannot
    /// be accepted by this server, or if any step is rejected.
    pub async fn send_mail(
        self,
        from: &Address,
        recipients: &[Address],
        message: &[u8],
    ) -> Result<Self> {
        self.try_send_mail(from, recipients, message)
            .await
            .map_err(|(_, err)| err)
    }

    /// Same as [`Client::send_mail`], but a failure hands the client back
    /// so the connection can still be closed with `QUIT`.
    ///
    /// If the server rejected a step after accepting `MAIL FROM`, the open
    /// transaction is aborted with `RSET` before the client is returned.
    ///
    /// # Errors
    ///
    /// Returns the client together with the error that ended the
    /// transaction.
    #[allow(clippy::result_large_err)]
    pub async fn try_send_mail(
        mut self,
        from: &Address,
        recipients: &[Address],
        message: &[u8],
    ) -> std::result::Result<Self, (Self, Error)> {
        match self.transaction(from, recipients, message).await {
            Ok(()) => {
                tracing::debug!(
                    recipients = recipients.len(),
                    bytes = message.len(),
                    "message accepted"
                );
                Ok(self)
            }
            Err(err) => Err((self, err)),
        }
    }

    async fn transaction(
        &mut self,
        from: &Address,
        recipients: &[Address],
        message: &[u8],
    ) -> Result<()> {
        if recipients.is_empty() {
            return Err(Error::InvalidAddress("No recipients specified".into()));
        }

        let mut envelope: Vec<&Address> = vec![from];
        envelope.extend(recipients);
        let params = self.mail_params(&envelope, message)?;

        self.command(Command::MailFrom {
            from: from.clone(),
            params,
        })
        .await?;

        let result = self.deliver(recipients, message).await;
        if result.as_ref().is_err_and(|err| err.reply_code().is_some()) {
            self.reset_transaction().await;
        }
        result
    }

    async fn reset_transaction(&mut self) {
        if let Err(err) = self.command(Command::Rset).await {
            tracing::debug!(error = %err, "failed to reset rejected transaction");
        }
    }

    async fn deliver(&mut self, recipients: &[Address], message: &[u8]) -> Result<()> {
        for recipient in recipients {
            self.command(Command::RcptTo {
                to: recipient.clone(),
            })
            .await?;
        }
        self.start_data().await?;
        self.finish_data(message).await
    }
}

impl Client<MailTransaction> {
    /// Adds a recipient to the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the RCPT TO command fails.
    pub async fn rcpt_to(mut self, to: Address) -> Result<Client<RecipientAdded>> {
        self.command(Command::RcptTo { to }).await?;
        Ok(self.transition())
    }

    /// Aborts the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the RSET command fails.
    pub async fn reset(mut self) -> Result<Client<Authenticated>> {
        self.command(Command::Rset).await?;
        Ok(self.transition())
    }
}

impl Client<RecipientAdded> {
    /// Adds another recipient to the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the RCPT TO command fails.
    pub async fn rcpt_to(mut self, to: Address) -> Result<Self> {
        self.command(Command::RcptTo { to }).await?;
        Ok(self)
    }

    /// Begins sending message data.
    ///
    /// # Errors
    ///
    /// Returns an error unless the server answers `354`.
    pub async fn data(mut self) -> Result<Client<Data>> {
        self.start_data().await?;
        Ok(self.transition())
    }

    /// Aborts the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the RSET command fails.
    pub async fn reset(mut self) -> Result<Client<Authenticated>> {
        self.command(Command::Rset).await?;
        Ok(self.transition())
    }
}

impl Client<Data> {
    /// Sends the message content and completes the transaction.
    ///
    /// Message should be RFC 5322 formatted; see [`encode_message_data`]
    /// for the transformations applied on the wire.
    ///
    /// # Errors
    ///
    /// Returns an error if sending the message fails or server rejects it.
    pub async fn send_message(mut self, message: &[u8]) -> Result<Client<Authenticated>> {
        self.finish_data(message).await?;
        Ok(self.transition())
    }
}

// Common implementation for all states
impl<S> Client<S> {
    /// Returns the capabilities discovered so far.
    #[must_use]
    pub const fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    /// Returns true once the conversation is encrypted.
    #[must_use]
    pub const fn is_encrypted(&self) -> bool {
        self.stream.is_tls()
    }

    fn transition<T>(self) -> Client<T> {
        Client {
            stream: self.stream,
            server_info: self.server_info,
            client_hostname: self.client_hostname,
            _state: PhantomData,
        }
    }

    async fn send_command(&mut self, cmd: Command) -> Result<Reply> {
        tracing::trace!(command = cmd.verb(), "smtp command");
        self.stream.write_all(&cmd.serialize()).await?;
        read_reply(&mut self.stream).await
    }

    /// Sends a command and requires a 2xx reply.
    async fn command(&mut self, cmd: Command) -> Result<Reply> {
        let reply = self.send_command(cmd).await?;
        ensure_success(reply)
    }

    async fn start_data(&mut self) -> Result<()> {
        let reply = self.send_command(Command::Data).await?;
        if reply.code != ReplyCode::START_DATA {
            return Err(Error::smtp_error(reply.code.as_u16(), reply.message_text()));
        }
        Ok(())
    }

    async fn finish_data(&mut self, message: &[u8]) -> Result<()> {
        self.stream.write_all(&encode_message_data(message)).await?;
        let reply = read_reply(&mut self.stream).await?;
        ensure_success(reply)?;
        Ok(())
    }

    /// Sends QUIT and closes the connection (available in any state).
    ///
    /// # Errors
    ///
    /// Returns an error if the QUIT command fails.
    pub async fn quit(mut self) -> Result<()> {
        let reply = self.send_command(Command::Quit).await?;
        if !reply.is_success() && reply.code != ReplyCode::CLOSING {
            return Err(Error::smtp_error(reply.code.as_u16(), reply.message_text()));
        }
        Ok(())
    }
}

fn ensure_success(reply: Reply) -> Result<Reply> {
    if reply.is_success() {
        Ok(reply)
    } else {
        Err(Error::smtp_error(reply.code.as_u16(), reply.message_text()))
    }
}

async fn read_reply(stream: &mut SmtpStream) -> Result<Reply> {
    let mut lines = Vec::new();
    loop {
        let line = stream.read_line().await?;
        if line.is_empty() {
            continue;
        }

        let is_last = is_last_reply_line(&line);
        lines.push(line);

        if is_last {
            break;
        }
    }

    parse_reply(&lines)
}
