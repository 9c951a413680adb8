//! Connection negotiation across ordered transport strategies.

use std::sync::Arc;

use async_trait::async_trait;
use mailrelay_smtp::Client;
use mailrelay_smtp::connection::{connect, connect_tls};

use crate::error::{ConnectionError, ErrorChain};
use crate::session::{MailSession, SmtpSession};
use crate::strategy::{FallbackPolicy, SecurityMode, TransportStrategy};

/// Opens a single session for a single strategy.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connects to `host` as described by `strategy`.
    ///
    /// On success the session has been greeted and, for
    /// [`SecurityMode::StartTls`], upgraded to TLS.
    async fn connect(
        &self,
        host: &str,
        strategy: TransportStrategy,
    ) -> mailrelay_smtp::Result<Box<dyn MailSession>>;
}

/// [`Connector`] speaking SMTP over TCP.
#[derive(Debug, Clone)]
pub struct SmtpConnector {
    helo_name: String,
}

impl SmtpConnector {
    /// Creates a connector announcing itself as `helo_name` in EHLO.
    #[must_use]
    pub fn new(helo_name: impl Into<String>) -> Self {
        Self {
            helo_name: helo_name.into(),
        }
    }
}

#[async_trait]
impl Connector for SmtpConnector {
    async fn connect(
        &self,
        host: &str,
        strategy: TransportStrategy,
    ) -> mailrelay_smtp::Result<Box<dyn MailSession>> {
        let stream = match strategy.mode {
            SecurityMode::StartTls => connect(host, strategy.port).await?,
            SecurityMode::ImplicitTls => connect_tls(host, strategy.port).await?,
        };

        let client = Client::from_stream(stream).await?.ehlo(&self.helo_name).await?;
        let client = match strategy.mode {
            SecurityMode::StartTls => client.starttls(host).await?,
            SecurityMode::ImplicitTls => client,
        };

        Ok(Box::new(SmtpSession::new(client)))
    }
}

/// Outcome of one connection attempt, classified before any branching.
enum Attempt {
    Connected(Box<dyn MailSession>),
    Refused(mailrelay_smtp::Error),
    Fatal(mailrelay_smtp::Error),
}

impl Attempt {
    fn classify(
        result: mailrelay_smtp::Result<Box<dyn MailSession>>,
        policy: FallbackPolicy,
    ) -> Self {
        match result {
            Ok(session) => Self::Connected(session),
            Err(err) if policy.falls_back_on(&err) => Self::Refused(err),
            Err(err) => Self::Fatal(err),
        }
    }
}

/// Tries each strategy in order until one yields a session.
#[derive(Clone)]
pub struct Negotiator {
    connector: Arc<dyn Connector>,
    strategies: Vec<TransportStrategy>,
    policy: FallbackPolicy,
}

impl Negotiator {
    /// Creates a negotiator over a fixed strategy list.
    #[must_use]
    pub fn new(
        connector: Arc<dyn Connector>,
        strategies: impl Into<Vec<TransportStrategy>>,
        policy: FallbackPolicy,
    ) -> Self {
        Self {
            connector,
            strategies: strategies.into(),
            policy,
        }
    }

    /// Returns the strategies in the order they are tried.
    #[must_use]
    pub fn strategies(&self) -> &[TransportStrategy] {
        &self.strategies
    }

    /// Opens a session with `host`.
    ///
    /// The first strategy that connects wins and later ones are never tried.
    /// Failures the [`FallbackPolicy`] accepts are logged as warnings and
    /// the next strategy is tried; any other failure ends negotiation.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Exhausted`] wrapping the last failure when
    /// every strategy fell back, [`ConnectionError::Fatal`] for a failure
    /// outside the policy, and [`ConnectionError::NoStrategies`] for an
    /// empty list.
    pub async fn negotiate(&self, host: &str) -> Result<Box<dyn MailSession>, ConnectionError> {
        let mut last_failure = None;

        for &strategy in &self.strategies {
            let attempt = self.connector.connect(host, strategy).await;
            match Attempt::classify(attempt, self.policy) {
                Attempt::Connected(session) => {
                    tracing::info!(
                        host,
                        port = strategy.port,
                        mode = %strategy.mode,
                        "connected to mail server"
                    );
                    return Ok(session);
                }
                Attempt::Refused(err) => {
                    tracing::warn!(
                        host,
                        port = strategy.port,
                        mode = %strategy.mode,
                        error = %ErrorChain(&err),
                        "connection attempt refused, trying next strategy"
                    );
                    last_failure = Some(err);
                }
                Attempt::Fatal(source) => {
                    return Err(ConnectionError::Fatal {
                        host: host.to_string(),
                        strategy,
                        source,
                    });
                }
            }
        }

        match last_failure {
            Some(source) => Err(ConnectionError::Exhausted {
                host: host.to_string(),
                attempted: self.strategies.clone(),
                source,
            }),
            None => Err(ConnectionError::NoStrategies {
                host: host.to_string(),
            }),
        }
    }
}
