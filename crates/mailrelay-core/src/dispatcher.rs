//! Message dispatch: one message, one session, one outcome.

use std::fmt;
use std::sync::Arc;

use mailrelay_smtp::Address;

use crate::config::RelayConfig;
use crate::envelope::{Envelope, SendRequest};
use crate::error::{DispatchError, ErrorChain};
use crate::negotiator::{Connector, Negotiator, SmtpConnector};
use crate::session::MailSession;
use crate::strategy::{DEFAULT_STRATEGIES, TransportStrategy};

/// Proof that the upstream host accepted a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Recipient the message was accepted for.
    pub recipient: Address,
}

impl Delivery {
    /// Text returned to the caller on success.
    #[must_use]
    pub fn acknowledgement(&self) -> String {
        format!("Please check {}", self.recipient)
    }
}

/// Sends messages through the configured mail host.
///
/// Each call to [`Dispatcher::dispatch`] opens its own session, so a
/// dispatcher can be shared freely between concurrent requests.
#[derive(Clone)]
pub struct Dispatcher {
    config: Arc<RelayConfig>,
    negotiator: Negotiator,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .field("strategies", &self.negotiator.strategies())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Creates a dispatcher speaking SMTP with the default strategies.
    #[must_use]
    pub fn new(config: Arc<RelayConfig>) -> Self {
        let connector = Arc::new(SmtpConnector::new(config.helo_name.clone()));
        Self::with_connector(config, connector)
    }

    /// Creates a dispatcher using `connector` to open sessions.
    #[must_use]
    pub fn with_connector(config: Arc<RelayConfig>, connector: Arc<dyn Connector>) -> Self {
        Self::with_strategies(config, connector, DEFAULT_STRATEGIES)
    }

    /// Creates a dispatcher with an explicit strategy order.
    #[must_use]
    pub fn with_strategies(
        config: Arc<RelayConfig>,
        connector: Arc<dyn Connector>,
        strategies: impl Into<Vec<TransportStrategy>>,
    ) -> Self {
        let negotiator = Negotiator::new(connector, strategies, config.fallback);
        Self { config, negotiator }
    }

    /// Validates and sends one message.
    ///
    /// Addresses are checked before any network activity. Once a session is
    /// open it is closed exactly once, whether or not the message went out;
    /// a failure to close is logged and does not change the result.
    ///
    /// # Errors
    ///
    /// Returns the [`DispatchError`] category of the first failure.
    pub async fn dispatch(&self, request: &SendRequest) -> Result<Delivery, DispatchError> {
        let result = self.try_dispatch(request).await;
        if let Err(err) = &result {
            if err.is_client_error() {
                tracing::warn!(error = %ErrorChain(err), "rejected send request");
            } else {
                tracing::error!(
                    host = %self.config.host,
                    recipient = %request.to,
                    error = %ErrorChain(err),
                    "failed to send email"
                );
            }
        }
        result
    }

    async fn try_dispatch(&self, request: &SendRequest) -> Result<Delivery, DispatchError> {
        let envelope = Envelope::from_request(request)?;
        let mut session = self.negotiator.negotiate(&self.config.host).await?;

        let outcome = self.transact(session.as_mut(), &envelope).await;

        if let Err(err) = session.close().await {
            tracing::warn!(
                host = %self.config.host,
                error = %ErrorChain(&err),
                "failed to close SMTP session"
            );
        }

        outcome?;
        tracing::info!(recipient = %envelope.to.address, "email sent");
        Ok(Delivery {
            recipient: envelope.to.address,
        })
    }

    async fn transact(
        &self,
        session: &mut dyn MailSession,
        envelope: &Envelope,
    ) -> Result<(), DispatchError> {
        session
            .authenticate(&self.config.username, self.config.password())
            .await
            .map_err(DispatchError::AuthenticationFailed)?;
        session
            .send(envelope)
            .await
            .map_err(DispatchError::TransmissionFailed)
    }
}
