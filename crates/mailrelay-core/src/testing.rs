//! Scripted connectors and sessions for unit tests.

#![allow(clippy::unwrap_used)]

use std::collections::VecDeque;
use std::mem;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mailrelay_smtp::{Error, Result};

use crate::envelope::Envelope;
use crate::negotiator::Connector;
use crate::session::MailSession;
use crate::strategy::TransportStrategy;

/// Something a scripted connector or session was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Connect(u16),
    Authenticate(String),
    Send(String),
    Close,
}

#[derive(Default)]
struct Faults {
    authenticate: Option<Error>,
    send: Option<Error>,
    close: Option<Error>,
}

/// Plays back a fixed list of connection outcomes, one per attempt.
#[derive(Default)]
pub struct ScriptedConnector {
    script: Mutex<VecDeque<Result<()>>>,
    faults: Mutex<Faults>,
    events: Arc<Mutex<Vec<Event>>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next attempt opens a session.
    pub fn accept(self) -> Self {
        self.script.lock().unwrap().push_back(Ok(()));
        self
    }

    /// Next attempt fails with `err`.
    pub fn refuse(self, err: Error) -> Self {
        self.script.lock().unwrap().push_back(Err(err));
        self
    }

    pub fn fail_authentication(self, err: Error) -> Self {
        self.faults.lock().unwrap().authenticate = Some(err);
        self
    }

    pub fn fail_send(self, err: Error) -> Self {
        self.faults.lock().unwrap().send = Some(err);
        self
    }

    pub fn fail_close(self, err: Error) -> Self {
        self.faults.lock().unwrap().close = Some(err);
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, wanted: &Event) -> usize {
        self.events().iter().filter(|event| *event == wanted).count()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, _host: &str, strategy: TransportStrategy) -> Result<Box<dyn MailSession>> {
        self.events.lock().unwrap().push(Event::Connect(strategy.port));
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::Protocol("unscripted connection attempt".into())));
        step?;

        let faults = mem::take(&mut *self.faults.lock().unwrap());
        Ok(Box::new(ScriptedSession {
            faults,
            events: Arc::clone(&self.events),
        }))
    }
}

struct ScriptedSession {
    faults: Faults,
    events: Arc<Mutex<Vec<Event>>>,
}

impl ScriptedSession {
    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl MailSession for ScriptedSession {
    async fn authenticate(&mut self, username: &str, _password: &str) -> Result<()> {
        self.record(Event::Authenticate(username.to_string()));
        self.faults.authenticate.take().map_or(Ok(()), Err)
    }

    async fn send(&mut self, envelope: &Envelope) -> Result<()> {
        self.record(Event::Send(envelope.to.address.to_string()));
        self.faults.send.take().map_or(Ok(()), Err)
    }

    async fn close(mut self: Box<Self>) -> Result<()> {
        self.record(Event::Close);
        self.faults.close.take().map_or(Ok(()), Err)
    }
}
