//! Engine - drives one core from a single-consumer inbox
//!
//! The engine owns the core exclusively, so handlers never overlap. It also
//! carries what the core leaves to its surroundings:
//! - Future messages are held in a backlog and replayed as the round moves
//! - Client requests are queued until committed; the proposer proposes the head
//! - A round timer starts a view change when the round stalls

use std::collections::VecDeque;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace};

use crate::backend::Backend;
use crate::backlog::Backlog;
use crate::config::ConsensusConfig;
use crate::error::ConsensusError;
use crate::events::ConsensusEvent;
use crate::machine::{Core, State};
use crate::round::RoundState;
use crate::types::{Digest, Message, Request, Subject, View};
use crate::validator::Validator;

/// Committed request hashes remembered to drop late duplicates
const RECENT_COMMITS: usize = 1024;

enum Input {
    Message(Vec<u8>),
    Request(Request),
    Shutdown,
}

/// Cloneable handle for feeding an engine
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Input>,
}

impl EngineHandle {
    /// Queue raw bytes received from the transport
    pub async fn deliver(&self, data: Vec<u8>) -> anyhow::Result<()> {
        self.tx
            .send(Input::Message(data))
            .await
            .map_err(|_| anyhow::anyhow!("Engine stopped"))
    }

    /// Queue raw bytes without waiting; fails if the inbox is full
    pub fn try_deliver(&self, data: Vec<u8>) -> anyhow::Result<()> {
        self.tx
            .try_send(Input::Message(data))
            .map_err(|e| anyhow::anyhow!("Failed to deliver message: {}", e))
    }

    /// Submit a client request for ordering
    pub async fn submit(&self, request: Request) -> anyhow::Result<()> {
        self.tx
            .send(Input::Request(request))
            .await
            .map_err(|_| anyhow::anyhow!("Engine stopped"))
    }

    /// Ask the engine to stop after the input already queued
    pub async fn shutdown(&self) {
        let _ = self.tx.send(Input::Shutdown).await;
    }
}

/// Single-consumer driver around a [`Core`]
pub struct Engine<B: Backend> {
    core: Core<B>,
    backlog: Backlog,
    requests: VecDeque<Request>,
    inbox: mpsc::Receiver<Input>,
    config: ConsensusConfig,
    /// Round we last proposed for, so a request is proposed once per round
    proposed: Option<View>,
    recent_commits: VecDeque<Digest>,
}

impl<B: Backend> Engine<B> {
    pub fn new(core: Core<B>, config: ConsensusConfig) -> (Self, EngineHandle) {
        let (tx, inbox) = mpsc::channel(config.inbox_capacity.max(1));
        let engine = Self {
            core,
            backlog: Backlog::new(config.backlog_capacity),
            requests: VecDeque::new(),
            inbox,
            config,
            proposed: None,
            recent_commits: VecDeque::new(),
        };
        (engine, EngineHandle { tx })
    }

    pub fn core(&self) -> &Core<B> {
        &self.core
    }

    /// Process input until shutdown; returns the core for inspection
    pub async fn run(mut self) -> anyhow::Result<Core<B>> {
        info!(
            address = %self.core.address(),
            validators = self.core.validators().size(),
            view = %self.core.next_round(),
            "Consensus engine started"
        );
        self.core.backend.post(ConsensusEvent::RoundStarted {
            view: self.core.next_round(),
        });

        let timeout = self.config.request_timeout();
        let mut deadline = Instant::now() + timeout;
        let mut was_waiting = false;

        loop {
            let waiting = self.is_waiting();
            if waiting && !was_waiting {
                deadline = Instant::now() + timeout;
            }
            was_waiting = waiting;

            let before = self.position();
            tokio::select! {
                input = self.inbox.recv() => match input {
                    Some(Input::Message(data)) => self.on_message(&data),
                    Some(Input::Request(request)) => self.on_request(request),
                    Some(Input::Shutdown) | None => break,
                },
                _ = tokio::time::sleep_until(deadline), if waiting => {
                    self.core.start_view_change();
                    deadline = Instant::now() + timeout;
                }
            }

            if self.position() != before {
                if self.core.round_state() != before.0 {
                    deadline = Instant::now() + timeout;
                    self.prune_committed();
                }
                self.replay_backlog();
            }
            self.try_propose();
        }

        info!(address = %self.core.address(), "Consensus engine stopped");
        Ok(self.core)
    }

    /// Run the engine on the tokio runtime
    pub fn spawn(self) -> JoinHandle<anyhow::Result<Core<B>>>
    where
        B: 'static,
    {
        tokio::spawn(self.run())
    }

    fn position(&self) -> (RoundState, Subject, State) {
        (
            self.core.round_state(),
            self.core.subject().clone(),
            self.core.state(),
        )
    }

    /// Whether the round timer should run
    fn is_waiting(&self) -> bool {
        !self.requests.is_empty()
            || self.core.state() != State::AcceptRequest
            || self.core.pending_view().is_some()
    }

    fn on_request(&mut self, request: Request) {
        let digest = self.core.backend.hash(&request.payload);
        if self.recent_commits.contains(&digest) {
            trace!("Ignoring request that is already committed");
            return;
        }
        self.requests.push_back(request);
        trace!("Queued request ({} pending)", self.requests.len());
    }

    fn on_message(&mut self, data: &[u8]) {
        match self.core.open(data) {
            Ok((message, src)) => {
                self.dispatch(message, src);
            }
            Err(e) => debug!("Dropping message: {}", e),
        }
    }

    fn dispatch(&mut self, message: Message, src: Validator) {
        match self.core.handle_message(&message, &src) {
            Ok(()) => {}
            Err(ConsensusError::FutureMessage) => {
                trace!(from = %src.address(), view = %message.view(), "Deferring future {}", message.code());
                self.backlog.push(message, src);
            }
            Err(e) => {
                debug!(from = %src.address(), code = %message.code(), "Dropped message: {}", e);
            }
        }
    }

    /// Replay deferred messages until a pass makes no progress
    fn replay_backlog(&mut self) {
        loop {
            let pending = self.backlog.drain();
            if pending.is_empty() {
                break;
            }
            let deferred = pending.len();
            for (message, src) in pending {
                self.dispatch(message, src);
            }
            if self.backlog.len() >= deferred {
                break;
            }
        }
    }

    fn prune_committed(&mut self) {
        let Some(proposal) = self.core.last_committed() else {
            return;
        };
        let digest = self.core.backend.hash(&proposal.payload);
        let payload = proposal.payload.clone();
        self.requests.retain(|request| request.payload != payload);

        if !self.recent_commits.contains(&digest) {
            if self.recent_commits.len() >= RECENT_COMMITS {
                self.recent_commits.pop_front();
            }
            self.recent_commits.push_back(digest);
        }
    }

    fn try_propose(&mut self) {
        if self.core.state() != State::AcceptRequest || self.core.pending_view().is_some() {
            return;
        }
        let next = self.core.next_round();
        if self.proposed == Some(next) {
            return;
        }
        let Some(request) = self.requests.front() else {
            return;
        };
        if self.core.send_preprepare(request) {
            self.proposed = Some(next);
        }
    }
}

/// Builder for an engine and its handle
pub struct EngineBuilder<B: Backend> {
    backend: B,
    config: ConsensusConfig,
}

impl<B: Backend> EngineBuilder<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            config: ConsensusConfig::default(),
        }
    }

    pub fn config(mut self, config: ConsensusConfig) -> Self {
        self.config = config;
        self
    }

    pub fn request_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.request_timeout_ms = timeout_ms;
        self
    }

    pub fn build(self) -> Result<(Engine<B>, EngineHandle), ConsensusError> {
        let core = Core::new(self.backend)?;
        Ok(Engine::new(core, self.config))
    }
}
