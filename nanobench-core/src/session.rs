//! Per-session state machine.
//!
//! A [`SessionContext`] never awaits anything itself. The pool feeds it one
//! [`Completion`] at a time and performs the [`Action`] it returns, so each
//! context has at most one operation outstanding and its transitions run
//! strictly in sequence.
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use mqtt_transport::{Message, Publish, TransportError, TransportResult};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::config::{PublishOptions, SubscribeOptions, Workload};
use crate::counters::Counters;
use crate::pacing::{Delay, next_delay};
use crate::topic::{SessionIdentity, TopicTemplate};

/// byte used to fill publish payloads
pub const PAYLOAD_FILL: u8 = b'A';

/// Where a context is in its workload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Init,
    Receiving,
    Waiting,
    Sending,
}

/// The asynchronous operation a context has armed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Send,
    Receive,
    Sleep,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Send => "send",
            Operation::Receive => "receive",
            Operation::Sleep => "sleep",
        })
    }
}

/// Input to a transition
#[derive(Debug)]
pub enum Completion {
    /// first drive of a freshly created context
    Start,
    /// a send finished
    Sent(TransportResult<()>),
    /// a receive finished
    Received(TransportResult<Publish>),
    /// a pacing sleep finished
    Slept,
}

impl Completion {
    fn name(&self) -> &'static str {
        match self {
            Completion::Start => "start",
            Completion::Sent(_) => "send",
            Completion::Received(_) => "receive",
            Completion::Slept => "sleep",
        }
    }

    /// operation this completion belongs to, `None` for `Start`
    fn operation(&self) -> Option<Operation> {
        match self {
            Completion::Start => None,
            Completion::Sent(_) => Some(Operation::Send),
            Completion::Received(_) => Some(Operation::Receive),
            Completion::Slept => Some(Operation::Sleep),
        }
    }
}

/// What the pool must do next for a context
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Send(Message),
    Receive,
    Sleep(Duration),
    /// nothing armed, the context is done
    Halt,
}

impl Action {
    fn operation(&self) -> Option<Operation> {
        match self {
            Action::Send(_) => Some(Operation::Send),
            Action::Receive => Some(Operation::Receive),
            Action::Sleep(_) => Some(Operation::Sleep),
            Action::Halt => None,
        }
    }
}

/// Errors raised by a transition
#[derive(Debug, Error)]
pub enum SessionError {
    /// A send or receive failed. Ends the run.
    #[error("{client_id} context {context}: {operation} failed: {source}")]
    Fatal {
        client_id: String,
        context: usize,
        operation: &'static str,
        #[source]
        source: TransportError,
    },

    /// A second operation was armed while one is outstanding.
    #[error("context {context}: cannot arm {requested} while {outstanding} is outstanding")]
    Busy {
        context: usize,
        outstanding: Operation,
        requested: Operation,
    },

    /// A completion arrived that does not belong to the outstanding operation.
    #[error("context {context}: unexpected {completion} completion in state {state:?}")]
    UnexpectedCompletion {
        context: usize,
        completion: &'static str,
        state: State,
    },
}

/// Run-wide values every context reads
#[derive(Debug, Clone)]
pub struct Shared {
    pub counters: Arc<Counters>,
    pub workload: Arc<Workload>,
    /// expanded by every context that needs a topic; `None` in connect mode
    pub topic: Option<Arc<TopicTemplate>>,
}

impl Shared {
    /// Shared state for one run. The topic template, and so its `%i` counter,
    /// is created here once.
    pub fn new(workload: Workload, counters: Arc<Counters>) -> Self {
        let topic = workload.topic().map(|t| Arc::new(TopicTemplate::new(t)));
        Self {
            counters,
            workload: Arc::new(workload),
            topic,
        }
    }

    fn expand_topic(&self, identity: SessionIdentity<'_>) -> String {
        self.topic
            .as_ref()
            .map(|t| t.expand(identity).into_owned())
            .unwrap_or_default()
    }
}

/// What a transition may look at besides the context itself
#[derive(Debug, Clone, Copy)]
pub struct SessionEnv<'a> {
    pub shared: &'a Shared,
    pub identity: SessionIdentity<'a>,
}

/// One logical session
#[derive(Debug)]
pub struct SessionContext {
    id: usize,
    /// sends the pool's subscribe request
    subscriber: bool,
    state: State,
    operation: Option<Operation>,
    /// publish template, sent as cheap clones
    pending: Option<Publish>,
    /// kind of the message in flight, names a failed send
    sending: &'static str,
    last_send: Instant,
    halted: bool,
}

impl SessionContext {
    pub fn new(id: usize, subscriber: bool) -> Self {
        Self {
            id,
            subscriber,
            state: State::Init,
            operation: None,
            pending: None,
            sending: "send",
            last_send: Instant::now(),
            halted: false,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// outstanding operation, if any
    pub fn operation(&self) -> Option<Operation> {
        self.operation
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// logical send mark used for pacing
    pub fn last_send(&self) -> Instant {
        self.last_send
    }

    /// Feed one completion and return the next action.
    ///
    /// The returned operation is already recorded as outstanding; the caller
    /// must eventually answer it with the matching completion.
    pub fn advance(
        &mut self,
        completion: Completion,
        env: SessionEnv<'_>,
        now: Instant,
    ) -> Result<Action, SessionError> {
        self.accept(&completion)?;

        let action = match &*env.shared.workload {
            Workload::Connect => self.connect(completion, env)?,
            Workload::Subscribe(opts) => self.subscribe(completion, opts, env)?,
            Workload::Publish(opts) => self.publish(completion, opts, env, now)?,
        };

        if let Action::Send(message) = &action {
            self.sending = message.kind();
        }
        match action.operation() {
            Some(op) => self.arm(op)?,
            None => {
                debug!(context = self.id, state = ?self.state, "context halted");
                self.halted = true;
            }
        }
        trace!(context = self.id, state = ?self.state, ?action, "transition");
        Ok(action)
    }

    /// check the completion answers the outstanding operation and clear it
    fn accept(&mut self, completion: &Completion) -> Result<(), SessionError> {
        let expected = match completion.operation() {
            None => self.state == State::Init && self.operation.is_none(),
            Some(op) => self.operation == Some(op),
        };
        if self.halted || !expected {
            return Err(SessionError::UnexpectedCompletion {
                context: self.id,
                completion: completion.name(),
                state: self.state,
            });
        }
        self.operation = None;
        Ok(())
    }

    fn arm(&mut self, requested: Operation) -> Result<(), SessionError> {
        if let Some(outstanding) = self.operation {
            return Err(SessionError::Busy {
                context: self.id,
                outstanding,
                requested,
            });
        }
        self.operation = Some(requested);
        Ok(())
    }

    fn unexpected(&self, completion: &Completion) -> SessionError {
        SessionError::UnexpectedCompletion {
            context: self.id,
            completion: completion.name(),
            state: self.state,
        }
    }

    fn fatal(
        &self,
        env: SessionEnv<'_>,
        operation: &'static str,
        err: TransportError,
    ) -> SessionError {
        SessionError::Fatal {
            client_id: env.identity.client_id.to_owned(),
            context: self.id,
            operation,
            source: err,
        }
    }

    fn connect(
        &mut self,
        completion: Completion,
        env: SessionEnv<'_>,
    ) -> Result<Action, SessionError> {
        match (self.state, completion) {
            (State::Init, Completion::Start) => {
                self.state = State::Receiving;
                Ok(Action::Receive)
            }
            // holds the connection open; nothing is expected, anything is dropped
            (State::Receiving, Completion::Received(Ok(_))) => Ok(Action::Receive),
            (State::Receiving, Completion::Received(Err(err))) if err.is_recoverable() => {
                warn!(context = self.id, error = %err, "dropping undecodable message");
                Ok(Action::Receive)
            }
            (State::Receiving, Completion::Received(Err(err))) => {
                Err(self.fatal(env, "receive", err))
            }
            (_, completion) => Err(self.unexpected(&completion)),
        }
    }

    fn subscribe(
        &mut self,
        completion: Completion,
        opts: &SubscribeOptions,
        env: SessionEnv<'_>,
    ) -> Result<Action, SessionError> {
        match (self.state, completion) {
            (State::Init, Completion::Start) if self.subscriber => {
                let topic = env.shared.expand_topic(env.identity);
                debug!(context = self.id, %topic, qos = ?opts.qos, "subscribing");
                self.state = State::Sending;
                Ok(Action::Send(Message::Subscribe {
                    topic,
                    qos: opts.qos,
                }))
            }
            (State::Init, Completion::Start) => {
                self.state = State::Receiving;
                Ok(Action::Receive)
            }
            (State::Sending, Completion::Sent(res)) => {
                res.map_err(|err| self.fatal(env, self.sending, err))?;
                self.state = State::Receiving;
                Ok(Action::Receive)
            }
            (State::Receiving, Completion::Received(Ok(_))) => {
                env.shared.counters.inc_received();
                Ok(Action::Receive)
            }
            (State::Receiving, Completion::Received(Err(err))) if err.is_recoverable() => {
                warn!(context = self.id, error = %err, "dropping undecodable message");
                Ok(Action::Receive)
            }
            (State::Receiving, Completion::Received(Err(err))) => {
                Err(self.fatal(env, "receive", err))
            }
            (_, completion) => Err(self.unexpected(&completion)),
        }
    }

    fn publish(
        &mut self,
        completion: Completion,
        opts: &PublishOptions,
        env: SessionEnv<'_>,
        now: Instant,
    ) -> Result<Action, SessionError> {
        match (self.state, completion) {
            (State::Init, Completion::Start) => {
                if env.shared.counters.try_acquire_send().is_none() {
                    return Ok(Action::Halt);
                }
                let topic = env.shared.expand_topic(env.identity);
                let payload = Bytes::from(vec![PAYLOAD_FILL; opts.size]);
                let template = Publish::new(topic, opts.qos, payload).with_retain(opts.retain);

                self.last_send = now;
                self.state = State::Sending;
                let message = Message::Publish(template.clone());
                self.pending = Some(template);
                Ok(Action::Send(message))
            }
            (State::Sending, Completion::Sent(res)) => {
                res.map_err(|err| self.fatal(env, self.sending, err))?;
                let pacing = next_delay(now, self.last_send, opts.interval_of_msg);
                match pacing.delay {
                    Delay::Disabled => self.send_next(env),
                    Delay::Sleep(delay) => {
                        self.state = State::Waiting;
                        self.last_send = pacing.last_send;
                        Ok(Action::Sleep(delay))
                    }
                    Delay::CatchUp => {
                        self.state = State::Waiting;
                        self.last_send = pacing.last_send;
                        trace!(context = self.id, "behind schedule, skipping sleep");
                        self.send_next(env)
                    }
                }
            }
            (State::Waiting, Completion::Slept) => self.send_next(env),
            (_, completion) => Err(self.unexpected(&completion)),
        }
    }

    fn send_next(&mut self, env: SessionEnv<'_>) -> Result<Action, SessionError> {
        let Some(template) = &self.pending else {
            return Err(SessionError::UnexpectedCompletion {
                context: self.id,
                completion: "send",
                state: self.state,
            });
        };
        if env.shared.counters.try_acquire_send().is_none() {
            return Ok(Action::Halt);
        }
        let message = Message::Publish(template.clone());
        self.state = State::Sending;
        Ok(Action::Send(message))
    }
}
