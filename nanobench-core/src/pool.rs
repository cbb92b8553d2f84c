//! A fixed set of logical sessions sharing one connection.
//!
//! Every armed operation becomes a future on one `FuturesUnordered` queue.
//! Whichever completes first is handed back to its context, which answers with
//! at most one new operation.
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use mqtt_transport::TransportSession;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::session::{Action, Completion, SessionContext, SessionEnv, SessionError, Shared};
use crate::topic::SessionIdentity;

type PendingOp = Pin<Box<dyn Future<Output = (usize, Completion)> + Send>>;

/// Logical sessions multiplexed over one transport session
#[derive(Debug)]
pub struct SessionPool<S> {
    session: Arc<S>,
    shared: Shared,
    username: Option<String>,
    contexts: Vec<SessionContext>,
}

impl<S: TransportSession> SessionPool<S> {
    /// Allocate `parallelism` contexts. The first one owns the subscribe
    /// request in subscribe mode.
    pub fn new(
        session: Arc<S>,
        shared: Shared,
        parallelism: usize,
        username: Option<String>,
    ) -> Self {
        let contexts = (0..parallelism)
            .map(|id| SessionContext::new(id, id == 0))
            .collect();
        Self {
            session,
            shared,
            username,
            contexts,
        }
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Drive every context until all have halted, one fails, or `token` is
    /// cancelled.
    pub async fn run(self, token: CancellationToken) -> Result<(), SessionError> {
        let Self {
            session,
            shared,
            username,
            mut contexts,
        } = self;
        let env = SessionEnv {
            shared: &shared,
            identity: SessionIdentity {
                client_id: session.client_id(),
                username: username.as_deref(),
            },
        };

        let mut queue = FuturesUnordered::<PendingOp>::new();
        for ctx in contexts.iter_mut() {
            let action = ctx
                .advance(Completion::Start, env, Instant::now())
                .inspect_err(|err| error!(error = %err, "session failed to start"))?;
            dispatch(&mut queue, &session, ctx.id(), action);
        }
        debug!(contexts = contexts.len(), armed = queue.len(), "pool started");

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("pool cancelled");
                    return Ok(());
                }
                next = queue.next() => {
                    let Some((id, completion)) = next else {
                        debug!("every context halted");
                        return Ok(());
                    };
                    let action = contexts[id]
                        .advance(completion, env, Instant::now())
                        .inspect_err(|err| error!(error = %err, "session failed"))?;
                    dispatch(&mut queue, &session, id, action);
                }
            }
        }
    }
}

fn dispatch<S: TransportSession>(
    queue: &mut FuturesUnordered<PendingOp>,
    session: &Arc<S>,
    id: usize,
    action: Action,
) {
    match action {
        Action::Send(message) => {
            let session = Arc::clone(session);
            queue.push(Box::pin(async move {
                (id, Completion::Sent(session.send(message).await))
            }));
        }
        Action::Receive => {
            let session = Arc::clone(session);
            queue.push(Box::pin(async move {
                (id, Completion::Received(session.recv().await))
            }));
        }
        Action::Sleep(delay) => {
            queue.push(Box::pin(async move {
                tokio::time::sleep(delay).await;
                (id, Completion::Slept)
            }));
        }
        Action::Halt => {}
    }
}
