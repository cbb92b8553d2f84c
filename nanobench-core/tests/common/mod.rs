#![allow(dead_code)]
//! In-memory transport used by the pool and driver tests.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mqtt_transport::{
    ConnectEvent, ConnectReturnCode, Connector, Dialer, Message, Publish, QoS, TransportError,
    TransportResult, TransportSession,
};
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;

/// What a mock session did, readable while it runs
#[derive(Debug)]
pub struct MockState {
    pub client_id: String,
    sent: Mutex<Vec<Message>>,
    recv_calls: AtomicUsize,
    inbound: mpsc::UnboundedSender<TransportResult<Publish>>,
    gate: Semaphore,
    fail_sends: bool,
}

impl MockState {
    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().unwrap().clone()
    }

    pub fn recv_calls(&self) -> usize {
        self.recv_calls.load(Ordering::SeqCst)
    }

    /// queue an inbound result for the next `recv`
    pub fn deliver(&self, item: TransportResult<Publish>) {
        self.inbound.send(item).unwrap();
    }

    /// let held sends complete
    pub fn release_sends(&self) {
        self.gate.add_permits(Semaphore::MAX_PERMITS / 2);
    }
}

#[derive(Debug)]
pub struct MockSession {
    state: Arc<MockState>,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<TransportResult<Publish>>>,
}

impl MockSession {
    /// `hold_sends` keeps every send pending until [`MockState::release_sends`]
    pub fn new(client_id: &str, hold_sends: bool, fail_sends: bool) -> (Self, Arc<MockState>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let permits = if hold_sends {
            0
        } else {
            Semaphore::MAX_PERMITS / 2
        };
        let state = Arc::new(MockState {
            client_id: client_id.to_owned(),
            sent: Mutex::new(Vec::new()),
            recv_calls: AtomicUsize::new(0),
            inbound: tx,
            gate: Semaphore::new(permits),
            fail_sends,
        });
        let session = Self {
            state: Arc::clone(&state),
            inbound: tokio::sync::Mutex::new(rx),
        };
        (session, state)
    }
}

#[async_trait]
impl TransportSession for MockSession {
    fn client_id(&self) -> &str {
        &self.state.client_id
    }

    async fn send(&self, message: Message) -> TransportResult<()> {
        self.state.sent.lock().unwrap().push(message);
        if let Ok(permit) = self.state.gate.acquire().await {
            permit.forget();
        }
        if self.state.fail_sends {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    async fn recv(&self) -> TransportResult<Publish> {
        self.state.recv_calls.fetch_add(1, Ordering::SeqCst);
        self.inbound
            .lock()
            .await
            .recv()
            .await
            .unwrap_or(Err(TransportError::Closed))
    }
}

/// Hands out mock sessions and acknowledges every connection immediately.
#[derive(Debug, Default)]
pub struct MockDialer {
    pub states: Mutex<Vec<Arc<MockState>>>,
    pub fail_sends: bool,
    /// messages queued on every new session
    pub preload: usize,
}

impl MockDialer {
    pub fn states(&self) -> Vec<Arc<MockState>> {
        self.states.lock().unwrap().clone()
    }
}

impl Dialer for MockDialer {
    type Session = MockSession;

    fn dial(
        &self,
        connector: Connector,
        _token: CancellationToken,
    ) -> TransportResult<Self::Session> {
        let client_id = connector.connect_packet().client_id.clone();
        let (session, state) = MockSession::new(&client_id, false, self.fail_sends);
        for _ in 0..self.preload {
            state.deliver(Ok(incoming()));
        }
        connector.notify_connected(&ConnectEvent {
            client_id,
            code: ConnectReturnCode::Success,
            session_present: false,
        });
        self.states.lock().unwrap().push(state);
        Ok(session)
    }
}

pub fn incoming() -> Publish {
    Publish::new("sensors/0", QoS::AtMostOnce, "payload")
}

/// poll `cond` until it holds, panicking after five seconds
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
