//! The seam between the load driver and the client library.
//!
//! A [`TransportSession`] is one broker connection shared by many logical
//! sessions; each of them keeps at most one `send`/`recv` outstanding. A
//! [`Dialer`] turns a configured [`Connector`] into a running session.

use std::fmt;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::client::{Connector, MqttSession};
use crate::error::TransportResult;
use crate::message::{Message, Publish};

/// One established (or establishing) broker connection.
#[async_trait]
pub trait TransportSession: fmt::Debug + Send + Sync + 'static {
    /// Client identifier sent in the connect handshake
    fn client_id(&self) -> &str;

    /// Hand a message to the transport. Completes once the client accepted it.
    async fn send(&self, message: Message) -> TransportResult<()>;

    /// Wait for the next inbound publish on this connection.
    ///
    /// Returns [`TransportError::Decode`](crate::TransportError::Decode) when a
    /// malformed packet was dropped; the caller may simply call `recv` again.
    async fn recv(&self) -> TransportResult<Publish>;
}

/// Starts sessions from connectors.
pub trait Dialer: Send + Sync {
    type Session: TransportSession;

    /// Start the connector without waiting for the handshake to finish.
    fn dial(&self, connector: Connector, token: CancellationToken)
    -> TransportResult<Self::Session>;
}

/// Dials real brokers through `rumqttc`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MqttDialer;

impl Dialer for MqttDialer {
    type Session = MqttSession;

    fn dial(
        &self,
        connector: Connector,
        token: CancellationToken,
    ) -> TransportResult<Self::Session> {
        connector.start(token)
    }
}
