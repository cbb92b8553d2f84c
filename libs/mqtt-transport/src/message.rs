//! Protocol messages exchanged with the broker.
//!
//! These are the builder/accessor side of the client library: the driver
//! constructs them, the session encodes them on the way out and decodes
//! incoming publishes back into [`Publish`].

use std::time::Duration;

use bytes::Bytes;

pub use rumqttc::QoS;

/// Parse a numeric quality-of-service level.
pub fn qos_from_u8(level: u8) -> Option<QoS> {
    match level {
        0 => Some(QoS::AtMostOnce),
        1 => Some(QoS::AtLeastOnce),
        2 => Some(QoS::ExactlyOnce),
        _ => None,
    }
}

/// Connect handshake data for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectPacket {
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    pub clean_session: bool,
}

impl ConnectPacket {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(300),
            clean_session: true,
        }
    }

    pub fn with_credentials(mut self, username: Option<String>, password: Option<String>) -> Self {
        self.username = username;
        self.password = password;
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_clean_session(mut self, clean_session: bool) -> Self {
        self.clean_session = clean_session;
        self
    }
}

/// An application message on a topic.
///
/// The payload is reference counted, cloning a `Publish` to send it again
/// does not copy the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub topic: String,
    pub qos: QoS,
    pub retain: bool,
    pub payload: Bytes,
}

impl Publish {
    pub fn new(topic: impl Into<String>, qos: QoS, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            qos,
            retain: false,
            payload: payload.into(),
        }
    }

    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }
}

impl From<rumqttc::Publish> for Publish {
    fn from(publish: rumqttc::Publish) -> Self {
        Self {
            topic: publish.topic,
            qos: publish.qos,
            retain: publish.retain,
            payload: publish.payload,
        }
    }
}

/// Outbound request a session can send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Subscribe { topic: String, qos: QoS },
    Publish(Publish),
}

impl Message {
    /// Short packet name, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Subscribe { .. } => "subscribe",
            Message::Publish(_) => "publish",
        }
    }
}
