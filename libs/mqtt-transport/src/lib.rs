//! # mqtt-transport
//!
//! The transport collaborator of the nanobench load driver. Wraps `rumqttc`
//! so the driver only deals with:
//! - **Broker urls** (`mqtt-tcp://host:port`, `tls+mqtt-tcp://host:port`)
//! - **Connectors** carrying the connect packet, optional TLS files and a
//!   connect-event handler, started without blocking
//! - **Sessions** exposing `send` and `recv` operations that many logical
//!   sessions multiplex over one connection
//! - **Messages**: connect, subscribe and publish packets

pub mod client;
pub mod error;
pub mod message;
pub mod session;
pub mod url;

pub use client::{ConnectEvent, ConnectHandler, Connector, MqttSession, TlsFiles};
pub use error::{TransportError, TransportResult};
pub use message::{ConnectPacket, Message, Publish, QoS, qos_from_u8};
pub use rumqttc::ConnectReturnCode;
pub use session::{Dialer, MqttDialer, TransportSession};
pub use url::{BrokerUrl, DEFAULT_PORT, Scheme};
