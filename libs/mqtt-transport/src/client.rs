//! `rumqttc` backed connector and session.
//!
//! The connector is built from a [`BrokerUrl`] and a [`ConnectPacket`], may
//! carry TLS material and a connect-event handler, and is started without
//! blocking: the network event loop runs on its own task, feeding inbound
//! publishes into a queue that all logical sessions receive from.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Packet,
    StateError, TlsConfiguration, Transport,
};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{TransportError, TransportResult};
use crate::message::{ConnectPacket, Message, Publish, QoS};
use crate::session::TransportSession;
use crate::url::BrokerUrl;

/// Capacity of the client's outbound request channel.
const DEFAULT_REQUEST_CAPACITY: usize = 1_000;

/// Inbound publishes buffered before the event loop stops reading.
const DEFAULT_INBOUND_CAPACITY: usize = 10_000;

/// Delay before the event loop reconnects after a network error.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Largest packet the protocol can express (remaining length limit).
const MAX_PACKET_SIZE: usize = 268_435_455;

/// Connection acknowledgement delivered to the connect-event handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectEvent {
    pub client_id: String,
    pub code: ConnectReturnCode,
    pub session_present: bool,
}

/// Called once per established connection.
pub type ConnectHandler = Arc<dyn Fn(&ConnectEvent) + Send + Sync>;

/// Certificate files for `tls+mqtt-tcp` connections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsFiles {
    pub ca: Option<PathBuf>,
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
}

impl TlsFiles {
    fn configuration(&self) -> TransportResult<Transport> {
        let Some(ca) = &self.ca else {
            if self.cert.is_some() || self.key.is_some() {
                return Err(TransportError::TlsConfig {
                    reason: "a client certificate needs a CA file",
                });
            }
            return Ok(Transport::tls_with_default_config());
        };
        let client_auth = match (&self.cert, &self.key) {
            (Some(cert), Some(key)) => Some((read_file(cert)?, read_file(key)?)),
            _ => None,
        };
        Ok(Transport::Tls(TlsConfiguration::Simple {
            ca: read_file(ca)?,
            alpn: None,
            client_auth,
        }))
    }
}

fn read_file(path: &Path) -> TransportResult<Vec<u8>> {
    std::fs::read(path).map_err(|source| TransportError::TlsFile {
        path: path.to_path_buf(),
        source,
    })
}

/// Everything needed to open one broker connection.
pub struct Connector {
    url: BrokerUrl,
    connect: ConnectPacket,
    tls: Option<TlsFiles>,
    handler: Option<ConnectHandler>,
    request_capacity: usize,
    inbound_capacity: usize,
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("url", &self.url)
            .field("client_id", &self.connect.client_id)
            .field("tls", &self.tls)
            .field("has_handler", &self.handler.is_some())
            .finish_non_exhaustive()
    }
}

impl Connector {
    pub fn new(url: BrokerUrl, connect: ConnectPacket) -> Self {
        Self {
            url,
            connect,
            tls: None,
            handler: None,
            request_capacity: DEFAULT_REQUEST_CAPACITY,
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
        }
    }

    /// Use TLS for this connection. Ignored for plaintext urls.
    pub fn tls(mut self, files: TlsFiles) -> Self {
        self.tls = Some(files);
        self
    }

    /// Install the connect-event handler.
    pub fn on_connect(mut self, handler: ConnectHandler) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn url(&self) -> &BrokerUrl {
        &self.url
    }

    pub fn connect_packet(&self) -> &ConnectPacket {
        &self.connect
    }

    /// Invoke the connect-event handler, if one is installed.
    pub fn notify_connected(&self, event: &ConnectEvent) {
        if let Some(handler) = &self.handler {
            handler(event);
        }
    }

    fn options(&self) -> TransportResult<MqttOptions> {
        let mut options =
            MqttOptions::new(&self.connect.client_id, &self.url.host, self.url.port);
        options
            .set_keep_alive(self.connect.keep_alive)
            .set_clean_session(self.connect.clean_session)
            .set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);
        if let Some(username) = &self.connect.username {
            options.set_credentials(
                username.clone(),
                self.connect.password.clone().unwrap_or_default(),
            );
        }
        if self.url.is_tls() {
            let files = self.tls.clone().unwrap_or_default();
            options.set_transport(files.configuration()?);
        }
        Ok(options)
    }

    /// Start connecting in the background and return the session handle.
    ///
    /// The event loop reconnects on network errors until `token` is cancelled.
    pub fn start(self, token: CancellationToken) -> TransportResult<MqttSession> {
        let options = self.options()?;
        let (client, eventloop) = AsyncClient::new(options, self.request_capacity);
        let (tx, rx) = mpsc::channel(self.inbound_capacity);
        let client_id = self.connect.client_id.clone();
        let subscriptions = Subscriptions::default();

        debug!(url = %self.url, ?client_id, "starting connector");
        tokio::spawn(pump(
            eventloop,
            self,
            Resubscriber {
                client: client.clone(),
                subscriptions: subscriptions.clone(),
            },
            tx,
            token,
        ));

        Ok(MqttSession {
            client,
            client_id,
            subscriptions,
            inbound: Mutex::new(rx),
        })
    }
}

/// Subscriptions requested over this connection, in order.
type Subscriptions = Arc<Mutex<Vec<(String, QoS)>>>;

/// Re-issues known subscriptions when a reconnect starts a fresh session.
#[derive(Debug)]
struct Resubscriber {
    client: AsyncClient,
    subscriptions: Subscriptions,
}

impl Resubscriber {
    async fn replay(&self, client_id: &str) {
        let subscriptions = self.subscriptions.lock().await;
        if subscriptions.is_empty() {
            return;
        }
        info!(?client_id, count = subscriptions.len(), "restoring subscriptions");
        for (topic, qos) in subscriptions.iter() {
            // this task drives the event loop, awaiting a full request queue here would hang
            if let Err(err) = self.client.try_subscribe(topic.clone(), *qos) {
                warn!(?client_id, %topic, %err, "failed to restore subscription");
            }
        }
    }
}

async fn pump(
    mut eventloop: EventLoop,
    connector: Connector,
    resubscriber: Resubscriber,
    tx: mpsc::Sender<TransportResult<Publish>>,
    token: CancellationToken,
) {
    let client_id = connector.connect.client_id.clone();
    let mut connected_before = false;
    loop {
        let event = tokio::select! {
            _ = token.cancelled() => {
                debug!(?client_id, "connector stopping");
                return;
            }
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if connected_before && !ack.session_present {
                    resubscriber.replay(&client_id).await;
                }
                connected_before = true;
                connector.notify_connected(&ConnectEvent {
                    client_id: client_id.clone(),
                    code: ack.code,
                    session_present: ack.session_present,
                });
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                if tx.send(Ok(publish.into())).await.is_err() {
                    debug!(?client_id, "session dropped, stopping event loop");
                    return;
                }
            }
            Ok(_) => {}
            Err(err) if is_decode_failure(&err) => {
                warn!(?client_id, %err, "dropping malformed packet");
                if tx
                    .send(Err(TransportError::Decode(err.to_string())))
                    .await
                    .is_err()
                {
                    return;
                }
            }
            Err(err) => {
                warn!(?client_id, url = %connector.url, %err, "connection error, reconnecting");
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(RECONNECT_DELAY) => {
                        info!(?client_id, "reconnecting");
                    }
                }
            }
        }
    }
}

/// Malformed inbound bytes surface either as a deserialization state error
/// or as an `InvalidData` I/O error, depending on where decoding failed.
fn is_decode_failure(err: &ConnectionError) -> bool {
    match err {
        ConnectionError::MqttState(StateError::Deserialization(_)) => true,
        ConnectionError::MqttState(StateError::Io(io)) | ConnectionError::Io(io) => {
            io.kind() == std::io::ErrorKind::InvalidData
        }
        _ => false,
    }
}

/// A running `rumqttc` connection.
#[derive(Debug)]
pub struct MqttSession {
    client: AsyncClient,
    client_id: String,
    subscriptions: Subscriptions,
    inbound: Mutex<mpsc::Receiver<TransportResult<Publish>>>,
}

#[async_trait]
impl TransportSession for MqttSession {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn send(&self, message: Message) -> TransportResult<()> {
        match message {
            Message::Subscribe { topic, qos } => {
                self.client.subscribe(topic.clone(), qos).await?;
                self.subscriptions.lock().await.push((topic, qos));
            }
            Message::Publish(publish) => {
                self.client
                    .publish_bytes(publish.topic, publish.qos, publish.retain, publish.payload)
                    .await?
            }
        }
        Ok(())
    }

    async fn recv(&self) -> TransportResult<Publish> {
        self.inbound
            .lock()
            .await
            .recv()
            .await
            .unwrap_or(Err(TransportError::Closed))
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use rumqttc::{ConnectReturnCode, ConnectionError, StateError};
    use tokio_util::sync::CancellationToken;
    use tracing_test::traced_test;

    use super::{ConnectEvent, Connector, TlsFiles, is_decode_failure};
    use crate::error::TransportError;
    use crate::message::ConnectPacket;
    use crate::session::TransportSession;
    use crate::url::{BrokerUrl, Scheme};

    fn connector(scheme: Scheme) -> Connector {
        Connector::new(
            BrokerUrl::new(scheme, "localhost", 1883),
            ConnectPacket::new("nanobench-0").with_credentials(Some("bench".into()), None),
        )
    }

    #[test]
    fn handler_is_optional() {
        let event = ConnectEvent {
            client_id: "nanobench-0".into(),
            code: ConnectReturnCode::Success,
            session_present: false,
        };
        connector(Scheme::Tcp).notify_connected(&event);

        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let connector = connector(Scheme::Tcp).on_connect(Arc::new(move |event| {
            assert_eq!(event.code, ConnectReturnCode::Success);
            seen.fetch_add(1, Ordering::Relaxed);
        }));
        connector.notify_connected(&event);
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn options_carry_connect_packet() {
        let options = connector(Scheme::Tcp).options().expect("options");
        assert_eq!(options.client_id(), "nanobench-0");
        assert_eq!(options.broker_address(), ("localhost".to_string(), 1883));
    }

    #[test]
    fn invalid_data_is_a_decode_failure() {
        let malformed = std::io::Error::new(std::io::ErrorKind::InvalidData, "bad packet type");
        assert!(is_decode_failure(&ConnectionError::MqttState(
            StateError::Io(malformed)
        )));

        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(!is_decode_failure(&ConnectionError::Io(reset)));
        assert!(!is_decode_failure(&ConnectionError::MqttState(
            StateError::AwaitPingResp
        )));
    }

    #[test]
    fn missing_ca_file_is_reported() {
        let files = TlsFiles {
            ca: Some(PathBuf::from("/nonexistent/ca.pem")),
            ..TlsFiles::default()
        };
        let err = connector(Scheme::Tls)
            .tls(files)
            .options()
            .expect_err("missing ca should fail");
        assert!(matches!(err, TransportError::TlsFile { .. }));
    }

    #[test]
    fn client_certificate_without_ca_is_rejected() {
        let files = TlsFiles {
            cert: Some(PathBuf::from("client.pem")),
            key: Some(PathBuf::from("client.key")),
            ..TlsFiles::default()
        };
        let err = connector(Scheme::Tls)
            .tls(files)
            .options()
            .expect_err("cert without ca should fail");
        assert!(
            matches!(err, TransportError::TlsConfig { .. }),
            "{err:?}"
        );

        let options = connector(Scheme::Tls)
            .tls(TlsFiles::default())
            .options()
            .expect("system roots");
        assert!(matches!(options.transport(), rumqttc::Transport::Tls(_)));
    }

    #[tokio::test]
    #[traced_test]
    async fn refused_connection_is_retried() {
        // grab a free port, then close it so the connect is refused
        let port = {
            let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
                .await
                .unwrap();
            listener.local_addr().unwrap().port()
        };
        let token = CancellationToken::new();
        let session = Connector::new(
            BrokerUrl::new(Scheme::Tcp, "127.0.0.1", port),
            ConnectPacket::new("nanobench-0"),
        )
        .start(token.clone())
        .expect("start does not wait for the broker");
        assert_eq!(session.client_id(), "nanobench-0");

        tokio::time::timeout(Duration::from_secs(5), async {
            while !logs_contain("connection error, reconnecting") {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("connection error logged");
        token.cancel();
    }
}
