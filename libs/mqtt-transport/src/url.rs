//! Broker endpoint urls, `{scheme}://{host}:{port}`.

use std::fmt;

/// Default plaintext MQTT port
pub const DEFAULT_PORT: u16 = 1883;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// `mqtt-tcp`
    Tcp,
    /// `tls+mqtt-tcp`
    Tls,
}

impl Scheme {
    pub const fn as_str(self) -> &'static str {
        match self {
            Scheme::Tcp => "mqtt-tcp",
            Scheme::Tls => "tls+mqtt-tcp",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerUrl {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
}

impl BrokerUrl {
    pub fn new(scheme: Scheme, host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme,
            host: host.into(),
            port,
        }
    }

    pub fn is_tls(&self) -> bool {
        self.scheme == Scheme::Tls
    }
}

impl fmt::Display for BrokerUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme.as_str(), self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::{BrokerUrl, Scheme};

    #[test]
    fn display_uses_scheme_names() {
        let url = BrokerUrl::new(Scheme::Tls, "broker.local", 8883);
        assert_eq!(url.to_string(), "tls+mqtt-tcp://broker.local:8883");
        assert!(url.is_tls());

        let url = BrokerUrl::new(Scheme::Tcp, "localhost", 1883);
        assert_eq!(url.to_string(), "mqtt-tcp://localhost:1883");
        assert!(!url.is_tls());
    }
}
