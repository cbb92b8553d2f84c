//! benchmark configuration
//!
//! [`cli`] parses arguments and environment, [`WorkloadConfig`] is the
//! validated, read-only form the driver consumes.
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use mqtt_transport::{BrokerUrl, ConnectPacket, QoS, Scheme, TlsFiles, qos_from_u8};
use serde::Serialize;

pub use self::cli::Cli;

/// prefix of generated client identifiers
pub const CLIENT_ID_PREFIX: &str = "nanobench";
/// the only protocol level supported (MQTT 3.1.1)
pub const SUPPORTED_PROTOCOL_VERSION: u8 = 4;

pub mod cli {
    //! Parse from either cli or env var

    use std::path::PathBuf;

    pub use clap::Parser;
    use clap::{ArgAction, Args, Subcommand, ValueEnum};

    /// Default broker host
    pub static DEFAULT_HOST: &str = "localhost";
    /// Default broker port
    pub const DEFAULT_PORT: u16 = mqtt_transport::DEFAULT_PORT;
    /// Default MQTT protocol level
    pub const DEFAULT_PROTOCOL_VERSION: u8 = super::SUPPORTED_PROTOCOL_VERSION;
    /// Default number of connections (rounds)
    pub const DEFAULT_COUNT: usize = 200;
    /// Default delay between rounds in ms
    pub const DEFAULT_INTERVAL_MS: u64 = 10;
    /// Default keep-alive in seconds
    pub const DEFAULT_KEEPALIVE: u16 = 300;
    /// Default logical sessions per connection
    pub const DEFAULT_PARALLEL: usize = 8;
    /// Default publish payload size in bytes
    pub const DEFAULT_PAYLOAD_SIZE: usize = 256;
    /// Default delay between messages of one publisher in ms
    pub const DEFAULT_INTERVAL_OF_MSG_MS: u64 = 1000;
    /// default log level. Can use this argument or NANOBENCH_LOG env var
    pub const DEFAULT_NANOBENCH_LOG: &str = "info";

    /// log output format
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
    pub enum LogFormat {
        /// unstructured single-line logs
        #[default]
        Standard,
        /// one json object per line
        Json,
        /// multi-line human readable logs
        Pretty,
    }

    #[derive(Parser, Debug, Clone, PartialEq, Eq)]
    #[command(
        name = "nanobench",
        bin_name = "nanobench",
        about = "MQTT connect/subscribe/publish benchmark driver"
    )]
    /// parses from cli & environment var. nanobench will load `.env` in the working dir as well
    pub struct Cli {
        /// set the log level. All valid RUST_LOG arguments are accepted
        #[arg(long, env = "NANOBENCH_LOG", global = true, default_value = DEFAULT_NANOBENCH_LOG)]
        pub log: String,
        /// log format
        #[arg(long, env = "LOG_FORMAT", global = true, value_enum, default_value_t = LogFormat::Standard)]
        pub log_format: LogFormat,
        /// number of runtime worker threads, defaults to the number of CPUs
        #[arg(long, env = "NANOBENCH_THREADS", global = true)]
        pub threads: Option<usize>,
        /// print the final summary as json
        #[arg(long, global = true)]
        pub json: bool,
        #[command(subcommand)]
        pub command: Command,
    }

    /// workload to run
    #[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
    pub enum Command {
        /// open connections and hold them
        Conn(ConnArgs),
        /// subscribe and count received messages
        Sub(SubArgs),
        /// publish at a paced rate
        Pub(PubArgs),
    }

    /// options shared by every workload
    #[derive(Args, Debug, Clone, PartialEq, Eq)]
    pub struct ConnectionArgs {
        /// broker host
        #[arg(short = 'h', long, default_value = DEFAULT_HOST)]
        pub host: String,
        /// broker port
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        pub port: u16,
        /// MQTT protocol level
        #[arg(short = 'V', long = "version", default_value_t = DEFAULT_PROTOCOL_VERSION)]
        pub protocol_version: u8,
        /// number of connections to open
        #[arg(short, long, default_value_t = DEFAULT_COUNT)]
        pub count: usize,
        /// first number used in generated client ids
        #[arg(short = 'n', long = "startnumber", default_value_t = 0)]
        pub start_number: usize,
        /// delay between opening connections, in ms
        #[arg(short, long, default_value_t = DEFAULT_INTERVAL_MS)]
        pub interval: u64,
        /// user name
        #[arg(short, long)]
        pub username: Option<String>,
        /// password
        #[arg(short = 'P', long)]
        pub password: Option<String>,
        /// keep-alive in seconds
        #[arg(short, long, default_value_t = DEFAULT_KEEPALIVE)]
        pub keepalive: u16,
        /// clean session flag
        #[arg(short = 'C', long, default_value_t = true, action = ArgAction::Set)]
        pub clean: bool,
        /// logical sessions multiplexed over each connection
        #[arg(long, default_value_t = DEFAULT_PARALLEL)]
        pub parallel: usize,
        /// connect with TLS
        #[arg(short = 'S', long)]
        pub tls: bool,
        /// CA certificate file, system roots are used when absent
        #[arg(long)]
        pub cacert: Option<PathBuf>,
        /// client certificate file
        #[arg(long)]
        pub cert: Option<PathBuf>,
        /// client private key file
        #[arg(long)]
        pub key: Option<PathBuf>,
    }

    /// `conn` options
    #[derive(Args, Debug, Clone, PartialEq, Eq)]
    #[command(disable_help_flag = true)]
    pub struct ConnArgs {
        #[command(flatten)]
        pub connection: ConnectionArgs,
        /// Print help
        #[arg(long, action = ArgAction::Help)]
        pub help: Option<bool>,
    }

    /// `sub` options
    #[derive(Args, Debug, Clone, PartialEq, Eq)]
    #[command(disable_help_flag = true)]
    pub struct SubArgs {
        #[command(flatten)]
        pub connection: ConnectionArgs,
        /// topic filter, may contain one of `%c`, `%u` or `%i`
        #[arg(short, long)]
        pub topic: String,
        /// quality of service
        #[arg(short, long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=2))]
        pub qos: u8,
        /// Print help
        #[arg(long, action = ArgAction::Help)]
        pub help: Option<bool>,
    }

    /// `pub` options
    #[derive(Args, Debug, Clone, PartialEq, Eq)]
    #[command(disable_help_flag = true)]
    pub struct PubArgs {
        #[command(flatten)]
        pub connection: ConnectionArgs,
        /// topic, may contain one of `%c`, `%u` or `%i`
        #[arg(short, long)]
        pub topic: String,
        /// quality of service
        #[arg(short, long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=2))]
        pub qos: u8,
        /// retain flag
        #[arg(short, long, default_value_t = false, action = ArgAction::Set)]
        pub retain: bool,
        /// payload size in bytes
        #[arg(short, long, default_value_t = DEFAULT_PAYLOAD_SIZE)]
        pub size: usize,
        /// total messages to send across all connections, 0 for no limit
        #[arg(short = 'L', long, visible_short_alias = 'l', default_value_t = 0)]
        pub limit: u64,
        /// delay between messages of one publisher, in ms; 0 sends back to back
        #[arg(short = 'I', long = "interval_of_msg", default_value_t = DEFAULT_INTERVAL_OF_MSG_MS)]
        pub interval_of_msg: u64,
        /// Print help
        #[arg(long, action = ArgAction::Help)]
        pub help: Option<bool>,
    }
}

pub mod trace {
    //! tracing configuration
    use anyhow::Result;
    use tracing_subscriber::{
        filter::EnvFilter,
        fmt::{
            self,
            format::{Format, PrettyFields},
        },
        prelude::__tracing_subscriber_SubscriberExt,
        util::SubscriberInitExt,
    };

    use super::cli::LogFormat;

    /// Configuration for logging
    #[derive(Debug)]
    pub struct Config {
        /// formatting applied to logs
        pub log_frmt: LogFormat,
    }

    impl Config {
        /// install the global subscriber
        pub fn parse(nanobench_log: &str, log_frmt: LogFormat) -> Result<Self> {
            let filter =
                EnvFilter::try_new(nanobench_log).or_else(|_| EnvFilter::try_new("info"))?;

            match log_frmt {
                LogFormat::Json => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(fmt::layer().json().with_writer(std::io::stderr))
                        .init();
                }
                LogFormat::Pretty => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(
                            fmt::layer()
                                .event_format(
                                    Format::default().pretty().with_source_location(false),
                                )
                                .fmt_fields(PrettyFields::new())
                                .with_writer(std::io::stderr),
                        )
                        .init();
                }
                LogFormat::Standard => {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(fmt::layer().with_writer(std::io::stderr))
                        .init();
                }
            }

            Ok(Self { log_frmt })
        }
    }
}

/// Which workload a run drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// connect only
    Connect,
    /// subscribe and receive forever
    Subscribe,
    /// publish until the budget runs out
    Publish,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Connect => "conn",
            Mode::Subscribe => "sub",
            Mode::Publish => "pub",
        })
    }
}

/// Connection options shared by every workload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// broker host
    pub host: String,
    /// broker port
    pub port: u16,
    /// number of connections (rounds)
    pub count: usize,
    /// first client id number
    pub start_number: usize,
    /// delay between rounds
    pub interval: Duration,
    /// user name
    pub username: Option<String>,
    /// password
    pub password: Option<String>,
    /// keep-alive
    pub keep_alive: Duration,
    /// clean session flag
    pub clean: bool,
    /// TLS files, `None` for plaintext
    pub tls: Option<TlsFiles>,
    /// logical sessions per connection
    pub parallel: usize,
}

/// subscribe workload options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// topic template
    pub topic: String,
    /// requested quality of service
    pub qos: QoS,
}

/// publish workload options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOptions {
    /// topic template
    pub topic: String,
    /// quality of service
    pub qos: QoS,
    /// retain flag
    pub retain: bool,
    /// payload size in bytes
    pub size: usize,
    /// total send budget, `None` for unlimited
    pub limit: Option<u64>,
    /// delay between messages of one publisher
    pub interval_of_msg: Duration,
}

/// Mode specific options. Selects the transition table of every session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Workload {
    /// connect only
    Connect,
    /// subscribe loop
    Subscribe(SubscribeOptions),
    /// publish loop
    Publish(PublishOptions),
}

impl Workload {
    /// the mode tag
    pub fn mode(&self) -> Mode {
        match self {
            Workload::Connect => Mode::Connect,
            Workload::Subscribe(_) => Mode::Subscribe,
            Workload::Publish(_) => Mode::Publish,
        }
    }

    /// configured topic template, if the workload has one
    pub fn topic(&self) -> Option<&str> {
        match self {
            Workload::Connect => None,
            Workload::Subscribe(opts) => Some(&opts.topic),
            Workload::Publish(opts) => Some(&opts.topic),
        }
    }
}

/// Validated configuration for one run. Read-only once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadConfig {
    /// connection options
    pub connection: ConnectionOptions,
    /// what every session does
    pub workload: Workload,
}

impl WorkloadConfig {
    /// the active mode
    pub fn mode(&self) -> Mode {
        self.workload.mode()
    }

    /// broker endpoint
    pub fn url(&self) -> BrokerUrl {
        let scheme = if self.connection.tls.is_some() {
            Scheme::Tls
        } else {
            Scheme::Tcp
        };
        BrokerUrl::new(scheme, &self.connection.host, self.connection.port)
    }

    /// client id used by the given round
    pub fn client_id(&self, round: usize) -> String {
        format!(
            "{CLIENT_ID_PREFIX}-{}",
            self.connection.start_number + round
        )
    }

    /// connect handshake data for the given round
    pub fn connect_packet(&self, round: usize) -> ConnectPacket {
        ConnectPacket::new(self.client_id(round))
            .with_credentials(
                self.connection.username.clone(),
                self.connection.password.clone(),
            )
            .with_keep_alive(self.connection.keep_alive)
            .with_clean_session(self.connection.clean)
    }

    /// send budget for the run
    pub fn send_limit(&self) -> Option<u64> {
        match &self.workload {
            Workload::Publish(opts) => opts.limit,
            _ => None,
        }
    }
}

impl TryFrom<cli::Command> for WorkloadConfig {
    type Error = anyhow::Error;

    fn try_from(command: cli::Command) -> Result<Self> {
        match command {
            cli::Command::Conn(args) => Ok(Self {
                connection: connection_options(args.connection)?,
                workload: Workload::Connect,
            }),
            cli::Command::Sub(args) => {
                let connection = connection_options(args.connection)?;
                Ok(Self {
                    connection,
                    workload: Workload::Subscribe(SubscribeOptions {
                        topic: non_empty_topic(args.topic)?,
                        qos: parse_qos(args.qos)?,
                    }),
                })
            }
            cli::Command::Pub(args) => {
                let connection = connection_options(args.connection)?;
                Ok(Self {
                    connection,
                    workload: Workload::Publish(PublishOptions {
                        topic: non_empty_topic(args.topic)?,
                        qos: parse_qos(args.qos)?,
                        retain: args.retain,
                        size: args.size,
                        limit: (args.limit > 0).then_some(args.limit),
                        interval_of_msg: Duration::from_millis(args.interval_of_msg),
                    }),
                })
            }
        }
    }
}

fn connection_options(args: cli::ConnectionArgs) -> Result<ConnectionOptions> {
    if args.protocol_version != SUPPORTED_PROTOCOL_VERSION {
        bail!(
            "--version {} is not supported, only {SUPPORTED_PROTOCOL_VERSION} (MQTT 3.1.1)",
            args.protocol_version
        );
    }
    if args.parallel == 0 {
        bail!("--parallel must be greater than 0");
    }
    if args.host.is_empty() {
        bail!("--host must not be empty");
    }
    if args.password.is_some() && args.username.is_none() {
        bail!("--password requires --username");
    }

    let tls = tls_files(args.tls, args.cacert, args.cert, args.key)?;

    Ok(ConnectionOptions {
        host: args.host,
        port: args.port,
        count: args.count,
        start_number: args.start_number,
        interval: Duration::from_millis(args.interval),
        username: args.username,
        password: args.password,
        keep_alive: Duration::from_secs(u64::from(args.keepalive)),
        clean: args.clean,
        tls,
        parallel: args.parallel,
    })
}

fn tls_files(
    enabled: bool,
    ca: Option<PathBuf>,
    cert: Option<PathBuf>,
    key: Option<PathBuf>,
) -> Result<Option<TlsFiles>> {
    if !enabled {
        if ca.is_some() || cert.is_some() || key.is_some() {
            bail!("--cacert, --cert and --key require --tls");
        }
        return Ok(None);
    }
    if cert.is_some() != key.is_some() {
        bail!("--cert and --key must be given together");
    }
    if cert.is_some() && ca.is_none() {
        bail!("--cert and --key require --cacert");
    }
    for path in [&ca, &cert, &key].into_iter().flatten() {
        std::fs::metadata(path)
            .with_context(|| format!("failed to read TLS file `{}`", path.display()))?;
    }
    Ok(Some(TlsFiles { ca, cert, key }))
}

fn non_empty_topic(topic: String) -> Result<String> {
    if topic.is_empty() {
        bail!("--topic must not be empty");
    }
    Ok(topic)
}

fn parse_qos(level: u8) -> Result<QoS> {
    qos_from_u8(level).with_context(|| format!("--qos {level} is invalid, expected 0, 1 or 2"))
}
