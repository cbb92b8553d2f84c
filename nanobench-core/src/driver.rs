//! Opens one connection per round, runs a [`SessionPool`] on each and
//! reports throughput once per second until cancelled.
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use mqtt_transport::{
    ConnectEvent, ConnectHandler, ConnectReturnCode, Connector, Dialer, MqttDialer,
    TransportSession,
};
use tokio::task::{JoinError, JoinSet};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, instrument, warn};
use tracing_futures::Instrument;

use crate::config::{Mode, WorkloadConfig};
use crate::counters::Counters;
use crate::pool::SessionPool;
use crate::report::{BenchReport, RateReporter, RunConfigSnapshot, Totals};
use crate::session::{SessionError, Shared};

/// how often the rate line is sampled
pub const REPORT_INTERVAL: Duration = Duration::from_secs(1);

type PoolResult = Result<Result<(), SessionError>, JoinError>;

/// Run the configured workload against a real broker until `token` is
/// cancelled or a session fails.
pub async fn run(config: WorkloadConfig, token: CancellationToken) -> Result<BenchReport> {
    run_with(config, &MqttDialer, token).await
}

/// Run the configured workload with sessions from `dialer`.
#[instrument(name = "bench", level = "debug", skip_all, fields(mode = %config.mode()))]
pub async fn run_with<D: Dialer>(
    config: WorkloadConfig,
    dialer: &D,
    token: CancellationToken,
) -> Result<BenchReport> {
    let started = Instant::now();
    // cancelled on every exit path so pools and event loops stop with us
    let run_token = token.child_token();
    let _guard = run_token.clone().drop_guard();

    let counters = Arc::new(Counters::new(config.send_limit()));
    let shared = Shared::new(config.workload.clone(), Arc::clone(&counters));
    let handler = connect_handler(
        config.mode(),
        shared.topic.as_ref().map(|t| t.as_str().to_owned()),
        Arc::clone(&counters),
    );
    let url = config.url();
    info!(
        %url,
        count = config.connection.count,
        parallel = config.connection.parallel,
        "starting benchmark"
    );

    let mut pools = JoinSet::new();
    let mut rounds = 0;
    'rounds: for round in 0..config.connection.count {
        if run_token.is_cancelled() {
            break;
        }
        let mut connector = Connector::new(url.clone(), config.connect_packet(round))
            .on_connect(Arc::clone(&handler));
        if let Some(tls) = &config.connection.tls {
            connector = connector.tls(tls.clone());
        }
        let session = dialer
            .dial(connector, run_token.child_token())
            .with_context(|| format!("failed to start connection for round {round}"))?;
        let span = info_span!("pool", round, client_id = session.client_id());
        let pool = SessionPool::new(
            Arc::new(session),
            shared.clone(),
            config.connection.parallel,
            config.connection.username.clone(),
        );
        pools.spawn(pool.run(run_token.child_token()).instrument(span));
        rounds += 1;

        let next_round = Instant::now() + config.connection.interval;
        loop {
            tokio::select! {
                biased;
                _ = run_token.cancelled() => break 'rounds,
                Some(res) = pools.join_next(), if !pools.is_empty() => pool_finished(res)?,
                _ = time::sleep_until(next_round) => break,
            }
        }
    }
    debug!(rounds, "all rounds started");

    let mut reporter = RateReporter::new(config.mode());
    let mut ticker = time::interval_at(Instant::now() + REPORT_INTERVAL, REPORT_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = run_token.cancelled() => break,
            Some(res) = pools.join_next(), if !pools.is_empty() => pool_finished(res)?,
            _ = ticker.tick() => {
                if let Some(line) = reporter.sample(&counters) {
                    println!("{line}");
                }
                if budget_spent(&config, &counters, &pools) {
                    info!(sent = counters.sent(), "send limit reached");
                    break;
                }
            }
        }
    }

    run_token.cancel();
    pools.shutdown().await;

    Ok(BenchReport::new(
        RunConfigSnapshot::from(&config),
        Totals::from_counters(rounds, &counters),
        started.elapsed(),
    ))
}

/// a limited publish run is over once the budget is gone and every pool halted
fn budget_spent<T>(config: &WorkloadConfig, counters: &Counters, pools: &JoinSet<T>) -> bool {
    config.send_limit().is_some() && counters.send_budget() == 0 && pools.is_empty()
}

fn pool_finished(res: PoolResult) -> Result<()> {
    res.context("session pool task failed")?
        .context("session failed")?;
    debug!("session pool finished");
    Ok(())
}

/// Counts acknowledged connections and prints the connected line.
fn connect_handler(mode: Mode, topic: Option<String>, counters: Arc<Counters>) -> ConnectHandler {
    Arc::new(move |event: &ConnectEvent| {
        if event.code != ConnectReturnCode::Success {
            warn!(client_id = %event.client_id, code = ?event.code, "connection refused");
            return;
        }
        let connected = counters.inc_connected();
        debug!(
            client_id = %event.client_id,
            session_present = event.session_present,
            "connected"
        );
        match (mode, &topic) {
            (Mode::Subscribe, Some(topic)) => {
                println!("connected: {connected}. Topics: [\"{topic}\"]")
            }
            _ => println!("connected: {connected}."),
        }
    })
}
