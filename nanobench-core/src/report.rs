//! Per-second rate lines and the end-of-run report.
//!
//! The report serializes to JSON for `--json` and renders a human summary
//! otherwise.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::config::{Mode, Workload, WorkloadConfig};
use crate::counters::Counters;

/// Which counter a rate line reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Received,
    Sent,
}

/// One per-second throughput line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLine {
    pub direction: Direction,
    pub total: u64,
    /// messages since the previous sample
    pub rate: u64,
}

impl fmt::Display for RateLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.direction {
            Direction::Received => "recv",
            Direction::Sent => "sent",
        };
        write!(
            f,
            "{prefix}: total={}, rate={}(msg/sec)",
            self.total, self.rate
        )
    }
}

/// Samples the counter relevant to a mode and reports changes.
#[derive(Debug)]
pub struct RateReporter {
    direction: Option<Direction>,
    last: u64,
}

impl RateReporter {
    pub fn new(mode: Mode) -> Self {
        let direction = match mode {
            Mode::Connect => None,
            Mode::Subscribe => Some(Direction::Received),
            Mode::Publish => Some(Direction::Sent),
        };
        Self { direction, last: 0 }
    }

    /// Read the counter; `None` when it has not moved since the last sample
    /// or the mode has no rate to report.
    pub fn sample(&mut self, counters: &Counters) -> Option<RateLine> {
        let direction = self.direction?;
        let total = match direction {
            Direction::Received => counters.received(),
            Direction::Sent => counters.sent(),
        };
        if total == self.last {
            return None;
        }
        let rate = total.saturating_sub(self.last);
        self.last = total;
        Some(RateLine {
            direction,
            total,
            rate,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunConfigSnapshot {
    pub mode: Mode,
    pub url: String,
    pub count: usize,
    pub start_number: usize,
    pub parallel: usize,
    pub interval_ms: u128,
    pub topic: Option<String>,
    pub qos: Option<u8>,
    pub payload_size: Option<usize>,
    pub limit: Option<u64>,
    pub interval_of_msg_ms: Option<u128>,
}

impl From<&WorkloadConfig> for RunConfigSnapshot {
    fn from(config: &WorkloadConfig) -> Self {
        let (qos, payload_size, interval_of_msg_ms) = match &config.workload {
            Workload::Connect => (None, None, None),
            Workload::Subscribe(opts) => (Some(opts.qos as u8), None, None),
            Workload::Publish(opts) => (
                Some(opts.qos as u8),
                Some(opts.size),
                Some(opts.interval_of_msg.as_millis()),
            ),
        };
        Self {
            mode: config.mode(),
            url: config.url().to_string(),
            count: config.connection.count,
            start_number: config.connection.start_number,
            parallel: config.connection.parallel,
            interval_ms: config.connection.interval.as_millis(),
            topic: config.workload.topic().map(str::to_owned),
            qos,
            payload_size,
            limit: config.send_limit(),
            interval_of_msg_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Totals {
    /// rounds whose connector was started
    pub rounds: usize,
    pub connected: u64,
    pub sent: u64,
    pub received: u64,
}

impl Totals {
    pub fn from_counters(rounds: usize, counters: &Counters) -> Self {
        Self {
            rounds,
            connected: counters.connected(),
            sent: counters.sent(),
            received: counters.received(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BenchReport {
    pub config: RunConfigSnapshot,
    pub totals: Totals,
    pub duration_ms: u128,
    /// average of the mode's counter over the whole run
    pub average_rate_per_sec: f64,
}

impl BenchReport {
    pub fn new(config: RunConfigSnapshot, totals: Totals, elapsed: Duration) -> Self {
        let counted = match config.mode {
            Mode::Connect => totals.connected,
            Mode::Subscribe => totals.received,
            Mode::Publish => totals.sent,
        };
        let secs = elapsed.as_secs_f64();
        let average_rate_per_sec = if secs > 0.0 {
            counted as f64 / secs
        } else {
            0.0
        };
        Self {
            config,
            totals,
            duration_ms: elapsed.as_millis(),
            average_rate_per_sec,
        }
    }

    pub fn human_summary(&self) -> String {
        let mut output = String::new();
        output.push_str("MQTT bench report\n");
        output.push_str(&format!(
            "mode: {} url={} parallel={}\n",
            self.config.mode, self.config.url, self.config.parallel
        ));
        if let Some(topic) = &self.config.topic {
            output.push_str(&format!(
                "topic: {topic} qos={}\n",
                self.config.qos.unwrap_or_default()
            ));
        }
        output.push_str(&format!(
            "rounds: planned={}, started={}, connected={}\n",
            self.config.count, self.totals.rounds, self.totals.connected
        ));
        output.push_str(&format!(
            "messages: sent={}, received={}\n",
            self.totals.sent, self.totals.received
        ));
        output.push_str(&format!(
            "timing: duration={}ms average={:.2}/s\n",
            self.duration_ms, self.average_rate_per_sec
        ));
        output
    }
}
