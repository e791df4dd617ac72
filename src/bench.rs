//! Latency benchmark: many small payments over one channel.

use crate::{
    channel::PaymentChannel,
    session::{ChannelSession, SessionError},
    types::U256,
};
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use log::debug;
use std::{
    fmt,
    time::{Duration, Instant},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BenchError {
    #[error("Number of runs can't be less than 1")]
    InvalidSampleCount,
    #[error("Peer not found")]
    PeerNotFound,
    #[error("Open a state channel first")]
    ChannelNotOpen,
    #[error("could not send update {index}")]
    Send {
        index: u64,
        #[source]
        source: SessionError,
    },
}

/// What a benchmark is run against, as looked up by the caller.
pub enum Target<'a, C> {
    /// No such peer.
    Unknown,
    /// Peer without channel.
    NotOpen,
    Open(&'a ChannelSession<C>),
}

/// Elapsed times of the samples taken so far.
#[derive(Debug, Default)]
pub struct Run {
    data: Vec<Duration>,
    start: Option<Instant>,
}

impl Run {
    pub fn start(&mut self) {
        self.start = Some(Instant::now());
    }

    pub fn stop(&mut self) {
        if let Some(start) = self.start.take() {
            self.data.push(start.elapsed());
        }
    }

    pub fn samples(&self) -> &[Duration] {
        &self.data
    }

    pub fn summary(&self) -> Option<Summary> {
        Summary::from_samples(&self.data)
    }
}

/// Statistics over the samples of a completed [Run].
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub n: usize,
    pub tx_per_sec: f64,
    pub sum: Duration,
    pub min: Duration,
    pub max: Duration,
    pub median: Duration,
    /// Population standard deviation.
    pub stddev: Duration,
}

impl Summary {
    pub fn from_samples(samples: &[Duration]) -> Option<Self> {
        let n = samples.len();
        let mut sorted: Vec<f64> = samples.iter().map(|d| d.as_nanos() as f64).collect();
        sorted.sort_by(f64::total_cmp);
        let (min, max) = (*sorted.first()?, *sorted.last()?);

        let sum: f64 = sorted.iter().sum();
        let median = if n % 2 == 0 {
            (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
        } else {
            sorted[n / 2]
        };
        let mean = sum / n as f64;
        let variance = sorted.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;

        Some(Self {
            n,
            tx_per_sec: n as f64 / (sum / 1e9),
            sum: round_micros(sum),
            min: round_micros(min),
            max: round_micros(max),
            median: round_micros(median),
            stddev: round_micros(variance.sqrt()),
        })
    }
}

fn round_micros(nanos: f64) -> Duration {
    Duration::from_micros((nanos / 1e3).round() as u64)
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec!["N", "tx/s", "Sum", "Min", "Max", "Median", "Stddev"]);
        table.add_row(vec![
            self.n.to_string(),
            format!("{:.1}", self.tx_per_sec),
            format!("{:?}", self.sum),
            format!("{:?}", self.min),
            format!("{:?}", self.max),
            format!("{:?}", self.median),
            format!("{:?}", self.stddev),
        ]);
        write!(f, "{}", table)
    }
}

/// Sends `total` base units to the target in `count` equal payments and times
/// each of them. The remainder of the division is not sent.
///
/// Stops at the first failed payment, payments made until then stay.
pub fn run<C: PaymentChannel>(
    target: Target<'_, C>,
    total: U256,
    count: u64,
) -> Result<Summary, BenchError> {
    if count < 1 {
        return Err(BenchError::InvalidSampleCount);
    }
    let session = match target {
        Target::Unknown => return Err(BenchError::PeerNotFound),
        Target::NotOpen => return Err(BenchError::ChannelNotOpen),
        Target::Open(session) => session,
    };

    let share = total / U256::from(count);
    debug!(
        "channel={}: Benchmark with {} payments of {}",
        session.channel_id(),
        count,
        share
    );
    let mut run = Run::default();
    for index in 0..count {
        run.start();
        session
            .send_payment(share)
            .map_err(|source| BenchError::Send { index, source })?;
        run.stop();
    }
    run.summary().ok_or(BenchError::InvalidSampleCount)
}
