//! Progress and peer monitor
//!
//! Re-renders download progress, a smoothed download rate and the most
//! productive peers once per tick until cancelled. Cancellation is
//! cooperative: a frame that is being rendered always finishes first.

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use crossterm::cursor::MoveTo;
use crossterm::style::Stylize;
use crossterm::terminal::{Clear, ClearType};
use crossterm::queue;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::session::Session;
use crate::models::{format_bytes, format_rate, PeerSample};

/// Fixed monitor cadence
pub const TICK: Duration = Duration::from_secs(1);

/// Peers listed per frame before the rest collapse into "..."
pub const MAX_PEERS_SHOWN: usize = 10;

/// Two-sample download rate estimator.
///
/// Assumes one sample per [`TICK`]: the rate is the mean of the last two raw
/// deltas in bytes, not normalised by wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct RateEstimator {
    previous_completed: u64,
    previous_delta: f64,
}

impl RateEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the current completed byte count, get the smoothed rate
    pub fn sample(&mut self, completed: u64) -> f64 {
        let delta = completed as f64 - self.previous_completed as f64;
        let rate = (delta + self.previous_delta) / 2.0;
        self.previous_delta = delta;
        self.previous_completed = completed;
        rate
    }
}

/// Sort peers by rate, fastest first, and keep the top [`MAX_PEERS_SHOWN`].
///
/// The flag is true when peers were cut off.
pub fn rank_peers(mut peers: Vec<PeerSample>) -> (Vec<PeerSample>, bool) {
    peers.sort_by(|a, b| b.rate.total_cmp(&a.rate));
    let truncated = peers.len() > MAX_PEERS_SHOWN;
    peers.truncate(MAX_PEERS_SHOWN);
    (peers, truncated)
}

/// Everything shown on one monitor tick
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub title: String,
    pub completed: u64,
    pub total: u64,
    pub active_peers: usize,
    pub total_peers: usize,
    pub rate: f64,
    pub peers: Vec<PeerSample>,
    pub truncated: bool,
}

impl Frame {
    /// Draw the frame over the whole terminal
    pub fn render<W: Write>(&self, out: &mut W) -> io::Result<()> {
        queue!(out, Clear(ClearType::All), MoveTo(0, 0))?;

        write!(
            out,
            "{}: {} / {}\r\n",
            self.title.as_str().cyan(),
            format_bytes(self.completed),
            format_bytes(self.total)
        )?;
        write!(out, "Peers: {} / {}\r\n", self.active_peers, self.total_peers)?;
        write!(out, "Download speed: {}\r\n\r\n", format_rate(self.rate))?;

        for peer in &self.peers {
            write!(
                out,
                "{} ({})\r\n",
                peer.address.as_str().magenta(),
                format_rate(peer.rate).green()
            )?;
        }
        if self.truncated {
            write!(out, "...\r\n")?;
        }

        out.flush()
    }
}

/// Periodic reporter bound to one session
pub struct Monitor {
    session: Arc<Session>,
    index: i64,
    tick: Duration,
}

impl Monitor {
    /// Monitor `session`, titling frames with the name of file `index`
    /// (`-1` for the release name)
    pub fn new(session: Arc<Session>, index: i64) -> Self {
        Self {
            session,
            index,
            tick: TICK,
        }
    }

    /// Override the tick interval
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Run on a background task, rendering into `out`
    pub fn spawn<W: Write + Send + 'static>(self, out: W) -> MonitorHandle {
        let token = CancellationToken::new();
        let task = tokio::spawn(self.run(out, token.clone()));
        MonitorHandle { token, task }
    }

    /// Tick until `token` is cancelled
    pub async fn run<W: Write>(self, mut out: W, token: CancellationToken) {
        let title = self
            .session
            .name_of(self.index)
            .unwrap_or_else(|_| self.session.name())
            .to_string();

        let mut estimator = RateEstimator::new();
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = interval.tick() => {}
            }

            let frame = self.frame(&title, &mut estimator);
            if let Err(e) = frame.render(&mut out) {
                warn!("Monitor render failed: {}", e);
            }
        }

        debug!(id = %self.session.id(), "Monitor stopped");
    }

    fn frame(&self, title: &str, estimator: &mut RateEstimator) -> Frame {
        let completed = self.session.bytes_completed();
        let rate = estimator.sample(completed);
        let stats = self.session.peer_stats();
        let (peers, truncated) = rank_peers(stats.peers);

        Frame {
            title: title.to_string(),
            completed,
            total: self.session.length(),
            active_peers: stats.active,
            total_peers: stats.total,
            rate,
            peers,
            truncated,
        }
    }
}

/// Stop switch and join handle of a spawned monitor
pub struct MonitorHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Signal the loop to stop after its current frame
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the loop to exit
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!("Monitor task failed: {}", e);
        }
    }
}
