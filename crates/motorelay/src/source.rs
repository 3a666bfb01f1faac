//! Position sources.
//!
//! A [`PositionSource`] yields [`PositionSample`]s for one subject. Sources
//! must be opened before sampling; opening is where permission and
//! availability problems surface.

use std::collections::VecDeque;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::sample::PositionSample;

/// A stream of position readings.
#[async_trait]
pub trait PositionSource: Send {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Acquire the source.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PositionPermissionDenied`] or
    /// [`Error::PositionUnavailable`] when the source cannot be used.
    async fn open(&mut self) -> Result<()>;

    /// Wait for the next reading. `None` when the source is exhausted.
    async fn next_sample(&mut self) -> Option<Result<PositionSample>>;
}

/// Replays recorded samples at a fixed interval.
///
/// Samples come either from memory or from a JSON-lines file holding one
/// [`PositionSample`] object per line. Blank lines and lines starting with
/// `#` are ignored.
#[derive(Debug)]
pub struct ReplaySource {
    origin: Origin,
    period: Duration,
    pending: VecDeque<PositionSample>,
    ticker: Option<Interval>,
}

#[derive(Debug)]
enum Origin {
    Memory(Vec<PositionSample>),
    File(PathBuf),
}

impl ReplaySource {
    /// Source name.
    pub const NAME: &'static str = "replay";

    /// Replay in-memory samples.
    #[must_use]
    pub fn from_samples(samples: Vec<PositionSample>, period: Duration) -> Self {
        Self {
            origin: Origin::Memory(samples),
            period,
            pending: VecDeque::new(),
            ticker: None,
        }
    }

    /// Replay a JSON-lines file. The file is read on [`open`](PositionSource::open).
    #[must_use]
    pub fn from_file(path: impl Into<PathBuf>, period: Duration) -> Self {
        Self {
            origin: Origin::File(path.into()),
            period,
            pending: VecDeque::new(),
            ticker: None,
        }
    }

    /// Samples left to replay.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

/// Parse JSON-lines sample text.
///
/// # Errors
///
/// Returns [`Error::Decode`] naming the first line that is not a sample.
pub fn parse_samples(text: &str) -> Result<Vec<PositionSample>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(index, line)| {
            serde_json::from_str(line)
                .map_err(|e| Error::decode(format!("line {}: {e}", index + 1)))
        })
        .collect()
}

fn read_samples(path: &Path) -> Result<Vec<PositionSample>> {
    let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        ErrorKind::PermissionDenied => {
            Error::permission_denied(ReplaySource::NAME, format!("{}: {e}", path.display()))
        }
        _ => Error::unavailable(ReplaySource::NAME, format!("{}: {e}", path.display())),
    })?;
    parse_samples(&text)
}

#[async_trait]
impl PositionSource for ReplaySource {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn open(&mut self) -> Result<()> {
        let samples = match &self.origin {
            Origin::Memory(samples) => samples.clone(),
            Origin::File(path) => {
                let path = path.clone();
                tokio::task::spawn_blocking(move || read_samples(&path))
                    .await
                    .map_err(|e| Error::internal(format!("replay reader panicked: {e}")))??
            }
        };

        if samples.is_empty() {
            warn!(source = Self::NAME, "Replay source has no samples");
        }
        debug!(source = Self::NAME, count = samples.len(), "Replay source opened");

        let mut ticker = interval(self.period.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.pending = samples.into();
        self.ticker = Some(ticker);
        Ok(())
    }

    async fn next_sample(&mut self) -> Option<Result<PositionSample>> {
        let Some(ticker) = self.ticker.as_mut() else {
            return Some(Err(Error::unavailable(Self::NAME, "source not opened")));
        };
        if self.pending.is_empty() {
            return None;
        }
        ticker.tick().await;
        self.pending.pop_front().map(Ok)
    }
}
