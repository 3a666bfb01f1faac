//! Location tracker.
//!
//! A [`Tracker`] drives one [`PositionSource`] for one subject. Every
//! accepted sample updates the running totals, goes to the relay through
//! the [`StreamClient`] (best-effort) and is appended to the
//! [`SampleStore`]. The store is the source of truth: the tracker keeps
//! persisting while the relay is unreachable.

use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::{Session, StreamClient};
use crate::config::TrackerConfig;
use crate::error::{Error, Result};
use crate::geospatial;
use crate::protocol::RelayMessage;
use crate::sample::{PositionSample, SubjectId};
use crate::source::PositionSource;
use crate::storage::SampleStore;

/// Cumulative metrics of a tracking session.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunningTotals {
    /// Samples accepted.
    pub sample_count: u64,
    /// Distance covered, in kilometers. Never decreases.
    pub distance_km: f64,
    /// Speed over the last segment, in km/h.
    pub last_speed_kmh: Option<f64>,
    /// Bearing of the last segment, in degrees.
    pub last_bearing_deg: Option<f64>,
    /// Most recent accepted sample.
    pub last_sample: Option<PositionSample>,
}

/// Why a sample was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Coordinates are not finite or out of range.
    InvalidCoordinates,
    /// The timestamp is not after the previous sample's.
    NotAfterPrevious,
}

impl RunningTotals {
    /// Fold one sample into the totals.
    ///
    /// # Errors
    ///
    /// Returns the reason the sample was skipped; the totals are unchanged.
    pub fn record(&mut self, sample: &PositionSample) -> std::result::Result<(), Rejection> {
        if !sample.is_valid() {
            return Err(Rejection::InvalidCoordinates);
        }

        if let Some(previous) = &self.last_sample {
            if sample.timestamp_millis <= previous.timestamp_millis {
                return Err(Rejection::NotAfterPrevious);
            }
            self.distance_km += geospatial::distance(previous, sample);
            self.last_speed_kmh = geospatial::speed(previous, sample);
            self.last_bearing_deg = Some(geospatial::bearing(previous, sample));
        }

        self.sample_count += 1;
        self.last_sample = Some(*sample);
        Ok(())
    }
}

/// Something that happened during tracking.
#[derive(Debug)]
pub enum TrackerEvent {
    /// A sample was accepted.
    Sample {
        /// The sample.
        sample: PositionSample,
        /// Totals after the sample.
        totals: RunningTotals,
        /// Whether the sample was queued for the relay.
        relayed: bool,
    },

    /// Appending a sample to the store failed; the caller may retry.
    PersistFailed {
        /// Subject of the sample.
        subject: SubjectId,
        /// The sample that was not stored.
        sample: PositionSample,
        /// The store error.
        error: Error,
    },

    /// The stream client gave up reconnecting. Tracking continues.
    ConnectivityLost {
        /// Relay URL.
        url: String,
        /// Failed attempts before giving up.
        attempts: u32,
    },

    /// The position source failed; tracking ended.
    SourceFailed(Error),

    /// The position source ran out of samples; tracking ended.
    Finished,
}

struct Active {
    subject: SubjectId,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Tracks one subject at a time.
pub struct Tracker {
    client: Arc<StreamClient>,
    store: Arc<dyn SampleStore>,
    config: TrackerConfig,
    totals: Arc<Mutex<RunningTotals>>,
    active: Option<Active>,
}

impl std::fmt::Debug for Tracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracker")
            .field("subject", &self.subject())
            .field("totals", &self.totals())
            .finish_non_exhaustive()
    }
}

impl Tracker {
    /// Create an idle tracker.
    #[must_use]
    pub fn new(client: Arc<StreamClient>, store: Arc<dyn SampleStore>, config: TrackerConfig) -> Self {
        Self {
            client,
            store,
            config,
            totals: Arc::new(Mutex::new(RunningTotals::default())),
            active: None,
        }
    }

    /// Whether a session is running.
    #[must_use]
    pub fn is_tracking(&self) -> bool {
        self.active.as_ref().is_some_and(|a| !a.task.is_finished())
    }

    /// Subject of the running session.
    #[must_use]
    pub fn subject(&self) -> Option<&SubjectId> {
        self.active
            .as_ref()
            .filter(|a| !a.task.is_finished())
            .map(|a| &a.subject)
    }

    /// Snapshot of the running totals.
    #[must_use]
    pub fn totals(&self) -> RunningTotals {
        *self.totals.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open `source` and start tracking `subject`.
    ///
    /// Returns the event stream of the new session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyTracking`] if a session is running, or the
    /// source's error if it cannot be opened.
    pub async fn start(
        &mut self,
        subject: SubjectId,
        mut source: Box<dyn PositionSource>,
    ) -> Result<mpsc::Receiver<TrackerEvent>> {
        if let Some(current) = self.subject() {
            return Err(Error::AlreadyTracking {
                subject: current.to_string(),
            });
        }

        source.open().await?;
        *self.totals.lock().unwrap_or_else(PoisonError::into_inner) = RunningTotals::default();

        let (events_tx, events_rx) = mpsc::channel(self.config.event_buffer.max(1));
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut session = self.client.session();
        session.mark_changed();

        let run = TrackingTask {
            subject: subject.clone(),
            client: Arc::clone(&self.client),
            store: Arc::clone(&self.store),
            totals: Arc::clone(&self.totals),
            events: events_tx,
            stop: stop_rx,
            session,
        };

        info!(subject = %subject, source = source.name(), "Tracking started");
        self.active = Some(Active {
            subject,
            stop: stop_tx,
            task: tokio::spawn(run.run(source)),
        });
        Ok(events_rx)
    }

    /// Stop sampling. The stream client stays connected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotTracking`] if no session is running.
    pub fn stop(&mut self) -> Result<()> {
        let active = self.active.take().ok_or(Error::NotTracking)?;
        let _ = active.stop.send(true);
        info!(subject = %active.subject, "Tracking stopped");
        Ok(())
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            let _ = active.stop.send(true);
        }
    }
}

struct TrackingTask {
    subject: SubjectId,
    client: Arc<StreamClient>,
    store: Arc<dyn SampleStore>,
    totals: Arc<Mutex<RunningTotals>>,
    events: mpsc::Sender<TrackerEvent>,
    stop: watch::Receiver<bool>,
    session: watch::Receiver<Session>,
}

impl TrackingTask {
    async fn run(mut self, mut source: Box<dyn PositionSource>) {
        let mut watching_session = true;
        let mut connectivity_reported = false;

        loop {
            tokio::select! {
                biased;
                _ = self.stop.changed() => break,
                changed = self.session.changed(), if watching_session => {
                    if changed.is_err() {
                        watching_session = false;
                        continue;
                    }
                    let lost = {
                        let session = self.session.borrow_and_update();
                        match session.gave_up_after {
                            Some(attempts) if !connectivity_reported => Some((session.url.clone(), attempts)),
                            Some(_) => None,
                            None => {
                                connectivity_reported = false;
                                None
                            }
                        }
                    };
                    if let Some((url, attempts)) = lost {
                        connectivity_reported = true;
                        warn!(subject = %self.subject, url = %url, "Relay unreachable, continuing to record locally");
                        self.emit(TrackerEvent::ConnectivityLost { url, attempts }).await;
                    }
                }
                next = source.next_sample() => match next {
                    Some(Ok(sample)) => self.handle(sample).await,
                    Some(Err(e)) => {
                        warn!(subject = %self.subject, source = source.name(), error = %e, "Position source failed");
                        self.emit(TrackerEvent::SourceFailed(e)).await;
                        break;
                    }
                    None => {
                        info!(subject = %self.subject, "Position source exhausted");
                        self.emit(TrackerEvent::Finished).await;
                        break;
                    }
                },
            }
        }

        debug!(subject = %self.subject, "Tracking task ended");
    }

    async fn handle(&mut self, sample: PositionSample) {
        if *self.stop.borrow() {
            return;
        }

        let totals = {
            let mut totals = self.totals.lock().unwrap_or_else(PoisonError::into_inner);
            if let Err(reason) = totals.record(&sample) {
                warn!(
                    subject = %self.subject,
                    timestamp = sample.timestamp_millis,
                    ?reason,
                    "Skipping sample"
                );
                return;
            }
            *totals
        };

        let relayed = self
            .client
            .send(&RelayMessage::location(self.subject.clone(), sample));

        if let Err(error) = self.persist(sample).await {
            warn!(
                subject = %self.subject,
                timestamp = sample.timestamp_millis,
                error = %error,
                "Failed to persist sample"
            );
            self.emit(TrackerEvent::PersistFailed {
                subject: self.subject.clone(),
                sample,
                error,
            })
            .await;
        }

        self.emit(TrackerEvent::Sample {
            sample,
            totals,
            relayed,
        })
        .await;
    }

    /// Append on the blocking pool; store writes are synchronous.
    async fn persist(&self, sample: PositionSample) -> Result<bool> {
        let store = Arc::clone(&self.store);
        let subject = self.subject.clone();
        tokio::task::spawn_blocking(move || store.append(&subject, &sample))
            .await
            .map_err(|e| Error::internal(format!("sample writer panicked: {e}")))?
    }

    async fn emit(&self, event: TrackerEvent) {
        // A dropped receiver only means nobody is listening.
        let _ = self.events.send(event).await;
    }
}
