//! Route reconstruction from stored samples.
//!
//! A route is never stored; it is recomputed from a subject's samples every
//! time. [`summarize`] is a pure left fold, so the same samples always give
//! the same summary, and its distance matches the tracker's running total
//! for the samples that tracker accepted.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::geospatial::{self, Bounds, LatLng, Viewport, DEFAULT_ZOOM};
use crate::sample::{PositionSample, SubjectId};
use crate::storage::SampleStore;

/// Derived metrics of a route.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteSummary {
    /// Number of samples.
    pub sample_count: usize,

    /// Cumulative great-circle distance, in kilometers.
    pub total_distance_km: f64,

    /// Bounding box; `None` for an empty route.
    pub bounds: Option<Bounds>,

    /// Zoom that fits the bounds into the viewport.
    pub suggested_zoom: u8,

    /// Center of the bounds.
    pub center: Option<LatLng>,

    /// Time between the first and last sample, in milliseconds.
    pub duration_millis: i64,

    /// Fastest segment speed, in km/h.
    pub max_speed_kmh: Option<f64>,

    /// Distance over duration, in km/h.
    pub average_speed_kmh: Option<f64>,
}

impl RouteSummary {
    /// Summary of a route with no samples.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            sample_count: 0,
            total_distance_km: 0.0,
            bounds: None,
            suggested_zoom: DEFAULT_ZOOM,
            center: None,
            duration_millis: 0,
            max_speed_kmh: None,
            average_speed_kmh: None,
        }
    }
}

/// A subject's ordered samples and their summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    /// Subject the route belongs to.
    pub subject: SubjectId,
    /// Samples, ascending by timestamp.
    pub samples: Vec<PositionSample>,
    /// Derived metrics.
    pub summary: RouteSummary,
}

/// Summarize an ordered sequence of samples.
#[must_use]
pub fn summarize(samples: &[PositionSample], viewport: Viewport) -> RouteSummary {
    let (Some(first), Some(last)) = (samples.first(), samples.last()) else {
        return RouteSummary::empty();
    };

    let mut total_distance_km = 0.0;
    let mut max_speed_kmh: Option<f64> = None;
    for pair in samples.windows(2) {
        total_distance_km += geospatial::distance(&pair[0], &pair[1]);
        if let Some(speed) = geospatial::speed(&pair[0], &pair[1]) {
            max_speed_kmh = Some(max_speed_kmh.map_or(speed, |max| max.max(speed)));
        }
    }

    let duration_millis = last.timestamp_millis.saturating_sub(first.timestamp_millis);
    let average_speed_kmh = (duration_millis > 0).then(|| {
        #[allow(clippy::cast_precision_loss)]
        let hours = duration_millis as f64 / 3_600_000.0;
        total_distance_km / hours
    });

    let bounds = geospatial::bounds(samples);
    RouteSummary {
        sample_count: samples.len(),
        total_distance_km,
        bounds,
        suggested_zoom: bounds.map_or(DEFAULT_ZOOM, |b| geospatial::zoom_fit(&b, viewport)),
        center: bounds.map(|b| b.center()),
        duration_millis,
        max_speed_kmh,
        average_speed_kmh,
    }
}

/// Rebuilds routes from a [`SampleStore`].
#[derive(Clone)]
pub struct RouteReconstructor {
    store: Arc<dyn SampleStore>,
}

impl std::fmt::Debug for RouteReconstructor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteReconstructor").finish_non_exhaustive()
    }
}

impl RouteReconstructor {
    /// Create a reconstructor over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn SampleStore>) -> Self {
        Self { store }
    }

    /// Load a subject's samples in timestamp order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn load(&self, subject: &SubjectId) -> Result<Vec<PositionSample>> {
        self.store.load(subject)
    }

    /// Load and summarize a subject's route.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn reconstruct(&self, subject: &SubjectId, viewport: Viewport) -> Result<Route> {
        let samples = self.load(subject)?;
        let summary = summarize(&samples, viewport);
        debug!(
            subject = %subject,
            samples = summary.sample_count,
            distance_km = summary.total_distance_km,
            "Reconstructed route"
        );

        Ok(Route {
            subject: subject.clone(),
            samples,
            summary,
        })
    }
}
