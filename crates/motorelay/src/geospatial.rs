//! Geospatial kernel.
//!
//! Pure functions over [`PositionSample`]s: great-circle distance, bearing,
//! speed, bounding boxes and map zoom selection. The live tracker and the
//! route reconstructor both go through these functions so their numbers
//! agree exactly.

use serde::{Deserialize, Serialize};

use crate::sample::PositionSample;

/// Mean Earth radius used for every distance, in kilometers.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Lowest zoom level [`zoom_fit`] returns.
pub const MIN_ZOOM: u8 = 3;

/// Highest zoom level [`zoom_fit`] returns.
pub const MAX_ZOOM: u8 = 18;

/// Zoom used when there is nothing to fit.
pub const DEFAULT_ZOOM: u8 = 13;

/// Viewport edge, in pixels, at which [`zoom_fit`] applies no correction.
const REFERENCE_VIEWPORT_PX: f64 = 400.0;

const MILLIS_PER_HOUR: f64 = 3_600_000.0;

/// Anchors for [`zoom_for_distance`]: (meters, zoom) at the near and far ends.
const NEAR_ANCHOR: (f64, f64) = (530.0, 17.0);
const FAR_ANCHOR: (f64, f64) = (7_800_000.0, 4.0);

/// A latitude/longitude pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
}

impl LatLng {
    /// Create a coordinate pair.
    #[must_use]
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

impl From<&PositionSample> for LatLng {
    fn from(sample: &PositionSample) -> Self {
        Self::new(sample.latitude, sample.longitude)
    }
}

/// Axis-aligned bounding box of a set of samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bounds {
    /// Minimum latitude and longitude.
    pub south_west: LatLng,
    /// Maximum latitude and longitude.
    pub north_east: LatLng,
}

impl Bounds {
    /// Latitude extent in degrees.
    #[must_use]
    pub fn lat_span(&self) -> f64 {
        self.north_east.latitude - self.south_west.latitude
    }

    /// Longitude extent in degrees.
    #[must_use]
    pub fn lng_span(&self) -> f64 {
        self.north_east.longitude - self.south_west.longitude
    }

    /// The larger of the two spans.
    #[must_use]
    pub fn max_span(&self) -> f64 {
        self.lat_span().max(self.lng_span())
    }

    /// Midpoint of the box.
    #[must_use]
    pub fn center(&self) -> LatLng {
        LatLng::new(
            (self.south_west.latitude + self.north_east.latitude) / 2.0,
            (self.south_west.longitude + self.north_east.longitude) / 2.0,
        )
    }
}

/// Size of the map viewport in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Viewport {
    /// Create a viewport.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(800, 400)
    }
}

/// Great-circle distance between two coordinates in kilometers (haversine).
#[must_use]
pub fn haversine_km(a: LatLng, b: LatLng) -> f64 {
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lng = (b.longitude - a.longitude).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.latitude.to_radians().cos()
            * b.latitude.to_radians().cos()
            * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// Distance between two samples in kilometers.
#[must_use]
pub fn distance(a: &PositionSample, b: &PositionSample) -> f64 {
    haversine_km(a.into(), b.into())
}

/// Average speed from `a` to `b` in km/h.
///
/// Returns `None` unless `b` was recorded strictly after `a`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn speed(a: &PositionSample, b: &PositionSample) -> Option<f64> {
    let elapsed_ms = b.timestamp_millis.checked_sub(a.timestamp_millis)?;
    if elapsed_ms <= 0 {
        return None;
    }
    let hours = elapsed_ms as f64 / MILLIS_PER_HOUR;
    Some(distance(a, b) / hours)
}

/// Initial great-circle bearing from `a` to `b`, in degrees within `[0, 360)`.
#[must_use]
pub fn bearing(a: &PositionSample, b: &PositionSample) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lng = (b.longitude - a.longitude).to_radians();

    let y = d_lng.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lng.cos();
    y.atan2(x).to_degrees().rem_euclid(360.0)
}

/// Bounding box of `samples`, or `None` when there are none.
#[must_use]
pub fn bounds(samples: &[PositionSample]) -> Option<Bounds> {
    let first = samples.first()?;
    let mut south_west = LatLng::from(first);
    let mut north_east = south_west;

    for sample in &samples[1..] {
        south_west.latitude = south_west.latitude.min(sample.latitude);
        south_west.longitude = south_west.longitude.min(sample.longitude);
        north_east.latitude = north_east.latitude.max(sample.latitude);
        north_east.longitude = north_east.longitude.max(sample.longitude);
    }

    Some(Bounds {
        south_west,
        north_east,
    })
}

/// Pick a zoom level that fits `bounds` into `viewport`.
///
/// Larger spans never produce a larger zoom. The result is always within
/// [`MIN_ZOOM`, `MAX_ZOOM`]; a single point zooms all the way in.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn zoom_fit(bounds: &Bounds, viewport: Viewport) -> u8 {
    let span = bounds.max_span();
    if span.is_nan() {
        return DEFAULT_ZOOM;
    }
    if span <= 0.0 {
        return MAX_ZOOM;
    }

    let edge = f64::from(viewport.width.min(viewport.height));
    let zoom = (14.0 - span.log2() + (edge / REFERENCE_VIEWPORT_PX).log2()).floor();
    zoom.clamp(f64::from(MIN_ZOOM), f64::from(MAX_ZOOM)) as u8
}

/// Fractional zoom for showing two points `meters` apart.
///
/// Interpolates logarithmically between 530 m (zoom 17) and 7 800 km
/// (zoom 4); distances outside that range are clamped to it.
#[must_use]
pub fn zoom_for_distance(meters: f64) -> f64 {
    let (near_m, near_zoom) = NEAR_ANCHOR;
    let (far_m, far_zoom) = FAR_ANCHOR;

    let clamped = meters.clamp(near_m, far_m);
    let ratio = (clamped / near_m).ln() / (far_m / near_m).ln();
    (near_zoom - ratio * (near_zoom - far_zoom)).clamp(far_zoom, near_zoom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn at(latitude: f64, longitude: f64) -> PositionSample {
        PositionSample::new(latitude, longitude, 0)
    }

    fn box_of(span: f64) -> Bounds {
        Bounds {
            south_west: LatLng::new(0.0, 0.0),
            north_east: LatLng::new(span, span / 2.0),
        }
    }

    #[test]
    fn test_distance_is_zero_for_same_point() {
        let p = at(-23.5505, -46.6333);
        assert_eq!(distance(&p, &p), 0.0);
    }

    #[test]
    fn test_distance_is_symmetric() {
        let pairs = [
            (at(-23.5505, -46.6333), at(-22.9068, -43.1729)),
            (at(51.5074, -0.1278), at(40.7128, -74.0060)),
            (at(0.0, 179.5), at(0.0, -179.5)),
            (at(89.9, 0.0), at(-89.9, 180.0)),
        ];
        for (a, b) in pairs {
            assert_eq!(distance(&a, &b), distance(&b, &a));
        }
    }

    #[test]
    fn test_one_degree_at_equator() {
        let d = distance(&at(0.0, 0.0), &at(0.0, 1.0));
        assert_relative_eq!(d, 111.194_926_6, epsilon = 1e-6);
    }

    #[test]
    fn test_speed_one_degree_per_hour() {
        let a = PositionSample::new(0.0, 0.0, 1_000);
        let b = PositionSample::new(0.0, 1.0, 1_000 + 3_600_000);

        let kmh = speed(&a, &b).unwrap();
        assert_relative_eq!(kmh, 111.2, epsilon = 0.01);
        assert_relative_eq!(kmh, distance(&a, &b), epsilon = 1e-12);
    }

    #[test]
    fn test_speed_requires_forward_time() {
        let a = PositionSample::new(0.0, 0.0, 5_000);
        let same = PositionSample::new(0.0, 1.0, 5_000);
        let earlier = PositionSample::new(0.0, 1.0, 4_000);

        assert!(speed(&a, &same).is_none());
        assert!(speed(&a, &earlier).is_none());
    }

    #[test]
    fn test_bearing_cardinal_directions() {
        let origin = at(0.0, 0.0);
        assert_relative_eq!(bearing(&origin, &at(1.0, 0.0)), 0.0, epsilon = 1e-9);
        assert_relative_eq!(bearing(&origin, &at(0.0, 1.0)), 90.0, epsilon = 1e-9);
        assert_relative_eq!(bearing(&origin, &at(-1.0, 0.0)), 180.0, epsilon = 1e-9);
        assert_relative_eq!(bearing(&origin, &at(0.0, -1.0)), 270.0, epsilon = 1e-9);
    }

    #[test]
    fn test_bounds_empty() {
        assert!(bounds(&[]).is_none());
    }

    #[test]
    fn test_bounds_covers_all_samples() {
        let samples = [at(-23.0, -46.0), at(-22.5, -47.0), at(-24.0, -45.5)];
        let b = bounds(&samples).unwrap();

        assert_eq!(b.south_west, LatLng::new(-24.0, -47.0));
        assert_eq!(b.north_east, LatLng::new(-22.5, -45.5));
        assert_eq!(b.center(), LatLng::new(-23.25, -46.25));
    }

    #[test]
    fn test_bounds_single_sample() {
        let b = bounds(&[at(10.0, 20.0)]).unwrap();
        assert_eq!(b.south_west, b.north_east);
        assert_eq!(b.max_span(), 0.0);
    }

    #[test]
    fn test_zoom_fit_reference_viewport_matches_log_rule() {
        let viewport = Viewport::new(800, 400);
        // 14 - log2(1) = 14
        assert_eq!(zoom_fit(&box_of(1.0), viewport), 14);
        // 14 - log2(0.25) = 16
        assert_eq!(zoom_fit(&box_of(0.25), viewport), 16);
        // 14 - log2(3) = 12.41...
        assert_eq!(zoom_fit(&box_of(3.0), viewport), 12);
    }

    #[test]
    fn test_zoom_fit_single_point_is_max() {
        assert_eq!(zoom_fit(&box_of(0.0), Viewport::default()), MAX_ZOOM);
    }

    #[test]
    fn test_zoom_fit_is_clamped() {
        assert_eq!(zoom_fit(&box_of(1e-9), Viewport::default()), MAX_ZOOM);
        assert_eq!(zoom_fit(&box_of(360.0), Viewport::new(10, 10)), MIN_ZOOM);
        assert_eq!(zoom_fit(&box_of(1.0), Viewport::new(0, 0)), MIN_ZOOM);
    }

    #[test]
    fn test_zoom_fit_monotonic_in_span() {
        let viewports = [
            Viewport::new(320, 240),
            Viewport::default(),
            Viewport::new(1920, 1080),
        ];
        for viewport in viewports {
            let mut previous = u8::MAX;
            let mut span = 1e-6;
            while span < 400.0 {
                let zoom = zoom_fit(&box_of(span), viewport);
                assert!((MIN_ZOOM..=MAX_ZOOM).contains(&zoom));
                assert!(zoom <= previous, "zoom rose at span {span}");
                previous = zoom;
                span *= 1.3;
            }
        }
    }

    #[test]
    fn test_zoom_fit_larger_viewport_zooms_in() {
        let b = box_of(1.0);
        assert!(zoom_fit(&b, Viewport::new(1600, 1600)) >= zoom_fit(&b, Viewport::default()));
    }

    #[test]
    fn test_zoom_for_distance_anchors() {
        assert_relative_eq!(zoom_for_distance(530.0), 17.0);
        assert_relative_eq!(zoom_for_distance(7_800_000.0), 4.0, epsilon = 1e-9);
        assert_relative_eq!(zoom_for_distance(1.0), 17.0);
        assert_relative_eq!(zoom_for_distance(1e9), 4.0, epsilon = 1e-9);
    }

    #[test]
    fn test_zoom_for_distance_decreases() {
        let near = zoom_for_distance(6_800.0);
        let far = zoom_for_distance(83_000.0);
        assert!(near > far);
        assert!(near < 17.0 && far > 4.0);
    }
}
