//! `motorelay` - Live vehicle location relay
//!
//! A tracker streams a vehicle's position samples to a broadcast relay over
//! WebSocket and records them in a local `SQLite` store; viewers connected to
//! the relay receive every update live, and recorded routes can be rebuilt
//! later with the same distance arithmetic.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod geospatial;
pub mod logging;
pub mod protocol;
pub mod relay;
pub mod route;
pub mod sample;
pub mod source;
pub mod storage;
pub mod tracker;
pub mod transport;

pub use client::{ConnectionState, Session, StreamClient, StreamClientConfig};
pub use config::Config;
pub use error::{Error, Result};
pub use geospatial::{Bounds, LatLng, Viewport};
pub use logging::init_logging;
pub use protocol::{Frame, MessageKind, RelayMessage};
pub use relay::{Registry, Relay};
pub use route::{Route, RouteReconstructor, RouteSummary};
pub use sample::{PositionSample, SubjectId};
pub use source::{PositionSource, ReplaySource};
pub use storage::{SampleStore, Storage, StorageStats};
pub use tracker::{RunningTotals, Tracker, TrackerEvent};
