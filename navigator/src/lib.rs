//! # wayfinder-navigator
//!
//! Indoor waypoint navigation driven by BLE beacon proximity.
//!
//! A building map ([`graph::NavigationGraph`]) is split into regions, each
//! served by one positioning technology. The [`planner`] computes a two-tier
//! route across regions and waypoints, the [`ips`] dispatcher turns raw beacon
//! scans into "user is at waypoint X" detections, and the [`session`] state
//! machine follows the route, re-planning when the user strays.

pub mod aggregator;
pub mod beacon;
pub mod config;
pub mod context;
pub mod dijkstra;
pub mod error;
pub mod geo;
pub mod graph;
pub mod ips;
pub mod loader;
pub mod planner;
pub mod session;

#[cfg(test)]
mod fixtures;

pub use config::{AvoidPreferences, NavigatorConfig};
pub use context::NavigationContext;
pub use error::{NavigatorError, Result};
pub use graph::NavigationGraph;
pub use session::{start, NavigationRequest, SessionHandle, SessionState};
