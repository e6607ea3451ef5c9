//! Error types for the navigator

use thiserror::Error;
use uuid::Uuid;

use wayfinder_types::RegionWaypointPoint;

#[derive(Error, Debug)]
pub enum NavigatorError {
    /// Referenced region, waypoint, beacon or portal is missing from the loaded graph
    #[error("Graph inconsistency: {0}")]
    GraphInconsistency(String),

    #[error("No path found from {from} to {to}")]
    NoPathFound {
        from: RegionWaypointPoint,
        to: RegionWaypointPoint,
    },

    /// Destination region cannot be reached from the source region at all
    #[error("Region {to} is unreachable from region {from}")]
    RegionUnreachable { from: Uuid, to: Uuid },

    /// Re-planning was asked to continue from a waypoint that is not adjacent
    #[error("Invalid replan state: {0}")]
    InvalidReplanState(String),

    #[error("Session already stopped")]
    SessionStopped,

    #[error("Graph document error: {0}")]
    Load(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, NavigatorError>;
