//! walker.rs — virtual user walking a scripted list of waypoints
//!
//! Positions are interpolated linearly between consecutive stops. A hop into
//! another region (stairs, elevator) takes the region edge's length; the user
//! is on the old floor for the first half of it and the new floor after.

use anyhow::{bail, Result};

use wayfinder_navigator::{geo, NavigationGraph};
use wayfinder_types::{Coordinate, RegionWaypointPoint};

#[derive(Debug, Clone)]
pub struct Stop {
    pub point:      RegionWaypointPoint,
    pub name:       String,
    pub floor:      i32,
    pub coordinate: Coordinate,
}

pub struct Walker {
    stops:       Vec<Stop>,
    /// Length of the segment starting at each stop
    segments:    Vec<f64>,
    index:       usize,
    along_m:     f64,
    speed_mps:   f64,
}

/// Fallback length of a region crossing with no usable edge distance
const DEFAULT_CROSSING_M: f64 = 5.0;

impl Walker {
    pub fn new(graph: &NavigationGraph, script: &[RegionWaypointPoint], speed_mps: f64) -> Result<Self> {
        if script.is_empty() {
            bail!("walk script is empty");
        }
        let mut stops = Vec::with_capacity(script.len());
        for &point in script {
            let w = graph.waypoint(point)?;
            stops.push(Stop { point, name: w.name.clone(), floor: w.floor, coordinate: w.coordinate });
        }

        let segments = stops
            .windows(2)
            .map(|pair| {
                let (a, b) = (&pair[0], &pair[1]);
                if a.point.region_id == b.point.region_id {
                    geo::distance(&a.coordinate, &b.coordinate)
                } else {
                    graph
                        .portal_edges_from(a.point)
                        .find(|(_, to)| *to == b.point)
                        .map(|(edge, _)| edge.distance)
                        .filter(|d| *d > 0.0)
                        .unwrap_or(DEFAULT_CROSSING_M)
                }
            })
            .collect();

        Ok(Self { stops, segments, index: 0, along_m: 0.0, speed_mps: speed_mps.max(0.1) })
    }

    pub fn is_finished(&self) -> bool {
        self.index + 1 >= self.stops.len()
    }

    pub fn stops(&self) -> &[Stop] {
        &self.stops
    }

    /// Walk for `dt_s` seconds. Returns the stops passed on the way, in order.
    pub fn advance(&mut self, dt_s: f64) -> Vec<&Stop> {
        let mut remaining = self.speed_mps * dt_s.max(0.0);
        let mut passed = Vec::new();
        while !self.is_finished() && remaining > 0.0 {
            let left = self.segments[self.index] - self.along_m;
            if remaining < left {
                self.along_m += remaining;
                break;
            }
            remaining -= left;
            self.index += 1;
            self.along_m = 0.0;
            passed.push(self.index);
        }
        passed.into_iter().map(|i| &self.stops[i]).collect()
    }

    /// Current floor and coordinate.
    pub fn position(&self) -> (i32, Coordinate) {
        let from = &self.stops[self.index];
        let Some(to) = self.stops.get(self.index + 1) else {
            return (from.floor, from.coordinate);
        };
        let length = self.segments[self.index];
        let t = if length > 0.0 { (self.along_m / length).clamp(0.0, 1.0) } else { 1.0 };

        if from.point.region_id != to.point.region_id {
            return if t < 0.5 { (from.floor, from.coordinate) } else { (to.floor, to.coordinate) };
        }
        let coordinate = Coordinate::new(
            from.coordinate.lat + (to.coordinate.lat - from.coordinate.lat) * t,
            from.coordinate.lon + (to.coordinate.lon - from.coordinate.lon) * t,
        );
        (from.floor, coordinate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenarios::tests::{demo_graph, point};

    #[test]
    fn walker_reaches_every_stop_in_order() {
        let graph = demo_graph();
        let script = [point(&graph, "Entrance"), point(&graph, "Lobby"), point(&graph, "Corridor 1F")];
        let mut walker = Walker::new(&graph, &script, 1.0).unwrap();

        let mut seen = Vec::new();
        for _ in 0..100 {
            seen.extend(walker.advance(1.0).into_iter().map(|s| s.name.clone()));
        }
        assert_eq!(seen, vec!["Lobby", "Corridor 1F"]);
        assert!(walker.is_finished());
        assert_eq!(walker.position().1, walker.stops()[2].coordinate);
    }

    #[test]
    fn halfway_is_between_stops() {
        let graph = demo_graph();
        let script = [point(&graph, "Entrance"), point(&graph, "Lobby")];
        let mut walker = Walker::new(&graph, &script, 1.0).unwrap();
        let total = geo::distance(&walker.stops()[0].coordinate, &walker.stops()[1].coordinate);
        walker.advance(total / 2.0);
        let (_, here) = walker.position();
        let to_start = geo::distance(&here, &walker.stops()[0].coordinate);
        assert!((to_start - total / 2.0).abs() < 0.1);
    }

    #[test]
    fn crossing_switches_floor_midway() {
        let graph = demo_graph();
        let script = [point(&graph, "Stairs 1F"), point(&graph, "Stairs 2F")];
        let mut walker = Walker::new(&graph, &script, 1.0).unwrap();
        assert_eq!(walker.position().0, 1);
        walker.advance(7.0); // stairs edge is 12 m
        assert_eq!(walker.position().0, 2);
    }

    #[test]
    fn empty_script_is_rejected() {
        assert!(Walker::new(&demo_graph(), &[], 1.0).is_err());
    }
}
