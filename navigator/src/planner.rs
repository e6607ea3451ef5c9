//! # planner
//!
//! Two-tier route planning over a [`NavigationGraph`].
//!
//! 1. Dijkstra over the region graph picks the sequence of regions
//! 2. Each region boundary is crossed through a portal pair, chosen by the
//!    cheapest walk-to-portal plus crossing cost
//! 3. Dijkstra inside each region splices in the intermediate waypoints
//! 4. A wrong-way pass records, per checkpoint, the neighbouring points a
//!    beacon could plausibly report if the user drifted off the route
//!
//! All searches run over ordered maps so identical inputs give identical plans.

use std::collections::{BTreeSet, HashMap, VecDeque};

use tracing::debug;
use uuid::Uuid;

use wayfinder_types::{BeaconKey, ConnectionType, RegionWaypointPoint};

use crate::config::NavigatorConfig;
use crate::dijkstra::WeightedGraph;
use crate::error::{NavigatorError, Result};
use crate::geo;
use crate::graph::NavigationGraph;

// ── Plan ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct RoutePlan {
    /// Source first, destination last
    pub checkpoints: Vec<RegionWaypointPoint>,
    /// Plausible wrong turns per checkpoint (the destination has no entry)
    pub wrong_way: HashMap<RegionWaypointPoint, BTreeSet<RegionWaypointPoint>>,
}

impl RoutePlan {
    pub fn source(&self) -> RegionWaypointPoint {
        self.checkpoints[0]
    }

    pub fn destination(&self) -> RegionWaypointPoint {
        self.checkpoints[self.checkpoints.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }

    pub fn wrong_way_of(&self, checkpoint: &RegionWaypointPoint) -> Option<&BTreeSet<RegionWaypointPoint>> {
        self.wrong_way.get(checkpoint)
    }
}

/// One hop of a single-region path: walk to `waypoint`, turning by `turn_angle` first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathStep {
    pub waypoint: Uuid,
    /// `None` on the first hop when no previous segment is known
    pub turn_angle: Option<f64>,
}

// ── Planner ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlannerSettings {
    pub avoid_penalty: f64,
    pub discrimination_distance_m: f64,
    pub wrong_way_extra_hops: usize,
}

impl From<&NavigatorConfig> for PlannerSettings {
    fn from(cfg: &NavigatorConfig) -> Self {
        Self {
            avoid_penalty: cfg.avoid_penalty,
            discrimination_distance_m: cfg.discrimination_distance_m,
            wrong_way_extra_hops: cfg.wrong_way_extra_hops,
        }
    }
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            avoid_penalty: 100.0,
            discrimination_distance_m: 2.0,
            wrong_way_extra_hops: 1,
        }
    }
}

pub struct RoutePlanner<'g> {
    graph: &'g NavigationGraph,
    avoid: BTreeSet<ConnectionType>,
    settings: PlannerSettings,
    region_graphs: HashMap<Uuid, WeightedGraph<Uuid>>,
}

impl<'g> RoutePlanner<'g> {
    pub fn new(graph: &'g NavigationGraph, avoid: BTreeSet<ConnectionType>, settings: PlannerSettings) -> Self {
        Self { graph, avoid, settings, region_graphs: HashMap::new() }
    }

    fn waypoint_graph(&mut self, region_id: Uuid) -> Result<&WeightedGraph<Uuid>> {
        if !self.region_graphs.contains_key(&region_id) {
            let g = self
                .graph
                .build_waypoint_graph(region_id, &self.avoid, self.settings.avoid_penalty)?;
            self.region_graphs.insert(region_id, g);
        }
        self.region_graphs
            .get(&region_id)
            .ok_or_else(|| NavigatorError::GraphInconsistency(format!("unknown region {region_id}")))
    }

    fn walk(&mut self, region_id: Uuid, from: Uuid, to: Uuid) -> Option<(Vec<Uuid>, f64)> {
        let g = self.waypoint_graph(region_id).ok()?;
        g.shortest_path(from, to).map(|p| (p.path, p.distance))
    }

    /// Full checkpoint sequence plus wrong-way map from `source` to `destination`.
    pub fn plan(&mut self, source: RegionWaypointPoint, destination: RegionWaypointPoint) -> Result<RoutePlan> {
        self.graph.waypoint(source)?;
        self.graph.waypoint(destination)?;
        let no_path = || NavigatorError::NoPathFound { from: source, to: destination };

        let region_graph = self.graph.build_region_graph(&self.avoid, self.settings.avoid_penalty);
        let regions = region_graph
            .shortest_path(source.region_id, destination.region_id)
            .ok_or_else(no_path)?
            .path;

        // Coarse sequence: source, portal pairs at each boundary, destination
        let mut coarse = vec![source];
        let mut current = source;
        for pair in regions.windows(2) {
            let (exit, entry) = self.choose_crossing(current, pair[0], pair[1]).ok_or_else(no_path)?;
            if exit != current {
                coarse.push(exit);
            }
            coarse.push(entry);
            current = entry;
        }
        if current != destination {
            coarse.push(destination);
        }

        // Splice intra-region walks between same-region neighbours of the coarse sequence
        let mut checkpoints = vec![coarse[0]];
        for pair in coarse.windows(2) {
            let (from, to) = (pair[0], pair[1]);
            if from.region_id != to.region_id {
                checkpoints.push(to);
                continue;
            }
            let (path, _) = self
                .walk(from.region_id, from.waypoint_id, to.waypoint_id)
                .ok_or_else(no_path)?;
            checkpoints.extend(
                path.into_iter()
                    .skip(1)
                    .map(|w| RegionWaypointPoint::new(from.region_id, w)),
            );
        }

        let wrong_way = self.wrong_way_map(&checkpoints)?;
        debug!(
            "Planner: {} → {} over {} regions, {} checkpoints",
            source,
            destination,
            regions.len(),
            checkpoints.len()
        );
        Ok(RoutePlan { checkpoints, wrong_way })
    }

    /// Cheapest (exit portal, entry portal) from `current` in `from_region` into `to_region`.
    fn choose_crossing(
        &mut self,
        current: RegionWaypointPoint,
        from_region: Uuid,
        to_region: Uuid,
    ) -> Option<(RegionWaypointPoint, RegionWaypointPoint)> {
        let graph = self.graph;
        let mut best: Option<(f64, RegionWaypointPoint, RegionWaypointPoint)> = None;
        for (edge, exit, entry) in graph.crossings(from_region, to_region) {
            let walk = if exit == current {
                0.0
            } else {
                match self.walk(from_region, current.waypoint_id, exit.waypoint_id) {
                    Some((_, d)) => d,
                    None => continue,
                }
            };
            let cost = walk + edge.weight(&self.avoid, self.settings.avoid_penalty);
            if best.map_or(true, |(c, _, _)| cost < c) {
                best = Some((cost, exit, entry));
            }
        }
        best.map(|(_, exit, entry)| (exit, entry))
    }

    // ── Wrong-way prediction ──────────────────────────────────────────────────

    fn distinguishable(&self, a: RegionWaypointPoint, b: RegionWaypointPoint) -> Result<bool> {
        Ok(self.graph.separation(a, b)? > self.settings.discrimination_distance_m)
    }

    /// Neighbours of `current` (other than `next`) that a beacon can tell apart
    /// from both `current` and `next`. Neighbours too close to call are looked
    /// through, up to `wrong_way_extra_hops` further hops.
    pub fn wrong_way_set(
        &self,
        current: RegionWaypointPoint,
        next: RegionWaypointPoint,
    ) -> Result<BTreeSet<RegionWaypointPoint>> {
        let mut set = BTreeSet::new();
        let mut visited: BTreeSet<RegionWaypointPoint> = [current, next].into_iter().collect();
        let mut frontier = self.graph.adjacent_points(current)?;

        for hop in 0..=self.settings.wrong_way_extra_hops {
            let mut further = Vec::new();
            for candidate in frontier {
                if !visited.insert(candidate) {
                    continue;
                }
                if self.distinguishable(current, candidate)? && self.distinguishable(next, candidate)? {
                    set.insert(candidate);
                } else if hop < self.settings.wrong_way_extra_hops {
                    further.extend(self.graph.adjacent_points(candidate)?);
                }
            }
            frontier = further;
        }
        Ok(set)
    }

    fn wrong_way_map(
        &self,
        checkpoints: &[RegionWaypointPoint],
    ) -> Result<HashMap<RegionWaypointPoint, BTreeSet<RegionWaypointPoint>>> {
        let mut map = HashMap::new();
        for pair in checkpoints.windows(2) {
            map.insert(pair[0], self.wrong_way_set(pair[0], pair[1])?);
        }
        Ok(map)
    }

    // ── Single-region paths ───────────────────────────────────────────────────

    fn waypoint_of_beacon(&self, region_id: Uuid, beacon: &BeaconKey) -> Result<Uuid> {
        let region = self.graph.region(region_id)?;
        region
            .waypoints
            .values()
            .find(|w| w.beacons.iter().any(|b| b.key() == *beacon))
            .map(|w| w.id)
            .ok_or_else(|| {
                NavigatorError::GraphInconsistency(format!(
                    "beacon {} is not attached to any waypoint of region {region_id}",
                    beacon.uuid
                ))
            })
    }

    fn steps(&mut self, region_id: Uuid, previous: Option<Uuid>, start: Uuid, end: Uuid) -> Result<VecDeque<PathStep>> {
        let (path, _) = self.walk(region_id, start, end).ok_or(NavigatorError::NoPathFound {
            from: RegionWaypointPoint::new(region_id, start),
            to: RegionWaypointPoint::new(region_id, end),
        })?;

        let region = self.graph.region(region_id)?;
        let coordinate = |id: &Uuid| region.waypoints.get(id).map(|w| w.coordinate);

        let mut steps = VecDeque::with_capacity(path.len().saturating_sub(1));
        for i in 1..path.len() {
            let before = if i >= 2 { Some(path[i - 2]) } else { previous };
            let turn_angle = match (before.and_then(|b| coordinate(&b)), coordinate(&path[i - 1]), coordinate(&path[i])) {
                (Some(prev), Some(cur), Some(next)) => Some(geo::turn_angle(&cur, &prev, &next)),
                _ => None,
            };
            steps.push_back(PathStep { waypoint: path[i], turn_angle });
        }
        Ok(steps)
    }

    /// Hops from the waypoint owning `start_beacon` to `end_waypoint` inside one region.
    pub fn get_path(&mut self, region_id: Uuid, start_beacon: &BeaconKey, end_waypoint: Uuid) -> Result<VecDeque<PathStep>> {
        let start = self.waypoint_of_beacon(region_id, start_beacon)?;
        self.steps(region_id, None, start, end_waypoint)
    }

    /// Like [`get_path`](Self::get_path), continuing a walk that arrived from
    /// `previous_waypoint`, which must be adjacent to the start.
    pub fn regain_path(
        &mut self,
        region_id: Uuid,
        previous_waypoint: Uuid,
        start_beacon: &BeaconKey,
        end_waypoint: Uuid,
    ) -> Result<VecDeque<PathStep>> {
        let start = self.waypoint_of_beacon(region_id, start_beacon)?;
        let adjacent = self.graph.neighbors_of(region_id, start)?.contains(&previous_waypoint)
            || self
                .graph
                .neighbors_of(region_id, previous_waypoint)
                .map(|n| n.contains(&start))
                .unwrap_or(false);
        if !adjacent {
            return Err(NavigatorError::InvalidReplanState(format!(
                "waypoint {previous_waypoint} is not adjacent to {start}"
            )));
        }
        self.steps(region_id, Some(previous_waypoint), start, end_waypoint)
    }
}
