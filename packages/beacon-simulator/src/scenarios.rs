//! scenarios.rs — Walk scenarios for the beacon simulator
//!
//! Each scenario exercises one path through the navigation session:
//! - `Straight`: follow the planned route exactly (Run … Arrival)
//! - `WrongTurn`: step back and take a branch off the route (AdjustRoute)
//! - `Noisy`: follow the route under heavy shadowing and packet loss
//!
//! Scenarios are selectable on the command line and swappable at runtime via
//! the control WebSocket; a swap only changes the radio conditions, the walk
//! script is fixed when the simulator starts.

use std::collections::BTreeSet;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use wayfinder_navigator::planner::RoutePlan;
use wayfinder_navigator::NavigationContext;
use wayfinder_types::{ConnectionType, RegionWaypointPoint};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioType {
    Straight,
    WrongTurn,
    Noisy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub kind: ScenarioType,
    /// Scales the radio's shadowing sigma
    pub noise_multiplier: f64,
    /// Scales the radio's per-advertisement drop rate
    pub drop_multiplier: f64,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        preset_straight()
    }
}

pub fn preset_straight() -> ScenarioConfig {
    ScenarioConfig { kind: ScenarioType::Straight, noise_multiplier: 1.0, drop_multiplier: 1.0 }
}

pub fn preset_wrong_turn() -> ScenarioConfig {
    ScenarioConfig { kind: ScenarioType::WrongTurn, ..preset_straight() }
}

pub fn preset_noisy() -> ScenarioConfig {
    ScenarioConfig { kind: ScenarioType::Noisy, noise_multiplier: 2.5, drop_multiplier: 4.0 }
}

pub fn preset(kind: ScenarioType) -> ScenarioConfig {
    match kind {
        ScenarioType::Straight => preset_straight(),
        ScenarioType::WrongTurn => preset_wrong_turn(),
        ScenarioType::Noisy => preset_noisy(),
    }
}

pub fn preset_by_name(name: &str) -> Option<ScenarioConfig> {
    match name {
        "straight" | "default" => Some(preset_straight()),
        "wrong_turn" => Some(preset_wrong_turn()),
        "noisy" => Some(preset_noisy()),
        _ => None,
    }
}

// ── Walk scripts ──────────────────────────────────────────────────────────────

/// Waypoints the virtual user walks through, in order.
pub fn walk_script(
    ctx: &NavigationContext,
    start: RegionWaypointPoint,
    destination: RegionWaypointPoint,
    avoid: &BTreeSet<ConnectionType>,
    scenario: &ScenarioConfig,
) -> Result<Vec<RegionWaypointPoint>> {
    let mut planner = ctx.planner(avoid.clone());
    let plan = planner.plan(start, destination)?;

    if scenario.kind != ScenarioType::WrongTurn {
        return Ok(plan.checkpoints);
    }
    match detour(&plan) {
        Some((k, prev, off_route)) => {
            info!("🔀 Wrong turn scripted: back to checkpoint {}, then off to {off_route}", k - 1);
            let mut script = plan.checkpoints[..=k].to_vec();
            script.push(prev);
            script.push(off_route);
            let rejoin = planner.plan(off_route, destination)?;
            script.extend(rejoin.checkpoints.into_iter().skip(1));
            Ok(script)
        }
        None => {
            warn!("No branch off the route to take a wrong turn into; walking straight");
            Ok(plan.checkpoints)
        }
    }
}

/// First checkpoint `k` whose predecessor has a wrong-way neighbour in the same
/// region that is not a benign wrong-way point of `k` itself. Walking
/// `k → k-1 → neighbour` then reads as a genuine wrong turn.
fn detour(plan: &RoutePlan) -> Option<(usize, RegionWaypointPoint, RegionWaypointPoint)> {
    let cps = &plan.checkpoints;
    (2..cps.len().saturating_sub(1)).find_map(|k| {
        let (prev, here) = (cps[k - 1], cps[k]);
        if prev.region_id != here.region_id {
            return None;
        }
        let benign = plan.wrong_way_of(&here);
        plan.wrong_way_of(&prev)?
            .iter()
            .find(|p| {
                p.region_id == prev.region_id
                    && **p != here
                    && !cps[..k].contains(*p)
                    && benign.map_or(true, |b| !b.contains(*p))
            })
            .map(|&p| (k, prev, p))
    })
}
