//! # session
//!
//! Navigation session: turns a stream of "user is at waypoint X" detections
//! into Run / AdjustRoute / Arrival instructions.
//!
//! ## Architecture
//! [`Session`] is a synchronous state machine. Each detection returns a
//! [`DetectionOutcome`] carrying the event to emit and, when the checkpoint
//! changed, the beacon set the IPS dispatcher should listen for next.
//! [`start`] wires it to the dispatcher:
//!   1. Polling task resolves the signal buffer once per interval
//!   2. Detections are queued on an mpsc channel and handled one at a time
//!   3. Instructions go out on a second channel to the UI
//!
//! ## States
//! ```text
//! AwaitingStart ──first detection──► Navigating ──destination──► Arrived
//!                                     │      ▲
//!                          off route  ▼      │ new plan
//!                                    Correcting
//! ```
//!
//! ## Invariants
//! - Plan and cursor are only mutated by the detection handler
//! - A failed (re)plan never advances state; the session emits NoRoute and waits
//! - Nothing is acted on once the session has arrived or been stopped

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use wayfinder_types::{
    ConnectionType, IpsType, NavigationEvent, NavigationInstruction, NavigationResult, RegionWaypointPoint,
    TurnDirection,
};

use crate::context::NavigationContext;
use crate::error::{NavigatorError, Result};
use crate::geo;
use crate::ips::{self, DetectionEvent, IpsDispatcher, ScanSink, SharedDispatcher};
use crate::planner::RoutePlan;

const DETECTION_QUEUE: usize = 32;
const INSTRUCTION_QUEUE: usize = 64;

// ── Request / state ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct NavigationRequest {
    pub source_region: Uuid,
    pub destination: RegionWaypointPoint,
    /// Connection types to soft-avoid
    pub avoid: BTreeSet<ConnectionType>,
}

impl NavigationRequest {
    pub fn new(
        source_region: Uuid,
        destination_region: Uuid,
        destination_waypoint: Uuid,
        avoid: BTreeSet<ConnectionType>,
    ) -> Self {
        Self {
            source_region,
            destination: RegionWaypointPoint::new(destination_region, destination_waypoint),
            avoid,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    AwaitingStart,
    Navigating,
    Correcting,
    Arrived,
}

/// Beacon technology and waypoints to listen for after a transition.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorSet {
    pub ips_type: IpsType,
    pub points: Vec<RegionWaypointPoint>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DetectionOutcome {
    /// Repeat of the current checkpoint, benign wrong turn, or session over
    Ignored,
    Emit {
        event: NavigationEvent,
        /// Set when the dispatcher must be re-armed
        monitor: Option<MonitorSet>,
    },
    Arrived(NavigationEvent),
}

// ── State machine ─────────────────────────────────────────────────────────────

pub struct Session {
    ctx: NavigationContext,
    request: NavigationRequest,
    state: SessionState,
    plan: Option<RoutePlan>,
    cursor: usize,
    /// Checkpoint confirmed before the plan was last replaced; orients the first AdjustRoute turn
    last_confirmed: Option<RegionWaypointPoint>,
}

impl Session {
    /// Validate the request. Fails if the destination is unknown or its region
    /// cannot be reached from the source region.
    pub fn new(ctx: NavigationContext, request: NavigationRequest) -> Result<Self> {
        let graph = &ctx.graph;
        graph.region(request.source_region)?;
        graph.waypoint(request.destination)?;
        let regions = graph.build_region_graph(&request.avoid, ctx.config.avoid_penalty);
        if regions
            .shortest_path(request.source_region, request.destination.region_id)
            .is_none()
        {
            return Err(NavigatorError::RegionUnreachable {
                from: request.source_region,
                to: request.destination.region_id,
            });
        }

        Ok(Self {
            ctx,
            request,
            state: SessionState::AwaitingStart,
            plan: None,
            cursor: 0,
            last_confirmed: None,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn plan(&self) -> Option<&RoutePlan> {
        self.plan.as_ref()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn request(&self) -> &NavigationRequest {
        &self.request
    }

    /// 0–100, share of the current plan's checkpoints already passed.
    pub fn progress(&self) -> f64 {
        match (&self.plan, self.state) {
            (_, SessionState::Arrived) => 100.0,
            (Some(plan), _) if plan.len() > 1 => 100.0 * self.cursor as f64 / (plan.len() - 1) as f64,
            _ => 0.0,
        }
    }

    /// What the dispatcher should listen for in the current state.
    pub fn monitor_set(&self) -> Result<MonitorSet> {
        let graph = &self.ctx.graph;
        match (&self.plan, self.state) {
            (_, SessionState::AwaitingStart) | (None, _) => {
                let region = self.request.source_region;
                Ok(MonitorSet {
                    ips_type: graph.region_ips_type(region)?,
                    points: graph
                        .all_waypoints_in_region(region)?
                        .into_iter()
                        .map(|w| RegionWaypointPoint::new(region, w))
                        .collect(),
                })
            }
            (Some(plan), _) => {
                let current = plan.checkpoints[self.cursor];
                let Some(&next) = plan.checkpoints.get(self.cursor + 1) else {
                    return Ok(MonitorSet { ips_type: graph.region_ips_type(current.region_id)?, points: vec![] });
                };
                // Wrong turns from here are benign; those from the previous
                // checkpoint that are not benign here mean the user went back past it.
                let mut points = vec![next];
                let previous = self.cursor.checked_sub(1).map(|i| plan.checkpoints[i]);
                for checkpoint in std::iter::once(current).chain(previous) {
                    for &p in plan.wrong_way_of(&checkpoint).into_iter().flatten() {
                        if p != current && !points.contains(&p) {
                            points.push(p);
                        }
                    }
                }
                // One ring past each benign point: reaching it means the user kept going
                if let Some(benign) = plan.wrong_way_of(&current) {
                    for &w in benign {
                        for p in graph.adjacent_points(w)? {
                            if !benign.contains(&p) && !plan.checkpoints.contains(&p) && !points.contains(&p) {
                                points.push(p);
                            }
                        }
                    }
                }
                Ok(MonitorSet { ips_type: graph.region_ips_type(next.region_id)?, points })
            }
        }
    }

    pub fn on_detection(&mut self, point: RegionWaypointPoint) -> DetectionOutcome {
        match self.state {
            SessionState::Arrived => {
                debug!("Session: detection {point} after arrival ignored");
                DetectionOutcome::Ignored
            }
            SessionState::AwaitingStart => self.begin(point),
            SessionState::Navigating | SessionState::Correcting => self.follow(point),
        }
    }

    fn compute_plan(&self, from: RegionWaypointPoint) -> Result<RoutePlan> {
        self.ctx.planner(self.request.avoid.clone()).plan(from, self.request.destination)
    }

    fn begin(&mut self, point: RegionWaypointPoint) -> DetectionOutcome {
        let plan = match self.compute_plan(point) {
            Ok(plan) => plan,
            Err(e) => {
                warn!("Session: cannot plan from {point}: {e}");
                return DetectionOutcome::Emit { event: NavigationEvent::new(NavigationResult::NoRoute, None), monitor: None };
            }
        };
        info!("🧭 Session: started at {point}, {} checkpoints to go", plan.len());
        self.plan = Some(plan);
        self.cursor = 0;
        self.last_confirmed = None;
        self.state = SessionState::Navigating;
        if self.at_destination() {
            return self.arrive();
        }
        self.emit(NavigationResult::Run)
    }

    fn follow(&mut self, point: RegionWaypointPoint) -> DetectionOutcome {
        let Some(plan) = &self.plan else {
            return DetectionOutcome::Ignored;
        };
        let current = plan.checkpoints[self.cursor];
        let next = plan.checkpoints.get(self.cursor + 1).copied();
        let benign = plan.wrong_way_of(&current).is_some_and(|s| s.contains(&point));

        if point == self.request.destination {
            self.cursor = plan.len() - 1;
            return self.arrive();
        }
        if point == current {
            debug!("Session: still at {point}");
            return DetectionOutcome::Ignored;
        }
        if Some(point) == next {
            self.cursor += 1;
            self.last_confirmed = None;
            info!("Session: checkpoint {point} reached ({:.0}%)", self.progress());
            return self.emit(NavigationResult::Run);
        }
        if benign {
            info!("Session: {point} is a plausible misread near {current}, staying on route");
            return DetectionOutcome::Ignored;
        }
        self.correct(point, current)
    }

    fn correct(&mut self, point: RegionWaypointPoint, last_confirmed: RegionWaypointPoint) -> DetectionOutcome {
        self.state = SessionState::Correcting;
        match self.compute_plan(point) {
            Ok(plan) => {
                info!("↪️ Session: off route at {point}, new plan with {} checkpoints", plan.len());
                self.plan = Some(plan);
                self.cursor = 0;
                self.last_confirmed = Some(last_confirmed);
                self.state = SessionState::Navigating;
                self.emit(NavigationResult::AdjustRoute)
            }
            Err(e) => {
                warn!("Session: replan from {point} failed, keeping current route: {e}");
                self.state = SessionState::Navigating;
                DetectionOutcome::Emit { event: NavigationEvent::new(NavigationResult::NoRoute, None), monitor: None }
            }
        }
    }

    fn at_destination(&self) -> bool {
        self.plan
            .as_ref()
            .map_or(false, |p| p.checkpoints[self.cursor] == self.request.destination)
    }

    fn arrive(&mut self) -> DetectionOutcome {
        self.state = SessionState::Arrived;
        info!("🏁 Session: arrived at {}", self.request.destination);
        let instruction = match self.ctx.graph.waypoint(self.request.destination) {
            Ok(w) => Some(NavigationInstruction {
                current: self.request.destination,
                current_waypoint_name: w.name.clone(),
                next: None,
                next_waypoint_name: None,
                progress: 100.0,
                direction: TurnDirection::Forward,
                turn_angle_deg: None,
                distance_m: 0.0,
                connection: None,
            }),
            Err(_) => None,
        };
        DetectionOutcome::Arrived(NavigationEvent::new(NavigationResult::Arrival, instruction))
    }

    fn emit(&self, result: NavigationResult) -> DetectionOutcome {
        let instruction = match self.instruction() {
            Ok(i) => Some(i),
            Err(e) => {
                warn!("Session: instruction unavailable: {e}");
                None
            }
        };
        let monitor = match self.monitor_set() {
            Ok(m) => Some(m),
            Err(e) => {
                warn!("Session: cannot update monitored beacons: {e}");
                None
            }
        };
        DetectionOutcome::Emit { event: NavigationEvent::new(result, instruction), monitor }
    }

    /// Instruction for leaving the checkpoint under the cursor.
    fn instruction(&self) -> Result<NavigationInstruction> {
        let graph = &self.ctx.graph;
        let plan = self
            .plan
            .as_ref()
            .ok_or_else(|| NavigatorError::InvalidReplanState("no active plan".into()))?;
        let current = plan.checkpoints[self.cursor];
        let here = graph.waypoint(current)?;
        let next = plan
            .checkpoints
            .get(self.cursor + 1)
            .copied()
            .ok_or_else(|| NavigatorError::InvalidReplanState("cursor is on the destination".into()))?;
        let there = graph.waypoint(next)?;

        let previous = if self.cursor > 0 {
            Some(plan.checkpoints[self.cursor - 1])
        } else {
            self.last_confirmed
        };

        let (direction, turn_angle_deg, distance_m, connection) = if next.region_id != current.region_id {
            let (edge, _) = graph
                .portal_edges_from(current)
                .find(|(_, to)| *to == next)
                .ok_or_else(|| NavigatorError::GraphInconsistency(format!("no crossing {current} → {next}")))?;
            let direction = match there.floor.cmp(&here.floor) {
                std::cmp::Ordering::Greater => TurnDirection::Up,
                std::cmp::Ordering::Less => TurnDirection::Down,
                std::cmp::Ordering::Equal => TurnDirection::Forward,
            };
            (direction, None, edge.distance, Some(edge.connection_type))
        } else {
            let angle = match previous {
                Some(p) if p.region_id == current.region_id && p != current => {
                    let before = graph.waypoint(p)?;
                    Some(geo::turn_angle(&here.coordinate, &before.coordinate, &there.coordinate))
                }
                _ => None,
            };
            let direction = angle.map_or(TurnDirection::FirstDirection, TurnDirection::from_angle);
            (direction, angle, geo::distance(&here.coordinate, &there.coordinate), None)
        };

        Ok(NavigationInstruction {
            current,
            current_waypoint_name: here.name.clone(),
            next: Some(next),
            next_waypoint_name: Some(there.name.clone()),
            progress: self.progress(),
            direction,
            turn_angle_deg,
            distance_m,
            connection,
        })
    }
}

// ── Async runner ──────────────────────────────────────────────────────────────

fn lock_session(session: &Mutex<Session>) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(|e| e.into_inner())
}

/// Control surface of a running session.
pub struct SessionHandle {
    session: Arc<Mutex<Session>>,
    dispatcher: SharedDispatcher,
    active: Arc<AtomicBool>,
    cancel: Arc<watch::Sender<bool>>,
    detections: mpsc::Sender<DetectionEvent>,
    sink: ScanSink,
    tasks: Vec<JoinHandle<()>>,
}

/// Start a session: validates the request, arms the IPS client for the source
/// region and spawns the polling and detection-handling tasks.
///
/// Must be called from within a Tokio runtime.
pub fn start(
    ctx: NavigationContext,
    request: NavigationRequest,
) -> Result<(SessionHandle, mpsc::Receiver<NavigationEvent>)> {
    let session = Session::new(ctx.clone(), request)?;
    let monitor = session.monitor_set()?;

    let (detect_tx, detect_rx) = mpsc::channel(DETECTION_QUEUE);
    let (instruction_tx, instruction_rx) = mpsc::channel(INSTRUCTION_QUEUE);
    let (cancel_tx, cancel_rx) = watch::channel(false);

    let mut dispatcher = IpsDispatcher::new(ctx.clone(), monitor.ips_type, detect_tx.clone());
    dispatcher.set_monitored_waypoints(&monitor.points)?;

    let active = Arc::new(AtomicBool::new(true));
    let sink = ScanSink::new(Arc::clone(dispatcher.signals()), Arc::clone(&active));
    let dispatcher: SharedDispatcher = Arc::new(Mutex::new(dispatcher));
    let session = Arc::new(Mutex::new(session));
    let cancel = Arc::new(cancel_tx);

    info!(
        "🚀 Session: navigating to {} ({} waypoints monitored, {:?})",
        lock_session(&session).request().destination,
        monitor.points.len(),
        monitor.ips_type
    );

    let poller = ips::spawn_polling(Arc::clone(&dispatcher), ctx.config.poll_interval(), cancel_rx.clone());
    let handler = tokio::spawn(handle_detections(
        Arc::clone(&session),
        Arc::clone(&dispatcher),
        Arc::clone(&active),
        Arc::clone(&cancel),
        detect_rx,
        instruction_tx,
        cancel_rx,
    ));

    let handle = SessionHandle {
        session,
        dispatcher,
        active,
        cancel,
        detections: detect_tx,
        sink,
        tasks: vec![poller, handler],
    };
    Ok((handle, instruction_rx))
}

async fn handle_detections(
    session: Arc<Mutex<Session>>,
    dispatcher: SharedDispatcher,
    active: Arc<AtomicBool>,
    cancel_tx: Arc<watch::Sender<bool>>,
    mut detections: mpsc::Receiver<DetectionEvent>,
    instructions: mpsc::Sender<NavigationEvent>,
    mut cancel: watch::Receiver<bool>,
) {
    loop {
        let detection = tokio::select! {
            d = detections.recv() => match d {
                Some(d) => d,
                None => break,
            },
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    break;
                }
                continue;
            }
        };

        if !active.load(Ordering::Acquire) {
            break;
        }
        if detection.generation != ips::lock(&dispatcher).generation() {
            debug!("Session: stale detection {} from a previous client dropped", detection.point);
            continue;
        }

        let outcome = lock_session(&session).on_detection(detection.point);
        let (event, finished) = match outcome {
            DetectionOutcome::Ignored => continue,
            DetectionOutcome::Emit { event, monitor } => {
                if let Some(monitor) = monitor {
                    let mut d = ips::lock(&dispatcher);
                    d.switch_to(monitor.ips_type);
                    if let Err(e) = d.set_monitored_waypoints(&monitor.points) {
                        warn!("Session: failed to re-arm IPS client: {e}");
                    }
                }
                (event, false)
            }
            DetectionOutcome::Arrived(event) => (event, true),
        };

        if finished {
            active.store(false, Ordering::Release);
            cancel_tx.send_replace(true);
            ips::lock(&dispatcher).stop();
        }
        if instructions.send(event).await.is_err() {
            debug!("Session: instruction receiver dropped");
        }
        if finished {
            break;
        }
    }
    debug!("Session: detection handler exited");
}

impl SessionHandle {
    pub fn state(&self) -> SessionState {
        lock_session(&self.session).state()
    }

    pub fn progress(&self) -> f64 {
        lock_session(&self.session).progress()
    }

    pub fn plan(&self) -> Option<RoutePlan> {
        lock_session(&self.session).plan().cloned()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Where the platform scan provider pushes its batches.
    pub fn scan_sink(&self) -> ScanSink {
        self.sink.clone()
    }

    /// Report a position known by other means (QR code, tap on map).
    pub fn confirm_position(&self, point: RegionWaypointPoint) -> Result<()> {
        if !self.is_active() {
            return Err(NavigatorError::SessionStopped);
        }
        let generation = ips::lock(&self.dispatcher).generation();
        self.detections
            .try_send(DetectionEvent { point, beacon: None, generation })
            .map_err(|_| NavigatorError::SessionStopped)
    }

    /// Detach the IPS client, halt polling and drop buffered signals.
    pub fn stop(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            info!("🛑 Session: stopped");
        }
        self.cancel.send_replace(true);
        ips::lock(&self.dispatcher).stop();
    }

    /// Wait for the background tasks to finish (after arrival or stop).
    pub async fn join(mut self) {
        for task in std::mem::take(&mut self.tasks) {
            let _ = task.await;
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
