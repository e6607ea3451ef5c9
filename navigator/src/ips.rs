//! # ips
//!
//! Indoor-positioning clients and the dispatcher that keeps exactly one of
//! them active.
//!
//! ## Architecture
//! ```text
//!  platform BLE callback ──► ScanSink ──► SignalAggregator (shared buffer)
//!                                               │
//!  polling task (interval) ──► IpsDispatcher::detect_waypoints
//!                                               │ resolve via active client
//!                                               ▼
//!                              mpsc<DetectionEvent> ──► session handler
//! ```
//!
//! ## Invariants
//! - One client at a time. Switching bumps the dispatcher generation before
//!   the new client is armed, so events still queued from the old client are
//!   recognisably stale and dropped by the session.
//! - The signal buffer is discarded on switch and on stop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use wayfinder_types::{BeaconKey, IpsType, RegionWaypointPoint, SignalRecord};

use crate::aggregator::{MonitoredBeacon, ResolvedBeacon, RssiAveraging, SignalAggregator};
use crate::context::NavigationContext;
use crate::error::Result;
use crate::graph::NavigationGraph;

// ── Detection events ──────────────────────────────────────────────────────────

/// "The user is at this waypoint", raised by the active client.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionEvent {
    pub point: RegionWaypointPoint,
    /// `None` for positions confirmed by other means than a beacon
    pub beacon: Option<BeaconKey>,
    /// Dispatcher generation the raising client belonged to
    pub generation: u64,
}

// ── Clients ───────────────────────────────────────────────────────────────────

pub trait IpsClient: Send {
    fn ips_type(&self) -> IpsType;

    fn set_monitored(&mut self, beacons: HashMap<BeaconKey, MonitoredBeacon>);

    /// One resolution pass over the shared buffer.
    fn detect(&mut self, signals: &SignalAggregator) -> Option<ResolvedBeacon>;

    fn stop(&mut self);
}

/// LBeacon regions: identity is the UUID alone, plain mean of the window.
#[derive(Default)]
pub struct WaypointClient {
    monitored: HashMap<BeaconKey, MonitoredBeacon>,
}

impl IpsClient for WaypointClient {
    fn ips_type(&self) -> IpsType {
        IpsType::LBeacon
    }

    fn set_monitored(&mut self, beacons: HashMap<BeaconKey, MonitoredBeacon>) {
        self.monitored = beacons;
    }

    fn detect(&mut self, signals: &SignalAggregator) -> Option<ResolvedBeacon> {
        if self.monitored.is_empty() {
            return None;
        }
        signals.resolve(&self.monitored, RssiAveraging::Mean)
    }

    fn stop(&mut self) {
        self.monitored.clear();
    }
}

/// iBeacon regions: UUID + major/minor identity, trimmed mean to reject reflections.
pub struct IBeaconClient {
    monitored: HashMap<BeaconKey, MonitoredBeacon>,
    averaging: RssiAveraging,
}

impl IBeaconClient {
    pub fn new(averaging: RssiAveraging) -> Self {
        Self { monitored: HashMap::new(), averaging }
    }
}

impl IpsClient for IBeaconClient {
    fn ips_type(&self) -> IpsType {
        IpsType::IBeacon
    }

    fn set_monitored(&mut self, beacons: HashMap<BeaconKey, MonitoredBeacon>) {
        self.monitored = beacons;
    }

    fn detect(&mut self, signals: &SignalAggregator) -> Option<ResolvedBeacon> {
        if self.monitored.is_empty() {
            return None;
        }
        signals.resolve(&self.monitored, self.averaging)
    }

    fn stop(&mut self) {
        self.monitored.clear();
    }
}

/// Outdoor regions. No GPS provider is wired in, so this client never detects.
#[derive(Default)]
pub struct GpsClient {
    warned: bool,
}

impl IpsClient for GpsClient {
    fn ips_type(&self) -> IpsType {
        IpsType::Gps
    }

    fn set_monitored(&mut self, _beacons: HashMap<BeaconKey, MonitoredBeacon>) {}

    fn detect(&mut self, _signals: &SignalAggregator) -> Option<ResolvedBeacon> {
        if !self.warned {
            warn!("IPS: GPS positioning is not available, region will not produce detections");
            self.warned = true;
        }
        None
    }

    fn stop(&mut self) {}
}

// ── Dispatcher ────────────────────────────────────────────────────────────────

pub struct IpsDispatcher {
    ctx: NavigationContext,
    client: Box<dyn IpsClient>,
    signals: Arc<SignalAggregator>,
    events: mpsc::Sender<DetectionEvent>,
    generation: u64,
}

impl IpsDispatcher {
    pub fn new(ctx: NavigationContext, ips_type: IpsType, events: mpsc::Sender<DetectionEvent>) -> Self {
        let signals = Arc::new(ctx.aggregator());
        let client = make_client(&ctx, ips_type);
        Self { ctx, client, signals, events, generation: 0 }
    }

    pub fn ips_type(&self) -> IpsType {
        self.client.ips_type()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn signals(&self) -> &Arc<SignalAggregator> {
        &self.signals
    }

    /// Activate the client for `ips_type`. No-op if it is already active.
    pub fn switch_to(&mut self, ips_type: IpsType) {
        if self.client.ips_type() == ips_type {
            return;
        }
        info!("IPS: switching client {:?} → {:?}", self.client.ips_type(), ips_type);
        self.client.stop();
        self.generation += 1;
        self.signals.clear();
        self.client = make_client(&self.ctx, ips_type);
    }

    /// Replace the monitored set with the beacons of `points`.
    pub fn set_monitored_waypoints(&mut self, points: &[RegionWaypointPoint]) -> Result<()> {
        let table = monitored_table(&self.ctx.graph, points)?;
        debug!("IPS: monitoring {} beacons across {} waypoints", table.len(), points.len());
        self.client.set_monitored(table);
        Ok(())
    }

    /// One resolution pass. A hit is forwarded to the session and the buffer
    /// is cleared so the same burst is not reported twice.
    pub fn detect_waypoints(&mut self) -> Option<DetectionEvent> {
        let hit = self.client.detect(&self.signals)?;
        self.signals.clear();
        let event = DetectionEvent {
            point: hit.point,
            beacon: Some(hit.key),
            generation: self.generation,
        };
        debug!(
            "IPS: detected {} via {} ({:.1} dBm, {} samples)",
            hit.point, hit.key.uuid, hit.average_rssi, hit.samples
        );
        if let Err(e) = self.events.try_send(event) {
            warn!("IPS: detection dropped: {e}");
        }
        Some(event)
    }

    pub fn stop(&mut self) {
        self.client.stop();
        self.generation += 1;
        self.signals.clear();
    }
}

fn make_client(ctx: &NavigationContext, ips_type: IpsType) -> Box<dyn IpsClient> {
    match ips_type {
        IpsType::LBeacon => Box::new(WaypointClient::default()),
        IpsType::IBeacon => Box::new(IBeaconClient::new(ctx.trimmed_mean())),
        IpsType::Gps => Box::new(GpsClient::default()),
    }
}

fn monitored_table(
    graph: &NavigationGraph,
    points: &[RegionWaypointPoint],
) -> Result<HashMap<BeaconKey, MonitoredBeacon>> {
    let mut table = HashMap::new();
    for &point in points {
        for beacon in &graph.waypoint(point)?.beacons {
            let key = beacon.key();
            table.insert(key, MonitoredBeacon { key, threshold: beacon.threshold, point });
        }
    }
    Ok(table)
}

/// Shared handle to the dispatcher, locked briefly by the polling task and the session.
pub type SharedDispatcher = Arc<Mutex<IpsDispatcher>>;

pub(crate) fn lock(dispatcher: &SharedDispatcher) -> MutexGuard<'_, IpsDispatcher> {
    dispatcher.lock().unwrap_or_else(|e| e.into_inner())
}

// ── Scan sink ─────────────────────────────────────────────────────────────────

/// Entry point for the platform scan provider. Cheap to clone, safe from any thread.
#[derive(Clone)]
pub struct ScanSink {
    signals: Arc<SignalAggregator>,
    active: Arc<AtomicBool>,
}

impl ScanSink {
    pub(crate) fn new(signals: Arc<SignalAggregator>, active: Arc<AtomicBool>) -> Self {
        Self { signals, active }
    }

    /// Push one scan batch. Ignored once the session has stopped.
    pub fn push<I>(&self, batch: I)
    where
        I: IntoIterator<Item = SignalRecord>,
    {
        if self.active.load(Ordering::Acquire) {
            self.signals.add_signals(batch);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

// ── Polling task ──────────────────────────────────────────────────────────────

/// Calls [`IpsDispatcher::detect_waypoints`] every `period` until `cancel` flips to `true`.
pub fn spawn_polling(
    dispatcher: SharedDispatcher,
    period: Duration,
    mut cancel: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    lock(&dispatcher).detect_waypoints();
                }
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("IPS: polling task exited");
    })
}
