//! main.rs — Beacon scan simulator entry point
//!
//! Drives a real navigation session with synthetic scans:
//!   1. Scan loop: walks the virtual user along the scripted route at
//!      `scan_rate_hz` and pushes noisy RSSI batches into the session
//!   2. Event relay: logs every instruction the session emits and broadcasts
//!      it as JSON to connected control clients
//!   3. WebSocket server: control panel on `ctrl_port` (pause/resume, speed,
//!      radio presets, stop)
//!
//! The session cannot tell the simulator apart from a phone: it only sees
//! `SignalRecord`s arriving through its `ScanSink`.

mod radio;
mod scenarios;
mod walker;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    routing::get,
    Router,
};
use chrono::Utc;
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::{broadcast, RwLock};
use tokio::time::interval;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use wayfinder_navigator::ips::ScanSink;
use wayfinder_navigator::{
    loader, AvoidPreferences, NavigationContext, NavigationGraph, NavigationRequest, NavigatorConfig,
    SessionHandle,
};
use wayfinder_types::{NavigationResult, RegionWaypointPoint};

use radio::{BeaconSite, RadioConfig, ScanInput};
use scenarios::{ScenarioConfig, ScenarioType};
use walker::Walker;

const DEMO_MAP: &str = include_str!("../demo_map.json");

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "wayfinder-sim", about = "Wayfinder beacon scan simulator")]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
    /// Building map JSON; the bundled demo clinic when omitted
    #[arg(long)]
    map: Option<String>,
    /// Walk scenario
    #[arg(long, value_enum, default_value_t = ScenarioType::Straight)]
    scenario: ScenarioType,
    /// Simulation speed multiplier; overrides `sim_speed`
    #[arg(long)]
    speed: Option<f64>,
    /// Control panel WebSocket port; overrides `ctrl_port`
    #[arg(long)]
    ctrl_port: Option<u16>,
    /// Seed for the radio noise, for repeatable runs
    #[arg(long)]
    seed: Option<u64>,
}

// ── Shared state ──────────────────────────────────────────────────────────────

struct SimState {
    walker: Walker,
    scenario: ScenarioConfig,
    session: SessionHandle,
    paused: bool,
    speed: f64,
    /// Last instruction JSON, replayed to clients on connect
    last_event: Option<String>,
}

type SharedState = Arc<RwLock<SimState>>;

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wayfinder_sim=info,wayfinder_navigator=info".into()),
        )
        .init();

    let args = Args::parse();

    let config_str = std::fs::read_to_string(&args.config)
        .unwrap_or_else(|_| include_str!("../config.toml").to_string());
    let cfg: FullConfig = toml::from_str(&config_str).context("invalid config.toml")?;

    let graph = match &args.map {
        Some(path) => loader::load_graph(path).await?,
        None => loader::from_json_str(DEMO_MAP)?,
    };
    let graph = Arc::new(graph);
    let ctx = NavigationContext::new(Arc::clone(&graph), cfg.navigator.clone());

    let start = find_waypoint(&graph, &cfg.route.start)?;
    let destination = find_waypoint(&graph, &cfg.route.destination)?;
    let avoid = cfg.route.avoid.to_avoid_set();

    info!(
        "🧭 Beacon simulator starting — {} → {} in '{}' ({:?})",
        cfg.route.start, cfg.route.destination, graph.info.building, args.scenario
    );

    let scenario = scenarios::preset(args.scenario);
    let script = scenarios::walk_script(&ctx, start, destination, &avoid, &scenario)?;
    let walker = Walker::new(&graph, &script, cfg.simulation.walk_speed_mps)?;
    let sites = radio::beacon_sites(&graph, ctx.codec.as_ref());
    info!("📡 {} beacons on the map, {} stops scripted", sites.len(), script.len());

    let request = NavigationRequest::new(start.region_id, destination.region_id, destination.waypoint_id, avoid);
    let (session, mut events) = wayfinder_navigator::start(ctx, request)?;
    let sink = session.scan_sink();

    let shared: SharedState = Arc::new(RwLock::new(SimState {
        walker,
        scenario,
        session,
        paused: false,
        speed: args.speed.unwrap_or(cfg.simulation.sim_speed),
        last_event: None,
    }));

    // Broadcast channel for instructions (control clients)
    let (event_tx, _) = broadcast::channel::<String>(64);
    let event_tx = Arc::new(event_tx);

    // Relay session events
    let relay_state = shared.clone();
    let relay_tx = event_tx.clone();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match &event.instruction {
                Some(i) => info!(
                    "🗣  {:?}: at '{}' → {:?} towards '{}' ({:.0}%)",
                    event.result,
                    i.current_waypoint_name,
                    i.direction,
                    i.next_waypoint_name.as_deref().unwrap_or("-"),
                    i.progress
                ),
                None => warn!("🗣  {:?}", event.result),
            }
            let json = event.to_json();
            relay_state.write().await.last_event = Some(json.clone());
            let _ = relay_tx.send(json);
            if event.result == NavigationResult::Arrival {
                info!("🏁 Arrived; the control panel stays up until Ctrl-C");
            }
        }
    });

    // Scan loop
    let radio_cfg = cfg.radio.clone();
    let scan_rate = cfg.simulation.scan_rate_hz;
    let rng = args.seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
    tokio::spawn(sim_loop(shared.clone(), sink, sites, radio_cfg, scan_rate, rng));

    // Control WebSocket server
    let ctrl_addr = format!("0.0.0.0:{}", args.ctrl_port.unwrap_or(cfg.simulation.ctrl_port));
    info!("🖥  Control panel WebSocket at ws://{ctrl_addr}/ws");

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(|| async { "wayfinder-sim ok" }))
        .with_state((shared.clone(), event_tx.clone()))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));

    let listener = tokio::net::TcpListener::bind(&ctrl_addr)
        .await
        .with_context(|| format!("binding {ctrl_addr}"))?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn find_waypoint(graph: &NavigationGraph, name: &str) -> anyhow::Result<RegionWaypointPoint> {
    graph
        .regions()
        .flat_map(|r| r.waypoints.values().map(move |w| (r.id, w)))
        .find(|(_, w)| w.name == name)
        .map(|(region, w)| RegionWaypointPoint::new(region, w.id))
        .ok_or_else(|| anyhow!("no waypoint named '{name}' on the map"))
}

// ── Scan loop ─────────────────────────────────────────────────────────────────

async fn sim_loop(
    state: SharedState,
    sink: ScanSink,
    sites: Vec<BeaconSite>,
    radio: RadioConfig,
    scan_rate_hz: f64,
    mut rng: StdRng,
) {
    let period = Duration::from_secs_f64(1.0 / scan_rate_hz.max(0.1));
    let mut ticker = interval(period);
    let mut batches: u64 = 0;

    info!("📶 Scan loop running at {scan_rate_hz} Hz ({}ms period)", period.as_millis());

    loop {
        ticker.tick().await;

        if !sink.is_active() {
            info!("Session no longer active; scan loop stopping after {batches} batches");
            break;
        }

        let batch = {
            let mut s = state.write().await;
            if s.paused {
                continue;
            }
            // dt = real period × speed multiplier
            let dt = period.as_secs_f64() * s.speed;
            for stop in s.walker.advance(dt) {
                info!("🚶 Walked past '{}' (floor {})", stop.name, stop.floor);
            }
            let (floor, position) = s.walker.position();
            let input = ScanInput {
                floor,
                position,
                noise_multiplier: s.scenario.noise_multiplier,
                drop_multiplier: s.scenario.drop_multiplier,
                received_at: Utc::now(),
                sites: &sites,
            };
            radio::generate_scan(&mut rng, &radio, &input)
        };

        batches += 1;
        if batches % 40 == 0 {
            info!("⏱ batch={} | records={}", batches, batch.len());
        }
        sink.push(batch);
    }
}

// ── WebSocket control handler ─────────────────────────────────────────────────

async fn ws_handler(
    ws: WebSocketUpgrade,
    State((state, event_tx)): State<(SharedState, Arc<broadcast::Sender<String>>)>,
) -> Response {
    ws.on_upgrade(move |socket| handle_ws(socket, state, event_tx))
}

async fn handle_ws(mut socket: WebSocket, state: SharedState, event_tx: Arc<broadcast::Sender<String>>) {
    let mut event_rx = event_tx.subscribe();

    // Replay the latest instruction on connect
    let last = state.read().await.last_event.clone();
    if let Some(event) = last {
        let _ = socket.send(Message::Text(event)).await;
    }

    loop {
        tokio::select! {
            Ok(msg) = event_rx.recv() => {
                if socket.send(Message::Text(msg)).await.is_err() { break; }
            }
            Some(Ok(Message::Text(cmd))) = socket.recv() => {
                if let Some(reply) = handle_command(&state, &cmd).await {
                    if socket.send(Message::Text(reply)).await.is_err() { break; }
                }
            }
            else => break,
        }
    }
}

/// Handle commands from the control panel.
/// Commands are JSON: { "cmd": "...", "args": {...} }. Only `status` replies.
async fn handle_command(state: &SharedState, raw: &str) -> Option<String> {
    let v: serde_json::Value = serde_json::from_str(raw).ok()?;
    let cmd = v["cmd"].as_str().unwrap_or("");
    match cmd {
        "pause"  => { state.write().await.paused = true;  info!("⏸ Sim paused"); }
        "resume" => { state.write().await.paused = false; info!("▶ Sim resumed"); }
        "set_speed" => {
            if let Some(sp) = v["args"]["speed"].as_f64() {
                state.write().await.speed = sp.clamp(0.1, 20.0);
                info!("⚡ Sim speed set to {sp}×");
            }
        }
        "preset" => {
            let name = v["args"]["name"].as_str().unwrap_or("");
            match scenarios::preset_by_name(name) {
                Some(sc) => {
                    state.write().await.scenario = sc;
                    info!("🎭 Preset '{name}' loaded");
                }
                None => warn!("Unknown preset: {name}"),
            }
        }
        "stop" => {
            state.read().await.session.stop();
            info!("⏹ Navigation stopped from control panel");
        }
        "status" => {
            let s = state.read().await;
            let status = serde_json::json!({
                "type":     "status",
                "state":    s.session.state(),
                "progress": s.session.progress(),
                "active":   s.session.is_active(),
                "paused":   s.paused,
                "speed":    s.speed,
                "scenario": s.scenario,
                "finished": s.walker.is_finished(),
            });
            return Some(status.to_string());
        }
        _ => warn!("Unknown control command: {cmd}"),
    }
    None
}

// ── Config structs ────────────────────────────────────────────────────────────

#[derive(Debug, serde::Deserialize)]
struct FullConfig {
    #[serde(default)]
    navigator:  NavigatorConfig,
    simulation: SimulationConfig,
    radio:      RadioConfig,
    route:      RouteConfig,
}

#[derive(Debug, serde::Deserialize)]
struct SimulationConfig {
    scan_rate_hz:   f64,
    walk_speed_mps: f64,
    sim_speed:      f64,
    ctrl_port:      u16,
}

#[derive(Debug, serde::Deserialize)]
struct RouteConfig {
    start:       String,
    destination: String,
    #[serde(flatten)]
    avoid:       AvoidPreferences,
}
