//! Everything a navigation session needs from its surroundings, built once
//! and handed to the session and IPS dispatcher.

use std::collections::BTreeSet;
use std::sync::Arc;

use wayfinder_types::ConnectionType;

use crate::aggregator::{Clock, RssiAveraging, SignalAggregator, SystemClock};
use crate::beacon::{CoordinateCodec, PackedFloatCodec};
use crate::config::NavigatorConfig;
use crate::graph::NavigationGraph;
use crate::planner::{PlannerSettings, RoutePlanner};

#[derive(Clone)]
pub struct NavigationContext {
    pub graph: Arc<NavigationGraph>,
    pub config: NavigatorConfig,
    pub codec: Arc<dyn CoordinateCodec>,
    pub clock: Arc<dyn Clock>,
}

impl NavigationContext {
    pub fn new(graph: Arc<NavigationGraph>, config: NavigatorConfig) -> Self {
        Self {
            graph,
            config,
            codec: Arc::new(PackedFloatCodec),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn CoordinateCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn planner(&self, avoid: BTreeSet<ConnectionType>) -> RoutePlanner<'_> {
        RoutePlanner::new(&self.graph, avoid, PlannerSettings::from(&self.config))
    }

    pub fn aggregator(&self) -> SignalAggregator {
        SignalAggregator::new(self.config.signal_window(), Arc::clone(&self.clock))
    }

    /// Averaging used by the iBeacon client.
    pub fn trimmed_mean(&self) -> RssiAveraging {
        RssiAveraging::TrimmedMean {
            tail: self.config.trimmed_mean_tail,
            min_samples: self.config.trimmed_mean_min_samples,
        }
    }
}
