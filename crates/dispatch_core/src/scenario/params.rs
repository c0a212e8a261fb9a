use bevy_ecs::prelude::Resource;
use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, DispatchResult};
use crate::spatial::Location;

/// Default maximum customer waiting time before a pending request is cancelled (seconds).
const DEFAULT_MAX_WAITING_SECS: u64 = 600;

/// Default maximum time a request may stay unassigned (seconds).
const DEFAULT_MAX_ASSIGNMENT_SECS: u64 = 300;

/// Default rebalancing period; the reference scenario was validated at 20 minutes.
const DEFAULT_REBALANCING_SECS: u64 = 1200;

/// Which matching strategy the bipartite and grid policies use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchingAlgorithmType {
    /// Exact mixed-integer assignment with weighted multi-criteria cost.
    BipartiteExact,
    /// Kuhn-Munkres assignment on pickup distance.
    #[default]
    BipartiteHeuristic,
    /// Greedy nearest taxi / nearest request over two R-trees.
    NearestNeighbor,
}

/// How the rebalancing LP is solved relative to the tick loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveMode {
    /// Solve inline during the rebalancing tick.
    #[default]
    Blocking,
    /// Solve on a worker thread; keep consuming the last good plan meanwhile.
    Background,
}

/// LP rebalancing weights and solver behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RebalancingConfig {
    /// Cost per metre of rebalancing distance.
    pub alpha: f64,
    /// Penalty weight for unserved demand.
    pub lambda: f64,
    /// Upper cap on the `min(supply, demand)` helper per cell and step.
    pub served_cap: f64,
    pub solve_mode: SolveMode,
}

impl Default for RebalancingConfig {
    fn default() -> Self {
        Self {
            alpha: 1e-3,
            lambda: 1.0,
            served_cap: 1000.0,
            solve_mode: SolveMode::Blocking,
        }
    }
}

/// Rank/zone reference policy: how strongly taxis are pulled to the centre.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceConfig {
    /// Centre of the service area. When `None` the grid centre is used.
    pub centre: Option<Location>,
    /// Radius of the centre circle in metres.
    pub centre_radius: f64,
    /// Share of staying taxis the policy tries to keep inside the centre circle.
    pub centre_threshold: f64,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            centre: None,
            centre_radius: 3000.0,
            centre_threshold: 0.5,
        }
    }
}

/// Typed configuration surface of the dispatch core. All times are simulation seconds.
#[derive(Debug, Clone, PartialEq, Resource, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Pending requests older than this are cancelled.
    pub max_customer_waiting_time: u64,
    /// Unassigned requests older than this are cancelled.
    pub max_customer_assignment_time: u64,
    pub dispatch_period: u64,
    pub rebalancing_period: u64,
    pub fleet_size_period: u64,
    /// How often the grid policy recovers staying taxis outside the grid.
    pub outside_recovery_period: u64,
    pub matching_algorithm: MatchingAlgorithmType,
    /// Registry name of the dispatch policy.
    pub policy: String,
    /// Speed used for pickup ETA estimates (m/s).
    pub eta_speed_mps: f64,
    pub pickup_duration: f64,
    pub dropoff_duration: f64,
    /// Exact matcher weight on pickup distance (per metre).
    pub distance_weight: f64,
    /// Exact matcher weight on expected customer wait (per second).
    pub wait_weight: f64,
    pub rebalancing: RebalancingConfig,
    pub reference: ReferenceConfig,
    /// Seed for every RNG the policies own.
    pub seed: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_customer_waiting_time: DEFAULT_MAX_WAITING_SECS,
            max_customer_assignment_time: DEFAULT_MAX_ASSIGNMENT_SECS,
            dispatch_period: 10,
            rebalancing_period: DEFAULT_REBALANCING_SECS,
            fleet_size_period: 60,
            outside_recovery_period: 30,
            matching_algorithm: MatchingAlgorithmType::default(),
            policy: "bipartite".to_string(),
            eta_speed_mps: crate::routing::DEFAULT_SPEED_MPS,
            pickup_duration: 15.0,
            dropoff_duration: 10.0,
            distance_weight: 1.0,
            wait_weight: 0.0,
            rebalancing: RebalancingConfig::default(),
            reference: ReferenceConfig::default(),
            seed: 42,
        }
    }
}

impl DispatchConfig {
    /// Latest acceptable pickup ETA relative to submission: 90% of the waiting limit.
    pub fn waiting_time_budget(&self) -> f64 {
        0.9 * self.max_customer_waiting_time as f64
    }

    pub fn with_policy(mut self, policy: &str) -> Self {
        self.policy = policy.to_string();
        self
    }

    pub fn with_matching_algorithm(mut self, algorithm: MatchingAlgorithmType) -> Self {
        self.matching_algorithm = algorithm;
        self
    }

    pub fn validate(&self) -> DispatchResult<()> {
        let periods = [
            ("dispatch_period", self.dispatch_period),
            ("rebalancing_period", self.rebalancing_period),
            ("fleet_size_period", self.fleet_size_period),
            ("outside_recovery_period", self.outside_recovery_period),
        ];
        for (name, value) in periods {
            if value == 0 {
                return Err(DispatchError::Config(format!("{name} must be positive")));
            }
        }
        if !(self.eta_speed_mps.is_finite() && self.eta_speed_mps > 0.0) {
            return Err(DispatchError::Config(
                "eta_speed_mps must be a positive number".into(),
            ));
        }
        let weights = [
            ("pickup_duration", self.pickup_duration),
            ("dropoff_duration", self.dropoff_duration),
            ("distance_weight", self.distance_weight),
            ("wait_weight", self.wait_weight),
            ("rebalancing.alpha", self.rebalancing.alpha),
            ("rebalancing.lambda", self.rebalancing.lambda),
            ("rebalancing.served_cap", self.rebalancing.served_cap),
            ("reference.centre_radius", self.reference.centre_radius),
        ];
        for (name, value) in weights {
            if !value.is_finite() || value < 0.0 {
                return Err(DispatchError::Config(format!(
                    "{name} must be finite and non-negative, got {value}"
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.reference.centre_threshold) {
            return Err(DispatchError::Config(
                "reference.centre_threshold must lie in [0, 1]".into(),
            ));
        }
        Ok(())
    }
}
