//! Static topology and dynamic inputs of the rebalancing LP, plus the
//! initialize / update / solve protocol around them.

use std::sync::Arc;

use tracing::info;

use super::plan::FlowPlan;
use super::solver::{FlowSolver, LpFlowSolver};
use crate::error::{DispatchError, DispatchResult};
use crate::grid::GridTables;
use crate::scenario::RebalancingConfig;

/// Weight of step `t` in the objective: `max(1 - 0.9 t, 0.1)`. The floor keeps
/// the unserved penalty and the distance cost positive at every step.
pub fn discount(step: usize) -> f64 {
    (1.0 - 0.9 * step as f64).max(0.1)
}

/// Everything about the LP that does not change between solves.
#[derive(Debug, Clone, PartialEq)]
pub struct RebalancingTopology {
    pub cells: usize,
    pub steps: usize,
    /// Rebalancing period in seconds.
    pub period: f64,
    /// Distance cost per metre.
    pub alpha: f64,
    /// Penalty per unserved request.
    pub lambda: f64,
    pub served_cap: f64,
    pub distance: Vec<Vec<f64>>,
    pub travel_time: Vec<Vec<f64>>,
    pub target_probability: Vec<Vec<f64>>,
}

impl RebalancingTopology {
    pub fn build(
        tables: &GridTables,
        steps: usize,
        period: f64,
        config: &RebalancingConfig,
    ) -> DispatchResult<Self> {
        if tables.is_empty() {
            return Err(DispatchError::Tables("rebalancing needs at least one cell".into()));
        }
        if steps < 2 {
            return Err(DispatchError::Tables(format!(
                "rebalancing needs at least two steps, got {steps}"
            )));
        }
        if !(period > 0.0) {
            return Err(DispatchError::Tables(format!("invalid rebalancing period {period}")));
        }
        Ok(Self {
            cells: tables.len(),
            steps,
            period,
            alpha: config.alpha,
            lambda: config.lambda,
            served_cap: config.served_cap,
            distance: tables.distances().to_vec(),
            travel_time: tables.travel_times().to_vec(),
            target_probability: tables.target_probabilities().to_vec(),
        })
    }

    /// Whether flow `origin -> destination` may be non-zero at `step`.
    pub fn is_open_arc(&self, step: usize, origin: usize, destination: usize) -> bool {
        origin != destination
            && step + 1 < self.steps
            && self.travel_time[origin][destination] <= self.period
    }

    /// Whether a trip served in `from` during step `step - 1` frees its vehicle
    /// in `to` during `step`.
    pub fn arrives_during(&self, step: usize, from: usize, to: usize) -> bool {
        let window = self.period / self.steps as f64;
        let tt = self.travel_time[from][to];
        step >= 1 && tt > (step - 1) as f64 * window && tt < step as f64 * window
    }
}

/// Per-solve inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct RebalancingInputs {
    /// `[cell][step]`
    pub predicted_demand: Vec<Vec<f64>>,
    /// Divertable unassigned vehicles per cell.
    pub initial_placement: Vec<f64>,
    /// `[step][cell]` for the first `steps - 1` steps: occupied vehicles
    /// becoming free.
    pub becoming_free: Vec<Vec<f64>>,
}

impl RebalancingInputs {
    pub fn zero(cells: usize, steps: usize) -> Self {
        Self {
            predicted_demand: vec![vec![0.0; steps]; cells],
            initial_placement: vec![0.0; cells],
            becoming_free: vec![vec![0.0; cells]; steps.saturating_sub(1)],
        }
    }

    fn validate(&self, topology: &RebalancingTopology) -> DispatchResult<()> {
        let (n, k) = (topology.cells, topology.steps);
        let shaped = self.predicted_demand.len() == n
            && self.predicted_demand.iter().all(|r| r.len() == k)
            && self.initial_placement.len() == n
            && self.becoming_free.len() == k - 1
            && self.becoming_free.iter().all(|r| r.len() == n);
        if !shaped {
            return Err(DispatchError::Solver(format!(
                "model inputs do not match {n} cells x {k} steps"
            )));
        }
        let finite = self
            .predicted_demand
            .iter()
            .chain(self.becoming_free.iter())
            .flatten()
            .chain(self.initial_placement.iter())
            .all(|v| v.is_finite());
        if !finite {
            return Err(DispatchError::Solver("model inputs hold non-finite values".into()));
        }
        Ok(())
    }
}

/// A solve that can be shipped to another thread.
pub struct SolveJob {
    pub topology: Arc<RebalancingTopology>,
    pub inputs: RebalancingInputs,
    pub solver: Arc<dyn FlowSolver>,
}

impl SolveJob {
    pub fn run(&self) -> DispatchResult<FlowPlan> {
        self.solver
            .solve(&self.topology, &self.inputs)
            .map(|flows| flows.plan())
    }
}

pub struct RebalancingModel {
    tables: GridTables,
    steps: usize,
    period: f64,
    config: RebalancingConfig,
    solver: Arc<dyn FlowSolver>,
    topology: Option<Arc<RebalancingTopology>>,
    dynamic: Option<RebalancingInputs>,
}

impl RebalancingModel {
    pub fn new(tables: GridTables, steps: usize, period: f64, config: RebalancingConfig) -> Self {
        Self {
            tables,
            steps,
            period,
            config,
            solver: Arc::new(LpFlowSolver),
            topology: None,
            dynamic: None,
        }
    }

    pub fn with_solver(mut self, solver: Arc<dyn FlowSolver>) -> Self {
        self.solver = solver;
        self
    }

    pub fn cells(&self) -> usize {
        self.tables.len()
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn topology(&self) -> Option<&Arc<RebalancingTopology>> {
        self.topology.as_ref()
    }

    /// (Re)build the static topology and drop any installed inputs.
    pub fn initialize(&mut self) -> DispatchResult<()> {
        let topology = RebalancingTopology::build(&self.tables, self.steps, self.period, &self.config)?;
        info!(
            cells = topology.cells,
            steps = topology.steps,
            alpha = topology.alpha,
            lambda = topology.lambda,
            "rebalancing model initialised"
        );
        self.topology = Some(Arc::new(topology));
        self.dynamic = None;
        Ok(())
    }

    /// Replace the dynamic constraint inputs wholesale.
    pub fn update_model(&mut self, inputs: RebalancingInputs) -> DispatchResult<()> {
        let topology = self
            .topology
            .as_ref()
            .ok_or_else(|| DispatchError::Solver("model used before initialize".into()))?;
        inputs.validate(topology)?;
        info!(
            available = inputs.initial_placement.iter().sum::<f64>(),
            "rebalancing model updated"
        );
        self.dynamic = Some(inputs);
        Ok(())
    }

    /// Package the installed inputs for a solve; they are consumed.
    pub fn take_job(&mut self) -> DispatchResult<SolveJob> {
        let topology = self
            .topology
            .clone()
            .ok_or_else(|| DispatchError::Solver("model used before initialize".into()))?;
        let inputs = self
            .dynamic
            .take()
            .ok_or_else(|| DispatchError::Solver("solve requested without fresh inputs".into()))?;
        Ok(SolveJob {
            topology,
            inputs,
            solver: Arc::clone(&self.solver),
        })
    }

    pub fn calculate_rebalancing(&mut self) -> DispatchResult<FlowPlan> {
        self.take_job()?.run()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables() -> GridTables {
        GridTables::from_matrices(
            vec![vec![0.0, 1000.0], vec![1000.0, 0.0]],
            vec![vec![0.0, 100.0], vec![100.0, 0.0]],
            vec![vec![0.0, 1.0], vec![1.0, 0.0]],
        )
        .unwrap()
    }

    #[test]
    fn discount_is_clamped() {
        assert_eq!(discount(0), 1.0);
        assert!((discount(1) - 0.1).abs() < 1e-12);
        assert_eq!(discount(5), 0.1);
    }

    #[test]
    fn arcs_close_on_self_loops_last_step_and_slow_pairs() {
        let config = RebalancingConfig::default();
        let topo = RebalancingTopology::build(&tables(), 3, 1200.0, &config).unwrap();
        assert!(topo.is_open_arc(0, 0, 1));
        assert!(!topo.is_open_arc(0, 1, 1));
        assert!(!topo.is_open_arc(2, 0, 1));
        let slow = RebalancingTopology::build(&tables(), 3, 50.0, &config).unwrap();
        assert!(!slow.is_open_arc(0, 0, 1));
        // 100 s lies in (0, 400) for a 1200 s period over 3 steps.
        assert!(topo.arrives_during(1, 0, 1));
        assert!(!topo.arrives_during(2, 0, 1));
    }

    #[test]
    fn protocol_requires_initialize_and_fresh_inputs() {
        let mut model = RebalancingModel::new(tables(), 3, 1200.0, RebalancingConfig::default());
        assert!(model.update_model(RebalancingInputs::zero(2, 3)).is_err());
        model.initialize().unwrap();
        assert!(model.calculate_rebalancing().is_err());
        assert!(model.update_model(RebalancingInputs::zero(2, 2)).is_err());
        model.update_model(RebalancingInputs::zero(2, 3)).unwrap();
        assert!(model.calculate_rebalancing().unwrap().is_zero());
        assert!(model.calculate_rebalancing().is_err());
    }
}
