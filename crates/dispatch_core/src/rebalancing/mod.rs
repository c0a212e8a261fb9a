//! Time-indexed LP rebalancing.
//!
//! [`Rebalancer`] owns the model and hands out one plan slice per rebalancing
//! period. A fresh solve is requested every `steps - 1` periods; in
//! [`SolveMode::Background`] it runs on a worker thread and the last good plan
//! keeps being consumed until the result arrives.

mod model;
mod plan;
mod solver;

use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::error::{DispatchError, DispatchResult};
use crate::scenario::SolveMode;

pub use model::{discount, RebalancingInputs, RebalancingModel, RebalancingTopology, SolveJob};
pub use plan::FlowPlan;
pub use solver::{FlowSolver, LpFlowSolver, SolvedFlows, RELAXATION_PENALTY};

const WORKER_THREAD_NAME: &str = "rebalancing-solver";

struct RunningSolve {
    handle: JoinHandle<DispatchResult<FlowPlan>>,
    requested_at: usize,
}

pub struct Rebalancer {
    model: RebalancingModel,
    mode: SolveMode,
    plan: Option<FlowPlan>,
    /// Period counter at which `plan` was requested.
    plan_origin: usize,
    periods: usize,
    running: Option<RunningSolve>,
    fallbacks: usize,
}

impl Rebalancer {
    pub fn new(mut model: RebalancingModel, mode: SolveMode) -> DispatchResult<Self> {
        model.initialize()?;
        Ok(Self {
            model,
            mode,
            plan: None,
            plan_origin: 0,
            periods: 0,
            running: None,
            fallbacks: 0,
        })
    }

    /// Plan slices consumed between two solves.
    pub fn usable_steps(&self) -> usize {
        self.model.steps() - 1
    }

    pub fn cells(&self) -> usize {
        self.model.cells()
    }

    pub fn steps(&self) -> usize {
        self.model.steps()
    }

    pub fn is_solve_due(&self) -> bool {
        self.periods % self.usable_steps() == 0
    }

    pub fn is_solving(&self) -> bool {
        self.running.is_some()
    }

    pub fn current_plan(&self) -> Option<&FlowPlan> {
        self.plan.as_ref()
    }

    /// Solves that failed and were replaced by a zero plan.
    pub fn fallbacks(&self) -> usize {
        self.fallbacks
    }

    /// Moves `(origin, destination, count)` for the current period.
    ///
    /// `inputs` is only evaluated when a solve is due.
    pub fn next_moves<F>(&mut self, inputs: F) -> DispatchResult<Vec<(usize, usize, u32)>>
    where
        F: FnOnce() -> DispatchResult<RebalancingInputs>,
    {
        self.collect_finished()?;
        if self.is_solve_due() {
            self.request_solve(inputs)?;
        }
        let moves = match &self.plan {
            Some(plan) => {
                let slice = (self.periods - self.plan_origin) % self.usable_steps();
                plan.moves(slice)
            }
            None => Vec::new(),
        };
        self.periods += 1;
        Ok(moves)
    }

    /// Block until a background solve finishes and adopt its result.
    pub fn wait_for_solver(&mut self) -> DispatchResult<()> {
        if let Some(running) = self.running.take() {
            let result = join_worker(running.handle);
            self.accept(result, running.requested_at)?;
        }
        Ok(())
    }

    fn request_solve<F>(&mut self, inputs: F) -> DispatchResult<()>
    where
        F: FnOnce() -> DispatchResult<RebalancingInputs>,
    {
        if self.running.is_some() {
            debug!(period = self.periods, "previous rebalancing solve still running");
            return Ok(());
        }
        let job = match inputs().and_then(|i| self.model.update_model(i)).and_then(|_| self.model.take_job()) {
            Ok(job) => job,
            Err(err) => return self.accept(Err(err), self.periods),
        };
        match self.mode {
            SolveMode::Blocking => {
                let result = job.run();
                self.accept(result, self.periods)
            }
            SolveMode::Background => {
                let requested_at = self.periods;
                match thread::Builder::new()
                    .name(WORKER_THREAD_NAME.into())
                    .spawn(move || job.run())
                {
                    Ok(handle) => {
                        self.running = Some(RunningSolve {
                            handle,
                            requested_at,
                        });
                        Ok(())
                    }
                    Err(err) => {
                        warn!(error = %err, "could not start rebalancing worker; nothing planned this cycle");
                        self.accept(
                            Err(DispatchError::Solver(format!("worker spawn failed: {err}"))),
                            requested_at,
                        )
                    }
                }
            }
        }
    }

    fn collect_finished(&mut self) -> DispatchResult<()> {
        if self
            .running
            .as_ref()
            .is_some_and(|running| running.handle.is_finished())
        {
            self.wait_for_solver()?;
        }
        Ok(())
    }

    fn accept(&mut self, result: DispatchResult<FlowPlan>, requested_at: usize) -> DispatchResult<()> {
        match result {
            Ok(plan) => {
                debug!(
                    period = requested_at,
                    vehicles = (0..plan.steps()).map(|t| plan.step_total(t)).sum::<u64>(),
                    "rebalancing plan ready"
                );
                self.plan = Some(plan);
                self.plan_origin = requested_at;
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, period = requested_at, "rebalancing solve failed; using a zero plan");
                self.plan = Some(FlowPlan::zero(self.model.steps(), self.model.cells()));
                self.plan_origin = requested_at;
                self.fallbacks += 1;
                self.model.initialize().map_err(|e| {
                    DispatchError::Fatal(format!("could not re-initialise the rebalancing model: {e}"))
                })
            }
        }
    }
}

fn join_worker(handle: JoinHandle<DispatchResult<FlowPlan>>) -> DispatchResult<FlowPlan> {
    handle
        .join()
        .unwrap_or_else(|_| Err(DispatchError::Solver("rebalancing worker panicked".into())))
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::{channel, Receiver};
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::grid::GridTables;
    use crate::scenario::RebalancingConfig;

    fn tables() -> GridTables {
        GridTables::from_matrices(
            vec![vec![0.0, 100.0], vec![100.0, 0.0]],
            vec![vec![0.0, 60.0], vec![60.0, 0.0]],
            vec![vec![0.0, 1.0], vec![1.0, 0.0]],
        )
        .unwrap()
    }

    /// Returns a fixed plan, optionally waiting for a go signal first.
    struct ScriptedSolver {
        flow: f64,
        gate: Option<Mutex<Receiver<()>>>,
        fail: bool,
    }

    impl FlowSolver for ScriptedSolver {
        fn solve(&self, topology: &RebalancingTopology, _inputs: &RebalancingInputs) -> DispatchResult<SolvedFlows> {
            if let Some(gate) = &self.gate {
                let _ = gate.lock().map(|rx| rx.recv());
            }
            if self.fail {
                return Err(DispatchError::Solver("scripted failure".into()));
            }
            let (n, k) = (topology.cells, topology.steps);
            let mut flows = vec![vec![vec![0.0; n]; n]; k];
            for step in flows.iter_mut().take(k - 1) {
                step[0][1] = self.flow;
            }
            Ok(SolvedFlows {
                flows,
                free: vec![vec![0.0; n]; k],
                supply: vec![vec![0.0; n]; k],
                demand: vec![vec![0.0; n]; k],
                over: vec![vec![0.0; n]; k],
                under: vec![vec![0.0; n]; k],
                served: vec![vec![0.0; n]; k],
                relaxed: false,
                total_slack: 0.0,
            })
        }
    }

    fn rebalancer(solver: ScriptedSolver, mode: SolveMode) -> Rebalancer {
        let model = RebalancingModel::new(tables(), 3, 1200.0, RebalancingConfig::default())
            .with_solver(Arc::new(solver));
        Rebalancer::new(model, mode).unwrap()
    }

    fn inputs() -> DispatchResult<RebalancingInputs> {
        Ok(RebalancingInputs::zero(2, 3))
    }

    #[test]
    fn blocking_mode_solves_every_usable_cycle() {
        let mut r = rebalancer(
            ScriptedSolver {
                flow: 2.0,
                gate: None,
                fail: false,
            },
            SolveMode::Blocking,
        );
        assert_eq!(r.next_moves(inputs).unwrap(), vec![(0, 1, 2)]);
        assert!(!r.is_solve_due());
        assert_eq!(r.next_moves(|| panic!("no solve due")).unwrap(), vec![(0, 1, 2)]);
        assert!(r.is_solve_due());
    }

    #[test]
    fn failed_solve_yields_zero_plan_and_rebuild() {
        let mut r = rebalancer(
            ScriptedSolver {
                flow: 2.0,
                gate: None,
                fail: true,
            },
            SolveMode::Blocking,
        );
        assert!(r.next_moves(inputs).unwrap().is_empty());
        assert_eq!(r.fallbacks(), 1);
        assert!(r.current_plan().is_some_and(FlowPlan::is_zero));
        assert!(r.model.topology().is_some());
    }

    #[test]
    fn background_solve_consumes_last_good_plan_while_pending() {
        let (tx, rx) = channel();
        let mut r = rebalancer(
            ScriptedSolver {
                flow: 1.0,
                gate: Some(Mutex::new(rx)),
                fail: false,
            },
            SolveMode::Background,
        );
        // Nothing planned yet: the first period is empty while the worker runs.
        assert!(r.next_moves(inputs).unwrap().is_empty());
        assert!(r.is_solving());
        tx.send(()).unwrap();
        r.wait_for_solver().unwrap();
        assert_eq!(r.next_moves(inputs).unwrap(), vec![(0, 1, 1)]);

        // Second solve is requested and held back; the old plan wraps around.
        assert_eq!(r.next_moves(inputs).unwrap(), vec![(0, 1, 1)]);
        assert!(r.is_solving());
        assert_eq!(r.next_moves(inputs).unwrap(), vec![(0, 1, 1)]);
        tx.send(()).unwrap();
        r.wait_for_solver().unwrap();
        assert!(!r.is_solving());
    }
}
