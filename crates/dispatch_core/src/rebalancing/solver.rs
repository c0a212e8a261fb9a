//! Linear program for time-indexed fleet rebalancing.
//!
//! Per step `t` and cell `c` the model tracks free vehicles, supply left after
//! rebalancing, demand, the positive and negative parts of `supply - demand`,
//! served trips and occupied vehicles becoming free. Arcs that can never carry
//! flow (self-loops, the last step, pairs slower than one period) are not
//! materialised, which is equivalent to pinning them at zero.
//!
//! `served = min(supply, demand, cap)` and the two parts of `supply - demand`
//! are exact: each min/max is linearised with selector binaries and a big-M
//! bound, so the model is a small mixed-integer program.

use std::panic::{catch_unwind, AssertUnwindSafe};

use good_lp::{constraint, microlp, variable, variables, Expression, Solution, SolverModel, Variable};
use tracing::warn;

use super::model::{discount, RebalancingInputs, RebalancingTopology};
use super::plan::FlowPlan;
use crate::error::{DispatchError, DispatchResult};

/// Objective weight of one unit of constraint violation in the relaxed model.
pub const RELAXATION_PENALTY: f64 = 1e4;

/// Backend that turns a topology plus inputs into flows.
pub trait FlowSolver: Send + Sync {
    fn solve(
        &self,
        topology: &RebalancingTopology,
        inputs: &RebalancingInputs,
    ) -> DispatchResult<SolvedFlows>;
}

/// Continuous solution values, indexed `[step][cell]` (`[step][origin][destination]` for flows).
#[derive(Debug, Clone, PartialEq)]
pub struct SolvedFlows {
    pub flows: Vec<Vec<Vec<f64>>>,
    pub free: Vec<Vec<f64>>,
    pub supply: Vec<Vec<f64>>,
    pub demand: Vec<Vec<f64>>,
    pub over: Vec<Vec<f64>>,
    pub under: Vec<Vec<f64>>,
    pub served: Vec<Vec<f64>>,
    /// Whether the feasibility relaxation produced this solution.
    pub relaxed: bool,
    pub total_slack: f64,
}

impl SolvedFlows {
    pub fn plan(&self) -> FlowPlan {
        FlowPlan::from_continuous(&self.flows)
    }

    /// Largest violation of the supply identity, the outflow bound and the
    /// free-vehicle recurrence.
    pub fn conservation_error(&self, topology: &RebalancingTopology, inputs: &RebalancingInputs) -> f64 {
        let (n, k) = (topology.cells, topology.steps);
        let mut worst: f64 = 0.0;
        for t in 0..k {
            for c in 0..n {
                let out: f64 = self.flows[t][c].iter().sum();
                worst = worst.max((self.supply[t][c] + out - self.free[t][c]).abs());
                worst = worst.max(out - self.free[t][c]);
                let expected = if t == 0 {
                    inputs.initial_placement[c]
                } else {
                    let inflow: f64 = (0..n).map(|o| self.flows[t - 1][o][c]).sum();
                    let returning: f64 = (0..n)
                        .filter(|&o| topology.arrives_during(t, o, c))
                        .map(|o| topology.target_probability[o][c] * self.served[t - 1][o])
                        .sum();
                    self.over[t - 1][c] + inflow + returning + inputs.becoming_free[t - 1][c]
                };
                worst = worst.max((self.free[t][c] - expected).abs());
            }
        }
        worst
    }

    /// Largest deviation of `served`, `over` and `under` from
    /// `min(supply, demand, cap)`, `max(supply - demand, 0)` and `max(demand - supply, 0)`.
    pub fn min_max_error(&self, topology: &RebalancingTopology) -> f64 {
        let mut worst: f64 = 0.0;
        for t in 0..topology.steps {
            for c in 0..topology.cells {
                let (s, d) = (self.supply[t][c], self.demand[t][c]);
                worst = worst.max((self.served[t][c] - s.min(d).min(topology.served_cap)).abs());
                worst = worst.max((self.over[t][c] - (s - d).max(0.0)).abs());
                worst = worst.max((self.under[t][c] - (d - s).max(0.0)).abs());
            }
        }
        worst
    }
}

/// good_lp model solved with the pure-Rust microlp backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct LpFlowSolver;

impl FlowSolver for LpFlowSolver {
    fn solve(
        &self,
        topology: &RebalancingTopology,
        inputs: &RebalancingInputs,
    ) -> DispatchResult<SolvedFlows> {
        match guarded_solve(topology, inputs, false) {
            Ok(flows) => Ok(flows),
            Err(reason) => {
                warn!(%reason, "rebalancing LP failed; retrying with relaxed dynamic constraints");
                let relaxed = guarded_solve(topology, inputs, true).map_err(|reason| {
                    DispatchError::Solver(format!("relaxed rebalancing LP failed: {reason}"))
                })?;
                warn!(slack = relaxed.total_slack, "relaxed rebalancing LP solved");
                Ok(relaxed)
            }
        }
    }
}

fn guarded_solve(
    topology: &RebalancingTopology,
    inputs: &RebalancingInputs,
    relax: bool,
) -> Result<SolvedFlows, String> {
    catch_unwind(AssertUnwindSafe(|| build_and_solve(topology, inputs, relax)))
        .unwrap_or_else(|_| Err("solver panicked".to_string()))
}

fn grid_vars(
    vars: &mut good_lp::ProblemVariables,
    steps: usize,
    cells: usize,
    name: &str,
    lower: Option<f64>,
    upper: Option<f64>,
) -> Vec<Vec<Variable>> {
    (0..steps)
        .map(|t| {
            (0..cells)
                .map(|c| {
                    let mut def = variable().name(format!("{name}_{t}_{c}"));
                    if let Some(lo) = lower {
                        def = def.min(lo);
                    }
                    if let Some(hi) = upper {
                        def = def.max(hi);
                    }
                    vars.add(def)
                })
                .collect()
        })
        .collect()
}

fn grid_binaries(vars: &mut good_lp::ProblemVariables, steps: usize, cells: usize, name: &str) -> Vec<Vec<Variable>> {
    (0..steps)
        .map(|t| {
            (0..cells)
                .map(|c| vars.add(variable().binary().name(format!("{name}_{t}_{c}"))))
                .collect()
        })
        .collect()
}

/// Bound on every supply, demand and served value: no step can hold more
/// vehicles than the fleet nor more demand than was ever predicted.
fn big_m(topology: &RebalancingTopology, inputs: &RebalancingInputs) -> f64 {
    let vehicles: f64 = inputs
        .initial_placement
        .iter()
        .chain(inputs.becoming_free.iter().flatten())
        .map(|v| v.max(0.0))
        .sum();
    let demand: f64 = inputs
        .predicted_demand
        .iter()
        .flatten()
        .map(|v| v.max(0.0))
        .sum();
    vehicles + demand + topology.served_cap + 1.0
}

fn build_and_solve(
    topology: &RebalancingTopology,
    inputs: &RebalancingInputs,
    relax: bool,
) -> Result<SolvedFlows, String> {
    let (n, k) = (topology.cells, topology.steps);
    let mut vars = variables!();

    let free = grid_vars(&mut vars, k, n, "free", Some(0.0), None);
    let supply = grid_vars(&mut vars, k, n, "supply", Some(0.0), None);
    let demand = grid_vars(&mut vars, k, n, "demand", Some(0.0), None);
    let over = grid_vars(&mut vars, k, n, "over", Some(0.0), None);
    let under = grid_vars(&mut vars, k, n, "under", Some(0.0), None);
    let served = grid_vars(&mut vars, k, n, "served", Some(0.0), Some(topology.served_cap));
    let unoccupied = grid_vars(&mut vars, k - 1, n, "unoccupied", None, None);
    // Which argument of the min is served; neither means the cap.
    let serves_supply = grid_binaries(&mut vars, k, n, "serves_supply");
    let serves_demand = grid_binaries(&mut vars, k, n, "serves_demand");
    let in_surplus = grid_binaries(&mut vars, k, n, "surplus");
    let m = big_m(topology, inputs);
    let flow: Vec<Vec<Vec<Option<Variable>>>> = (0..k)
        .map(|t| {
            (0..n)
                .map(|o| {
                    (0..n)
                        .map(|d| {
                            topology.is_open_arc(t, o, d).then(|| {
                                vars.add(variable().min(0.0).name(format!("x_{t}_{o}_{d}")))
                            })
                        })
                        .collect()
                })
                .collect()
        })
        .collect();
    let outflow = |t: usize, o: usize| -> Expression {
        flow[t][o]
            .iter()
            .flatten()
            .fold(Expression::from(0.0), |acc, x| acc + *x)
    };

    // Dynamic equalities, each stated as `expr == 0`.
    let mut dynamic: Vec<Expression> = Vec::with_capacity(3 * k * n);
    for t in 0..k {
        for c in 0..n {
            let mut expr = Expression::from(demand[t][c]) - inputs.predicted_demand[c][t];
            if t > 0 {
                expr = expr - under[t - 1][c];
            }
            dynamic.push(expr);
        }
    }
    for t in 0..k - 1 {
        for c in 0..n {
            dynamic.push(Expression::from(unoccupied[t][c]) - inputs.becoming_free[t][c]);
        }
    }
    for c in 0..n {
        dynamic.push(Expression::from(free[0][c]) - inputs.initial_placement[c]);
    }
    for t in 1..k {
        for c in 0..n {
            let mut expr = Expression::from(free[t][c]) - over[t - 1][c] - unoccupied[t - 1][c];
            for o in 0..n {
                if let Some(x) = flow[t - 1][o][c] {
                    expr = expr - x;
                }
                if topology.arrives_during(t, o, c) {
                    expr = expr - topology.target_probability[o][c] * served[t - 1][o];
                }
            }
            dynamic.push(expr);
        }
    }

    let mut slacks: Vec<Variable> = Vec::new();
    if relax {
        for (i, expr) in dynamic.iter_mut().enumerate() {
            let plus = vars.add(variable().min(0.0).name(format!("slack_plus_{i}")));
            let minus = vars.add(variable().min(0.0).name(format!("slack_minus_{i}")));
            *expr = expr.clone() + plus - minus;
            slacks.push(plus);
            slacks.push(minus);
        }
    }

    let mut objective = Expression::from(0.0);
    for t in 0..k {
        let gamma = discount(t);
        for c in 0..n {
            objective -= gamma * topology.lambda * under[t][c];
            for d in 0..n {
                if let Some(x) = flow[t][c][d] {
                    objective -= gamma * topology.alpha * topology.distance[c][d] * x;
                }
            }
        }
    }
    for slack in &slacks {
        objective -= RELAXATION_PENALTY * *slack;
    }

    let mut problem = vars.maximise(objective).using(microlp);
    for t in 0..k {
        for c in 0..n {
            let out = outflow(t, c);
            problem.add_constraint(constraint!(out.clone() <= free[t][c]));
            problem.add_constraint(constraint!(supply[t][c] + out == free[t][c]));
            problem.add_constraint(constraint!(supply[t][c] - demand[t][c] == over[t][c] - under[t][c]));
            problem.add_constraint(constraint!(served[t][c] <= supply[t][c]));
            problem.add_constraint(constraint!(served[t][c] <= demand[t][c]));

            let (zs, zd, w) = (serves_supply[t][c], serves_demand[t][c], in_surplus[t][c]);
            problem.add_constraint(constraint!(zs + zd <= 1.0));
            problem.add_constraint(constraint!(
                served[t][c] >= Expression::from(supply[t][c]) - m + m * zs
            ));
            problem.add_constraint(constraint!(
                served[t][c] >= Expression::from(demand[t][c]) - m + m * zd
            ));
            problem.add_constraint(constraint!(
                served[t][c] >= Expression::from(topology.served_cap) - m * zs - m * zd
            ));
            problem.add_constraint(constraint!(over[t][c] <= m * w));
            problem.add_constraint(constraint!(Expression::from(under[t][c]) + m * w <= m));
        }
    }
    for expr in dynamic {
        problem.add_constraint(constraint!(expr == 0.0));
    }

    let solution = problem.solve().map_err(|e| e.to_string())?;
    let read = |grid: &[Vec<Variable>]| -> Vec<Vec<f64>> {
        grid.iter()
            .map(|row| row.iter().map(|v| solution.value(*v)).collect())
            .collect()
    };
    let flows = flow
        .iter()
        .map(|step| {
            step.iter()
                .map(|row| {
                    row.iter()
                        .map(|x| x.map_or(0.0, |x| solution.value(x)))
                        .collect()
                })
                .collect()
        })
        .collect();
    let total_slack = slacks.iter().map(|s| solution.value(*s)).sum();
    Ok(SolvedFlows {
        flows,
        free: read(&free),
        supply: read(&supply),
        demand: read(&demand),
        over: read(&over),
        under: read(&under),
        served: read(&served),
        relaxed: relax,
        total_slack,
    })
}
