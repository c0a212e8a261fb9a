//! Exact bipartite assignment as a binary program.
//!
//! Cost of a pairing is `distance_weight * distance + wait_weight * (eta - submission)`.
//! The smaller side is matched completely (equality rows), the larger side at
//! most once, so the result has maximum cardinality. Pairings failing the
//! waiting-time gate are never offered to the solver.

use good_lp::{microlp, variable, variables, Expression, Solution, SolverModel, Variable};
use tracing::warn;

use super::algorithm::MatchingAlgorithm;
use super::gate::WaitingTimeGate;
use super::types::{AvailableVehicle, MatchCandidate, OpenRequest};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExactMatching {
    /// Weight per metre of pickup distance.
    pub distance_weight: f64,
    /// Weight per second of expected customer wait.
    pub wait_weight: f64,
}

impl Default for ExactMatching {
    fn default() -> Self {
        Self {
            distance_weight: 1.0,
            wait_weight: 0.0,
        }
    }
}

impl ExactMatching {
    pub fn new(distance_weight: f64, wait_weight: f64) -> Self {
        Self {
            distance_weight,
            wait_weight,
        }
    }

    fn cost(&self, candidate: &MatchCandidate, submission_time: u64) -> f64 {
        self.distance_weight * candidate.distance
            + self.wait_weight * (candidate.eta - submission_time as f64)
    }
}

impl MatchingAlgorithm for ExactMatching {
    fn name(&self) -> &'static str {
        "bipartite_exact"
    }

    fn find_matches(
        &self,
        vehicles: &[AvailableVehicle],
        requests: &[OpenRequest],
        gate: &WaitingTimeGate,
    ) -> Vec<MatchCandidate> {
        // Feasible arcs in input order: requests outer, vehicles inner.
        let mut arcs: Vec<(usize, usize, MatchCandidate)> = Vec::new();
        for (r, request) in requests.iter().enumerate() {
            for (v, vehicle) in vehicles.iter().enumerate() {
                if let Some(candidate) = gate.evaluate(vehicle, request) {
                    arcs.push((r, v, candidate));
                }
            }
        }
        if arcs.is_empty() {
            return Vec::new();
        }

        let requests_smaller = requests.len() <= vehicles.len();
        match self.solve(&arcs, requests, vehicles.len(), Some(requests_smaller)) {
            Ok(matches) => matches,
            Err(err) => {
                // Gated arcs can leave the equality rows unsatisfiable; retry
                // with every row relaxed to "at most once" and a per-match reward.
                warn!(error = %err, "exact matching infeasible; relaxing cardinality rows");
                self.solve(&arcs, requests, vehicles.len(), None)
                    .unwrap_or_else(|err| {
                        warn!(error = %err, "relaxed exact matching failed; no matches this tick");
                        Vec::new()
                    })
            }
        }
    }
}

impl ExactMatching {
    /// `equality_on_requests`: `Some(true)` matches every reachable request,
    /// `Some(false)` every reachable vehicle, `None` relaxes both sides and
    /// rewards each match instead.
    fn solve(
        &self,
        arcs: &[(usize, usize, MatchCandidate)],
        requests: &[OpenRequest],
        vehicle_count: usize,
        equality_on_requests: Option<bool>,
    ) -> Result<Vec<MatchCandidate>, good_lp::ResolutionError> {
        let costs: Vec<f64> = arcs
            .iter()
            .map(|(r, _, c)| self.cost(c, requests[*r].submission_time))
            .collect();
        let reward = match equality_on_requests {
            Some(_) => 0.0,
            None => costs.iter().copied().fold(0.0_f64, f64::max) + 1.0,
        };

        let mut vars = variables!();
        let xs: Vec<Variable> = (0..arcs.len())
            .map(|i| vars.add(variable().binary().name(format!("x_{i}"))))
            .collect();
        let objective = costs
            .iter()
            .zip(&xs)
            .fold(Expression::from(0.0), |acc, (cost, x)| acc + (cost - reward) * *x);
        let mut problem = vars.minimise(objective).using(microlp);

        let row_sum = |keep: &dyn Fn(&(usize, usize, MatchCandidate)) -> bool| {
            arcs.iter()
                .zip(&xs)
                .filter(|(arc, _)| keep(arc))
                .fold((Expression::from(0.0), 0usize), |(acc, n), (_, x)| (acc + *x, n + 1))
        };
        for r in 0..requests.len() {
            let (sum, n) = row_sum(&|arc| arc.0 == r);
            if n == 0 {
                continue;
            }
            problem.add_constraint(if equality_on_requests == Some(true) {
                sum.eq(1.0)
            } else {
                sum.leq(1.0)
            });
        }
        for v in 0..vehicle_count {
            let (sum, n) = row_sum(&|arc| arc.1 == v);
            if n == 0 {
                continue;
            }
            problem.add_constraint(if equality_on_requests == Some(false) {
                sum.eq(1.0)
            } else {
                sum.leq(1.0)
            });
        }

        let solution = problem.solve()?;
        Ok(arcs
            .iter()
            .zip(&xs)
            .filter(|(_, x)| solution.value(**x) >= 0.5)
            .map(|((_, _, candidate), _)| *candidate)
            .collect())
    }
}
