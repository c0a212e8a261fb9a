use tracing::debug;

use super::{DispatchContext, DispatchPolicy};
use crate::error::DispatchResult;
use crate::matching::{build_matcher, match_and_commit, MatchingAlgorithm};
use crate::scenario::DispatchConfig;

/// Global matching over all divertable vehicles and open requests. Never rebalances.
pub struct BipartitePolicy {
    matcher: Box<dyn MatchingAlgorithm>,
}

impl BipartitePolicy {
    pub fn new(config: &DispatchConfig) -> Self {
        Self {
            matcher: build_matcher(config.matching_algorithm, config),
        }
    }

    pub fn matcher_name(&self) -> &'static str {
        self.matcher.name()
    }
}

impl DispatchPolicy for BipartitePolicy {
    fn name(&self) -> &str {
        "bipartite"
    }

    fn dispatch(&mut self, ctx: &mut DispatchContext<'_>) -> DispatchResult<()> {
        let gate = ctx.gate();
        let assigned = match_and_commit(
            self.matcher.as_ref(),
            &gate,
            ctx.fleet,
            ctx.register,
            ctx.oracle,
            ctx.events,
            ctx.now,
        )?;
        if assigned > 0 {
            debug!(t = ctx.now, assigned, "bipartite dispatch");
        }
        Ok(())
    }

    fn rebalance(&mut self, _ctx: &mut DispatchContext<'_>) -> DispatchResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::testing::PolicyHarness;
    use crate::request::{Request, RequestId, RequestStatus};
    use crate::scenario::MatchingAlgorithmType;
    use crate::spatial::Location;
    use crate::vehicle::VehicleId;

    #[test]
    fn one_vehicle_two_requests_assigns_exactly_one() {
        let mut h = PolicyHarness::new(&[(0.0, 0.0)]);
        for id in [1, 2] {
            let request = Request::new(RequestId(id), Location::new(100.0, 0.0), Location::new(500.0, 0.0), 0);
            h.register.submit(&mut h.events, request, 0);
        }
        let mut policy = BipartitePolicy::new(&h.config);
        assert_eq!(policy.matcher_name(), "bipartite_heuristic");
        policy.dispatch(&mut h.ctx(0)).unwrap();
        assert_eq!(h.register.assigned_count(), 1);
        let requested = [RequestId(1), RequestId(2)]
            .iter()
            .filter(|id| h.register.status(**id) == Some(RequestStatus::Requested))
            .count();
        assert_eq!(requested, 1);
    }

    #[test]
    fn exact_matcher_is_selected_from_config() {
        let mut h = PolicyHarness::new(&[(0.0, 0.0), (1000.0, 0.0)]);
        h.config = h
            .config
            .clone()
            .with_matching_algorithm(MatchingAlgorithmType::BipartiteExact);
        let request = Request::new(RequestId(1), Location::new(900.0, 0.0), Location::new(0.0, 0.0), 0);
        h.register.submit(&mut h.events, request, 0);
        let mut policy = BipartitePolicy::new(&h.config);
        policy.dispatch(&mut h.ctx(0)).unwrap();
        assert_eq!(h.register.assigned_vehicle(RequestId(1)), Some(VehicleId(1)));
    }
}
