use serde::{Deserialize, Serialize};

/// Integer rebalancing flows `[step][origin][destination]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowPlan {
    steps: usize,
    cells: usize,
    flows: Vec<u32>,
}

impl FlowPlan {
    pub fn zero(steps: usize, cells: usize) -> Self {
        Self {
            steps,
            cells,
            flows: vec![0; steps * cells * cells],
        }
    }

    /// Round continuous flows to the nearest non-negative integer.
    pub fn from_continuous(values: &[Vec<Vec<f64>>]) -> Self {
        let steps = values.len();
        let cells = values.first().map_or(0, Vec::len);
        let mut plan = Self::zero(steps, cells);
        for (t, step) in values.iter().enumerate() {
            for (o, row) in step.iter().enumerate() {
                for (d, value) in row.iter().enumerate() {
                    let idx = plan.index(t, o, d);
                    plan.flows[idx] = value.round().max(0.0) as u32;
                }
            }
        }
        plan
    }

    fn index(&self, step: usize, origin: usize, destination: usize) -> usize {
        (step * self.cells + origin) * self.cells + destination
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn cells(&self) -> usize {
        self.cells
    }

    pub fn get(&self, step: usize, origin: usize, destination: usize) -> u32 {
        self.flows[self.index(step, origin, destination)]
    }

    pub fn set(&mut self, step: usize, origin: usize, destination: usize, value: u32) {
        let idx = self.index(step, origin, destination);
        self.flows[idx] = value;
    }

    /// Non-zero `(origin, destination, count)` moves of one step, origin-major.
    pub fn moves(&self, step: usize) -> Vec<(usize, usize, u32)> {
        let mut out = Vec::new();
        if step >= self.steps {
            return out;
        }
        for o in 0..self.cells {
            for d in 0..self.cells {
                let count = self.get(step, o, d);
                if count > 0 {
                    out.push((o, d, count));
                }
            }
        }
        out
    }

    pub fn step_total(&self, step: usize) -> u64 {
        self.moves(step).iter().map(|(_, _, c)| u64::from(*c)).sum()
    }

    pub fn is_zero(&self) -> bool {
        self.flows.iter().all(|&f| f == 0)
    }
}
