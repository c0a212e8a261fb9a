use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, DispatchResult};

/// Demand predictions indexed by issue time: `time -> cell -> [steps]`.
///
/// A lookup returns the latest entry issued at or before the requested time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DemandForecast {
    cells: usize,
    steps: usize,
    entries: BTreeMap<u64, Vec<Vec<f64>>>,
}

impl DemandForecast {
    pub fn new(cells: usize, steps: usize) -> Self {
        Self {
            cells,
            steps,
            entries: BTreeMap::new(),
        }
    }

    /// Same prediction for every cell, step and issue time in `times`.
    pub fn uniform(cells: usize, steps: usize, times: impl IntoIterator<Item = u64>, value: f64) -> DispatchResult<Self> {
        let mut forecast = Self::new(cells, steps);
        for time in times {
            forecast.insert(time, vec![vec![value; steps]; cells])?;
        }
        Ok(forecast)
    }

    pub fn insert(&mut self, time: u64, predictions: Vec<Vec<f64>>) -> DispatchResult<()> {
        if predictions.len() != self.cells || predictions.iter().any(|p| p.len() != self.steps) {
            return Err(DispatchError::Forecast(format!(
                "entry at {time} must be {} cells x {} steps",
                self.cells, self.steps
            )));
        }
        if predictions.iter().flatten().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(DispatchError::Forecast(format!(
                "entry at {time} holds negative or non-finite demand"
            )));
        }
        self.entries.insert(time, predictions);
        Ok(())
    }

    pub fn cells(&self) -> usize {
        self.cells
    }

    /// Prediction windows per entry.
    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn floor_entry(&self, time: u64) -> DispatchResult<&Vec<Vec<f64>>> {
        self.entries
            .range(..=time)
            .next_back()
            .map(|(_, entry)| entry)
            .ok_or_else(|| DispatchError::Forecast(format!("no prediction issued at or before t={time}")))
    }

    /// All step predictions for one cell.
    pub fn for_cell(&self, time: u64, cell: usize) -> DispatchResult<&[f64]> {
        self.floor_entry(time)?
            .get(cell)
            .map(Vec::as_slice)
            .ok_or_else(|| DispatchError::Forecast(format!("cell {cell} outside forecast")))
    }

    /// `[cell][step]` predictions in effect at `time`.
    pub fn all_cells(&self, time: u64) -> DispatchResult<&[Vec<f64>]> {
        self.floor_entry(time).map(Vec::as_slice)
    }

    /// First-step demand of every cell.
    pub fn current_demand(&self, time: u64) -> DispatchResult<Vec<f64>> {
        Ok(self
            .floor_entry(time)?
            .iter()
            .map(|steps| steps.first().copied().unwrap_or(0.0))
            .collect())
    }

    /// Cell with the largest first-step demand; the lowest index wins ties.
    pub fn cell_with_highest_demand(&self, time: u64) -> DispatchResult<usize> {
        let demand = self.current_demand(time)?;
        let mut best: Option<(usize, f64)> = None;
        for (cell, value) in demand.into_iter().enumerate() {
            if best.map_or(true, |(_, b)| value > b) {
                best = Some((cell, value));
            }
        }
        best.map(|(cell, _)| cell)
            .ok_or_else(|| DispatchError::Forecast("forecast has no cells".into()))
    }
}
