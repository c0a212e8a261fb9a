//! Pre-computed cell-to-cell tables: distances, free-speed travel times and
//! destination probabilities.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::Grid;
use crate::error::{DispatchError, DispatchResult};
use crate::routing::RoutingOracle;
use crate::spatial::Location;

/// Allowed deviation of a probability row sum from 1.
pub const PROBABILITY_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridTables {
    distance: Vec<Vec<f64>>,
    travel_time: Vec<Vec<f64>>,
    target_probability: Vec<Vec<f64>>,
}

impl GridTables {
    /// Route between every pair of cell centres. Rows are computed in parallel;
    /// the oracle is only read.
    pub fn compute(grid: &Grid, oracle: &dyn RoutingOracle) -> Self {
        let centres: Vec<Location> = grid.cells().iter().map(|c| c.center()).collect();
        let rows: Vec<(Vec<f64>, Vec<f64>)> = centres
            .par_iter()
            .map(|from| {
                centres
                    .iter()
                    .map(|to| {
                        if from.is_same_place(to) {
                            (0.0, 0.0)
                        } else {
                            let path = oracle.compute_path_now(*from, *to, 0.0);
                            (path.distance_m, path.travel_time())
                        }
                    })
                    .unzip()
            })
            .collect();
        let (distance, travel_time): (Vec<Vec<f64>>, Vec<Vec<f64>>) = rows.into_iter().unzip();
        let n = centres.len();
        Self {
            distance,
            travel_time,
            target_probability: vec![vec![0.0; n]; n],
        }
    }

    /// Tables supplied by the host. All matrices must be square and of equal size.
    pub fn from_matrices(
        distance: Vec<Vec<f64>>,
        travel_time: Vec<Vec<f64>>,
        target_probability: Vec<Vec<f64>>,
    ) -> DispatchResult<Self> {
        let n = distance.len();
        for (name, matrix) in [
            ("distance", &distance),
            ("travel time", &travel_time),
            ("target probability", &target_probability),
        ] {
            check_square(name, matrix, n)?;
        }
        validate_probabilities(&target_probability)?;
        Ok(Self {
            distance,
            travel_time,
            target_probability,
        })
    }

    pub fn with_target_probabilities(mut self, probabilities: Vec<Vec<f64>>) -> DispatchResult<Self> {
        check_square("target probability", &probabilities, self.len())?;
        validate_probabilities(&probabilities)?;
        self.target_probability = probabilities;
        Ok(self)
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.distance.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distance.is_empty()
    }

    pub fn distance(&self, from: usize, to: usize) -> f64 {
        self.distance[from][to]
    }

    pub fn travel_time(&self, from: usize, to: usize) -> f64 {
        self.travel_time[from][to]
    }

    pub fn target_probability(&self, from: usize, to: usize) -> f64 {
        self.target_probability[from][to]
    }

    pub fn distances(&self) -> &[Vec<f64>] {
        &self.distance
    }

    pub fn travel_times(&self) -> &[Vec<f64>] {
        &self.travel_time
    }

    pub fn target_probabilities(&self) -> &[Vec<f64>] {
        &self.target_probability
    }
}

fn check_square(name: &str, matrix: &[Vec<f64>], n: usize) -> DispatchResult<()> {
    if matrix.len() != n || matrix.iter().any(|row| row.len() != n) {
        return Err(DispatchError::Tables(format!(
            "{name} matrix is not {n}x{n}"
        )));
    }
    if matrix.iter().flatten().any(|v| !v.is_finite() || *v < 0.0) {
        return Err(DispatchError::Tables(format!(
            "{name} matrix holds negative or non-finite entries"
        )));
    }
    Ok(())
}

fn validate_probabilities(matrix: &[Vec<f64>]) -> DispatchResult<()> {
    for (from, row) in matrix.iter().enumerate() {
        let sum: f64 = row.iter().sum();
        if sum != 0.0 && (1.0 - sum).abs() > PROBABILITY_TOLERANCE {
            return Err(DispatchError::Tables(format!(
                "destination probabilities of cell {from} sum to {sum:.4}"
            )));
        }
    }
    Ok(())
}

/// Estimate `P[from][to]` from observed `(origin, destination)` trips.
///
/// Trips starting outside the grid are ignored. A cell without departures keeps
/// an all-zero row. Trips leaving the grid still count toward their origin's
/// total, so a row losing more than 1% of its mass that way is rejected.
pub fn target_probabilities(grid: &Grid, trips: &[(Location, Location)]) -> DispatchResult<Vec<Vec<f64>>> {
    let n = grid.len();
    let mut counts = vec![vec![0usize; n]; n];
    let mut departures = vec![0usize; n];
    for (origin, destination) in trips {
        let Some(from) = grid.cell_of(origin) else {
            continue;
        };
        departures[from] += 1;
        if let Some(to) = grid.cell_of(destination) {
            counts[from][to] += 1;
        }
    }
    let probabilities: Vec<Vec<f64>> = counts
        .iter()
        .zip(&departures)
        .map(|(row, &total)| {
            if total == 0 {
                vec![0.0; n]
            } else {
                row.iter().map(|&c| c as f64 / total as f64).collect()
            }
        })
        .collect();
    validate_probabilities(&probabilities)?;
    Ok(probabilities)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::{StraightLineCalculator, SyncOracle};
    use crate::spatial::BoundingBox;

    fn grid() -> Grid {
        Grid::new(BoundingBox::new(0.0, 200.0, 0.0, 100.0), 1, 2).unwrap()
    }

    #[test]
    fn tables_from_cell_centres() {
        let oracle = SyncOracle(StraightLineCalculator::new(10.0));
        let tables = GridTables::compute(&grid(), &oracle);
        assert_eq!(tables.len(), 2);
        assert_eq!(tables.distance(0, 1), 100.0);
        assert_eq!(tables.travel_time(1, 0), 10.0);
        assert_eq!(tables.distance(1, 1), 0.0);
    }

    #[test]
    fn probabilities_are_normalised_per_origin() {
        let a = Location::new(50.0, 50.0);
        let b = Location::new(150.0, 50.0);
        let trips = [(a, b), (a, b), (a, a), (a, b)];
        let p = target_probabilities(&grid(), &trips).unwrap();
        assert_eq!(p[0], vec![0.25, 0.75]);
        assert_eq!(p[1], vec![0.0, 0.0]);
    }

    #[test]
    fn trips_leaving_the_grid_break_normalisation() {
        let a = Location::new(50.0, 50.0);
        let outside = Location::new(500.0, 50.0);
        let trips = [(a, a), (a, outside)];
        assert!(matches!(
            target_probabilities(&grid(), &trips),
            Err(DispatchError::Tables(_))
        ));
    }

    #[test]
    fn supplied_rows_must_sum_to_one() {
        let zeros = vec![vec![0.0; 2]; 2];
        let bad = vec![vec![0.5, 0.4], vec![0.0, 0.0]];
        assert!(GridTables::from_matrices(zeros.clone(), zeros.clone(), bad).is_err());
        let ok = vec![vec![0.5, 0.495], vec![0.0, 0.0]];
        assert!(GridTables::from_matrices(zeros.clone(), zeros, ok).is_ok());
    }
}
