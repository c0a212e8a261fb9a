//! Evenly spaced rectangular grid over the service area.
//!
//! Cells are indexed row-major, row 0 at the bottom (`min_y`). Containment is
//! half-open per cell, so every point inside the bounding box belongs to exactly
//! one cell.

mod forecast;
mod tables;

use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, DispatchResult};
use crate::spatial::{BoundingBox, Location};

pub use forecast::DemandForecast;
pub use tables::{target_probabilities, GridTables, PROBABILITY_TOLERANCE};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridCell {
    pub index: usize,
    pub row: usize,
    pub col: usize,
    pub bounds: BoundingBox,
}

impl GridCell {
    pub fn center(&self) -> Location {
        self.bounds.center()
    }

    pub fn contains(&self, location: &Location) -> bool {
        self.bounds.contains(location)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    bounds: BoundingBox,
    rows: usize,
    cols: usize,
    cells: Vec<GridCell>,
}

impl Grid {
    pub fn new(bounds: BoundingBox, rows: usize, cols: usize) -> DispatchResult<Self> {
        if rows == 0 || cols == 0 {
            return Err(DispatchError::Tables(format!(
                "grid needs at least one row and column, got {rows}x{cols}"
            )));
        }
        if !(bounds.width() > 0.0 && bounds.height() > 0.0) {
            return Err(DispatchError::Tables(format!(
                "grid bounds must have positive extent: {bounds:?}"
            )));
        }
        let cell_w = bounds.width() / cols as f64;
        let cell_h = bounds.height() / rows as f64;
        let mut cells = Vec::with_capacity(rows * cols);
        for row in 0..rows {
            for col in 0..cols {
                cells.push(GridCell {
                    index: row * cols + col,
                    row,
                    col,
                    bounds: BoundingBox::new(
                        bounds.min_x + cell_w * col as f64,
                        bounds.min_x + cell_w * (col + 1) as f64,
                        bounds.min_y + cell_h * row as f64,
                        bounds.min_y + cell_h * (row + 1) as f64,
                    ),
                });
            }
        }
        Ok(Self {
            bounds,
            rows,
            cols,
            cells,
        })
    }

    pub fn bounds(&self) -> BoundingBox {
        self.bounds
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cells(&self) -> &[GridCell] {
        &self.cells
    }

    pub fn cell(&self, index: usize) -> Option<&GridCell> {
        self.cells.get(index)
    }

    pub fn index_of(&self, row: usize, col: usize) -> Option<usize> {
        (row < self.rows && col < self.cols).then_some(row * self.cols + col)
    }

    /// Index of the cell containing `location`, if it lies inside the grid.
    pub fn cell_of(&self, location: &Location) -> Option<usize> {
        if !self.bounds.contains(location) {
            return None;
        }
        let col = ((location.x - self.bounds.min_x) / self.bounds.width() * self.cols as f64)
            .floor() as usize;
        let row = ((location.y - self.bounds.min_y) / self.bounds.height() * self.rows as f64)
            .floor() as usize;
        self.index_of(row.min(self.rows - 1), col.min(self.cols - 1))
    }

    pub fn contains(&self, location: &Location) -> bool {
        self.bounds.contains(location)
    }

    /// Up, down, left and right neighbours of a cell, in index order.
    pub fn neighbours(&self, index: usize) -> Vec<usize> {
        let Some(cell) = self.cells.get(index) else {
            return Vec::new();
        };
        let mut out = Vec::with_capacity(4);
        if cell.row > 0 {
            out.push(index - self.cols);
        }
        if cell.col > 0 {
            out.push(index - 1);
        }
        if cell.col + 1 < self.cols {
            out.push(index + 1);
        }
        if cell.row + 1 < self.rows {
            out.push(index + self.cols);
        }
        out
    }

    /// Number of `locations` falling in each cell; points outside are ignored.
    pub fn count_per_cell<'a>(&self, locations: impl IntoIterator<Item = &'a Location>) -> Vec<usize> {
        let mut counts = vec![0; self.len()];
        for location in locations {
            if let Some(idx) = self.cell_of(location) {
                counts[idx] += 1;
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> Grid {
        Grid::new(BoundingBox::new(0.0, 300.0, 0.0, 200.0), 2, 3).unwrap()
    }

    #[test]
    fn cells_are_row_major_from_the_bottom() {
        let grid = grid();
        assert_eq!(grid.len(), 6);
        assert_eq!(grid.cell_of(&Location::new(10.0, 10.0)), Some(0));
        assert_eq!(grid.cell_of(&Location::new(250.0, 10.0)), Some(2));
        assert_eq!(grid.cell_of(&Location::new(150.0, 150.0)), Some(4));
        assert_eq!(grid.cell(4).unwrap().center(), Location::new(150.0, 150.0));
    }

    #[test]
    fn cell_boundaries_are_half_open() {
        let grid = grid();
        assert_eq!(grid.cell_of(&Location::new(100.0, 0.0)), Some(1));
        assert_eq!(grid.cell_of(&Location::new(300.0, 0.0)), None);
        assert_eq!(grid.cell_of(&Location::new(-1.0, 50.0)), None);
    }

    #[test]
    fn neighbours_are_four_connected() {
        let grid = grid();
        assert_eq!(grid.neighbours(0), vec![1, 3]);
        assert_eq!(grid.neighbours(4), vec![1, 3, 5]);
    }

    #[test]
    fn degenerate_grid_is_rejected() {
        assert!(Grid::new(BoundingBox::new(0.0, 10.0, 0.0, 10.0), 0, 3).is_err());
        assert!(Grid::new(BoundingBox::new(0.0, 0.0, 0.0, 10.0), 1, 1).is_err());
    }
}
