//! Fixed-size grid with per-cell occupancy

use shared::{CellDelta, CellState, Coord, PlayerId};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BoardError {
    #[error("cell ({}, {}) lies outside the {width}x{height} board", .at.x, .at.y)]
    OutOfBounds { at: Coord, width: u32, height: u32 },
    #[error("cell ({}, {}) is already occupied by {existing:?}", .at.x, .at.y)]
    Occupied { at: Coord, existing: Cell },
}

/// Occupant of a non-empty cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cell {
    Segment(PlayerId),
    Food,
}

impl From<Cell> for CellState {
    fn from(cell: Cell) -> Self {
        match cell {
            Cell::Segment(owner) => CellState::Snake(owner),
            Cell::Food => CellState::Food,
        }
    }
}

/// Width and height never change after construction. Only in-bounds cells
/// can ever be stored, and each cell holds at most one occupant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board {
    width: u32,
    height: u32,
    cells: BTreeMap<Coord, Cell>,
}

impl Board {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            cells: BTreeMap::new(),
        }
    }

    pub fn contains(&self, at: Coord) -> bool {
        at.x >= 0 && at.y >= 0 && (at.x as u32) < self.width && (at.y as u32) < self.height
    }

    pub fn get(&self, at: Coord) -> Option<Cell> {
        self.cells.get(&at).copied()
    }

    pub fn place(&mut self, at: Coord, cell: Cell) -> Result<(), BoardError> {
        if !self.contains(at) {
            return Err(BoardError::OutOfBounds {
                at,
                width: self.width,
                height: self.height,
            });
        }
        if let Some(existing) = self.cells.get(&at) {
            return Err(BoardError::Occupied {
                at,
                existing: *existing,
            });
        }
        self.cells.insert(at, cell);
        Ok(())
    }

    pub fn occupied(&self) -> usize {
        self.cells.len()
    }

    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Every free cell in row-major order (`y` outer, `x` inner).
    pub fn empty_cells(&self) -> Vec<Coord> {
        let mut free = Vec::with_capacity(self.area().saturating_sub(self.cells.len()));
        for y in 0..self.height as i32 {
            for x in 0..self.width as i32 {
                let at = Coord::new(x, y);
                if !self.cells.contains_key(&at) {
                    free.push(at);
                }
            }
        }
        free
    }

    pub fn iter(&self) -> impl Iterator<Item = (Coord, Cell)> + '_ {
        self.cells.iter().map(|(at, cell)| (*at, *cell))
    }

    /// Cells whose occupant differs between `self` and `next`, ordered by coordinate.
    pub fn diff(&self, next: &Board) -> Vec<CellDelta> {
        let mut deltas = Vec::new();
        for (at, cell) in &self.cells {
            match next.cells.get(at) {
                Some(other) if other == cell => {}
                Some(other) => deltas.push(CellDelta {
                    at: *at,
                    cell: (*other).into(),
                }),
                None => deltas.push(CellDelta {
                    at: *at,
                    cell: CellState::Empty,
                }),
            }
        }
        for (at, cell) in &next.cells {
            if !self.cells.contains_key(at) {
                deltas.push(CellDelta {
                    at: *at,
                    cell: (*cell).into(),
                });
            }
        }
        deltas.sort_by_key(|delta| delta.at);
        deltas
    }
}
