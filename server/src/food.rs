//! Seeded food placement

use crate::board::{Board, Cell};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::Coord;
use std::collections::BTreeSet;

/// Keeps the food count between `min_food` and `max_food`.
///
/// Placement draws from the spawner's own RNG, so two spawners built from
/// the same seed place food identically given identical boards.
#[derive(Debug, Clone)]
pub struct FoodSpawner {
    rng: StdRng,
    min_food: usize,
    max_food: usize,
}

impl FoodSpawner {
    pub fn new(seed: u64, min_food: usize, max_food: usize) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            min_food,
            max_food: max_food.max(min_food),
        }
    }

    /// Tops `food` up to the minimum, placing each new item uniformly among
    /// the cells `board` reports empty. Returns the new coordinates in
    /// placement order.
    ///
    /// `board` must already contain every snake segment and every item in
    /// `food`. Placement stops early when the board is full.
    pub fn replenish(&mut self, board: &mut Board, food: &mut BTreeSet<Coord>) -> Vec<Coord> {
        let wanted = self
            .min_food
            .saturating_sub(food.len())
            .min(self.max_food.saturating_sub(food.len()));
        if wanted == 0 {
            return Vec::new();
        }

        let mut free = board.empty_cells();
        let mut placed = Vec::with_capacity(wanted);
        for _ in 0..wanted {
            if free.is_empty() {
                break;
            }
            let pick = self.rng.gen_range(0..free.len());
            let at = free.swap_remove(pick);
            if board.place(at, Cell::Food).is_ok() {
                food.insert(at);
                placed.push(at);
            }
        }
        placed
    }
}
