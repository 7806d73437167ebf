//! Per-player snake entity

use shared::{Coord, Direction, PlayerId, SnakeView};
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snake {
    pub owner: PlayerId,
    /// Head first. Consecutive segments are orthogonally adjacent.
    pub body: VecDeque<Coord>,
    pub heading: Direction,
    /// Last input drained for this snake, not yet applied.
    pub pending: Option<Direction>,
    pub alive: bool,
    /// Length the body grows toward, one segment per tick.
    pub length_target: usize,
}

impl Snake {
    /// A single-cell snake that grows out to `length_target`.
    pub fn new(owner: PlayerId, head: Coord, heading: Direction, length_target: usize) -> Self {
        let mut body = VecDeque::with_capacity(length_target.max(1));
        body.push_back(head);
        Self {
            owner,
            body,
            heading,
            pending: None,
            alive: true,
            length_target: length_target.max(1),
        }
    }

    pub fn head(&self) -> Coord {
        self.body[0]
    }

    pub fn tail(&self) -> Coord {
        self.body[self.body.len() - 1]
    }

    pub fn length(&self) -> usize {
        self.body.len()
    }

    pub fn is_growing(&self) -> bool {
        self.body.len() < self.length_target
    }

    /// Consumes the pending input and returns the heading for the next move.
    ///
    /// A pending heading that reverses the current one is discarded.
    pub fn resolve_heading(&mut self) -> Direction {
        if let Some(next) = self.pending.take() {
            if next != self.heading.opposite() {
                self.heading = next;
            }
        }
        self.heading
    }

    pub fn is_contiguous(&self) -> bool {
        self.body
            .iter()
            .zip(self.body.iter().skip(1))
            .all(|(a, b)| a.is_adjacent(*b))
    }

    pub fn view(&self) -> SnakeView {
        SnakeView {
            player: self.owner,
            body: self.body.iter().copied().collect(),
            heading: self.heading,
            alive: self.alive,
        }
    }
}
