//! Collision and scoring rules for one tick
//!
//! [`advance`] is a pure function of its input and the spawner's RNG state.
//! Rules are evaluated in a fixed order so the outcome never depends on map
//! iteration order or on timing:
//!
//! 1. every alive snake proposes `head + heading`
//! 2. proposals outside the board, and forfeited players, die by wall
//! 3. proposals sharing a cell die together
//! 4. proposals landing on a body cell that is still occupied after this
//!    tick's tail movement die; a tail that moves away is free
//! 5. survivors move, eat, and drop their tail unless growing
//! 6. food is topped up to the minimum
//! 7. the win condition is checked
//!
//! Bodies of snakes that die in steps 2 and 3 stay on the board as obstacles
//! for step 4 and are cleared before step 6.

use crate::board::{Board, BoardError, Cell};
use crate::config::WinCondition;
use crate::food::FoodSpawner;
use crate::snake::Snake;
use shared::{Coord, GameEvent, PlayerId};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("board invariant violated: {0}")]
    Board(#[from] BoardError),
    #[error("snake keyed as {key} belongs to player {owner}")]
    OwnerMismatch { key: PlayerId, owner: PlayerId },
    #[error("snake of player {0} has no body")]
    EmptyBody(PlayerId),
    #[error("snake of player {0} has non-adjacent segments")]
    Detached(PlayerId),
    #[error("snake of player {0} is marked dead but still on the board")]
    DeadOnBoard(PlayerId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rules {
    pub win_condition: WinCondition,
    /// Players seated when the session started.
    pub contenders: usize,
}

/// Everything one tick reads. Headings must already be resolved.
#[derive(Debug, Clone, Copy)]
pub struct StepInput<'a> {
    /// Tick being computed; the resulting state is tick `tick + 1`.
    pub tick: u64,
    pub width: u32,
    pub height: u32,
    pub snakes: &'a BTreeMap<PlayerId, Snake>,
    pub food: &'a BTreeSet<Coord>,
    /// Players eliminated at this boundary regardless of their move.
    pub forfeits: &'a BTreeSet<PlayerId>,
    /// Scores before this tick, including eliminated players.
    pub scores: &'a BTreeMap<PlayerId, u32>,
    pub rules: Rules,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub board: Board,
    pub snakes: BTreeMap<PlayerId, Snake>,
    pub food: BTreeSet<Coord>,
    /// Players that died this tick, in event order.
    pub eliminated: Vec<PlayerId>,
    pub events: Vec<GameEvent>,
    pub score_deltas: BTreeMap<PlayerId, u32>,
    /// `Some(winner)` when the session ends with this tick.
    pub session_over: Option<Option<PlayerId>>,
}

/// Builds the occupancy board for a set of snakes and food, checking every
/// structural invariant on the way.
pub fn build_board(
    width: u32,
    height: u32,
    snakes: &BTreeMap<PlayerId, Snake>,
    food: &BTreeSet<Coord>,
) -> Result<Board, EngineError> {
    let mut board = Board::new(width, height);
    for (id, snake) in snakes {
        if snake.owner != *id {
            return Err(EngineError::OwnerMismatch {
                key: *id,
                owner: snake.owner,
            });
        }
        if snake.body.is_empty() {
            return Err(EngineError::EmptyBody(*id));
        }
        if !snake.alive {
            return Err(EngineError::DeadOnBoard(*id));
        }
        if !snake.is_contiguous() {
            return Err(EngineError::Detached(*id));
        }
        for segment in &snake.body {
            board.place(*segment, Cell::Segment(*id))?;
        }
    }
    for at in food {
        board.place(*at, Cell::Food)?;
    }
    Ok(board)
}

pub fn advance(input: &StepInput, spawner: &mut FoodSpawner) -> Result<StepOutcome, EngineError> {
    build_board(input.width, input.height, input.snakes, input.food)?;
    let bounds = Board::new(input.width, input.height);

    let proposed: BTreeMap<PlayerId, Coord> = input
        .snakes
        .iter()
        .map(|(id, snake)| (*id, snake.head().step(snake.heading)))
        .collect();

    let mut events = Vec::new();
    let mut eliminated = Vec::new();
    let mut dead: BTreeSet<PlayerId> = BTreeSet::new();

    // Walls and forfeits
    for (id, head) in &proposed {
        if input.forfeits.contains(id) || !bounds.contains(*head) {
            dead.insert(*id);
            eliminated.push(*id);
            events.push(GameEvent::WallDeath { player: *id });
        }
    }

    // Head to head
    let mut heads: BTreeMap<Coord, Vec<PlayerId>> = BTreeMap::new();
    for (id, head) in &proposed {
        if !dead.contains(id) {
            heads.entry(*head).or_default().push(*id);
        }
    }
    for ids in heads.values().filter(|ids| ids.len() > 1) {
        for (i, a) in ids.iter().enumerate() {
            for b in &ids[i + 1..] {
                events.push(GameEvent::MutualDeath { a: *a, b: *b });
            }
        }
        for id in ids {
            dead.insert(*id);
            eliminated.push(*id);
        }
    }

    // Head to body, against occupancy after tail movement
    let mut obstacles: HashMap<Coord, PlayerId> = HashMap::new();
    for (id, snake) in input.snakes {
        let vacates_tail = !dead.contains(id)
            && !snake.is_growing()
            && !input.food.contains(&proposed[id]);
        let keep = if vacates_tail {
            snake.body.len() - 1
        } else {
            snake.body.len()
        };
        for segment in snake.body.iter().take(keep) {
            obstacles.insert(*segment, *id);
        }
    }
    let mut body_deaths = Vec::new();
    for (id, head) in &proposed {
        if dead.contains(id) {
            continue;
        }
        if let Some(owner) = obstacles.get(head) {
            body_deaths.push(*id);
            events.push(GameEvent::BodyDeath {
                player: *id,
                owner: *owner,
            });
        }
    }
    for id in body_deaths {
        dead.insert(id);
        eliminated.push(id);
    }

    // Survivors move and eat
    let mut food = input.food.clone();
    let mut snakes = BTreeMap::new();
    let mut score_deltas = BTreeMap::new();
    for (id, snake) in input.snakes {
        if dead.contains(id) {
            continue;
        }
        let head = proposed[id];
        let mut next = snake.clone();
        next.body.push_front(head);
        if food.remove(&head) {
            next.length_target += 1;
            *score_deltas.entry(*id).or_insert(0) += 1;
            events.push(GameEvent::FoodEaten {
                player: *id,
                at: head,
            });
        }
        if next.body.len() > next.length_target {
            next.body.pop_back();
        }
        snakes.insert(*id, next);
    }

    let mut board = build_board(input.width, input.height, &snakes, &food)?;
    spawner.replenish(&mut board, &mut food);

    let session_over = check_win(input, &snakes, &score_deltas);
    if let Some(winner) = session_over {
        events.push(GameEvent::SessionOver { winner });
    }

    Ok(StepOutcome {
        board,
        snakes,
        food,
        eliminated,
        events,
        score_deltas,
        session_over,
    })
}

fn check_win(
    input: &StepInput,
    survivors: &BTreeMap<PlayerId, Snake>,
    score_deltas: &BTreeMap<PlayerId, u32>,
) -> Option<Option<PlayerId>> {
    match input.rules.win_condition {
        WinCondition::LastStanding => {
            let threshold = if input.rules.contenders > 1 { 1 } else { 0 };
            if survivors.len() > threshold {
                return None;
            }
            Some(survivors.keys().next().copied())
        }
        WinCondition::TimeLimit { ticks } => {
            if input.tick + 1 < ticks && !survivors.is_empty() {
                return None;
            }
            let mut totals: Vec<(PlayerId, u32)> = input
                .scores
                .iter()
                .map(|(id, score)| (*id, score + score_deltas.get(id).copied().unwrap_or(0)))
                .collect();
            totals.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
            match totals.as_slice() {
                [] => Some(None),
                [(only, _)] => Some(Some(*only)),
                [(first, top), (_, second), ..] if top > second => Some(Some(*first)),
                _ => Some(None),
            }
        }
    }
}
