//! Performance benchmarks for the tick pipeline

use server::config::{GameConfig, WinCondition};
use server::engine::{advance, Rules, StepInput};
use server::food::FoodSpawner;
use server::input_queue::InputQueue;
use server::session::{ConnectionHandle, Session};
use server::snake::Snake;
use shared::{encode_frame, Coord, Direction, PlayerId};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Notify};

/// Benchmarks one engine step with a full lobby of long snakes
#[test]
fn benchmark_engine_step() {
    let mut snakes = BTreeMap::new();
    for owner in 0..8u32 {
        let y = owner as i32 * 3 + 1;
        let mut snake = Snake::new(owner, Coord::new(30, y), Direction::Right, 30);
        for x in (1..30).rev() {
            snake.body.push_back(Coord::new(x, y));
        }
        snakes.insert(owner, snake);
    }
    let food: BTreeSet<Coord> = (0..8).map(|i| Coord::new(35, i * 3)).collect();
    let forfeits = BTreeSet::new();
    let scores: BTreeMap<PlayerId, u32> = snakes.keys().map(|id| (*id, 0)).collect();
    let input = StepInput {
        tick: 0,
        width: 40,
        height: 30,
        snakes: &snakes,
        food: &food,
        forfeits: &forfeits,
        scores: &scores,
        rules: Rules {
            win_condition: WinCondition::LastStanding,
            contenders: 8,
        },
    };

    let iterations = 2_000;
    let mut spawner = FoodSpawner::new(1, 8, 8);
    let start = Instant::now();

    for _ in 0..iterations {
        let outcome = advance(&input, &mut spawner).unwrap();
        assert_eq!(outcome.snakes.len(), 8);
    }

    let duration = start.elapsed();
    println!(
        "Engine step: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // A 150 ms tick budget leaves plenty of room; keep this loose for debug builds
    assert!(duration.as_secs() < 10);
}

/// Benchmarks input submission and draining under a steady stream of turns
#[test]
fn benchmark_input_queue() {
    let queue = InputQueue::new();
    for player in 0..16 {
        queue.register(player, Direction::Right);
    }

    let iterations = 100_000;
    let start = Instant::now();

    for i in 0..iterations {
        let player = (i % 16) as PlayerId;
        let heading = if i % 2 == 0 { Direction::Up } else { Direction::Down };
        queue.submit_current(player, heading);
        if i % 16 == 15 {
            queue.drain_all();
        }
    }

    let duration = start.elapsed();
    println!(
        "Input queue: {} submissions in {:?} ({:.2} ns/submit)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert!(duration.as_secs() < 5);
}

/// Benchmarks full session ticks including diff broadcast to every player
#[test]
fn benchmark_session_tick() {
    let config = GameConfig {
        board_width: 60,
        board_height: 40,
        max_players: 8,
        min_food: 4,
        max_food: 8,
        seed: Some(5),
        ..GameConfig::default()
    };
    let mut session = Session::new(1, "Bench".to_string(), config, 5);
    let mut receivers = Vec::new();
    let mut senders = Vec::new();
    for player in 1..=8 {
        let (tx, rx) = mpsc::channel(4096);
        let handle = ConnectionHandle::new(&tx, Arc::new(Notify::new()));
        session
            .admit(player, &format!("p{}", player), handle)
            .unwrap();
        senders.push(tx);
        receivers.push(rx);
    }
    session.start(1).unwrap();

    let iterations = 10;
    let start = Instant::now();
    for _ in 0..iterations {
        let report = session.tick().unwrap();
        assert!(!report.ended);
    }
    let duration = start.elapsed();
    println!("Session tick: {} ticks in {:?}", iterations, duration);

    let frame = encode_frame(&session.snapshot()).unwrap();
    println!("Snapshot frame: {} bytes", frame.len());

    assert!(duration.as_secs() < 5);
    assert!(receivers.iter().all(|rx| !rx.is_empty()));
}
