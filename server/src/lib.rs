//! # Snake Arena Server Library
//!
//! Authoritative server for multiplayer Snake. The server owns the true state
//! of every match, accepts directional input from clients, advances each
//! match on a fixed tick, resolves collisions and scoring, and broadcasts the
//! result so every client in a match sees the same board.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! Clients only send headings. Movement, growth, food, deaths and the end of
//! a match are decided here, tick by tick, in a fixed rule order so that the
//! same headings and the same food seed always give the same outcome.
//!
//! ### Session Management
//! Players create a session and share its four-character invite code; others
//! join with it while the session is waiting. The creator starts the match,
//! and a running match ends when its win condition is met or every player
//! has left.
//!
//! ### State Broadcasting
//! After every tick each player receives a diff of changed cells, the tick's
//! events and changed scores. A full snapshot goes out on start and at a
//! configurable interval so clients can correct drift.
//!
//! ## Architecture Design
//!
//! ### Per-Session Ticking
//! One scheduler drives all running sessions. Each session ticks as its own
//! task; ticks of one session never overlap, different sessions run in
//! parallel, and a failing session is ended on its own.
//!
//! ### TCP With Length-Prefixed Frames
//! Packets are `bincode`-encoded and prefixed with a big-endian `u32` length.
//! Malformed frames are dropped and the connection stays open.
//!
//! ### Input Mailbox
//! Input arrives at any time and lands in the session's input queue, which
//! keeps the latest valid heading per player until the next tick drains it.
//!
//! ## Module Organization
//!
//! - `board`, `snake`, `food`: grid occupancy, snake bodies, seeded food placement
//! - `engine`: the pure per-tick collision and scoring rules
//! - `input_queue`: the per-session input mailbox
//! - `session`: the match state machine and its broadcasts
//! - `registry`: live sessions and invite codes
//! - `scheduler`: the fixed-rate driver and lifecycle notifications
//! - `network`: TCP connections, framing and lobby commands
//! - `config`: game settings from defaults, TOML and the command line
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::GameConfig;
//! use server::network::Server;
//! use server::scheduler::LogObserver;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = GameConfig::default();
//!     config.validate()?;
//!
//!     // Accepts connections and ticks every running session until stopped
//!     let server = Server::bind("127.0.0.1:8080", config, Arc::new(LogObserver)).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod board;
pub mod config;
pub mod engine;
pub mod food;
pub mod input_queue;
pub mod network;
pub mod registry;
pub mod scheduler;
pub mod session;
pub mod snake;
