//! Match state machine and per-tick pipeline
//!
//! A [`Session`] owns everything belonging to one match: its players, their
//! snakes, the food set, the occupancy board, the food spawner and the input
//! queue shared with the players' connection tasks. Sessions move through
//! three states:
//!
//! - `Waiting`: players are admitted, nothing is simulated
//! - `Running`: [`Session::tick`] advances the match one step per call
//! - `Ended`: state is frozen after the final broadcast
//!
//! Sessions never touch sockets. Outbound packets go through each player's
//! [`ConnectionHandle`], which only queues, so a slow client can never stall
//! a tick.

use crate::board::Board;
use crate::config::GameConfig;
use crate::engine::{self, EngineError, Rules, StepInput, StepOutcome};
use crate::food::FoodSpawner;
use crate::input_queue::InputQueue;
use crate::snake::Snake;
use log::{debug, info, warn};
use shared::{
    Coord, Direction, GameEvent, Packet, PlayerId, PlayerInfo, Score, SessionId, Standing,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Waiting,
    Running,
    Ended,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session is {0:?} and not accepting players")]
    NotWaiting(SessionState),
    #[error("session is full ({0} players)")]
    Full(usize),
    #[error("name {0:?} is already taken in this session")]
    NameTaken(String),
    #[error("player name must not be empty")]
    EmptyName,
    #[error("player {0} already joined this session")]
    AlreadyJoined(PlayerId),
    #[error("player {0} does not own this session")]
    NotOwner(PlayerId),
    #[error("session is {0:?}, not running")]
    NotRunning(SessionState),
    #[error("tick {tick} failed: {source}")]
    Fault {
        tick: u64,
        #[source]
        source: EngineError,
    },
}

/// Result of queueing one packet on a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// The queue was full; the connection has been told to close.
    Kicked,
    Closed,
}

/// Session-side reference to a connection's outbound queue
///
/// The gateway owns the strong sender. Sessions hold only a weak one, so a
/// connection that has gone away is never kept alive by the match it was in.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    outbound: mpsc::WeakSender<Arc<Packet>>,
    kick: Arc<Notify>,
}

impl ConnectionHandle {
    pub fn new(outbound: &mpsc::Sender<Arc<Packet>>, kick: Arc<Notify>) -> Self {
        Self {
            outbound: outbound.downgrade(),
            kick,
        }
    }

    /// Queues a packet without waiting
    ///
    /// A client whose bounded queue is full cannot keep up with the tick
    /// rate and is kicked instead of being waited on.
    pub fn deliver(&self, packet: Arc<Packet>) -> Delivery {
        let Some(sender) = self.outbound.upgrade() else {
            return Delivery::Closed;
        };
        match sender.try_send(packet) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => {
                self.kick.notify_one();
                Delivery::Kicked
            }
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

/// A participant in one session
#[derive(Debug, Clone)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub score: u32,
    /// Snake length at the last tick it was alive.
    pub length: usize,
    /// Tick at which the snake was removed, if it has been.
    pub eliminated_at: Option<u64>,
    /// `None` once the player has disconnected.
    pub connection: Option<ConnectionHandle>,
}

/// What happened when a player left
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Departure {
    /// Removed from a waiting lobby that still has players.
    Left,
    /// The snake dies at the next tick boundary.
    Forfeited,
    /// The last player left a waiting lobby; the session should be dropped.
    Emptied,
    Unknown,
}

/// Summary of one completed tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Tick number of the state just produced.
    pub tick: u64,
    pub events: Vec<GameEvent>,
    pub ended: bool,
}

pub struct Session {
    id: SessionId,
    code: String,
    config: GameConfig,
    state: SessionState,
    tick: u64,
    owner: Option<PlayerId>,
    players: BTreeMap<PlayerId, Player>,
    /// Alive snakes only.
    snakes: BTreeMap<PlayerId, Snake>,
    food: BTreeSet<Coord>,
    board: Board,
    spawner: FoodSpawner,
    inputs: Arc<InputQueue>,
    /// Players whose snakes die at the next tick boundary.
    forfeits: BTreeSet<PlayerId>,
    contenders: usize,
    winner: Option<PlayerId>,
    #[cfg(test)]
    panic_on_tick: bool,
}

impl Session {
    /// Creates an empty waiting session
    ///
    /// `seed` drives food placement for the whole match; two sessions with
    /// the same seed, players and inputs play out identically.
    pub fn new(id: SessionId, code: String, config: GameConfig, seed: u64) -> Self {
        let board = Board::new(config.board_width, config.board_height);
        let spawner = FoodSpawner::new(seed, config.min_food, config.max_food);
        Self {
            id,
            code,
            config,
            state: SessionState::Waiting,
            tick: 0,
            owner: None,
            players: BTreeMap::new(),
            snakes: BTreeMap::new(),
            food: BTreeSet::new(),
            board,
            spawner,
            inputs: Arc::new(InputQueue::new()),
            forfeits: BTreeSet::new(),
            contenders: 0,
            winner: None,
            #[cfg(test)]
            panic_on_tick: false,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn owner(&self) -> Option<PlayerId> {
        self.owner
    }

    pub fn winner(&self) -> Option<PlayerId> {
        self.winner
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// The player's current snake; `None` once it has been eliminated.
    pub fn snake(&self, id: PlayerId) -> Option<&Snake> {
        self.snakes.get(&id)
    }

    pub fn food(&self) -> &BTreeSet<Coord> {
        &self.food
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    /// Input mailbox shared with this session's connection tasks.
    pub fn inputs(&self) -> Arc<InputQueue> {
        Arc::clone(&self.inputs)
    }

    /// Adds a player to a waiting session
    ///
    /// The first admitted player becomes the owner. The newcomer receives a
    /// `Joined` packet listing everyone; existing players get `PlayerJoined`.
    pub fn admit(
        &mut self,
        player: PlayerId,
        name: &str,
        connection: ConnectionHandle,
    ) -> Result<(), SessionError> {
        if self.state != SessionState::Waiting {
            return Err(SessionError::NotWaiting(self.state));
        }
        if self.players.contains_key(&player) {
            return Err(SessionError::AlreadyJoined(player));
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(SessionError::EmptyName);
        }
        if self.players.len() >= self.config.max_players {
            return Err(SessionError::Full(self.config.max_players));
        }
        if self.players.values().any(|p| p.name == name) {
            return Err(SessionError::NameTaken(name.to_string()));
        }

        let owner = *self.owner.get_or_insert(player);
        self.broadcast(Packet::PlayerJoined {
            player: PlayerInfo {
                id: player,
                name: name.to_string(),
            },
        });
        self.players.insert(
            player,
            Player {
                id: player,
                name: name.to_string(),
                score: 0,
                length: 0,
                eliminated_at: None,
                connection: Some(connection),
            },
        );
        self.send_to(
            player,
            Packet::Joined {
                session: self.id,
                code: self.code.clone(),
                player_id: player,
                owner,
                players: self.player_infos(),
            },
        );

        info!("[{}] Player {} joined as {:?}", self.code, player, name);
        Ok(())
    }

    /// Moves a waiting session to running on the owner's request
    ///
    /// Snakes are seated on evenly spaced rows, alternating between the left
    /// quarter heading right and the right quarter heading left, and the
    /// initial food is placed before the first snapshot goes out.
    pub fn start(&mut self, requester: PlayerId) -> Result<(), SessionError> {
        if self.state != SessionState::Waiting {
            return Err(SessionError::NotWaiting(self.state));
        }
        if self.owner != Some(requester) {
            return Err(SessionError::NotOwner(requester));
        }

        self.seat_snakes()?;
        self.state = SessionState::Running;
        self.contenders = self.players.len();

        info!(
            "[{}] Session started with {} players",
            self.code, self.contenders
        );
        self.broadcast(Packet::SessionStarted { session: self.id });
        self.broadcast(self.snapshot());
        Ok(())
    }

    fn seat_snakes(&mut self) -> Result<(), SessionError> {
        let seats = self.players.len() as i64;
        let width = i64::from(self.config.board_width);
        let height = i64::from(self.config.board_height);

        for (slot, id) in self.players.keys().enumerate() {
            let slot = slot as i64;
            let y = (2 * slot + 1) * height / (2 * seats);
            let (x, heading) = if slot % 2 == 0 {
                (width / 4, Direction::Right)
            } else {
                (3 * width / 4, Direction::Left)
            };
            let head = Coord::new(x as i32, y as i32);
            self.snakes.insert(
                *id,
                Snake::new(*id, head, heading, self.config.initial_length),
            );
            self.inputs.register(*id, heading);
        }
        for player in self.players.values_mut() {
            player.length = 1;
        }

        self.board = engine::build_board(
            self.config.board_width,
            self.config.board_height,
            &self.snakes,
            &self.food,
        )
        .map_err(|source| SessionError::Fault {
            tick: self.tick,
            source,
        })?;
        self.spawner.replenish(&mut self.board, &mut self.food);
        Ok(())
    }

    /// Handles a player leaving, whether by request or by transport closure
    ///
    /// In a waiting lobby the player is removed and ownership passes to the
    /// earliest remaining player. In a running match the player stays listed
    /// for the final standings and their snake dies at the next tick boundary
    /// as a wall death.
    pub fn disconnect(&mut self, player: PlayerId) -> Departure {
        match self.state {
            SessionState::Waiting => {
                if self.players.remove(&player).is_none() {
                    return Departure::Unknown;
                }
                if self.owner == Some(player) {
                    self.owner = self.players.keys().next().copied();
                }
                info!("[{}] Player {} left the lobby", self.code, player);
                if self.players.is_empty() {
                    return Departure::Emptied;
                }
                self.broadcast(Packet::PlayerLeft {
                    player,
                    owner: self.owner,
                });
                Departure::Left
            }
            SessionState::Running => {
                let Some(entry) = self.players.get_mut(&player) else {
                    return Departure::Unknown;
                };
                entry.connection = None;
                self.inputs.remove(player);
                if self.snakes.contains_key(&player) {
                    self.forfeits.insert(player);
                }
                info!(
                    "[{}] Player {} disconnected at tick {}",
                    self.code, player, self.tick
                );
                self.broadcast(Packet::PlayerLeft {
                    player,
                    owner: self.owner,
                });
                Departure::Forfeited
            }
            SessionState::Ended => match self.players.get_mut(&player) {
                Some(entry) => {
                    entry.connection = None;
                    Departure::Left
                }
                None => Departure::Unknown,
            },
        }
    }

    /// Advances a running session by one tick
    ///
    /// Drains the input queue, resolves every snake's heading, runs the
    /// engine, commits its outcome and broadcasts a diff (plus a full
    /// snapshot every `snapshot_interval` ticks). On an engine error the
    /// input has been drained, headings resolved and pending forfeits taken,
    /// but the board, snakes, food, scores and tick count are unchanged; the
    /// caller is expected to force-end the session.
    pub fn tick(&mut self) -> Result<TickReport, SessionError> {
        if self.state != SessionState::Running {
            return Err(SessionError::NotRunning(self.state));
        }
        #[cfg(test)]
        if self.panic_on_tick {
            panic!("session {} tick {} poisoned", self.id, self.tick);
        }
        let tick = self.tick;

        for record in self.inputs.drain_all() {
            if let Some(snake) = self.snakes.get_mut(&record.player) {
                snake.pending = Some(record.heading);
            }
        }
        for snake in self.snakes.values_mut() {
            snake.resolve_heading();
        }

        let forfeits = std::mem::take(&mut self.forfeits);
        let scores: BTreeMap<PlayerId, u32> = self
            .players
            .iter()
            .map(|(id, player)| (*id, player.score))
            .collect();
        let input = StepInput {
            tick,
            width: self.config.board_width,
            height: self.config.board_height,
            snakes: &self.snakes,
            food: &self.food,
            forfeits: &forfeits,
            scores: &scores,
            rules: Rules {
                win_condition: self.config.win_condition,
                contenders: self.contenders,
            },
        };
        let StepOutcome {
            board,
            snakes,
            food,
            eliminated,
            events,
            score_deltas,
            session_over,
        } = engine::advance(&input, &mut self.spawner)
            .map_err(|source| SessionError::Fault { tick, source })?;

        let cells = self.board.diff(&board);
        self.tick += 1;

        let mut changed = Vec::with_capacity(score_deltas.len());
        for (id, delta) in &score_deltas {
            if let Some(player) = self.players.get_mut(id) {
                player.score += delta;
                changed.push(Score {
                    player: *id,
                    score: player.score,
                });
            }
        }
        for id in &eliminated {
            if let Some(player) = self.players.get_mut(id) {
                player.eliminated_at = Some(self.tick);
            }
            self.inputs.remove(*id);
        }
        for (id, snake) in &snakes {
            if let Some(player) = self.players.get_mut(id) {
                player.length = snake.length();
            }
        }
        self.snakes = snakes;
        self.food = food;
        self.board = board;

        self.broadcast(Packet::Diff {
            tick: self.tick,
            cells,
            events: events.clone(),
            scores: changed,
        });
        if self.tick % self.config.snapshot_interval.max(1) == 0 {
            self.broadcast(self.snapshot());
        }

        let abandoned = self.players.values().all(|p| p.connection.is_none());
        let ended = match session_over {
            Some(winner) => {
                self.finish(winner);
                true
            }
            None if abandoned => {
                self.finish(None);
                true
            }
            None => false,
        };

        debug!(
            "[{}] Tick {}: {} snakes, {} food, {} events",
            self.code,
            self.tick,
            self.snakes.len(),
            self.food.len(),
            events.len()
        );
        Ok(TickReport {
            tick: self.tick,
            events,
            ended,
        })
    }

    fn finish(&mut self, winner: Option<PlayerId>) {
        self.state = SessionState::Ended;
        self.winner = winner;
        self.forfeits.clear();
        info!(
            "[{}] Session ended at tick {}, winner {:?}",
            self.code, self.tick, winner
        );
        self.broadcast(Packet::SessionEnded {
            winner,
            standings: self.standings(),
        });
    }

    /// Ends the session after a fault, telling every player why.
    pub fn force_end(&mut self, reason: &str) {
        if self.state == SessionState::Ended {
            return;
        }
        self.state = SessionState::Ended;
        self.winner = None;
        self.forfeits.clear();
        warn!(
            "[{}] Session aborted at tick {}: {}",
            self.code, self.tick, reason
        );
        self.broadcast(Packet::SessionAborted {
            tick: self.tick,
            reason: reason.to_string(),
        });
    }

    /// Full state of the match at the current tick.
    pub fn snapshot(&self) -> Packet {
        Packet::Snapshot {
            tick: self.tick,
            width: self.config.board_width,
            height: self.config.board_height,
            snakes: self.snakes.values().map(Snake::view).collect(),
            food: self.food.iter().copied().collect(),
            scores: self.scores(),
        }
    }

    pub fn scores(&self) -> Vec<Score> {
        self.players
            .values()
            .map(|player| Score {
                player: player.id,
                score: player.score,
            })
            .collect()
    }

    /// Players ranked survivors first, then by how late they were
    /// eliminated, then by score.
    pub fn standings(&self) -> Vec<Standing> {
        let survival = |player: &Player| player.eliminated_at.unwrap_or(u64::MAX);
        let mut ranked: Vec<&Player> = self.players.values().collect();
        ranked.sort_by(|a, b| {
            survival(b)
                .cmp(&survival(a))
                .then(b.score.cmp(&a.score))
                .then(a.id.cmp(&b.id))
        });
        ranked
            .into_iter()
            .map(|player| Standing {
                player: player.id,
                name: player.name.clone(),
                score: player.score,
                length: player.length,
                eliminated_at: player.eliminated_at,
            })
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn snakes_mut(&mut self) -> &mut BTreeMap<PlayerId, Snake> {
        &mut self.snakes
    }

    #[cfg(test)]
    pub(crate) fn panic_on_next_tick(&mut self) {
        self.panic_on_tick = true;
    }

    fn player_infos(&self) -> Vec<PlayerInfo> {
        self.players
            .values()
            .map(|player| PlayerInfo {
                id: player.id,
                name: player.name.clone(),
            })
            .collect()
    }

    fn send_to(&self, player: PlayerId, packet: Packet) {
        if let Some(connection) = self.players.get(&player).and_then(|p| p.connection.as_ref()) {
            if connection.deliver(Arc::new(packet)) == Delivery::Kicked {
                warn!("[{}] Player {} cannot keep up, dropping", self.code, player);
            }
        }
    }

    fn broadcast(&self, packet: Packet) {
        let packet = Arc::new(packet);
        for player in self.players.values() {
            let Some(connection) = &player.connection else {
                continue;
            };
            if connection.deliver(Arc::clone(&packet)) == Delivery::Kicked {
                warn!(
                    "[{}] Player {} cannot keep up, dropping",
                    self.code, player.id
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WinCondition;
    use crate::input_queue::SubmitOutcome;

    struct TestClient {
        _tx: mpsc::Sender<Arc<Packet>>,
        rx: mpsc::Receiver<Arc<Packet>>,
        handle: ConnectionHandle,
    }

    impl TestClient {
        fn new(capacity: usize) -> Self {
            let (tx, rx) = mpsc::channel(capacity);
            let handle = ConnectionHandle::new(&tx, Arc::new(Notify::new()));
            Self { _tx: tx, rx, handle }
        }

        fn received(&mut self) -> Vec<Packet> {
            let mut packets = Vec::new();
            while let Ok(packet) = self.rx.try_recv() {
                packets.push((*packet).clone());
            }
            packets
        }
    }

    fn test_config() -> GameConfig {
        GameConfig {
            board_width: 10,
            board_height: 10,
            min_food: 0,
            max_food: 0,
            initial_length: 3,
            max_players: 3,
            snapshot_interval: 50,
            ..GameConfig::default()
        }
    }

    fn lobby(players: usize) -> (Session, Vec<TestClient>) {
        let mut session = Session::new(1, "AbC2".to_string(), test_config(), 7);
        let mut clients = Vec::new();
        for i in 0..players {
            let client = TestClient::new(64);
            let id = i as PlayerId + 1;
            session
                .admit(id, &format!("player{}", id), client.handle.clone())
                .unwrap();
            clients.push(client);
        }
        (session, clients)
    }

    fn running(players: usize) -> (Session, Vec<TestClient>) {
        let (mut session, mut clients) = lobby(players);
        session.start(1).unwrap();
        for client in &mut clients {
            client.received();
        }
        (session, clients)
    }

    fn place(session: &mut Session, snakes: Vec<Snake>) {
        session.snakes = snakes.into_iter().map(|s| (s.owner, s)).collect();
        session.board =
            engine::build_board(10, 10, &session.snakes, &session.food).unwrap();
    }

    fn two_cell(owner: PlayerId, head: (i32, i32), tail: (i32, i32), heading: Direction) -> Snake {
        let mut snake = Snake::new(owner, Coord::new(head.0, head.1), heading, 2);
        snake.body.push_back(Coord::new(tail.0, tail.1));
        snake
    }

    #[test]
    fn test_admit_sends_joined_and_announces() {
        let (mut session, mut clients) = lobby(1);
        let newcomer = TestClient::new(8);
        session.admit(2, "second", newcomer.handle.clone()).unwrap();
        clients.push(newcomer);

        match &clients[1].received()[..] {
            [Packet::Joined {
                player_id,
                owner,
                players,
                code,
                ..
            }] => {
                assert_eq!(*player_id, 2);
                assert_eq!(*owner, 1);
                assert_eq!(players.len(), 2);
                assert_eq!(code, "AbC2");
            }
            other => panic!("unexpected packets: {:?}", other),
        }
        let first = clients[0].received();
        assert!(matches!(
            first.last(),
            Some(Packet::PlayerJoined { player }) if player.id == 2
        ));
    }

    #[test]
    fn test_admit_rejections() {
        let (mut session, _clients) = lobby(2);
        let extra = TestClient::new(8);

        assert_eq!(
            session.admit(9, "player1", extra.handle.clone()),
            Err(SessionError::NameTaken("player1".to_string()))
        );
        assert_eq!(
            session.admit(9, "   ", extra.handle.clone()),
            Err(SessionError::EmptyName)
        );
        assert_eq!(
            session.admit(2, "other", extra.handle.clone()),
            Err(SessionError::AlreadyJoined(2))
        );
        session.admit(3, "third", extra.handle.clone()).unwrap();
        assert_eq!(
            session.admit(4, "fourth", extra.handle.clone()),
            Err(SessionError::Full(3))
        );
    }

    #[test]
    fn test_admit_rejected_once_running() {
        let (mut session, _clients) = running(1);
        let late = TestClient::new(8);
        assert_eq!(
            session.admit(5, "late", late.handle.clone()),
            Err(SessionError::NotWaiting(SessionState::Running))
        );
    }

    #[test]
    fn test_only_owner_can_start() {
        let (mut session, _clients) = lobby(2);
        assert_eq!(session.start(2), Err(SessionError::NotOwner(2)));
        assert_eq!(session.state(), SessionState::Waiting);

        session.start(1).unwrap();
        assert_eq!(session.state(), SessionState::Running);
        assert_eq!(
            session.start(1),
            Err(SessionError::NotWaiting(SessionState::Running))
        );
    }

    #[test]
    fn test_owner_leaving_lobby_transfers_ownership() {
        let (mut session, mut clients) = lobby(3);
        assert_eq!(session.disconnect(1), Departure::Left);
        assert_eq!(session.owner(), Some(2));
        assert!(matches!(
            clients[2].received().last(),
            Some(Packet::PlayerLeft {
                player: 1,
                owner: Some(2)
            })
        ));

        assert_eq!(session.disconnect(2), Departure::Left);
        assert_eq!(session.disconnect(3), Departure::Emptied);
        assert_eq!(session.disconnect(3), Departure::Unknown);
    }

    #[test]
    fn test_start_seats_snakes_and_sends_snapshot() {
        let (mut session, mut clients) = lobby(2);
        session.start(1).unwrap();

        assert_eq!(session.snake(1).unwrap().head(), Coord::new(2, 2));
        assert_eq!(session.snake(1).unwrap().heading, Direction::Right);
        assert_eq!(session.snake(2).unwrap().head(), Coord::new(7, 7));
        assert_eq!(session.snake(2).unwrap().heading, Direction::Left);

        let packets = clients[0].received();
        assert!(packets
            .iter()
            .any(|p| matches!(p, Packet::SessionStarted { session: 1 })));
        match packets.last() {
            Some(Packet::Snapshot { tick, snakes, .. }) => {
                assert_eq!(*tick, 0);
                assert_eq!(snakes.len(), 2);
            }
            other => panic!("expected snapshot, got {:?}", other),
        }
    }

    #[test]
    fn test_tick_applies_queued_input() {
        let (mut session, mut clients) = running(2);
        let inputs = session.inputs();
        assert_eq!(inputs.submit_current(1, Direction::Up), SubmitOutcome::Accepted);

        let report = session.tick().unwrap();
        assert_eq!(report.tick, 1);
        assert!(!report.ended);
        assert_eq!(session.snake(1).unwrap().head(), Coord::new(2, 1));
        assert_eq!(session.snake(1).unwrap().length(), 2);

        match &clients[1].received()[..] {
            [Packet::Diff { tick, cells, .. }] => {
                assert_eq!(*tick, 1);
                assert_eq!(cells.len(), 2);
            }
            other => panic!("unexpected packets: {:?}", other),
        }
    }

    #[test]
    fn test_reversal_input_keeps_heading() {
        let (mut session, _clients) = running(2);
        let inputs = session.inputs();
        assert_eq!(
            inputs.submit_current(1, Direction::Left),
            SubmitOutcome::Reversal
        );

        session.tick().unwrap();
        assert_eq!(session.snake(1).unwrap().heading, Direction::Right);
        assert_eq!(session.snake(1).unwrap().head(), Coord::new(3, 2));
    }

    #[test]
    fn test_disconnect_forfeits_at_next_tick() {
        let (mut session, mut clients) = running(3);
        session.tick().unwrap();

        assert_eq!(session.disconnect(2), Departure::Forfeited);
        assert!(session.snake(2).is_some());

        let report = session.tick().unwrap();
        assert!(report.events.contains(&GameEvent::WallDeath { player: 2 }));
        assert!(!report.ended);
        assert!(session.snake(2).is_none());
        assert_eq!(session.player(2).unwrap().eliminated_at, Some(2));

        let seen = clients[0].received();
        assert!(seen.iter().any(|p| matches!(
            p,
            Packet::Diff { events, .. } if events.contains(&GameEvent::WallDeath { player: 2 })
        )));

        let report = session.tick().unwrap();
        assert_eq!(report.tick, 3);
        assert!(report.events.is_empty());
        assert_eq!(session.snake(1).unwrap().length(), 3);
        assert_eq!(session.snake(3).unwrap().length(), 3);
    }

    #[test]
    fn test_head_on_ends_last_standing_without_winner() {
        let (mut session, mut clients) = running(2);
        place(
            &mut session,
            vec![
                two_cell(1, (4, 5), (3, 5), Direction::Right),
                two_cell(2, (6, 5), (7, 5), Direction::Left),
            ],
        );

        let report = session.tick().unwrap();
        assert_eq!(
            report.events,
            vec![
                GameEvent::MutualDeath { a: 1, b: 2 },
                GameEvent::SessionOver { winner: None },
            ]
        );
        assert!(report.ended);
        assert_eq!(session.state(), SessionState::Ended);
        assert_eq!(session.board().occupied(), 0);

        match clients[0].received().last() {
            Some(Packet::SessionEnded { winner, standings }) => {
                assert_eq!(*winner, None);
                assert_eq!(standings.len(), 2);
            }
            other => panic!("expected end of session, got {:?}", other),
        }
        assert_eq!(
            session.tick(),
            Err(SessionError::NotRunning(SessionState::Ended))
        );
    }

    #[test]
    fn test_score_broadcast_on_food() {
        let (mut session, mut clients) = running(2);
        session.food.insert(Coord::new(3, 2));
        session.board = engine::build_board(10, 10, &session.snakes, &session.food).unwrap();

        session.tick().unwrap();
        assert_eq!(session.player(1).unwrap().score, 1);
        match clients[1].received().last() {
            Some(Packet::Diff { scores, events, .. }) => {
                assert_eq!(scores, &vec![Score { player: 1, score: 1 }]);
                assert!(events.contains(&GameEvent::FoodEaten {
                    player: 1,
                    at: Coord::new(3, 2)
                }));
            }
            other => panic!("expected diff, got {:?}", other),
        }
    }

    #[test]
    fn test_periodic_snapshot_follows_diff() {
        let mut config = test_config();
        config.snapshot_interval = 2;
        let mut session = Session::new(4, "Zz9x".to_string(), config, 1);
        let mut client = TestClient::new(64);
        session.admit(1, "solo", client.handle.clone()).unwrap();
        session.start(1).unwrap();
        client.received();

        session.tick().unwrap();
        session.tick().unwrap();
        let packets = client.received();
        assert_eq!(packets.len(), 3);
        assert!(matches!(packets[1], Packet::Diff { tick: 2, .. }));
        assert!(matches!(packets[2], Packet::Snapshot { tick: 2, .. }));
    }

    #[test]
    fn test_zero_snapshot_interval_snapshots_every_tick() {
        let mut config = test_config();
        config.snapshot_interval = 0;
        let mut session = Session::new(5, "Qq7w".to_string(), config, 1);
        let mut client = TestClient::new(64);
        session.admit(1, "solo", client.handle.clone()).unwrap();
        session.start(1).unwrap();
        client.received();

        session.tick().unwrap();
        let packets = client.received();
        assert_eq!(packets.len(), 2);
        assert!(matches!(packets[1], Packet::Snapshot { tick: 1, .. }));
    }

    #[test]
    fn test_time_limit_ends_with_top_scorer() {
        let mut config = test_config();
        config.win_condition = WinCondition::TimeLimit { ticks: 2 };
        let mut session = Session::new(5, "Tt7y".to_string(), config, 1);
        let clients: Vec<TestClient> = (0..2).map(|_| TestClient::new(64)).collect();
        session.admit(1, "a", clients[0].handle.clone()).unwrap();
        session.admit(2, "b", clients[1].handle.clone()).unwrap();
        session.start(1).unwrap();
        session.players.get_mut(&2).unwrap().score = 3;

        assert!(!session.tick().unwrap().ended);
        let report = session.tick().unwrap();
        assert!(report.ended);
        assert_eq!(session.winner(), Some(2));
        assert_eq!(session.standings()[0].player, 2);
    }

    #[test]
    fn test_standings_rank_survivors_then_later_eliminations() {
        let (mut session, _clients) = running(3);
        session.players.get_mut(&1).unwrap().eliminated_at = Some(4);
        session.players.get_mut(&1).unwrap().score = 10;
        session.players.get_mut(&2).unwrap().eliminated_at = Some(9);
        session.players.get_mut(&3).unwrap().score = 1;

        let order: Vec<PlayerId> = session.standings().iter().map(|s| s.player).collect();
        assert_eq!(order, vec![3, 2, 1]);
    }

    #[test]
    fn test_engine_fault_surfaces_with_tick() {
        let (mut session, mut clients) = running(2);
        let mut broken = two_cell(1, (4, 4), (4, 5), Direction::Up);
        broken.body.push_back(Coord::new(8, 8));
        session.snakes.insert(1, broken);

        match session.tick() {
            Err(SessionError::Fault { tick, source }) => {
                assert_eq!(tick, 0);
                assert_eq!(source, EngineError::Detached(1));
            }
            other => panic!("expected fault, got {:?}", other),
        }

        session.force_end("internal error");
        assert_eq!(session.state(), SessionState::Ended);
        assert!(matches!(
            clients[1].received().last(),
            Some(Packet::SessionAborted { tick: 0, .. })
        ));
    }

    #[test]
    fn test_connection_handle_kicks_full_queue() {
        let (tx, mut rx) = mpsc::channel(1);
        let handle = ConnectionHandle::new(&tx, Arc::new(Notify::new()));
        let packet = Arc::new(Packet::StartSession);

        assert_eq!(handle.deliver(Arc::clone(&packet)), Delivery::Queued);
        assert_eq!(handle.deliver(Arc::clone(&packet)), Delivery::Kicked);
        assert!(rx.try_recv().is_ok());

        drop(tx);
        assert_eq!(handle.deliver(packet), Delivery::Closed);
    }
}
