use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type PlayerId = u32;
pub type SessionId = u64;

pub const PROTOCOL_VERSION: u32 = 1;

/// Upper bound for a single encoded frame, length prefix excluded.
pub const MAX_FRAME_LEN: usize = 256 * 1024;

/// Grid coordinate. Signed so that a proposed head one step past the wall
/// is still representable.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Coord {
    pub x: i32,
    pub y: i32,
}

impl Coord {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn step(self, direction: Direction) -> Self {
        let (dx, dy) = direction.offset();
        Self::new(self.x + dx, self.y + dy)
    }

    pub fn is_adjacent(self, other: Coord) -> bool {
        (self.x - other.x).abs() + (self.y - other.y).abs() == 1
    }
}

/// Cardinal heading. `Up` decreases `y`.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub fn all() -> [Direction; 4] {
        [Direction::Up, Direction::Down, Direction::Left, Direction::Right]
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
        }
    }

    pub fn offset(self) -> (i32, i32) {
        match self {
            Direction::Up => (0, -1),
            Direction::Down => (0, 1),
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
        }
    }
}

/// What a board cell holds, as seen by clients.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum CellState {
    Empty,
    Snake(PlayerId),
    Food,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct CellDelta {
    pub at: Coord,
    pub cell: CellState,
}

/// Outcome of one tick, in the order the engine produced them.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum GameEvent {
    WallDeath { player: PlayerId },
    MutualDeath { a: PlayerId, b: PlayerId },
    BodyDeath { player: PlayerId, owner: PlayerId },
    FoodEaten { player: PlayerId, at: Coord },
    SessionOver { winner: Option<PlayerId> },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SnakeView {
    pub player: PlayerId,
    pub body: Vec<Coord>,
    pub heading: Direction,
    pub alive: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PlayerInfo {
    pub id: PlayerId,
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct Score {
    pub player: PlayerId,
    pub score: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Standing {
    pub player: PlayerId,
    pub name: String,
    pub score: u32,
    pub length: usize,
    /// Tick at which the player was eliminated; `None` for survivors.
    pub eliminated_at: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum Packet {
    // Client -> server
    CreateSession {
        name: String,
    },
    JoinSession {
        code: String,
        name: String,
    },
    StartSession,
    Input {
        heading: Direction,
        client_tick: Option<u64>,
    },
    Leave,

    // Server -> client
    Welcome {
        player_id: PlayerId,
        protocol_version: u32,
    },
    Joined {
        session: SessionId,
        code: String,
        player_id: PlayerId,
        owner: PlayerId,
        players: Vec<PlayerInfo>,
    },
    PlayerJoined {
        player: PlayerInfo,
    },
    PlayerLeft {
        player: PlayerId,
        owner: Option<PlayerId>,
    },
    SessionStarted {
        session: SessionId,
    },
    Snapshot {
        tick: u64,
        width: u32,
        height: u32,
        snakes: Vec<SnakeView>,
        food: Vec<Coord>,
        scores: Vec<Score>,
    },
    Diff {
        tick: u64,
        cells: Vec<CellDelta>,
        events: Vec<GameEvent>,
        scores: Vec<Score>,
    },
    SessionEnded {
        winner: Option<PlayerId>,
        standings: Vec<Standing>,
    },
    SessionAborted {
        tick: u64,
        reason: String,
    },
    Rejected {
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame of {0} bytes exceeds the frame size limit")]
    FrameTooLarge(usize),
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
}

/// Serializes a packet into a length-prefixed frame (big-endian `u32` length).
pub fn encode_frame(packet: &Packet) -> Result<Vec<u8>, ProtocolError> {
    let body = bincode::serialize(packet)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(body.len()));
    }
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Deserializes a frame body (the bytes after the length prefix).
pub fn decode_packet(body: &[u8]) -> Result<Packet, ProtocolError> {
    Ok(bincode::deserialize(body)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_opposites() {
        for direction in Direction::all() {
            assert_ne!(direction, direction.opposite());
            assert_eq!(direction, direction.opposite().opposite());
            let (dx, dy) = direction.offset();
            let (ox, oy) = direction.opposite().offset();
            assert_eq!((dx + ox, dy + oy), (0, 0));
        }
    }

    #[test]
    fn test_coord_step_and_adjacency() {
        let origin = Coord::new(4, 5);
        assert_eq!(origin.step(Direction::Right), Coord::new(5, 5));
        assert_eq!(origin.step(Direction::Up), Coord::new(4, 4));
        assert_eq!(Coord::new(0, 0).step(Direction::Left), Coord::new(-1, 0));

        assert!(origin.is_adjacent(Coord::new(4, 6)));
        assert!(!origin.is_adjacent(Coord::new(5, 6)));
        assert!(!origin.is_adjacent(origin));
    }

    #[test]
    fn test_coord_ordering_compares_x_first() {
        let mut coords = vec![Coord::new(1, 0), Coord::new(0, 1), Coord::new(0, 0)];
        coords.sort();
        assert_eq!(coords, vec![Coord::new(0, 0), Coord::new(0, 1), Coord::new(1, 0)]);
    }

    #[test]
    fn test_packet_serialization_input() {
        let packet = Packet::Input {
            heading: Direction::Left,
            client_tick: Some(42),
        };

        let frame = encode_frame(&packet).unwrap();
        let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(len, frame.len() - 4);

        match decode_packet(&frame[4..]).unwrap() {
            Packet::Input {
                heading,
                client_tick,
            } => {
                assert_eq!(heading, Direction::Left);
                assert_eq!(client_tick, Some(42));
            }
            _ => panic!("Wrong packet type after deserialization"),
        }
    }

    #[test]
    fn test_packet_serialization_diff() {
        let packet = Packet::Diff {
            tick: 7,
            cells: vec![
                CellDelta {
                    at: Coord::new(5, 5),
                    cell: CellState::Empty,
                },
                CellDelta {
                    at: Coord::new(2, 3),
                    cell: CellState::Snake(9),
                },
            ],
            events: vec![
                GameEvent::MutualDeath { a: 1, b: 2 },
                GameEvent::SessionOver { winner: None },
            ],
            scores: vec![Score {
                player: 9,
                score: 3,
            }],
        };

        let frame = encode_frame(&packet).unwrap();
        let decoded = decode_packet(&frame[4..]).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_malformed_body_is_rejected() {
        let frame = encode_frame(&Packet::StartSession).unwrap();

        let mut corrupted = frame[4..].to_vec();
        corrupted[0] = 0xFF;
        assert!(matches!(
            decode_packet(&corrupted),
            Err(ProtocolError::Codec(_))
        ));
        assert!(decode_packet(&[]).is_err());
    }

    #[test]
    fn test_oversized_frame_is_refused() {
        let packet = Packet::Rejected {
            reason: "x".repeat(MAX_FRAME_LEN + 1),
        };
        assert!(matches!(
            encode_frame(&packet),
            Err(ProtocolError::FrameTooLarge(_))
        ));
    }
}
