//! Headless client for exercising a running server
//!
//! Creates a session (or joins one by code), optionally starts it, then
//! steers a snake with random non-reversing turns and logs what comes back.

use clap::Parser;
use log::{info, warn};
use rand::seq::SliceRandom;
use server::network::{read_frame, write_packet};
use shared::{decode_packet, Direction, Packet};
use std::time::Duration;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::interval;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server address
    #[clap(short, long, default_value = "127.0.0.1:8080")]
    server: String,
    /// Display name
    #[clap(short, long, default_value = "bot")]
    name: String,
    /// Invite code to join; a new session is created when omitted
    #[clap(short, long)]
    join: Option<String>,
    /// Start the session right after creating it
    #[clap(long)]
    start: bool,
    /// Milliseconds between heading changes
    #[clap(long, default_value = "300")]
    turn_ms: u64,
}

/// Reads frames on its own task so a partial read is never cancelled.
fn spawn_reader(mut reader: OwnedReadHalf) -> mpsc::Receiver<Packet> {
    let (tx, rx) = mpsc::channel(256);
    tokio::spawn(async move {
        loop {
            let body = match read_frame(&mut reader).await {
                Ok(Some(body)) => body,
                Ok(None) => break,
                Err(e) => {
                    warn!("Read failed: {}", e);
                    break;
                }
            };
            match decode_packet(&body) {
                Ok(packet) => {
                    if tx.send(packet).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("Failed to decode packet: {}", e),
            }
        }
    });
    rx
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let stream = TcpStream::connect(&args.server).await?;
    info!("Connected to {}", args.server);
    let (reader, mut writer) = stream.into_split();
    let mut packets = spawn_reader(reader);

    let request = match args.join {
        Some(code) => Packet::JoinSession {
            code,
            name: args.name.clone(),
        },
        None => Packet::CreateSession {
            name: args.name.clone(),
        },
    };
    write_packet(&mut writer, &request).await?;

    let mut turns = interval(Duration::from_millis(args.turn_ms));
    let mut heading = Direction::Right;
    let mut last_tick = None;
    let mut playing = false;

    loop {
        tokio::select! {
            packet = packets.recv() => {
                let Some(packet) = packet else {
                    info!("Server closed the connection");
                    break;
                };
                match &packet {
                    Packet::Joined { code, owner, player_id, .. } => {
                        info!("Joined session {} as player {}", code, player_id);
                        if args.start && owner == player_id {
                            write_packet(&mut writer, &Packet::StartSession).await?;
                        }
                    }
                    Packet::SessionStarted { .. } => playing = true,
                    Packet::Snapshot { tick, snakes, food, .. } => {
                        last_tick = Some(*tick);
                        info!("Snapshot at tick {}: {} snakes, {} food", tick, snakes.len(), food.len());
                    }
                    Packet::Diff { tick, events, .. } => {
                        last_tick = Some(*tick);
                        for event in events {
                            info!("Tick {}: {:?}", tick, event);
                        }
                    }
                    Packet::SessionEnded { winner, standings } => {
                        info!("Session over, winner {:?}", winner);
                        for (rank, standing) in standings.iter().enumerate() {
                            info!("  {}. {} score {} length {}", rank + 1, standing.name, standing.score, standing.length);
                        }
                        break;
                    }
                    Packet::SessionAborted { reason, .. } => {
                        warn!("Session aborted: {}", reason);
                        break;
                    }
                    other => info!("Received {:?}", other),
                }
            }
            _ = turns.tick(), if playing => {
                let choices: Vec<Direction> = Direction::all()
                    .into_iter()
                    .filter(|d| *d != heading.opposite())
                    .collect();
                if let Some(next) = choices.choose(&mut rand::thread_rng()) {
                    heading = *next;
                    let input = Packet::Input { heading, client_tick: last_tick };
                    write_packet(&mut writer, &input).await?;
                }
            }
        }
    }

    write_packet(&mut writer, &Packet::Leave).await?;
    info!("Test client finished");
    Ok(())
}
