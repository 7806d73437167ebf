use clap::Parser;
use log::info;
use server::config::GameConfig;
use server::network::Server;
use server::scheduler::LogObserver;
use std::path::PathBuf;
use std::sync::Arc;

/// Parses command-line arguments, builds the game configuration and runs the
/// server until it fails or Ctrl+C is received.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "8080")]
        port: u16,
        /// TOML file with game settings; flags below override it
        #[clap(short, long)]
        config: Option<PathBuf>,
        /// Milliseconds between ticks
        #[clap(long)]
        tick_ms: Option<u64>,
        /// Board width in cells
        #[clap(long)]
        width: Option<u32>,
        /// Board height in cells
        #[clap(long)]
        height: Option<u32>,
        /// Maximum players per session
        #[clap(long)]
        max_players: Option<usize>,
        /// Food kept on the board at all times
        #[clap(long)]
        min_food: Option<usize>,
        /// Fixed seed for food placement
        #[clap(long)]
        seed: Option<u64>,
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => GameConfig::from_file(path)?,
        None => GameConfig::default(),
    };
    if let Some(tick_ms) = args.tick_ms {
        config.tick_interval_ms = tick_ms;
    }
    if let Some(width) = args.width {
        config.board_width = width;
    }
    if let Some(height) = args.height {
        config.board_height = height;
    }
    if let Some(max_players) = args.max_players {
        config.max_players = max_players;
    }
    if let Some(min_food) = args.min_food {
        config.min_food = min_food;
        config.max_food = config.max_food.max(min_food);
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    config.validate()?;

    info!(
        "Board {}x{}, tick {} ms, up to {} players per session",
        config.board_width, config.board_height, config.tick_interval_ms, config.max_players
    );

    let address = format!("{}:{}", args.host, args.port);
    let server = Server::bind(&address, config, Arc::new(LogObserver)).await?;

    // Handle shutdown gracefully
    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
