use bridge::api::HttpGameApi;
use bridge::coordinator::{CoordinatorConfig, PressOutcome, SessionCoordinator};
use bridge::hardware::{open_backend, BackendKind, Hardware};
use bridge::monitor::InputMonitor;
use bridge::roster::{PlayerRoster, Roster};
use bridge::state::{BridgeEvent, Flag, SessionState};
use bridge::transport::WsConnector;
use clap::{Parser, Subcommand};
use log::{debug, info, warn};
use shared::DEFAULT_SERVER_URL;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Game server base URL
    #[arg(short = 's', long, default_value = DEFAULT_SERVER_URL)]
    server: String,

    /// Player roster file
    #[arg(short = 'c', long, default_value = "player_config.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List configured players
    List,
    /// Show pins not yet assigned to a player
    Pins,
    /// Add a player on a free pin
    Add { name: String, pin: u8 },
    /// Remove a player
    Remove { id: String },
    /// Enable a player's buzzer
    Enable { id: String },
    /// Disable a player's buzzer
    Disable { id: String },
    /// Show a game's details as the server reports them
    Info { game_id: String },
    /// Join a game with every enabled player and forward buzzer presses
    Run {
        /// Game code shown by the host
        code: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let mut roster = PlayerRoster::load(&args.config);

    match args.command {
        Command::List => {
            if roster.is_empty() {
                println!("No players configured.");
            }
            for player in roster.all_players() {
                println!(
                    "{}: {} (GPIO {}){}",
                    player.local_id,
                    player.name,
                    player.pin,
                    if player.enabled { " [ENABLED]" } else { "" }
                );
            }
        }
        Command::Pins => println!("Available GPIO pins: {:?}", roster.available_pins()),
        Command::Add { name, pin } => {
            let id = PlayerRoster::generate_id();
            roster.add_player(&id, &name, pin)?;
            println!("Added player {} on pin {} as {}.", name, pin, id);
        }
        Command::Remove { id } => {
            let player = roster.remove_player(&id)?;
            println!("Removed player {}.", player.name);
        }
        Command::Enable { id } => {
            roster.update_player(&id, None, None, Some(true))?;
        }
        Command::Disable { id } => {
            roster.update_player(&id, None, None, Some(false))?;
        }
        Command::Info { game_id } => {
            let api = HttpGameApi::new(&args.server)?;
            match api.game_info(&game_id).await? {
                Some(game) => println!("{}", serde_json::to_string_pretty(&game)?),
                None => println!("Game {} not found.", game_id),
            }
        }
        Command::Run { code } => run(&args.server, &code, Arc::new(roster)).await?,
    }

    Ok(())
}

async fn run(
    server: &str,
    code: &str,
    roster: Arc<PlayerRoster>,
) -> Result<(), Box<dyn std::error::Error>> {
    let players = roster.list_enabled_players();
    if players.is_empty() {
        println!("No players configured.");
        return Ok(());
    }

    info!("Starting buzzer bridge...");
    info!("Connecting to: {}", server);

    let api = HttpGameApi::new(server)?;
    let coordinator = Arc::new(SessionCoordinator::new(
        WsConnector,
        CoordinatorConfig {
            server_url: server.to_string(),
            ..Default::default()
        },
    ));

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    coordinator.set_event_sink(event_tx);
    let events = tokio::spawn(log_events(event_rx, Arc::clone(coordinator.state())));

    let summary = coordinator.join_all(&api, code, &players).await;
    for (local_id, reason) in &summary.failed {
        warn!("Player {} did not join: {}", local_id, reason);
    }
    if !summary.any_joined() {
        println!("No players registered.");
        events.abort();
        return Ok(());
    }
    println!(
        "Connected {} of {} players and started monitoring.",
        summary.joined.len(),
        players.len()
    );

    let (hardware, backend) = open_backend();
    let (press_tx, press_rx) = mpsc::unbounded_channel();
    let monitor = Arc::new(InputMonitor::new(Arc::clone(&hardware), press_tx));
    monitor.start_monitoring(&players);
    print_status(&coordinator, &monitor, &roster);

    let presses = tokio::spawn(forward_presses(
        press_rx,
        Arc::clone(&coordinator),
        Arc::clone(&roster),
    ));

    match backend {
        BackendKind::Simulated => info!(
            "Running with simulated buzzers: type a pin number or player id to press, \
             or 'status'"
        ),
        BackendKind::Gpio => info!("Running with GPIO buzzers: type 'status' for a summary"),
    }
    let console = tokio::spawn(read_console(
        hardware,
        Arc::clone(&coordinator),
        Arc::clone(&monitor),
        Arc::clone(&roster),
    ));

    tokio::signal::ctrl_c().await?;
    println!("Received Ctrl+C, shutting down...");

    console.abort();
    monitor.stop_monitoring();
    coordinator.disconnect_all().await;
    presses.abort();
    events.abort();

    Ok(())
}

async fn forward_presses(
    mut presses: mpsc::UnboundedReceiver<String>,
    coordinator: Arc<SessionCoordinator<WsConnector>>,
    roster: Arc<PlayerRoster>,
) {
    while let Some(local_id) = presses.recv().await {
        let name = roster
            .lookup_player(&local_id)
            .map(|player| player.name)
            .unwrap_or_else(|| "Unknown".to_string());

        if !coordinator.connected() {
            warn!("[BUZZER] Pressed by {} but not connected to game", name);
            continue;
        }

        match coordinator.press(&local_id) {
            PressOutcome::Sent => info!("[BUZZER] Pressed: {} (ID: {})", name, local_id),
            outcome => debug!("[BUZZER] {} not sent: {:?}", name, outcome),
        }
    }
}

fn print_status(
    coordinator: &SessionCoordinator<WsConnector>,
    monitor: &InputMonitor,
    roster: &PlayerRoster,
) {
    println!("Players: {} configured", roster.len());
    println!("{}", coordinator.status());
    println!("Monitoring: {}", monitor.is_monitoring());
}

async fn log_events(mut events: mpsc::UnboundedReceiver<BridgeEvent>, state: Arc<SessionState>) {
    while let Some(event) = events.recv().await {
        match event {
            BridgeEvent::FlagChanged(change) => {
                let field = match change.field {
                    Flag::Active => "active",
                    Flag::Locked => "locked",
                    Flag::Countdown => "countdown",
                };
                debug!("{}: {} -> {}", field, change.old, change.new);
                info!("Round status: {}", state.status_label());
            }
            BridgeEvent::GameUpdate(payload) => debug!("Game update: {}", payload),
        }
    }
}

/// Reads console lines: `status`, a pin number or a player id.
async fn read_console(
    hardware: Arc<dyn Hardware>,
    coordinator: Arc<SessionCoordinator<WsConnector>>,
    monitor: Arc<InputMonitor>,
    roster: Arc<PlayerRoster>,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        if input == "status" {
            print_status(&coordinator, &monitor, &roster);
            continue;
        }

        match input.parse::<u8>() {
            Ok(pin) => {
                hardware.simulate_trigger(pin);
            }
            Err(_) => {
                monitor.mock_press(roster.as_ref(), input);
            }
        }
    }
}
