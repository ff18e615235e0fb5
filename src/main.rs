use std::fs::File;
use std::io;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use anistream::cli::{Cli, Command};
use anistream::config::Config;
use anistream::doctor;
use anistream::download::Downloader;
use anistream::history::WatchHistory;
use anistream::menu::Menu;
use anistream::navigation::{NavError, Navigator};
use anistream::player::Player;
use anistream::presence::{DiscordLink, NoPresence, RichPresence, SharedPresence, shared};
use anistream::rofi::RofiMenu;
use anistream::sources::{AnySource, SourceKind};
use anistream::tui::TerminalMenu;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Log to a file so output never lands on the TUI
    let log_path = std::env::temp_dir().join("anistream.log");
    let log_file = match File::create(&log_path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Failed to create log file {}: {}", log_path.display(), e);
            std::process::exit(1);
        }
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_ansi(false)
        .with_writer(log_file)
        .init();

    let loaded = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    let mut config = match loaded {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "failed to load config");
            eprintln!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(player) = &cli.player {
        config.player.command = player.clone();
        if let Err(e) = config.validate() {
            eprintln!("Invalid --player: {}", e);
            std::process::exit(1);
        }
    }

    if cli.command == Some(Command::Doctor) {
        let results = doctor::run_checks(&config, cli.config.as_deref()).await;
        doctor::print_results(&results);
        let (errors, _) = doctor::summarize(&results);
        std::process::exit(if errors > 0 { 1 } else { 0 });
    }

    let presence: SharedPresence = if cli.disable_rpc || !config.presence.enabled {
        info!("rich presence disabled");
        shared(NoPresence)
    } else {
        shared(RichPresence::<DiscordLink>::new(config.presence.app_id.clone()))
    };

    info!(version = env!("CARGO_PKG_VERSION"), "starting anistream");
    let result = match &cli.command {
        Some(Command::Rofi { rofi_flags }) => {
            let menu = match RofiMenu::new(rofi_flags.as_deref().unwrap_or("")) {
                Ok(menu) => menu,
                Err(e) => {
                    eprintln!("Failed to start rofi menus: {}", e);
                    std::process::exit(1);
                }
            };
            browse(menu, &config, presence).await
        }
        _ => {
            let menu = match TerminalMenu::new() {
                Ok(menu) => menu,
                Err(e) => {
                    eprintln!("Failed to start terminal UI: {}", e);
                    std::process::exit(1);
                }
            };
            // the navigator owns the menu, so the terminal is restored when it returns
            browse(menu, &config, presence).await
        }
    };

    match result {
        Ok(()) => info!("goodbye"),
        Err(NavError::Io(e)) if e.kind() == io::ErrorKind::Interrupted => {
            info!("interrupted");
            std::process::exit(130);
        }
        Err(e) => {
            error!(error = %e, "terminal failure");
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

async fn browse<M: Menu>(menu: M, config: &Config, presence: SharedPresence) -> Result<(), NavError> {
    let sources: Vec<AnySource> = SourceKind::ALL
        .iter()
        .map(|&kind| AnySource::from_config(kind, &config.sources, &config.player.user_agent))
        .collect();
    let downloader = Downloader::new(&config.player.user_agent, &config.player.referrer);

    let mut navigator = Navigator::new(
        sources,
        menu,
        Player::new(config.player.clone()),
        presence,
        WatchHistory::load(),
        downloader,
        config.storage.download_dir(),
    );
    navigator.run().await
}
