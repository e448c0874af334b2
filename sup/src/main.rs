use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use log::{error, info};

use taskmaster_sup::supervisor;

/// Process supervisor daemon.
#[derive(Parser, Debug)]
#[command(name = "taskmasterd", version)]
struct Cli {
    /// Path to the configuration file. Defaults to a search across the current
    /// directory, /etc/taskmaster, and the user's home directory.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the control socket.
    #[arg(short, long, default_value = "/tmp/taskmasterd.sock")]
    socket: PathBuf,

    /// Increase log verbosity (can be repeated).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        error!("{e}");
        process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();
}

fn run(cli: Cli) -> taskmaster_sup::Result<()> {
    let supervisor = supervisor::bootstrap(cli.config.as_deref())?;
    info!(
        "loaded configuration from {}",
        supervisor.current_config_path().display()
    );

    supervisor.start_autostart();

    let supervisor = Arc::new(supervisor);
    let reaper_registry = Arc::clone(&supervisor.registry);
    taskmaster_sup::reaper::spawn(reaper_registry)?;

    taskmaster_sup::control::run(&supervisor, &cli.socket)?;
    info!("taskmasterd shutting down");
    Ok(())
}
