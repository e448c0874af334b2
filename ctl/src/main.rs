mod client;
mod error;

use std::io::{self, Write};
use std::path::PathBuf;

use clap::Parser;
use log::error;

use client::Client;

/// Interactive control client for taskmasterd.
#[derive(Parser, Debug)]
#[command(name = "taskmasterctl", version)]
struct Cli {
    /// Path to the control socket.
    #[arg(short, long, default_value = "/tmp/taskmasterd.sock")]
    socket: PathBuf,

    /// Run a single command and exit instead of starting the interactive shell.
    #[arg(trailing_var_arg = true)]
    command: Vec<String>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let result = if cli.command.is_empty() {
        run_shell(&cli.socket)
    } else {
        run_one_shot(&cli.socket, &cli.command.join(" "))
    };

    if let Err(e) = result {
        error!("{e}");
        std::process::exit(1);
    }
}

fn run_one_shot(socket: &std::path::Path, command: &str) -> error::Result<()> {
    let mut client = Client::connect(socket)?;
    print!("{}", client.send(command)?);
    Ok(())
}

fn run_shell(socket: &std::path::Path) -> error::Result<()> {
    let mut client = Client::connect(socket)?;
    let stdin = io::stdin();
    loop {
        print!("taskmaster> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            println!();
            return Ok(());
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            return Ok(());
        }
        print!("{}", client.send(line)?);
    }
}
