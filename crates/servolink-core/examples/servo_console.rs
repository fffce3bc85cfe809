//! ServoLink terminal console
//!
//! A line-oriented stand-in for the control panel: connects to a port and
//! forwards `<channel> <angle> <speed>` lines typed on stdin.
//!
//! Usage:
//!   cargo run --example servo_console -- [OPTIONS] [PORT]
//!
//! Options:
//!   --port PORT       Serial port (default: first listed port)
//!   --config FILE     JSON link config (channels, send policy, timeout)
//!   --list            List ports and exit
//!   --sim             Use the built-in simulated controller
//!
//! Console commands:
//!   A 90 5            Move channel A to 90 degrees with 5 ms step delay
//!   ports             List ports
//!   connect PORT      (Re)connect
//!   disconnect        Release the port
//!   status            Show connection state
//!   quit              Exit

use anyhow::{bail, Context};
use servolink_core::config::LinkConfig;
use servolink_core::protocol::{ConnectionManager, ConnectionState, SimulatedBackend};
use std::io::{self, BufRead, Write};
use tracing_subscriber::EnvFilter;

const SIM_PORT: &str = "SIM0";

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut port_name: Option<String> = None;
    let mut config_path: Option<String> = None;
    let mut list_only = false;
    let mut use_sim = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                i += 1;
                port_name = Some(args.get(i).context("--port needs a value")?.clone());
            }
            "--config" | "-c" => {
                i += 1;
                config_path = Some(args.get(i).context("--config needs a value")?.clone());
            }
            "--list" | "-l" => list_only = true,
            "--sim" => use_sim = true,
            "--help" | "-h" => {
                println!("Usage: servo_console [--port PORT] [--config FILE] [--list] [--sim] [PORT]");
                return Ok(());
            }
            other if !other.starts_with('-') => port_name = Some(other.to_string()),
            other => bail!("unknown option: {}", other),
        }
        i += 1;
    }

    let config = match config_path {
        Some(path) => LinkConfig::from_file(&path).with_context(|| format!("loading {}", path))?,
        None => LinkConfig::default(),
    };

    let sim = use_sim.then(|| SimulatedBackend::with_ports([SIM_PORT]));
    let manager = match &sim {
        Some(sim) => ConnectionManager::new(config, sim.clone()),
        None => ConnectionManager::system(config),
    };

    let ports = manager.list_ports();
    println!("Available ports:");
    if ports.is_empty() {
        println!("  (none)");
    }
    for port in &ports {
        println!("  {}", port.name);
    }
    if list_only {
        return Ok(());
    }

    let port = match port_name.or_else(|| ports.first().map(|p| p.name.clone())) {
        Some(port) => port,
        None => bail!("no serial port available; pass --port or --sim"),
    };
    if let Err(e) = manager.connect(&port) {
        eprintln!("{}", e);
    }
    print_status(&manager.current_state());

    let channels: Vec<String> = manager
        .config()
        .channels
        .iter()
        .map(|c| format!("{} ({})", c.id, c.title))
        .collect();
    println!("Channels: {}", channels.join(", "));

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        print!("> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            [] => {}
            ["quit"] | ["exit"] => break,
            ["ports"] => {
                for port in manager.list_ports() {
                    println!("  {}", port.name);
                }
            }
            ["status"] => {
                print_status(&manager.current_state());
                let counters = manager.counters();
                println!(
                    "  {} lines / {} bytes sent",
                    counters.lines_sent, counters.bytes_sent
                );
            }
            ["connect", port] => {
                if let Err(e) = manager.connect(port) {
                    eprintln!("{}", e);
                }
                print_status(&manager.current_state());
            }
            ["disconnect"] => {
                if let Err(e) = manager.disconnect() {
                    eprintln!("warning: {}", e);
                }
                print_status(&manager.current_state());
            }
            [channel, angle, speed] => match (angle.parse::<i32>(), speed.parse::<i32>()) {
                (Ok(angle), Ok(speed)) => match manager.send(channel, angle, speed) {
                    Ok(()) => println!("  {}° @ {}ms -> {}", angle, speed, channel),
                    Err(e) => eprintln!("{}", e),
                },
                _ => eprintln!("angle and speed must be integers"),
            },
            _ => eprintln!("unrecognized input; try `A 90 5`, `status` or `quit`"),
        }
    }

    if let Some(sim) = &sim {
        print!("Simulated wire:\n{}", String::from_utf8_lossy(&sim.wire()));
    }
    let _ = manager.disconnect();
    Ok(())
}

fn print_status(state: &ConnectionState) {
    match state {
        ConnectionState::Connected { port } => println!("Connected to {}", port),
        ConnectionState::Disconnected => println!("Disconnected"),
        ConnectionState::Failed { reason } => println!("Failed: {}", reason),
    }
}
