//! Cartridge Monitor
//!
//! Console front end for the cartridge link. It finds the NFC reader,
//! prints every link event and launches the executable named by each
//! cartridge that is tapped.
//!
//! ## Usage
//!
//! ```bash
//! # Watch for a reader on the serial ports
//! cart-monitor
//!
//! # Show serial ports and how they classify
//! cart-monitor --list-ports
//!
//! # Run against a simulated reader
//! cart-monitor --simulate
//! ```
//!
//! Any other argument prints the usage and exits with status 2.

mod console;
mod settings;

use std::sync::Arc;

use anyhow::{bail, Result};
use cart_detect::{DeviceClassifier, SerialTransport, Transport};
use cart_link::{LinkHandle, ProcessLauncher};
use cart_protocol::CartridgeRecord;
use cart_sim::{ReaderHandle, SimTransport, VirtualReaderConfig};
use console::ConsoleCommand;
use settings::Settings;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Port the simulated reader is plugged into
const SIM_PORT: &str = "/dev/ttySIM0";

const USAGE: &str = "Usage: cart-monitor [--simulate | --list-ports | --help]";

/// What the command line asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Monitor,
    Simulate,
    ListPorts,
    Help,
}

fn parse_args(args: &[String]) -> Result<Mode, String> {
    let mut mode = Mode::Monitor;
    for arg in args {
        let next = match arg.as_str() {
            "--simulate" => Mode::Simulate,
            "--list-ports" => Mode::ListPorts,
            "--help" | "-h" => return Ok(Mode::Help),
            other => return Err(format!("unknown argument '{}'", other)),
        };
        if mode != Mode::Monitor && mode != next {
            return Err(format!("'{}' cannot be combined with other modes", arg));
        }
        mode = next;
    }
    Ok(mode)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Include all our crates in the default filter
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "cart_monitor=info,cart_protocol=info,cart_detect=info,cart_link=info,cart_sim=info"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mode = match parse_args(&args) {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    };
    if mode == Mode::Help {
        println!("{}", USAGE);
        return Ok(());
    }

    let settings = Settings::load();
    let transport = SerialTransport::from_config(
        settings.link.serial.clone(),
        settings.link.scanner.clone(),
    );

    if mode == Mode::ListPorts {
        return list_ports(&transport, &settings);
    }

    info!("Starting cartridge monitor");

    if mode == Mode::Simulate {
        let sim = SimTransport::new();
        let reader = sim.plug(VirtualReaderConfig::cp2102(SIM_PORT));
        info!("Simulated reader plugged into {}", SIM_PORT);
        run(Arc::new(sim), settings, Some(reader)).await
    } else {
        run(Arc::new(transport), settings, None).await
    }
}

fn list_ports(transport: &SerialTransport, settings: &Settings) -> Result<()> {
    let classifier = DeviceClassifier::with_config(settings.link.classifier.clone());
    let ports = transport.list_ports()?;

    println!("Available serial ports:");
    if ports.is_empty() {
        println!("  (none)");
    }
    for port in ports {
        println!("  {} - {:?}", port.label(), classifier.classify(&port));
    }
    Ok(())
}

async fn run<T: Transport>(
    transport: Arc<T>,
    settings: Settings,
    reader: Option<ReaderHandle>,
) -> Result<()> {
    let dispatcher = Arc::new(ProcessLauncher::with_args(settings.launch_args.clone()));
    let (link, mut events, task) = LinkHandle::spawn(transport, dispatcher, settings.link.clone());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("Type 'help' for commands, 'quit' to exit");

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break; };
                println!("{}", console::describe(&event));
            }

            line = lines.next_line() => {
                let Some(line) = line? else { break; };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<ConsoleCommand>() {
                    Ok(ConsoleCommand::Quit) => break,
                    Ok(cmd) => {
                        if let Err(e) = execute(&link, &settings, reader.as_ref(), cmd).await {
                            eprintln!("Error: {:#}", e);
                        }
                    }
                    Err(e) => eprintln!("Error: {}", e),
                }
            }
        }
    }

    // Nobody reads events from here on
    drop(events);
    if let Err(e) = link.shutdown().await {
        warn!("Supervisor already stopped: {}", e);
    }
    task.await?;
    info!("Goodbye");
    Ok(())
}

async fn execute(
    link: &LinkHandle,
    settings: &Settings,
    reader: Option<&ReaderHandle>,
    cmd: ConsoleCommand,
) -> Result<()> {
    match cmd {
        ConsoleCommand::Send(text) => link.send_raw_command(text).await?,
        ConsoleCommand::Reconnect => link.reconnect().await?,
        ConsoleCommand::Start => link.start_scanning().await?,
        ConsoleCommand::Stop => link.stop_scanning().await?,
        ConsoleCommand::Status => println!("State: {}", link.connection_state()),
        ConsoleCommand::Record => match link.current_record().await? {
            Some(record) => println!("Cartridge: {}", console::describe_record(&record)),
            None => println!("No cartridge"),
        },
        ConsoleCommand::Candidates => {
            let candidates = link.visible_candidates().await?;
            if candidates.is_empty() {
                println!("No candidate ports");
            }
            for port in candidates {
                println!("  {}", port.label());
            }
        }
        ConsoleCommand::Test(path) => {
            let verdict = if link.test_port(path.as_str()).await? {
                "reader answered"
            } else {
                "no reader"
            };
            println!("{}: {}", path, verdict);
        }
        ConsoleCommand::InitSettings => {
            let path = settings.save()?;
            println!("Settings written to {}", path.display());
        }
        ConsoleCommand::Present { name, path } => {
            let Some(reader) = reader else {
                bail!("'present' needs --simulate");
            };
            if !reader.present(CartridgeRecord::new(name, None, path)).await {
                bail!("simulated reader is not connected");
            }
        }
        ConsoleCommand::Remove => {
            let Some(reader) = reader else {
                bail!("'remove' needs --simulate");
            };
            if !reader.remove().await {
                bail!("simulated reader is not connected");
            }
        }
        ConsoleCommand::Help => console::print_help(),
        ConsoleCommand::Quit => {}
    }
    Ok(())
}
