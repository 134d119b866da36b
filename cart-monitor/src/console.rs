//! Console commands and event formatting

use std::str::FromStr;

use cart_link::LinkEvent;
use cart_protocol::CartridgeRecord;
use thiserror::Error;

/// A line typed at the console
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Write a raw line to the reader
    Send(String),
    Reconnect,
    Start,
    Stop,
    Status,
    Record,
    Candidates,
    /// Handshake one port without connecting to it
    Test(String),
    /// Write the current settings to the config file
    InitSettings,
    /// Simulated reader only: put a cartridge on the antenna
    Present { name: String, path: String },
    /// Simulated reader only: take the cartridge away
    Remove,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unknown command '{0}', type 'help' for a list")]
    Unknown(String),

    #[error("'{command}' needs {argument}")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },
}

impl FromStr for ConsoleCommand {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let required = |command: &'static str, argument: &'static str| {
            if rest.is_empty() {
                Err(CommandError::MissingArgument { command, argument })
            } else {
                Ok(rest.to_string())
            }
        };

        Ok(match word {
            "send" => Self::Send(required("send", "the text to write")?),
            "reconnect" => Self::Reconnect,
            "start" => Self::Start,
            "stop" => Self::Stop,
            "status" => Self::Status,
            "record" => Self::Record,
            "candidates" => Self::Candidates,
            "test" => Self::Test(required("test", "a port path")?),
            "init-settings" => Self::InitSettings,
            "present" => {
                let args = required("present", "a name and an executable path")?;
                let (name, path) = args.split_once(char::is_whitespace).ok_or(
                    CommandError::MissingArgument {
                        command: "present",
                        argument: "an executable path",
                    },
                )?;
                Self::Present {
                    name: name.to_string(),
                    path: path.trim().to_string(),
                }
            }
            "remove" => Self::Remove,
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            other => return Err(CommandError::Unknown(other.to_string())),
        })
    }
}

pub fn print_help() {
    println!("Commands:");
    println!("  send <text>           Write a line to the reader");
    println!("  reconnect             Drop the session and scan now");
    println!("  start | stop          Enable or disable automatic discovery");
    println!("  status                Show the connection state");
    println!("  record                Show the cartridge on the reader");
    println!("  candidates            List ports that look like readers");
    println!("  test <path>           Run the handshake on one port");
    println!("  init-settings         Write settings to the config file");
    println!("  present <name> <path> (--simulate) Present a cartridge");
    println!("  remove                (--simulate) Remove the cartridge");
    println!("  quit                  Exit");
}

pub fn describe_record(record: &CartridgeRecord) -> String {
    match &record.icon {
        Some(icon) => format!("{} [{}] -> {}", record.name, icon, record.path_name),
        None => format!("{} -> {}", record.name, record.path_name),
    }
}

/// One console line per event
pub fn describe(event: &LinkEvent) -> String {
    match event {
        LinkEvent::Connected { path } => format!("Connected to reader on {}", path),
        LinkEvent::Disconnected { path } => format!("Reader on {} disconnected", path),
        LinkEvent::StateChanged { state } => format!("State: {}", state),
        LinkEvent::RecordDetected(record) => format!("Cartridge: {}", describe_record(record)),
        LinkEvent::RecordRemoved => "Cartridge removed".to_string(),
        LinkEvent::DispatchSucceeded { path } => format!("Launched {}", path),
        LinkEvent::DispatchFailed { path, error } => {
            format!("Launch of {} failed: {}", path, error)
        }
        LinkEvent::ScanError { message } => format!("Scan error: {}", message),
        LinkEvent::PersistentFailure { attempts } => format!(
            "Reader unreachable after {} attempts, still scanning",
            attempts
        ),
        LinkEvent::CandidatesUpdated(ports) if ports.is_empty() => {
            "No candidate ports".to_string()
        }
        LinkEvent::CandidatesUpdated(ports) => format!(
            "Candidate ports: {}",
            ports
                .iter()
                .map(|p| p.path.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}
