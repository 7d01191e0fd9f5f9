//! Operator Console
//!
//! Turns stdin lines into server operations. Plain text is broadcast; lines
//! starting with `/` are commands looked up in a fixed table by name. A
//! leading `//` broadcasts the rest of the line with a single `/`.

use std::fmt;
use thiserror::Error;

use crate::server::LineServer;
use crate::Result;

/// Stable command identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandId {
    Send,
    Clients,
    Rebind,
    Stats,
    Help,
    Quit,
}

struct CommandSpec {
    id: CommandId,
    name: &'static str,
    usage: &'static str,
}

const COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        id: CommandId::Send,
        name: "send",
        usage: "/send <ip:port> <message>  send to one client",
    },
    CommandSpec {
        id: CommandId::Clients,
        name: "clients",
        usage: "/clients                   list connected clients",
    },
    CommandSpec {
        id: CommandId::Rebind,
        name: "rebind",
        usage: "/rebind <port> [address]   listen on a new address",
    },
    CommandSpec {
        id: CommandId::Stats,
        name: "stats",
        usage: "/stats                     show counters",
    },
    CommandSpec {
        id: CommandId::Help,
        name: "help",
        usage: "/help                      show this list",
    },
    CommandSpec {
        id: CommandId::Quit,
        name: "quit",
        usage: "/quit                      shut the server down",
    },
];

/// A parsed console line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Broadcast(String),
    Send { key: String, message: String },
    Clients,
    Rebind { address: String, port: u16 },
    Stats,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unknown command '/{0}', try /help")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
}

/// What the caller should do after a command ran
#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Continue(Vec<String>),
    Quit,
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = COMMANDS
            .iter()
            .find(|spec| spec.id == *self)
            .map(|spec| spec.name)
            .unwrap_or("?");
        write!(f, "/{}", name)
    }
}

impl ConsoleCommand {
    /// Parse one line of operator input
    pub fn parse(line: &str) -> std::result::Result<Self, ParseError> {
        if let Some(escaped) = line.strip_prefix("//") {
            return Ok(ConsoleCommand::Broadcast(format!("/{}", escaped)));
        }
        let Some(body) = line.strip_prefix('/') else {
            return Ok(ConsoleCommand::Broadcast(line.to_string()));
        };

        let (name, rest) = match body.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim_start()),
            None => (body, ""),
        };
        let spec = COMMANDS
            .iter()
            .find(|spec| spec.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| ParseError::Unknown(name.to_string()))?;

        match spec.id {
            CommandId::Send => {
                let (key, message) = rest
                    .split_once(char::is_whitespace)
                    .ok_or(ParseError::Usage(spec.usage))?;
                Ok(ConsoleCommand::Send {
                    key: key.to_string(),
                    message: message.to_string(),
                })
            }
            CommandId::Rebind => {
                let mut parts = rest.split_whitespace();
                let port = parts
                    .next()
                    .and_then(|p| p.parse::<u16>().ok())
                    .ok_or(ParseError::Usage(spec.usage))?;
                let address = parts.next().unwrap_or("").to_string();
                Ok(ConsoleCommand::Rebind { address, port })
            }
            CommandId::Clients => Ok(ConsoleCommand::Clients),
            CommandId::Stats => Ok(ConsoleCommand::Stats),
            CommandId::Help => Ok(ConsoleCommand::Help),
            CommandId::Quit => Ok(ConsoleCommand::Quit),
        }
    }

    /// Run the command against the server
    pub async fn execute(self, server: &LineServer) -> Result<Flow> {
        let output = match self {
            ConsoleCommand::Broadcast(message) => {
                let report = server.send_all(&message).await?;
                let mut output = vec![format!("sent to {} client(s)", report.delivered.len())];
                if report.is_complete() {
                    return Ok(Flow::Continue(output));
                }
                output.extend(
                    report
                        .failed
                        .iter()
                        .map(|(key, e)| format!("failed {}: {}", key, e)),
                );
                output
            }
            ConsoleCommand::Send { key, message } => {
                server.send(&key, &message).await?;
                vec![format!("sent to {}", key)]
            }
            ConsoleCommand::Clients => {
                let clients = server.connections().await;
                if clients.is_empty() {
                    vec!["no clients connected".to_string()]
                } else {
                    clients
                        .iter()
                        .map(|c| format!("{}  connected {}s", c.key, c.connected_for_ms / 1000))
                        .collect()
                }
            }
            ConsoleCommand::Rebind { address, port } => {
                let addr = server.rebind(&address, port).await?;
                vec![format!("listening on {}", addr)]
            }
            ConsoleCommand::Stats => {
                vec![serde_json::to_string(&server.metrics().snapshot())?]
            }
            ConsoleCommand::Help => COMMANDS.iter().map(|spec| spec.usage.to_string()).collect(),
            ConsoleCommand::Quit => return Ok(Flow::Quit),
        };
        Ok(Flow::Continue(output))
    }
}
