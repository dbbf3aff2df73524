//! Colon-delimited wire protocol carried inside channel frames.
//!
//! ## Requests (client → server)
//!
//! ```text
//! GET:flag1
//! SET:flag1:3
//! CHANGE:flag1:4
//! REMOVE:flag1
//! SUB:flag1
//! UNSUB:flag1
//! ```
//!
//! ## Responses and pushes (server → client)
//!
//! ```text
//! SUCCESS:GET:flag1:3
//! SUCCESS:SET:flag1:3
//! SUCCESS:REMOVE:flag1
//! ERROR:SET:flag1:flag flag1 already exists
//! ERROR:unknown command 'PING'
//! NOTIFY:flag1:4
//! ```

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::{AppError, Result};

const SEPARATOR: char = ':';

/// Request verbs understood by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Read a flag.
    Get,
    /// Create a flag that does not exist yet.
    Set,
    /// Create or overwrite a flag and notify subscribers.
    Change,
    /// Delete a flag.
    Remove,
    /// Subscribe the connection to change notifications.
    Sub,
    /// Cancel a subscription.
    Unsub,
}

impl Command {
    /// Every command, in wire order.
    pub const ALL: [Self; 6] = [
        Self::Get,
        Self::Set,
        Self::Change,
        Self::Remove,
        Self::Sub,
        Self::Unsub,
    ];

    /// Wire spelling.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Set => "SET",
            Self::Change => "CHANGE",
            Self::Remove => "REMOVE",
            Self::Sub => "SUB",
            Self::Unsub => "UNSUB",
        }
    }

    /// Whether requests carry a value field.
    #[must_use]
    pub fn takes_value(self) -> bool {
        matches!(self, Self::Set | Self::Change)
    }

    /// Whether a successful response echoes `flag:value`.
    #[must_use]
    pub fn replies_with_value(self) -> bool {
        matches!(self, Self::Get | Self::Set | Self::Change)
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|command| command.as_str() == raw)
            .ok_or_else(|| AppError::UnknownCommand(raw.to_owned()))
    }
}

/// Check that `name` can travel inside a colon-delimited message.
///
/// # Errors
///
/// Returns [`AppError::Protocol`] for an empty name or one containing `:`.
pub fn validate_flag_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(AppError::Protocol("flag name must not be empty".into()));
    }
    if name.contains(SEPARATOR) {
        return Err(AppError::Protocol(format!(
            "flag name '{name}' must not contain ':'"
        )));
    }
    Ok(())
}

/// A parsed client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Requested operation.
    pub command: Command,
    /// Target flag.
    pub flag: String,
    /// Value for `SET`/`CHANGE`.
    pub value: Option<u8>,
}

impl Request {
    /// Build a request, checking the flag name and value presence.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] if the name is invalid, a value is
    /// missing for `SET`/`CHANGE`, or a value is supplied to any other command.
    pub fn new(command: Command, flag: impl Into<String>, value: Option<u8>) -> Result<Self> {
        let flag = flag.into();
        validate_flag_name(&flag)?;
        match (command.takes_value(), value) {
            (true, None) => Err(AppError::Protocol(format!(
                "{command} request for flag {flag} requires a value"
            ))),
            (false, Some(_)) => Err(AppError::Protocol(format!(
                "{command} request for flag {flag} does not take a value"
            ))),
            _ => Ok(Self {
                command,
                flag,
                value,
            }),
        }
    }

    /// Parse a request line as received by the server.
    ///
    /// # Errors
    ///
    /// Returns the `ERROR` response the server should send back. When the
    /// command and flag are identifiable the response names them so the
    /// client can correlate it; otherwise it is a bare [`Response::Rejected`].
    pub fn parse(line: &str) -> std::result::Result<Self, Response> {
        let parts: Vec<&str> = line.split(SEPARATOR).collect();
        if parts.len() < 2 || parts.len() > 3 {
            return Err(Response::Rejected {
                reason: format!(
                    "malformed request with {} fields, expected a command, a flag name and an optional value",
                    parts.len()
                ),
            });
        }

        let command = Command::from_str(parts[0]).map_err(|_| Response::Rejected {
            reason: format!("unknown command '{}'", parts[0]),
        })?;

        let flag = parts[1];
        if flag.is_empty() {
            return Err(Response::Rejected {
                reason: format!("{command} request has an empty flag name"),
            });
        }

        let value = match parts.get(2) {
            None => None,
            Some(raw) => Some(raw.parse::<u8>().map_err(|_| {
                Response::error(
                    command,
                    flag,
                    format!("invalid value '{raw}' for flag {flag}, expected 0 to 255"),
                )
            })?),
        };

        Self::new(command, flag, value)
            .map_err(|err| Response::error(command, flag, protocol_reason(err)))
    }

    /// Key under which the client waits for the response.
    ///
    /// `GET`, `REMOVE`, `SUB` and `UNSUB` use the flag name; `SET` and
    /// `CHANGE` use `flag:value` because the server echoes the value back.
    #[must_use]
    pub fn correlation_token(&self) -> String {
        match self.value {
            Some(value) => format!("{}{SEPARATOR}{value}", self.flag),
            None => self.flag.clone(),
        }
    }

    /// Wire form.
    #[must_use]
    pub fn encode(&self) -> String {
        match self.value {
            Some(value) => format!("{}{SEPARATOR}{}{SEPARATOR}{value}", self.command, self.flag),
            None => format!("{}{SEPARATOR}{}", self.command, self.flag),
        }
    }
}

/// Server → client message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// `SUCCESS:COMMAND:flag[:value]`.
    Success {
        /// Command being answered.
        command: Command,
        /// Flag named by the request.
        flag: String,
        /// Echoed or read value for `GET`/`SET`/`CHANGE`.
        value: Option<u8>,
    },
    /// `ERROR:COMMAND:flag:reason`.
    Error {
        /// Command being answered.
        command: Command,
        /// Flag named by the request.
        flag: String,
        /// Human-readable failure description.
        reason: String,
    },
    /// `ERROR:reason` for requests that could not be attributed.
    Rejected {
        /// Human-readable failure description.
        reason: String,
    },
    /// `NOTIFY:flag:value` pushed to subscribers.
    Notify {
        /// Changed flag.
        flag: String,
        /// New value.
        value: u8,
    },
}

impl Response {
    /// Build an attributed `ERROR` response.
    #[must_use]
    pub fn error(command: Command, flag: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Error {
            command,
            flag: flag.into(),
            reason: reason.into(),
        }
    }

    /// Wire form.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Success {
                command,
                flag,
                value: Some(value),
            } => format!("SUCCESS:{command}:{flag}:{value}"),
            Self::Success {
                command,
                flag,
                value: None,
            } => format!("SUCCESS:{command}:{flag}"),
            Self::Error {
                command,
                flag,
                reason,
            } => format!("ERROR:{command}:{flag}:{reason}"),
            Self::Rejected { reason } => format!("ERROR:{reason}"),
            Self::Notify { flag, value } => format!("NOTIFY:{flag}:{value}"),
        }
    }

    /// Parse a message line as received by the client.
    ///
    /// The trailing field of an attributed `ERROR` keeps any colons it
    /// contains.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] for an unknown status, an unknown
    /// command, a wrong field count, or a non-numeric value.
    pub fn parse(line: &str) -> Result<Self> {
        let (status, rest) = line
            .split_once(SEPARATOR)
            .ok_or_else(|| AppError::Protocol(format!("message without status: '{line}'")))?;

        match status {
            "NOTIFY" => {
                let parts: Vec<&str> = rest.split(SEPARATOR).collect();
                let [flag, raw_value] = parts.as_slice() else {
                    return Err(AppError::Protocol(format!(
                        "NOTIFY expects 3 fields, got {}",
                        parts.len() + 1
                    )));
                };
                Ok(Self::Notify {
                    flag: (*flag).to_owned(),
                    value: parse_value(raw_value)?,
                })
            }
            "SUCCESS" => parse_success(rest),
            "ERROR" => Ok(parse_error(rest)),
            other => Err(AppError::Protocol(format!("unknown message status '{other}'"))),
        }
    }
}

fn parse_success(rest: &str) -> Result<Response> {
    let parts: Vec<&str> = rest.split(SEPARATOR).collect();
    let (raw_command, flag) = match parts.as_slice() {
        [raw_command, flag, ..] => (*raw_command, *flag),
        _ => {
            return Err(AppError::Protocol(format!(
                "SUCCESS expects at least 3 fields, got {}",
                parts.len() + 1
            )))
        }
    };
    let command = Command::from_str(raw_command)
        .map_err(|_| AppError::Protocol(format!("unknown command '{raw_command}' in response")))?;

    let value = match (command.replies_with_value(), parts.as_slice()) {
        (true, [_, _, raw_value]) => Some(parse_value(raw_value)?),
        (false, [_, _]) => None,
        _ => {
            return Err(AppError::Protocol(format!(
                "SUCCESS:{command} has an unexpected field count of {}",
                parts.len() + 1
            )))
        }
    };

    Ok(Response::Success {
        command,
        flag: flag.to_owned(),
        value,
    })
}

fn parse_error(rest: &str) -> Response {
    let mut parts = rest.splitn(3, SEPARATOR);
    if let (Some(raw_command), Some(flag), Some(reason)) = (parts.next(), parts.next(), parts.next())
    {
        if let Ok(command) = Command::from_str(raw_command) {
            return Response::error(command, flag, reason);
        }
    }
    Response::Rejected {
        reason: rest.to_owned(),
    }
}

fn parse_value(raw: &str) -> Result<u8> {
    raw.parse::<u8>()
        .map_err(|_| AppError::Protocol(format!("invalid flag value '{raw}'")))
}

/// Strip the category prefix from a validation error for use as an `ERROR` reason.
fn protocol_reason(err: AppError) -> String {
    match err {
        AppError::Protocol(msg) => msg,
        other => other.to_string(),
    }
}
