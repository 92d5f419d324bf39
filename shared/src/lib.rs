//! Text protocol spoken between the telemetry server and its clients.
//!
//! Requests are single ASCII lines (`AUTH: <user> <pass>`, `GET_DATA:`,
//! `SEND_CMD: <ACTION>`, `LIST_USERS:`, `RECHARGE:`, `DISCONNECT:`). Every
//! server reply is a frame of one or more lines closed by an empty line, so
//! on the wire each frame ends in `\r\n\r\n`.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 8080;
pub const MAX_CLIENTS: usize = 50;
pub const TELEMETRY_INTERVAL_SECS: u64 = 10;
pub const CLIENT_TIMEOUT_SECS: u64 = 300;
pub const REAP_INTERVAL_SECS: u64 = 30;
pub const MAX_LINE_LEN: usize = 1024;

pub const ADMIN_USERNAME: &str = "admin";
pub const ADMIN_PASSWORD: &str = "admin123";

pub const SERVER_NAME: &str = "telemetry_server";
pub const FRAME_TERMINATOR: &str = "\r\n\r\n";

pub const MIN_SPEED: u32 = 0;
pub const MAX_SPEED: u32 = 100;
pub const SPEED_STEP: u32 = 10;
pub const MAX_BATTERY: u32 = 100;
pub const AMBIENT_TEMPERATURE: u32 = 20;
pub const MAX_TEMPERATURE: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Straight,
    Left,
    Right,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Straight => "STRAIGHT",
            Direction::Left => "LEFT",
            Direction::Right => "RIGHT",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown direction '{0}'")]
pub struct ParseDirectionError(pub String);

impl FromStr for Direction {
    type Err = ParseDirectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STRAIGHT" => Ok(Direction::Straight),
            "LEFT" => Ok(Direction::Left),
            "RIGHT" => Ok(Direction::Right),
            other => Err(ParseDirectionError(other.to_string())),
        }
    }
}

/// Vehicle control carried by `SEND_CMD:`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlAction {
    SpeedUp,
    SlowDown,
    TurnLeft,
    TurnRight,
    /// Well-formed request naming an action the vehicle does not know
    Invalid(String),
}

impl ControlAction {
    pub fn from_token(token: &str) -> Self {
        match token {
            "SPEED_UP" => ControlAction::SpeedUp,
            "SLOW_DOWN" => ControlAction::SlowDown,
            "TURN_LEFT" => ControlAction::TurnLeft,
            "TURN_RIGHT" => ControlAction::TurnRight,
            other => ControlAction::Invalid(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ControlAction::SpeedUp => "SPEED_UP",
            ControlAction::SlowDown => "SLOW_DOWN",
            ControlAction::TurnLeft => "TURN_LEFT",
            ControlAction::TurnRight => "TURN_RIGHT",
            ControlAction::Invalid(token) => token,
        }
    }
}

/// One parsed request line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Authenticate { username: String, password: String },
    GetTelemetry,
    SendControl(ControlAction),
    ListUsers,
    Recharge,
    Disconnect,
    Unknown,
}

impl Command {
    /// Parses a raw request line.
    ///
    /// The line is trimmed and matched on its prefix. `AUTH:` needs exactly
    /// two tokens and `SEND_CMD:` exactly one; any other shape is `Unknown`.
    pub fn parse(line: &str) -> Self {
        let line = line.trim();

        if let Some(rest) = line.strip_prefix("AUTH:") {
            let tokens: Vec<&str> = rest.split_whitespace().collect();
            return match tokens.as_slice() {
                [username, password] => Command::Authenticate {
                    username: username.to_string(),
                    password: password.to_string(),
                },
                _ => Command::Unknown,
            };
        }

        if line.starts_with("GET_DATA:") {
            return Command::GetTelemetry;
        }

        if let Some(rest) = line.strip_prefix("SEND_CMD:") {
            let tokens: Vec<&str> = rest.split_whitespace().collect();
            return match tokens.as_slice() {
                [action] => Command::SendControl(ControlAction::from_token(action)),
                _ => Command::Unknown,
            };
        }

        if line.starts_with("LIST_USERS:") {
            return Command::ListUsers;
        }

        if line.starts_with("RECHARGE:") {
            return Command::Recharge;
        }

        if line.starts_with("DISCONNECT:") {
            return Command::Disconnect;
        }

        Command::Unknown
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Authenticate { .. } => "AUTH",
            Command::GetTelemetry => "GET_DATA",
            Command::SendControl(_) => "SEND_CMD",
            Command::ListUsers => "LIST_USERS",
            Command::Recharge => "RECHARGE",
            Command::Disconnect => "DISCONNECT",
            Command::Unknown => "UNKNOWN",
        }
    }

    /// Commands that only an admin session may run
    pub fn is_privileged(&self) -> bool {
        matches!(
            self,
            Command::SendControl(_) | Command::ListUsers | Command::Recharge
        )
    }

    /// Request line as a client sends it, without the trailing newline.
    /// `Unknown` has no wire form.
    pub fn to_line(&self) -> Option<String> {
        match self {
            Command::Authenticate { username, password } => {
                Some(format!("AUTH: {} {}", username, password))
            }
            Command::GetTelemetry => Some("GET_DATA:".to_string()),
            Command::SendControl(action) => Some(format!("SEND_CMD: {}", action.as_str())),
            Command::ListUsers => Some("LIST_USERS:".to_string()),
            Command::Recharge => Some("RECHARGE:".to_string()),
            Command::Disconnect => Some("DISCONNECT:".to_string()),
            Command::Unknown => None,
        }
    }
}

/// Returns true for lines that only decorate a request.
///
/// Clients follow each command with `USER:` and `TIMESTAMP:` lines and a
/// blank line; the server refreshes activity on them but never answers.
pub fn is_header_line(line: &str) -> bool {
    let line = line.trim();
    line.is_empty() || line.starts_with("USER:") || line.starts_with("TIMESTAMP:")
}

/// Snapshot of the vehicle as reported to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Telemetry {
    pub speed_kmh: u32,
    pub battery_pct: u32,
    pub temperature_c: u32,
    pub direction: Direction,
}

impl Telemetry {
    /// `DATA: <speed> <battery> <temperature> <direction>`
    pub fn data_line(&self) -> String {
        format!(
            "DATA: {} {} {} {}",
            self.speed_kmh, self.battery_pct, self.temperature_c, self.direction
        )
    }

    pub fn to_frame(&self, timestamp: u64) -> String {
        format!(
            "{}\r\nSERVER: {}\r\nTIMESTAMP: {}{}",
            self.data_line(),
            SERVER_NAME,
            timestamp,
            FRAME_TERMINATOR
        )
    }

    pub fn parse_data_line(line: &str) -> Option<Self> {
        let rest = line.trim().strip_prefix("DATA:")?;
        let mut fields = rest.split_whitespace();

        let speed_kmh = fields.next()?.parse().ok()?;
        let battery_pct = fields.next()?.parse().ok()?;
        let temperature_c = fields.next()?.parse().ok()?;
        let direction = fields.next()?.parse().ok()?;

        if fields.next().is_some() {
            return None;
        }

        Some(Self {
            speed_kmh,
            battery_pct,
            temperature_c,
            direction,
        })
    }
}

/// Every reply the server sends, rendered with `Display` including the
/// frame terminator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    AuthSuccess,
    AuthFailed,
    Telemetry { data: Telemetry, timestamp: u64 },
    Users(Vec<String>),
    Ok(String),
    Error(String),
}

impl Response {
    pub fn ok(message: impl Into<String>) -> Self {
        Response::Ok(message.into())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Response::Error(message.into())
    }

    pub fn not_authorized() -> Self {
        Response::error("Not authorized")
    }

    pub fn client_not_found() -> Self {
        Response::error("Client not found")
    }

    pub fn not_recognized() -> Self {
        Response::error("Command not recognized")
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::AuthSuccess => write!(f, "AUTH_SUCCESS{}", FRAME_TERMINATOR),
            Response::AuthFailed => write!(f, "AUTH_FAILED{}", FRAME_TERMINATOR),
            Response::Telemetry { data, timestamp } => f.write_str(&data.to_frame(*timestamp)),
            Response::Users(descriptions) => {
                write!(f, "USERS: {}{}", descriptions.join(" "), FRAME_TERMINATOR)
            }
            Response::Ok(message) => write!(f, "OK: {}{}", message, FRAME_TERMINATOR),
            Response::Error(message) => write!(f, "ERROR: {}{}", message, FRAME_TERMINATOR),
        }
    }
}

/// Client-side view of a received frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    AuthSuccess,
    AuthFailed,
    Telemetry {
        data: Telemetry,
        timestamp: Option<u64>,
    },
    Users(Vec<String>),
    Ok(String),
    Error(String),
    Other(String),
}

impl ServerMessage {
    /// Classifies a frame by its first non-empty line.
    pub fn parse(frame: &str) -> Self {
        let mut lines = frame.lines().map(str::trim).filter(|l| !l.is_empty());
        let first = match lines.next() {
            Some(line) => line,
            None => return ServerMessage::Other(String::new()),
        };

        match first {
            "AUTH_SUCCESS" => return ServerMessage::AuthSuccess,
            "AUTH_FAILED" => return ServerMessage::AuthFailed,
            _ => {}
        }

        if first.starts_with("DATA:") {
            if let Some(data) = Telemetry::parse_data_line(first) {
                let timestamp = lines
                    .filter_map(|l| l.strip_prefix("TIMESTAMP:"))
                    .find_map(|ts| ts.trim().parse().ok());
                return ServerMessage::Telemetry { data, timestamp };
            }
            return ServerMessage::Other(first.to_string());
        }

        if let Some(rest) = first.strip_prefix("USERS:") {
            return ServerMessage::Users(rest.split_whitespace().map(String::from).collect());
        }

        if let Some(rest) = first.strip_prefix("OK:") {
            return ServerMessage::Ok(rest.trim().to_string());
        }

        if let Some(rest) = first.strip_prefix("ERROR:") {
            return ServerMessage::Error(rest.trim().to_string());
        }

        ServerMessage::Other(first.to_string())
    }
}
