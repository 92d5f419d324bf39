//! Translation of typed console words into protocol commands

use shared::{Command, ControlAction};

/// What a line typed by the user asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// A protocol command to send
    Send(Command),
    /// Text the user typed that is not a known word, sent as is
    Raw(String),
    /// Show the command reference
    Help,
    /// A known word used with the wrong arguments
    Usage(&'static str),
}

/// Parses one console line. Blank lines yield nothing.
pub fn parse_input(line: &str) -> Option<Input> {
    let line = line.trim();
    let mut words = line.split_whitespace();
    let word = words.next()?;
    let args: Vec<&str> = words.collect();

    let input = match word.to_ascii_lowercase().as_str() {
        "auth" | "login" => match args.as_slice() {
            [username, password] => Input::Send(Command::Authenticate {
                username: username.to_string(),
                password: password.to_string(),
            }),
            _ => Input::Usage("auth <user> <password>"),
        },
        "data" | "get" => Input::Send(Command::GetTelemetry),
        "up" | "speed_up" => Input::Send(Command::SendControl(ControlAction::SpeedUp)),
        "down" | "slow_down" => Input::Send(Command::SendControl(ControlAction::SlowDown)),
        "left" => Input::Send(Command::SendControl(ControlAction::TurnLeft)),
        "right" => Input::Send(Command::SendControl(ControlAction::TurnRight)),
        "users" => Input::Send(Command::ListUsers),
        "recharge" => Input::Send(Command::Recharge),
        "quit" | "exit" | "disconnect" => Input::Send(Command::Disconnect),
        "help" | "?" => Input::Help,
        _ => Input::Raw(line.to_string()),
    };

    Some(input)
}
