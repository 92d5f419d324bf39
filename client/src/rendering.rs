//! Console presentation of server frames

use shared::{ServerMessage, Telemetry};

/// Battery level at which telemetry lines carry a warning
pub const LOW_BATTERY_PCT: u32 = 20;

pub fn render(message: &ServerMessage) -> String {
    match message {
        ServerMessage::AuthSuccess => "Authenticated, vehicle control enabled".to_string(),
        ServerMessage::AuthFailed => "Authentication failed".to_string(),
        ServerMessage::Telemetry { data, timestamp } => render_telemetry(data, *timestamp),
        ServerMessage::Users(users) => {
            let mut out = format!("Connected users ({}):", users.len());
            for user in users {
                out.push_str("\n  - ");
                out.push_str(user);
            }
            out
        }
        ServerMessage::Ok(message) => format!("OK: {}", message),
        ServerMessage::Error(message) => format!("ERROR: {}", message),
        ServerMessage::Other(text) => format!("Server: {}", text),
    }
}

fn render_telemetry(data: &Telemetry, timestamp: Option<u64>) -> String {
    let mut out = String::from("[telemetry");
    if let Some(timestamp) = timestamp {
        out.push_str(&format!(" @{}", timestamp));
    }
    out.push_str(&format!(
        "] speed {} km/h | battery {}% | temperature {}C | direction {}",
        data.speed_kmh, data.battery_pct, data.temperature_c, data.direction
    ));
    if data.battery_pct <= LOW_BATTERY_PCT {
        out.push_str(" | LOW BATTERY");
    }
    out
}

pub fn help_text() -> &'static str {
    "Commands:\n\
     \x20 auth <user> <password>  authenticate\n\
     \x20 data                    request telemetry\n\
     \x20 up | down               change speed (admin)\n\
     \x20 left | right            turn (admin)\n\
     \x20 users                   list connected users (admin)\n\
     \x20 recharge                recharge the battery (admin)\n\
     \x20 quit                    disconnect\n\
     \x20 help                    show this text\n\
     Anything else is sent to the server unchanged."
}
