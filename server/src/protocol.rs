//! Applies parsed commands to the registry and the vehicle
//!
//! The dispatcher keeps no state of its own. Authorization is re-read from
//! the registry for every command, so a session evicted or replaced between
//! two lines is never trusted on stale data. The registry and vehicle locks
//! are never held together: a privileged command checks the session, releases
//! the registry, then locks the vehicle.

use crate::client_manager::{ClientRegistry, ConnectionId, SessionId, SessionInfo};
use crate::event_log::{EventKind, EventLog};
use crate::vehicle::Vehicle;
use shared::{Command, ControlAction, Direction, Response};
use std::net::SocketAddr;
use std::sync::Arc;

/// Response to one request line plus whether the connection should close
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub response: Response,
    pub disconnect: bool,
}

#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ClientRegistry>,
    vehicle: Arc<Vehicle>,
    events: EventLog,
}

impl Dispatcher {
    pub fn new(registry: Arc<ClientRegistry>, vehicle: Arc<Vehicle>, events: EventLog) -> Self {
        Self {
            registry,
            vehicle,
            events,
        }
    }

    pub async fn handle_line(&self, connection: ConnectionId, peer: SocketAddr, line: &str) -> Reply {
        let command = Command::parse(line);
        self.handle(&command, connection, peer).await
    }

    pub async fn handle(&self, command: &Command, connection: ConnectionId, peer: SocketAddr) -> Reply {
        let session = match self.registry.find_by_connection(connection).await {
            Some(id) => self.registry.session(id).await,
            None => None,
        };

        let response = match command {
            Command::Authenticate { username, password } => {
                self.authenticate(session, peer, username, password).await
            }
            Command::GetTelemetry => self.telemetry(peer).await,
            Command::SendControl(action) => match self.authorize(session, command, peer) {
                Ok(_) => self.control(action, peer).await,
                Err(denied) => denied,
            },
            Command::ListUsers => match self.authorize(session, command, peer) {
                Ok(_) => {
                    let users = self.registry.list_descriptions().await;
                    self.events.record(
                        EventKind::UsersList,
                        Some(peer),
                        format!("User list sent ({} connected)", users.len()),
                    );
                    Response::Users(users)
                }
                Err(denied) => denied,
            },
            Command::Recharge => match self.authorize(session, command, peer) {
                Ok(_) => {
                    self.vehicle.recharge().await;
                    self.events
                        .record(EventKind::CommandExecuted, Some(peer), "Battery recharged");
                    Response::ok("Battery recharged to 100%")
                }
                Err(denied) => denied,
            },
            Command::Disconnect => {
                self.events
                    .record(EventKind::DisconnectRequest, Some(peer), "Disconnect request");
                Response::ok("Disconnecting")
            }
            Command::Unknown => {
                self.events
                    .record(EventKind::UnknownCommand, Some(peer), "Command not recognized");
                Response::not_recognized()
            }
        };

        Reply {
            response,
            disconnect: matches!(command, Command::Disconnect),
        }
    }

    async fn authenticate(
        &self,
        session: Option<SessionInfo>,
        peer: SocketAddr,
        username: &str,
        password: &str,
    ) -> Response {
        let id: SessionId = match session {
            Some(session) => session.id,
            None => return Response::client_not_found(),
        };

        if self.registry.authenticate(id, username, password).await {
            self.events.record(EventKind::AuthSuccess, Some(peer), username);
            Response::AuthSuccess
        } else {
            self.events.record(EventKind::AuthFailed, Some(peer), username);
            Response::AuthFailed
        }
    }

    async fn telemetry(&self, peer: SocketAddr) -> Response {
        let data = self.vehicle.decay_and_snapshot().await;
        self.events
            .record(EventKind::DataSent, Some(peer), "Telemetry data sent");
        Response::Telemetry {
            data,
            timestamp: self.vehicle.now(),
        }
    }

    /// Admits only sessions that exist and hold admin rights
    fn authorize(
        &self,
        session: Option<SessionInfo>,
        command: &Command,
        peer: SocketAddr,
    ) -> Result<SessionInfo, Response> {
        match session {
            None => Err(Response::client_not_found()),
            Some(session) if session.is_admin => Ok(session),
            Some(_) => {
                self.events.record(
                    EventKind::Unauthorized,
                    Some(peer),
                    format!("Unauthorized {} attempt", command.name()),
                );
                Err(Response::not_authorized())
            }
        }
    }

    async fn control(&self, action: &ControlAction, peer: SocketAddr) -> Response {
        let response = match action {
            ControlAction::SpeedUp => match self.vehicle.speed_up().await {
                Ok(speed) => Response::ok(format!("Speed increased to {} km/h", speed)),
                Err(e) => Response::error(e.to_string()),
            },
            ControlAction::SlowDown => match self.vehicle.slow_down().await {
                Ok(speed) => Response::ok(format!("Speed reduced to {} km/h", speed)),
                Err(e) => Response::error(e.to_string()),
            },
            ControlAction::TurnLeft => {
                self.vehicle.set_direction(Direction::Left).await;
                Response::ok("Turning left")
            }
            ControlAction::TurnRight => {
                self.vehicle.set_direction(Direction::Right).await;
                Response::ok("Turning right")
            }
            ControlAction::Invalid(token) => {
                self.events.record(
                    EventKind::Error,
                    Some(peer),
                    format!("Invalid vehicle command: {}", token),
                );
                return Response::error("Invalid command");
            }
        };

        self.events.record(
            EventKind::CommandExecuted,
            Some(peer),
            format!("{} -> {}", action.as_str(), response.to_string().trim_end()),
        );
        response
    }
}
