//! TCP connection to the telemetry server and the interactive console loop

use crate::input::{parse_input, Input};
use crate::rendering::{help_text, render};
use futures::StreamExt;
use log::{debug, info};
use shared::{Command, ServerMessage};
use std::io;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to read line: {0}")]
    Codec(#[from] LinesCodecError),

    #[error("server closed the connection")]
    Closed,

    #[error("command {0} has no wire form")]
    NotSendable(&'static str),
}

/// Collects received lines into frames ended by a blank line
#[derive(Debug, Default)]
pub struct FrameAssembler {
    lines: Vec<String>,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one line and returns the finished frame when `line` is the blank
    /// terminator. Blank lines between frames are ignored.
    pub fn push_line(&mut self, line: &str) -> Option<String> {
        if line.trim().is_empty() {
            if self.lines.is_empty() {
                return None;
            }
            let frame = self.lines.join("\r\n");
            self.lines.clear();
            return Some(frame);
        }

        self.lines.push(line.to_string());
        None
    }
}

pub struct Client {
    lines: FramedRead<OwnedReadHalf, LinesCodec>,
    writer: OwnedWriteHalf,
    assembler: FrameAssembler,
    server_addr: SocketAddr,
    authenticated: bool,
}

impl Client {
    pub async fn connect(server_addr: &str) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(server_addr).await?;
        let server_addr = stream.peer_addr()?;
        let (reader, writer) = stream.into_split();
        info!("Connected to {}", server_addr);

        Ok(Self {
            lines: FramedRead::new(reader, LinesCodec::new()),
            writer,
            assembler: FrameAssembler::new(),
            server_addr,
            authenticated: false,
        })
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    /// Last authentication outcome reported by the server
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub async fn send(&mut self, command: &Command) -> Result<(), ClientError> {
        let line = command
            .to_line()
            .ok_or(ClientError::NotSendable(command.name()))?;
        self.send_raw(&line).await
    }

    /// Writes `line` followed by a newline
    pub async fn send_raw(&mut self, line: &str) -> Result<(), ClientError> {
        debug!("-> {}", line);
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Next complete frame from the server, or None once the server has
    /// closed the connection.
    pub async fn next_message(&mut self) -> Result<Option<ServerMessage>, ClientError> {
        loop {
            let line = match self.lines.next().await {
                Some(line) => line?,
                None => return Ok(None),
            };

            if let Some(frame) = self.assembler.push_line(&line) {
                debug!("<- {:?}", frame);
                let message = ServerMessage::parse(&frame);
                match message {
                    ServerMessage::AuthSuccess => self.authenticated = true,
                    ServerMessage::AuthFailed => self.authenticated = false,
                    _ => {}
                }
                return Ok(Some(message));
            }
        }
    }

    /// Sends `command` and waits for its reply.
    ///
    /// Telemetry pushes arriving in between are returned in `pushes`. For
    /// `GetTelemetry` the first telemetry frame is taken as the reply.
    pub async fn request(
        &mut self,
        command: &Command,
        pushes: &mut Vec<ServerMessage>,
    ) -> Result<ServerMessage, ClientError> {
        self.send(command).await?;

        loop {
            let message = self.next_message().await?.ok_or(ClientError::Closed)?;
            let is_push = matches!(message, ServerMessage::Telemetry { .. })
                && *command != Command::GetTelemetry;
            if !is_push {
                return Ok(message);
            }
            pushes.push(message);
        }
    }

    /// Authenticates and reports whether the server accepted the credentials
    pub async fn authenticate(
        &mut self,
        username: &str,
        password: &str,
    ) -> Result<bool, ClientError> {
        let command = Command::Authenticate {
            username: username.to_string(),
            password: password.to_string(),
        };
        let mut pushes = Vec::new();
        let reply = self.request(&command, &mut pushes).await?;
        for push in &pushes {
            println!("{}", render(push));
        }
        println!("{}", render(&reply));
        Ok(reply == ServerMessage::AuthSuccess)
    }

    /// Interactive loop over console lines from `input` and frames from the
    /// server.
    ///
    /// Ends when the server confirms a disconnect or closes the connection.
    /// End of input sends a disconnect request.
    pub async fn run<R>(&mut self, input: R) -> Result<(), ClientError>
    where
        R: AsyncRead + Unpin,
    {
        let mut input = FramedRead::new(input, LinesCodec::new());
        let mut input_open = true;
        let mut disconnect_sent = false;

        println!("{}", help_text());

        loop {
            tokio::select! {
                line = input.next(), if input_open => match line {
                    Some(Ok(line)) => {
                        if self.handle_input(&line).await? {
                            disconnect_sent = true;
                        }
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => {
                        input_open = false;
                        if !disconnect_sent {
                            info!("Input closed, disconnecting");
                            self.send(&Command::Disconnect).await?;
                            disconnect_sent = true;
                        }
                    }
                },

                message = self.next_message() => match message? {
                    Some(message) => {
                        println!("{}", render(&message));
                        if message == ServerMessage::Ok("Disconnecting".to_string()) {
                            return Ok(());
                        }
                    }
                    None => {
                        println!("Server closed the connection");
                        return Ok(());
                    }
                },
            }
        }
    }

    /// Returns true when a disconnect request was sent
    async fn handle_input(&mut self, line: &str) -> Result<bool, ClientError> {
        match parse_input(line) {
            None => Ok(false),
            Some(Input::Help) => {
                println!("{}", help_text());
                Ok(false)
            }
            Some(Input::Usage(usage)) => {
                println!("Usage: {}", usage);
                Ok(false)
            }
            Some(Input::Raw(line)) => {
                self.send_raw(&line).await?;
                Ok(false)
            }
            Some(Input::Send(command)) => {
                if command.is_privileged() && !self.authenticated {
                    println!(
                        "Not authenticated: the server will refuse {}",
                        command.name()
                    );
                }
                self.send(&command).await?;
                Ok(command == Command::Disconnect)
            }
        }
    }
}
