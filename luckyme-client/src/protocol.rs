//! Newline-delimited JSON transport to the daemon over its Unix socket.
//!
//! `register` opens a connection that becomes the session channel: the
//! client writes one [`Command`] per line, the daemon pushes one [`Event`]
//! per line. `unregister` uses a one-shot request/response connection.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use luckyme_core::{io_err, ClientError, Event, SessionId};

use crate::dispatcher::EventSink;
use crate::link::{Command, DaemonLink};
use crate::paths::socket_path;

/// Error code the daemon uses when a session name is taken.
pub const CODE_ALREADY_REGISTERED: &str = "already_registered";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum DaemonRequest {
    Register { name: String },
    Unregister { name: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl DaemonResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
            code: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

fn connect(socket: &Path) -> Result<UnixStream, ClientError> {
    UnixStream::connect(socket).map_err(|err| match err.kind() {
        std::io::ErrorKind::NotFound
        | std::io::ErrorKind::ConnectionRefused
        | std::io::ErrorKind::ConnectionReset => {
            ClientError::Daemon(format!("daemon is not reachable at {}", socket.display()))
        }
        _ => io_err(socket, err),
    })
}

fn write_line<T: Serialize>(stream: &mut UnixStream, socket: &Path, value: &T) -> Result<(), ClientError> {
    let mut payload = serde_json::to_string(value)?;
    payload.push('\n');
    stream
        .write_all(payload.as_bytes())
        .map_err(|e| io_err(socket, e))?;
    stream.flush().map_err(|e| io_err(socket, e))
}

fn read_response(
    reader: &mut BufReader<UnixStream>,
    socket: &Path,
) -> Result<DaemonResponse, ClientError> {
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .map_err(|e| io_err(socket, e))?;
    if read == 0 {
        return Err(ClientError::Protocol(
            "daemon closed connection before responding".to_string(),
        ));
    }
    Ok(serde_json::from_str(line.trim_end())?)
}

/// Send one JSON request on a fresh connection and return one response.
pub fn send_request(socket: &Path, request: &DaemonRequest) -> Result<DaemonResponse, ClientError> {
    let mut stream = connect(socket)?;
    write_line(&mut stream, socket, request)?;
    let mut reader = BufReader::new(stream);
    read_response(&mut reader, socket)
}

struct Channel {
    /// Serialises command lines; never locked while `sessions` is held.
    writer: Arc<Mutex<UnixStream>>,
    control: UnixStream,
    reader: Option<BufReader<UnixStream>>,
    thread: Option<JoinHandle<()>>,
}

/// [`DaemonLink`] over the daemon's Unix socket.
pub struct SocketLink {
    socket: PathBuf,
    sessions: Mutex<HashMap<SessionId, Channel>>,
}

impl SocketLink {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn for_home(home: &Path) -> Self {
        Self::new(socket_path(home))
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }
}

impl DaemonLink for SocketLink {
    fn register(&self, name: &str) -> Result<SessionId, ClientError> {
        let mut writer = connect(&self.socket)?;
        let reader = writer.try_clone().map_err(|e| io_err(&self.socket, e))?;
        let control = writer.try_clone().map_err(|e| io_err(&self.socket, e))?;
        let mut reader = BufReader::new(reader);

        write_line(
            &mut writer,
            &self.socket,
            &DaemonRequest::Register {
                name: name.to_string(),
            },
        )?;
        let response = read_response(&mut reader, &self.socket)?;

        if !response.ok {
            if response.code.as_deref() == Some(CODE_ALREADY_REGISTERED) {
                return Err(ClientError::AlreadyRegistered {
                    name: name.to_string(),
                });
            }
            return Err(ClientError::RegistrationFailed {
                name: name.to_string(),
                reason: response
                    .error
                    .unwrap_or_else(|| "unknown daemon error".to_string()),
            });
        }

        let id = response
            .data
            .as_ref()
            .and_then(|data| data.get("session"))
            .and_then(Value::as_u64)
            .map(SessionId)
            .ok_or_else(|| ClientError::Protocol("registration response has no session id".to_string()))?;

        self.sessions.lock().insert(
            id,
            Channel {
                writer: Arc::new(Mutex::new(writer)),
                control,
                reader: Some(reader),
                thread: None,
            },
        );
        Ok(id)
    }

    fn unregister(&self, name: &str) -> Result<(), ClientError> {
        let response = send_request(
            &self.socket,
            &DaemonRequest::Unregister {
                name: name.to_string(),
            },
        )?;
        if response.ok {
            Ok(())
        } else {
            Err(ClientError::Protocol(
                response
                    .error
                    .unwrap_or_else(|| "unknown daemon error".to_string()),
            ))
        }
    }

    fn send(&self, session: SessionId, command: Command) -> Result<(), ClientError> {
        let writer = self
            .sessions
            .lock()
            .get(&session)
            .map(|channel| channel.writer.clone())
            .ok_or_else(|| ClientError::Protocol(format!("unknown session {session}")))?;
        let mut writer = writer.lock();
        write_line(&mut writer, &self.socket, &command)
    }

    fn attach(&self, session: SessionId, sink: EventSink) -> Result<(), ClientError> {
        let mut sessions = self.sessions.lock();
        let channel = sessions
            .get_mut(&session)
            .ok_or_else(|| ClientError::Protocol(format!("unknown session {session}")))?;
        let reader = channel
            .reader
            .take()
            .ok_or_else(|| ClientError::EventLoop(format!("session {session} is already attached")))?;

        let thread = thread::Builder::new()
            .name(format!("luckyme-link-{session}"))
            .spawn(move || read_events(session, reader, sink))
            .map_err(|e| io_err(&self.socket, e))?;
        channel.thread = Some(thread);
        Ok(())
    }

    fn endpoint(&self) -> String {
        self.socket.display().to_string()
    }

    fn release(&self, session: SessionId) {
        let Some(channel) = self.sessions.lock().remove(&session) else {
            return;
        };
        let _ = channel.control.shutdown(Shutdown::Both);
        if let Some(thread) = channel.thread {
            if thread.thread().id() != thread::current().id() && thread.join().is_err() {
                tracing::error!(session = %session, "event reader thread panicked");
            }
        }
    }
}

fn read_events(session: SessionId, mut reader: BufReader<UnixStream>, sink: EventSink) {
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => {
                tracing::debug!(session = %session, "daemon closed the session channel");
                break;
            }
            Ok(_) => match serde_json::from_str::<Event>(line.trim_end()) {
                Ok(event) => {
                    if sink.deliver(event).is_err() {
                        tracing::debug!(session = %session, "event loop gone, reader exiting");
                        break;
                    }
                }
                Err(err) => tracing::warn!(session = %session, error = %err, "malformed event from daemon"),
            },
            Err(err) => {
                tracing::debug!(session = %session, error = %err, "session channel read failed");
                break;
            }
        }
    }
}
