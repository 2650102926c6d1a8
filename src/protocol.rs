//! IPC protocol for tmaxhoc daemon communication
//!
//! Defines request/response types for CLI ↔ daemon communication. Every
//! message is one MessagePack frame preceded by its length as a big-endian
//! `u32`.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::manager::UnitStatus;
use crate::supervisor::ManagedProcess;

pub const SOCKET_NAME: &str = "tmaxhoc.sock";

/// Upper bound on a single frame
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// Default control socket: `$XDG_RUNTIME_DIR/tmaxhoc.sock`, else the temp dir
pub fn socket_path() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(SOCKET_NAME)
}

/// Request from CLI to daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    /// List units; hidden ones only when `all` is set
    List { all: bool },
    /// Get unit status
    Status { name: String },
    /// Get a group's direct requirements
    Deps { name: String },
    /// Start a unit
    Start { name: String },
    /// Stop a unit
    Stop { name: String },
    /// Hard kill a unit stuck stopping
    ForceStop { name: String },
    /// Reconcile with the session now instead of waiting for the next tick
    Reconcile,
    /// Ping (health check)
    Ping,
}

/// One tracked process of a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub id: String,
    pub pid: i32,
    pub name: String,
    pub adopted: bool,
    pub stopping: bool,
}

impl From<&ManagedProcess> for ProcessInfo {
    fn from(process: &ManagedProcess) -> Self {
        Self {
            id: process.id.to_string(),
            pid: process.pid,
            name: process.name.clone(),
            adopted: process.adopted,
            stopping: process.is_stopping(),
        }
    }
}

/// Unit info returned by list/status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitInfo {
    pub name: String,
    /// `service` or `group`
    pub kind: String,
    pub status: UnitStatus,
    pub description: String,
    pub styles: String,
    pub hidden: bool,
    /// Container name, for services
    pub container: Option<String>,
    pub processes: Vec<ProcessInfo>,
    /// Running direct requirements, for groups
    pub running_requirements: Option<usize>,
    pub force_stop_allowed: bool,
}

/// Response from daemon to CLI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    /// Success with no data
    Ok,
    /// List of units
    Units(Vec<UnitInfo>),
    /// Single unit status
    Status(UnitInfo),
    /// Dependencies as list of unit names
    Deps(Vec<String>),
    /// What a forced reconciliation changed
    Reconciled {
        crashed: usize,
        stopped: usize,
        adopted: usize,
    },
    /// Error with message
    Error(String),
    /// Pong (response to ping)
    Pong,
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode message: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("Failed to decode message: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("Frame of {0} bytes exceeds limit")]
    TooLarge(usize),
}

fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, ProtocolError> {
    let body = rmp_serde::to_vec(message)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::TooLarge(body.len()));
    }

    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

fn check_len(header: [u8; 4]) -> Result<usize, ProtocolError> {
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::TooLarge(len));
    }
    Ok(len)
}

/// Read one frame from an async stream
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T, ProtocolError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut header = [0u8; 4];
    reader.read_exact(&mut header).await?;
    let mut body = vec![0u8; check_len(header)?];
    reader.read_exact(&mut body).await?;
    Ok(rmp_serde::from_slice(&body)?)
}

/// Write one frame to an async stream
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    writer.write_all(&encode(message)?).await?;
    writer.flush().await?;
    Ok(())
}

/// Send one request and wait for its response (blocking)
pub fn call(path: &Path, request: &Request) -> Result<Response, ProtocolError> {
    let mut stream = UnixStream::connect(path)?;
    stream.write_all(&encode(request)?)?;

    let mut header = [0u8; 4];
    stream.read_exact(&mut header)?;
    let mut body = vec![0u8; check_len(header)?];
    stream.read_exact(&mut body)?;
    Ok(rmp_serde::from_slice(&body)?)
}
