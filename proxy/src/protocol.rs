//! Wire protocol: opcodes, framing and body codec.
//!
//! Every message is a `u32` big-endian length prefix followed by a body of
//! successive MessagePack values. A request body is `opcode, args...`; a
//! response body is `status: bool, results...`. Vector arguments are
//! single MessagePack arrays. Calls are strictly synchronous
//! request/response; batching happens in the buffered-slave layer above
//! this protocol, never here.

use std::fmt;
use std::io::{Cursor, Read, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use cosim_core::SlaveError;

/// Upper bound on a single frame; guards against garbage length prefixes.
const MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

/// Protocol-level failures.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown opcode {0}")]
    UnknownOpcode(u8),

    #[error("encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<ProtocolError> for SlaveError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::Io(e) => SlaveError::Io(e),
            other => SlaveError::Protocol(other.to_string()),
        }
    }
}

/// Remote operation selector. Values are part of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Instantiate = 0,
    SetupExperiment = 1,
    EnterInitializationMode = 2,
    ExitInitializationMode = 3,

    Step = 4,
    Terminate = 5,
    Reset = 6,
    FreeInstance = 7,

    ReadInt = 8,
    ReadReal = 9,
    ReadString = 10,
    ReadBool = 11,

    WriteInt = 12,
    WriteReal = 13,
    WriteString = 14,
    WriteBool = 15,
}

impl Opcode {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Opcode::Instantiate => "instantiate",
            Opcode::SetupExperiment => "setup_experiment",
            Opcode::EnterInitializationMode => "enter_initialization_mode",
            Opcode::ExitInitializationMode => "exit_initialization_mode",
            Opcode::Step => "step",
            Opcode::Terminate => "terminate",
            Opcode::Reset => "reset",
            Opcode::FreeInstance => "free_instance",
            Opcode::ReadInt => "read_int",
            Opcode::ReadReal => "read_real",
            Opcode::ReadString => "read_string",
            Opcode::ReadBool => "read_bool",
            Opcode::WriteInt => "write_int",
            Opcode::WriteReal => "write_real",
            Opcode::WriteString => "write_string",
            Opcode::WriteBool => "write_bool",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u8> for Opcode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let op = match value {
            0 => Opcode::Instantiate,
            1 => Opcode::SetupExperiment,
            2 => Opcode::EnterInitializationMode,
            3 => Opcode::ExitInitializationMode,
            4 => Opcode::Step,
            5 => Opcode::Terminate,
            6 => Opcode::Reset,
            7 => Opcode::FreeInstance,
            8 => Opcode::ReadInt,
            9 => Opcode::ReadReal,
            10 => Opcode::ReadString,
            11 => Opcode::ReadBool,
            12 => Opcode::WriteInt,
            13 => Opcode::WriteReal,
            14 => Opcode::WriteString,
            15 => Opcode::WriteBool,
            other => return Err(ProtocolError::UnknownOpcode(other)),
        };
        Ok(op)
    }
}

/// Address of a running boot service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteInfo {
    pub host: String,
    pub port: u16,
}

impl RemoteInfo {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for RemoteInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Write one length-prefixed frame.
pub fn write_frame(w: &mut impl Write, body: &[u8]) -> std::io::Result<()> {
    let len = body.len() as u32;
    w.write_all(&len.to_be_bytes())?;
    w.write_all(body)?;
    w.flush()
}

/// Read one length-prefixed frame.
pub fn read_frame(r: &mut impl Read) -> std::io::Result<Vec<u8>> {
    let mut len_bytes = [0u8; 4];
    r.read_exact(&mut len_bytes)?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame length {len} exceeds limit"),
        ));
    }
    let mut body = vec![0u8; len];
    r.read_exact(&mut body)?;
    Ok(body)
}

/// Builder for a body of successive MessagePack values.
#[derive(Default)]
pub struct MessageWriter {
    buf: Vec<u8>,
}

impl MessageWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a request body with its opcode.
    pub fn request(op: Opcode) -> Result<Self, ProtocolError> {
        let mut writer = Self::new();
        writer.value(&op.as_u8())?;
        Ok(writer)
    }

    pub fn value<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<&mut Self, ProtocolError> {
        rmp_serde::encode::write(&mut self.buf, value)?;
        Ok(self)
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Reader over a body of successive MessagePack values.
pub struct MessageReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> MessageReader<'a> {
    pub fn new(body: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(body),
        }
    }

    pub fn value<T: DeserializeOwned>(&mut self) -> Result<T, ProtocolError> {
        Ok(rmp_serde::from_read(&mut self.cursor)?)
    }
}

/// Minimal `(status)` response body.
pub fn status_body(ok: bool) -> Result<Vec<u8>, ProtocolError> {
    let mut writer = MessageWriter::new();
    writer.value(&ok)?;
    Ok(writer.into_bytes())
}
