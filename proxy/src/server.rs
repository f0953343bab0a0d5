//! Server side of the remote-execution protocol.
//!
//! A session handler serves exactly one out-of-process instance: it reads
//! one framed request, dispatches on the opcode, writes one framed
//! response, and repeats until `FreeInstance` arrives or the transport
//! fails. Unknown opcodes and malformed bodies answer with a `false`
//! status and keep the session alive, so an isolated bad message never
//! kills a running instance.
//!
//! The boot service accepts model uploads from remote clients, writes the
//! blob into a scoped temporary directory, spawns a host process for it
//! and replies with the bound session port.

use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::mpsc::RecvError;
use std::thread::{self, JoinHandle};

use serde::Serialize;
use tracing::{debug, trace, warn};

use cosim_core::slave::{Slave, SlaveError, ValueRef};

use crate::process::{self, announce_port};
use crate::protocol::{
    read_frame, status_body, write_frame, MessageReader, MessageWriter, Opcode, ProtocolError,
};

/// Provider of concrete slaves for incoming sessions.
pub trait SlaveFactory: Send + Sync {
    fn create(&self, model_ref: &str, instance_name: &str) -> Result<Box<dyn Slave>, SlaveError>;
}

/// Bind an ephemeral port, announce it on stdout and serve one session.
///
/// This is the body of a host executable's main.
pub fn serve_instance(
    factory: &dyn SlaveFactory,
    model_ref: &str,
    instance_name: &str,
) -> Result<(), ProtocolError> {
    let listener = TcpListener::bind(("127.0.0.1", 0))?;
    let port = listener.local_addr()?.port();
    announce_port(port);

    let (stream, peer) = listener.accept()?;
    debug!("session for '{instance_name}' accepted from {peer}");
    handle_session(stream, factory, model_ref, instance_name)
}

/// Serve one session over an established stream.
pub fn handle_session(
    mut stream: TcpStream,
    factory: &dyn SlaveFactory,
    model_ref: &str,
    instance_name: &str,
) -> Result<(), ProtocolError> {
    let mut slave: Option<Box<dyn Slave>> = None;

    loop {
        let body = match read_frame(&mut stream) {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!("peer closed session for '{instance_name}'");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let mut reader = MessageReader::new(&body);
        let raw_op: u8 = match reader.value() {
            Ok(v) => v,
            Err(e) => {
                warn!("unreadable request for '{instance_name}': {e}");
                write_frame(&mut stream, &status_body(false)?)?;
                continue;
            }
        };
        let op = match Opcode::try_from(raw_op) {
            Ok(op) => op,
            Err(_) => {
                warn!("unknown opcode {raw_op} for '{instance_name}'");
                write_frame(&mut stream, &status_body(false)?)?;
                continue;
            }
        };
        trace!("got opcode {op}");

        if op == Opcode::FreeInstance {
            if let Some(mut instance) = slave.take() {
                instance.free_instance();
            }
            write_frame(&mut stream, &status_body(true)?)?;
            return Ok(());
        }

        let response = dispatch(op, &mut reader, &mut slave, factory, model_ref, instance_name);
        let bytes = match response {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("request '{op}' for '{instance_name}' failed to decode: {e}");
                status_body(false)?
            }
        };
        write_frame(&mut stream, &bytes)?;
    }
}

fn dispatch(
    op: Opcode,
    reader: &mut MessageReader<'_>,
    slave: &mut Option<Box<dyn Slave>>,
    factory: &dyn SlaveFactory,
    model_ref: &str,
    instance_name: &str,
) -> Result<Vec<u8>, ProtocolError> {
    match op {
        Opcode::Instantiate => match factory.create(model_ref, instance_name) {
            Ok(instance) => {
                *slave = Some(instance);
                status_body(true)
            }
            Err(e) => {
                warn!("instantiate of '{instance_name}' failed: {e}");
                status_body(false)
            }
        },
        Opcode::SetupExperiment => {
            let start_time: f64 = reader.value()?;
            let stop_time: f64 = reader.value()?;
            let tolerance: f64 = reader.value()?;
            with_slave(slave, |s| s.setup_experiment(start_time, stop_time, tolerance))
        }
        Opcode::EnterInitializationMode => with_slave(slave, |s| s.enter_initialization_mode()),
        Opcode::ExitInitializationMode => with_slave(slave, |s| s.exit_initialization_mode()),
        Opcode::Step => {
            let current_time: f64 = reader.value()?;
            let step_size: f64 = reader.value()?;
            with_slave(slave, |s| s.step(current_time, step_size))
        }
        Opcode::Terminate => with_slave(slave, |s| s.terminate()),
        Opcode::Reset => with_slave(slave, |s| s.reset()),
        // Handled by the session loop.
        Opcode::FreeInstance => status_body(true),
        Opcode::ReadInt => {
            let vrs: Vec<ValueRef> = reader.value()?;
            read_reply(slave, |s| s.get_integer(&vrs))
        }
        Opcode::ReadReal => {
            let vrs: Vec<ValueRef> = reader.value()?;
            read_reply(slave, |s| s.get_real(&vrs))
        }
        Opcode::ReadString => {
            let vrs: Vec<ValueRef> = reader.value()?;
            read_reply(slave, |s| s.get_string(&vrs))
        }
        Opcode::ReadBool => {
            let vrs: Vec<ValueRef> = reader.value()?;
            read_reply(slave, |s| s.get_boolean(&vrs))
        }
        Opcode::WriteInt => {
            let vrs: Vec<ValueRef> = reader.value()?;
            let values: Vec<i32> = reader.value()?;
            with_slave(slave, |s| s.set_integer(&vrs, &values))
        }
        Opcode::WriteReal => {
            let vrs: Vec<ValueRef> = reader.value()?;
            let values: Vec<f64> = reader.value()?;
            with_slave(slave, |s| s.set_real(&vrs, &values))
        }
        Opcode::WriteString => {
            let vrs: Vec<ValueRef> = reader.value()?;
            let values: Vec<String> = reader.value()?;
            with_slave(slave, |s| s.set_string(&vrs, &values))
        }
        Opcode::WriteBool => {
            let vrs: Vec<ValueRef> = reader.value()?;
            let values: Vec<bool> = reader.value()?;
            with_slave(slave, |s| s.set_boolean(&vrs, &values))
        }
    }
}

fn with_slave(
    slave: &mut Option<Box<dyn Slave>>,
    f: impl FnOnce(&mut dyn Slave) -> Result<(), SlaveError>,
) -> Result<Vec<u8>, ProtocolError> {
    match slave.as_mut() {
        Some(instance) => match f(instance.as_mut()) {
            Ok(()) => status_body(true),
            Err(e) => {
                warn!("slave operation failed: {e}");
                status_body(false)
            }
        },
        None => {
            warn!("request received before instantiate");
            status_body(false)
        }
    }
}

fn read_reply<T: Serialize>(
    slave: &mut Option<Box<dyn Slave>>,
    f: impl FnOnce(&mut dyn Slave) -> Result<Vec<T>, SlaveError>,
) -> Result<Vec<u8>, ProtocolError> {
    match slave.as_mut() {
        Some(instance) => match f(instance.as_mut()) {
            Ok(values) => {
                let mut writer = MessageWriter::new();
                writer.value(&true)?;
                writer.value(&values)?;
                Ok(writer.into_bytes())
            }
            Err(e) => {
                warn!("slave read failed: {e}");
                status_body(false)
            }
        },
        None => {
            warn!("read request received before instantiate");
            status_body(false)
        }
    }
}

/// Long-running endpoint spawning host processes for remote clients.
pub struct BootService {
    listener: TcpListener,
    children: Vec<JoinHandle<()>>,
}

impl BootService {
    pub fn bind(addr: impl ToSocketAddrs) -> std::io::Result<Self> {
        Ok(Self {
            listener: TcpListener::bind(addr)?,
            children: Vec::new(),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve boot requests until the listener fails.
    pub fn run(&mut self) -> Result<(), ProtocolError> {
        loop {
            self.accept_one()?;
        }
    }

    /// Accept and serve a single boot request.
    ///
    /// Failures inside the request are logged and answered implicitly by
    /// dropping the connection; only listener failures propagate.
    pub fn accept_one(&mut self) -> Result<(), ProtocolError> {
        let (mut stream, peer) = self.listener.accept()?;
        debug!("boot request from {peer}");

        match handle_boot_request(&mut stream) {
            Ok((port, child)) => {
                self.children.push(child);
                let mut writer = MessageWriter::new();
                writer.value(&port)?;
                write_frame(&mut stream, &writer.into_bytes())?;
            }
            Err(e) => {
                warn!("boot request from {peer} failed: {e}");
            }
        }
        Ok(())
    }
}

impl Drop for BootService {
    fn drop(&mut self) {
        for child in self.children.drain(..) {
            if child.join().is_err() {
                warn!("boot service child thread panicked");
            }
        }
    }
}

fn handle_boot_request(stream: &mut TcpStream) -> Result<(u16, JoinHandle<()>), SlaveError> {
    let body = read_frame(stream)?;
    let mut reader = MessageReader::new(&body);
    let model_name: String = reader.value()?;
    let instance_name: String = reader.value()?;
    let data: serde_bytes::ByteBuf = reader.value()?;

    let safe_name: String = model_name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    let safe_name = if safe_name.is_empty() {
        "model".to_string()
    } else {
        safe_name
    };

    let dir = tempfile::Builder::new()
        .prefix(&safe_name)
        .tempdir()
        .map_err(SlaveError::Io)?;
    let model_path = dir.path().join(format!("{safe_name}.model"));
    std::fs::write(&model_path, data.as_ref())?;

    let (port_rx, scan_thread) = process::spawn_host(&model_path, &instance_name)?;
    let port = port_rx.recv().map_err(|_: RecvError| {
        SlaveError::ProcessLaunch(format!(
            "host process for '{instance_name}' exited without publishing a port"
        ))
    })?;

    // The temp dir must outlive the child process; tie both lifetimes to
    // one joinable thread.
    let child = thread::spawn(move || {
        let _dir = dir;
        if scan_thread.join().is_err() {
            warn!("host reader thread panicked");
        }
    });

    Ok((port, child))
}
