//! Proxy slave: the client side of the remote-execution protocol.
//!
//! Relays every slave operation to an out-of-process instance over the
//! length-framed protocol. Calls are blocking request/response with no
//! pipelining and no protocol-level timeouts; a hung peer blocks the
//! owning instance's operations. The buffered-slave layer above keeps the
//! number of round trips per tick at one batched call per scalar kind.

use std::fs;
use std::net::TcpStream;
use std::path::Path;
use std::sync::mpsc;
use std::thread::JoinHandle;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use cosim_core::slave::{ModelDescription, Slave, SlaveError, ValueRef};

use crate::process;
use crate::protocol::{read_frame, write_frame, MessageReader, MessageWriter, Opcode, RemoteInfo};

/// A slave whose operations execute in another process or on another host.
pub struct ProxySlave {
    name: String,
    model_description: ModelDescription,
    stream: TcpStream,
    reader_thread: Option<JoinHandle<()>>,
    freed: bool,
}

impl ProxySlave {
    /// Spawn a host process on this machine and connect to it.
    ///
    /// The constructor blocks until the child publishes its session port
    /// on stdout; a child that exits without doing so surfaces as
    /// `ProcessLaunchFailure`.
    pub fn spawn_local(
        model_path: &Path,
        instance_name: &str,
        model_description: ModelDescription,
    ) -> Result<Self, SlaveError> {
        let (port_rx, reader_thread) = process::spawn_host(model_path, instance_name)?;
        let port = port_rx.recv().map_err(|_| {
            SlaveError::ProcessLaunch(format!(
                "host process for '{instance_name}' exited without publishing a port"
            ))
        })?;
        info!("[proxyfmu] instance '{instance_name}' bound to port {port}");

        let stream = TcpStream::connect(("127.0.0.1", port))?;
        Self::with_stream(stream, instance_name, model_description, Some(reader_thread))
    }

    /// Boot an instance through an already-running remote boot service.
    ///
    /// Uploads the model blob over the boot connection, receives the
    /// session port and opens a second connection for the session itself.
    pub fn connect_remote(
        remote: &RemoteInfo,
        model_path: &Path,
        instance_name: &str,
        model_description: ModelDescription,
    ) -> Result<Self, SlaveError> {
        let mut boot = TcpStream::connect((remote.host.as_str(), remote.port))?;

        let data = fs::read(model_path)?;
        let model_name = model_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "model".to_string());

        let mut writer = MessageWriter::new();
        writer.value(&model_name)?;
        writer.value(instance_name)?;
        writer.value(&serde_bytes::ByteBuf::from(data))?;
        write_frame(&mut boot, &writer.into_bytes())?;

        let response = read_frame(&mut boot)?;
        let mut reader = MessageReader::new(&response);
        let port: u16 = reader.value()?;
        debug!("[proxyfmu] boot service spawned '{instance_name}' on port {port}");

        let stream = TcpStream::connect((remote.host.as_str(), port))?;
        Self::with_stream(stream, instance_name, model_description, None)
    }

    /// Attach to an already-connected session stream.
    pub fn from_stream(
        stream: TcpStream,
        instance_name: &str,
        model_description: ModelDescription,
    ) -> Result<Self, SlaveError> {
        Self::with_stream(stream, instance_name, model_description, None)
    }

    fn with_stream(
        stream: TcpStream,
        instance_name: &str,
        model_description: ModelDescription,
        reader_thread: Option<JoinHandle<()>>,
    ) -> Result<Self, SlaveError> {
        let mut slave = Self {
            name: instance_name.to_string(),
            model_description,
            stream,
            reader_thread,
            freed: false,
        };
        slave.expect_status(Opcode::Instantiate, MessageWriter::request(Opcode::Instantiate)?)?;
        Ok(slave)
    }

    fn roundtrip(&mut self, writer: MessageWriter) -> Result<Vec<u8>, SlaveError> {
        write_frame(&mut self.stream, &writer.into_bytes())?;
        Ok(read_frame(&mut self.stream)?)
    }

    fn expect_status(&mut self, op: Opcode, writer: MessageWriter) -> Result<(), SlaveError> {
        let response = self.roundtrip(writer)?;
        let mut reader = MessageReader::new(&response);
        let status: bool = reader.value()?;
        if status {
            Ok(())
        } else {
            Err(SlaveError::Failure(format!(
                "remote peer rejected '{op}' for instance '{}'",
                self.name
            )))
        }
    }

    fn read_values<T: DeserializeOwned>(
        &mut self,
        op: Opcode,
        vrs: &[ValueRef],
    ) -> Result<Vec<T>, SlaveError> {
        let mut writer = MessageWriter::request(op)?;
        writer.value(vrs)?;
        let response = self.roundtrip(writer)?;

        let mut reader = MessageReader::new(&response);
        let status: bool = reader.value()?;
        if !status {
            return Err(SlaveError::Failure(format!(
                "remote peer rejected '{op}' for instance '{}'",
                self.name
            )));
        }
        Ok(reader.value()?)
    }

    fn write_values<T: Serialize>(
        &mut self,
        op: Opcode,
        vrs: &[ValueRef],
        values: &[T],
    ) -> Result<(), SlaveError> {
        let mut writer = MessageWriter::request(op)?;
        writer.value(vrs)?;
        writer.value(values)?;
        self.expect_status(op, writer)
    }

    /// Release the remote instance and join the reader thread.
    ///
    /// After the peer acknowledges `FreeInstance` the child process exits
    /// and its port is released; joining the reader thread guarantees that
    /// has happened before this proxy goes away.
    fn shutdown(&mut self) {
        if self.freed {
            return;
        }
        self.freed = true;

        let result = MessageWriter::request(Opcode::FreeInstance)
            .map_err(SlaveError::from)
            .and_then(|writer| self.roundtrip(writer));
        if let Err(e) = result {
            debug!("free_instance round trip for '{}' failed: {e}", self.name);
        }

        if let Some(handle) = self.reader_thread.take() {
            if handle.join().is_err() {
                warn!("reader thread for '{}' panicked", self.name);
            }
        }
    }
}

impl Slave for ProxySlave {
    fn name(&self) -> &str {
        &self.name
    }

    fn model_description(&self) -> &ModelDescription {
        &self.model_description
    }

    fn setup_experiment(
        &mut self,
        start_time: f64,
        stop_time: f64,
        tolerance: f64,
    ) -> Result<(), SlaveError> {
        let mut writer = MessageWriter::request(Opcode::SetupExperiment)?;
        writer.value(&start_time)?;
        writer.value(&stop_time)?;
        writer.value(&tolerance)?;
        self.expect_status(Opcode::SetupExperiment, writer)
    }

    fn enter_initialization_mode(&mut self) -> Result<(), SlaveError> {
        let writer = MessageWriter::request(Opcode::EnterInitializationMode)?;
        self.expect_status(Opcode::EnterInitializationMode, writer)
    }

    fn exit_initialization_mode(&mut self) -> Result<(), SlaveError> {
        let writer = MessageWriter::request(Opcode::ExitInitializationMode)?;
        self.expect_status(Opcode::ExitInitializationMode, writer)
    }

    fn step(&mut self, current_time: f64, step_size: f64) -> Result<(), SlaveError> {
        let mut writer = MessageWriter::request(Opcode::Step)?;
        writer.value(&current_time)?;
        writer.value(&step_size)?;
        self.expect_status(Opcode::Step, writer)
    }

    fn terminate(&mut self) -> Result<(), SlaveError> {
        let writer = MessageWriter::request(Opcode::Terminate)?;
        self.expect_status(Opcode::Terminate, writer)
    }

    fn reset(&mut self) -> Result<(), SlaveError> {
        let writer = MessageWriter::request(Opcode::Reset)?;
        self.expect_status(Opcode::Reset, writer)
    }

    fn free_instance(&mut self) {
        self.shutdown();
    }

    fn get_integer(&mut self, vrs: &[ValueRef]) -> Result<Vec<i32>, SlaveError> {
        self.read_values(Opcode::ReadInt, vrs)
    }

    fn get_real(&mut self, vrs: &[ValueRef]) -> Result<Vec<f64>, SlaveError> {
        self.read_values(Opcode::ReadReal, vrs)
    }

    fn get_boolean(&mut self, vrs: &[ValueRef]) -> Result<Vec<bool>, SlaveError> {
        self.read_values(Opcode::ReadBool, vrs)
    }

    fn get_string(&mut self, vrs: &[ValueRef]) -> Result<Vec<String>, SlaveError> {
        self.read_values(Opcode::ReadString, vrs)
    }

    fn set_integer(&mut self, vrs: &[ValueRef], values: &[i32]) -> Result<(), SlaveError> {
        self.write_values(Opcode::WriteInt, vrs, values)
    }

    fn set_real(&mut self, vrs: &[ValueRef], values: &[f64]) -> Result<(), SlaveError> {
        self.write_values(Opcode::WriteReal, vrs, values)
    }

    fn set_boolean(&mut self, vrs: &[ValueRef], values: &[bool]) -> Result<(), SlaveError> {
        self.write_values(Opcode::WriteBool, vrs, values)
    }

    fn set_string(&mut self, vrs: &[ValueRef], values: &[String]) -> Result<(), SlaveError> {
        self.write_values(Opcode::WriteString, vrs, values)
    }
}

impl Drop for ProxySlave {
    fn drop(&mut self) {
        self.shutdown();
    }
}
