//! Remote execution for co-simulation slaves.
//!
//! Lets a slave run in a separate process (freshly spawned child on this
//! host) or on a separate machine (via a pre-running boot service), behind
//! the same `Slave` interface used locally. The wire format is a
//! length-framed sequence of MessagePack values; see `protocol`.

pub mod client;
pub mod process;
pub mod protocol;
pub mod server;

pub use client::ProxySlave;
pub use process::{announce_port, HOST_EXECUTABLE, PORT_MARKER};
pub use protocol::{Opcode, ProtocolError, RemoteInfo};
pub use server::{handle_session, serve_instance, BootService, SlaveFactory};
