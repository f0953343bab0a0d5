//! Host process lifecycle.
//!
//! A spawned host binds an ephemeral port and announces it with a single
//! marker line on stdout. The reader thread scans for that marker and
//! hands the port to the waiting constructor over a channel, then keeps
//! draining output until the child exits so the process is always reaped.

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use cosim_core::SlaveError;

/// Stdout marker emitted by a ready host process.
pub const PORT_MARKER: &str = "[proxyfmu] port=";

/// Executable name of the proxy host, looked up next to the current
/// executable first, then on PATH.
pub const HOST_EXECUTABLE: &str = "cosim-proxy-host";

fn host_executable() -> PathBuf {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let candidate = dir.join(HOST_EXECUTABLE);
            if candidate.exists() {
                return candidate;
            }
        }
    }
    PathBuf::from(HOST_EXECUTABLE)
}

/// Print the readiness marker. Host executables call this once after
/// binding their session port.
pub fn announce_port(port: u16) {
    println!("{PORT_MARKER}{port}");
}

/// Spawn a host process for one model instance.
///
/// Returns the channel the bound port arrives on and the reader-thread
/// handle. The sender side is dropped without a send when the child never
/// publishes a port, which surfaces as a receive error at the caller.
pub(crate) fn spawn_host(
    model_path: &Path,
    instance_name: &str,
) -> Result<(mpsc::Receiver<u16>, JoinHandle<()>), SlaveError> {
    let executable = host_executable();
    info!(
        "[proxyfmu] booting instance '{instance_name}' via '{}'",
        executable.display()
    );

    let mut child = Command::new(&executable)
        .arg("--model")
        .arg(model_path)
        .arg("--instance")
        .arg(instance_name)
        .stdout(Stdio::piped())
        .spawn()
        .map_err(|e| {
            SlaveError::ProcessLaunch(format!(
                "unable to invoke '{}': {e}",
                executable.display()
            ))
        })?;

    let stdout = child.stdout.take().ok_or_else(|| {
        SlaveError::ProcessLaunch("host process stdout is unavailable".to_string())
    })?;

    let (tx, rx) = mpsc::channel();
    let name = instance_name.to_string();
    let handle = thread::spawn(move || scan_output(child, stdout, tx, name));
    Ok((rx, handle))
}

fn scan_output(mut child: Child, stdout: ChildStdout, tx: mpsc::Sender<u16>, instance_name: String) {
    let reader = BufReader::new(stdout);
    let mut published = false;

    for line in reader.lines() {
        let Ok(line) = line else { break };
        if !published {
            if let Some(value) = line.strip_prefix(PORT_MARKER) {
                match value.trim().parse::<u16>() {
                    Ok(port) => {
                        published = true;
                        let _ = tx.send(port);
                    }
                    Err(e) => {
                        warn!("[proxyfmu][{instance_name}] malformed port line '{line}': {e}");
                    }
                }
                continue;
            }
        }
        debug!("[proxyfmu][{instance_name}] {line}");
    }

    match child.wait() {
        Ok(status) => {
            info!("[proxyfmu] host process for '{instance_name}' exited with status {status}");
        }
        Err(e) => {
            warn!("[proxyfmu] failed to await host process for '{instance_name}': {e}");
        }
    }
}
