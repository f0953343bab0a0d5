//! The slave interface: lifecycle plus batched typed variable access.
//!
//! A slave is a single model instance behind the standard stepping
//! contract. Variables are addressed by value reference; batched get/set
//! calls are the unit of traffic, which is what the buffered decorator and
//! the remote proxy build on.

pub mod buffered;
pub mod instance;

pub use buffered::BufferedSlave;
pub use instance::slave_instance;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::variable::ScalarKind;

/// Numeric handle addressing one variable of a slave.
pub type ValueRef = u32;

/// Errors produced by slave implementations, local or remote.
#[derive(Debug, Error)]
pub enum SlaveError {
    /// The slave rejected or failed the operation
    #[error("slave failure: {0}")]
    Failure(String),

    /// Malformed or truncated wire message
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A proxy child process failed to start or report a port
    #[error("process launch failure: {0}")]
    ProcessLaunch(String),

    /// Filesystem or socket failure
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Description of one exposed variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDescription {
    pub name: String,
    pub value_ref: ValueRef,
    pub kind: ScalarKind,
}

/// Static description of a slave's variable surface.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelDescription {
    pub model_name: String,
    pub variables: Vec<VariableDescription>,
}

impl ModelDescription {
    pub fn by_name(&self, name: &str) -> Option<&VariableDescription> {
        self.variables.iter().find(|v| v.name == name)
    }

    pub fn by_value_ref(&self, kind: ScalarKind, vr: ValueRef) -> Option<&VariableDescription> {
        self.variables
            .iter()
            .find(|v| v.kind == kind && v.value_ref == vr)
    }
}

/// Standard stepping interface of a single model instance.
///
/// Batched get/set calls are the primitive operations; single-value
/// helpers are provided on top of them.
pub trait Slave: Send {
    fn name(&self) -> &str;

    fn model_description(&self) -> &ModelDescription;

    fn setup_experiment(
        &mut self,
        start_time: f64,
        stop_time: f64,
        tolerance: f64,
    ) -> Result<(), SlaveError>;

    fn enter_initialization_mode(&mut self) -> Result<(), SlaveError>;

    fn exit_initialization_mode(&mut self) -> Result<(), SlaveError>;

    fn step(&mut self, current_time: f64, step_size: f64) -> Result<(), SlaveError>;

    fn terminate(&mut self) -> Result<(), SlaveError>;

    fn reset(&mut self) -> Result<(), SlaveError>;

    /// Release the instance. Remote implementations tear down their peer.
    fn free_instance(&mut self) {}

    fn get_integer(&mut self, vrs: &[ValueRef]) -> Result<Vec<i32>, SlaveError>;
    fn get_real(&mut self, vrs: &[ValueRef]) -> Result<Vec<f64>, SlaveError>;
    fn get_boolean(&mut self, vrs: &[ValueRef]) -> Result<Vec<bool>, SlaveError>;
    fn get_string(&mut self, vrs: &[ValueRef]) -> Result<Vec<String>, SlaveError>;

    fn set_integer(&mut self, vrs: &[ValueRef], values: &[i32]) -> Result<(), SlaveError>;
    fn set_real(&mut self, vrs: &[ValueRef], values: &[f64]) -> Result<(), SlaveError>;
    fn set_boolean(&mut self, vrs: &[ValueRef], values: &[bool]) -> Result<(), SlaveError>;
    fn set_string(&mut self, vrs: &[ValueRef], values: &[String]) -> Result<(), SlaveError>;

    fn get_integer_single(&mut self, vr: ValueRef) -> Result<i32, SlaveError> {
        let values = self.get_integer(&[vr])?;
        values
            .into_iter()
            .next()
            .ok_or_else(|| SlaveError::Failure(format!("empty read result for value ref {vr}")))
    }

    fn get_real_single(&mut self, vr: ValueRef) -> Result<f64, SlaveError> {
        let values = self.get_real(&[vr])?;
        values
            .into_iter()
            .next()
            .ok_or_else(|| SlaveError::Failure(format!("empty read result for value ref {vr}")))
    }

    fn get_boolean_single(&mut self, vr: ValueRef) -> Result<bool, SlaveError> {
        let values = self.get_boolean(&[vr])?;
        values
            .into_iter()
            .next()
            .ok_or_else(|| SlaveError::Failure(format!("empty read result for value ref {vr}")))
    }

    fn get_string_single(&mut self, vr: ValueRef) -> Result<String, SlaveError> {
        let values = self.get_string(&[vr])?;
        values
            .into_iter()
            .next()
            .ok_or_else(|| SlaveError::Failure(format!("empty read result for value ref {vr}")))
    }
}
