//! Model abstraction.

use crate::error::SimulationError;
use crate::models::instance::ModelInstance;

/// An instantiable simulation component, opaque to the core beyond the
/// instances it produces.
pub trait Model: Send + Sync {
    fn instantiate(
        &self,
        instance_name: &str,
        step_size_hint: Option<f64>,
    ) -> Result<ModelInstance, SimulationError>;
}
