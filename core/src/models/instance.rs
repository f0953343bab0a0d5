//! Model instances.
//!
//! A model instance owns its property table and named parameter sets, and
//! delegates lifecycle operations to a backend implementing the stepping
//! contract. Composition replaces inheritance: the engine only ever deals
//! with the concrete `ModelInstance` struct.

use std::collections::HashMap;

use tracing::warn;

use crate::error::SimulationError;
use crate::models::property::PropertyTable;
use crate::models::variable::ScalarValue;

/// Named mapping of variable name to value, applied at `init`.
pub type ParameterSet = HashMap<String, ScalarValue>;

/// Lifecycle operations of a stepping component.
pub trait InstanceBackend: Send {
    fn setup_experiment(&mut self, start_time: f64) -> Result<(), SimulationError>;
    fn enter_initialization_mode(&mut self) -> Result<(), SimulationError>;
    fn exit_initialization_mode(&mut self) -> Result<(), SimulationError>;
    fn step(&mut self, current_time: f64, step_size: f64) -> Result<(), SimulationError>;
    fn terminate(&mut self) -> Result<(), SimulationError>;
    fn reset(&mut self) -> Result<(), SimulationError>;
}

/// A single co-simulated component registered with the engine.
pub struct ModelInstance {
    name: String,
    step_size_hint: Option<f64>,
    properties: PropertyTable,
    parameter_sets: HashMap<String, ParameterSet>,
    backend: Box<dyn InstanceBackend>,
}

impl ModelInstance {
    pub fn new(
        name: impl Into<String>,
        step_size_hint: Option<f64>,
        backend: Box<dyn InstanceBackend>,
    ) -> Self {
        Self {
            name: name.into(),
            step_size_hint,
            properties: PropertyTable::new(),
            parameter_sets: HashMap::new(),
            backend,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Preferred step size, used for decimation by the algorithm.
    pub fn step_size_hint(&self) -> Option<f64> {
        self.step_size_hint
    }

    pub fn properties(&self) -> &PropertyTable {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut PropertyTable {
        &mut self.properties
    }

    pub fn add_parameter_set(&mut self, name: impl Into<String>, parameter_set: ParameterSet) {
        self.parameter_sets.insert(name.into(), parameter_set);
    }

    pub fn add_parameter_set_entry(
        &mut self,
        set_name: &str,
        variable_name: impl Into<String>,
        value: ScalarValue,
    ) {
        self.parameter_sets
            .entry(set_name.to_string())
            .or_default()
            .insert(variable_name.into(), value);
    }

    /// Stage the values of a named parameter set.
    ///
    /// Returns `true` if the set exists on this instance. Values are staged
    /// through the deferred-write cache and land with the next apply pass.
    /// Unknown variables are logged and skipped; an integer entry falls
    /// back to a real property of the same name.
    pub fn apply_parameter_set(&mut self, name: &str) -> bool {
        let Some(parameters) = self.parameter_sets.get(name) else {
            return false;
        };

        for (variable_name, value) in parameters {
            match value {
                ScalarValue::Real(v) => {
                    if let Some(p) = self.properties.real_property_mut(variable_name) {
                        p.set(*v);
                    } else {
                        warn!(
                            "no variable named '{}' of type real registered for instance '{}'",
                            variable_name, self.name
                        );
                    }
                }
                ScalarValue::Integer(v) => {
                    if let Some(p) = self.properties.int_property_mut(variable_name) {
                        p.set(*v);
                    } else if let Some(p) = self.properties.real_property_mut(variable_name) {
                        p.set(f64::from(*v));
                    } else {
                        warn!(
                            "no variable named '{}' of type int registered for instance '{}'",
                            variable_name, self.name
                        );
                    }
                }
                ScalarValue::Boolean(v) => {
                    if let Some(p) = self.properties.bool_property_mut(variable_name) {
                        p.set(*v);
                    } else {
                        warn!(
                            "no variable named '{}' of type bool registered for instance '{}'",
                            variable_name, self.name
                        );
                    }
                }
                ScalarValue::String(v) => {
                    if let Some(p) = self.properties.string_property_mut(variable_name) {
                        p.set(v.clone());
                    } else {
                        warn!(
                            "no variable named '{}' of type string registered for instance '{}'",
                            variable_name, self.name
                        );
                    }
                }
            }
        }
        true
    }

    pub fn setup_experiment(&mut self, start_time: f64) -> Result<(), SimulationError> {
        self.backend.setup_experiment(start_time)
    }

    pub fn enter_initialization_mode(&mut self) -> Result<(), SimulationError> {
        self.backend.enter_initialization_mode()
    }

    pub fn exit_initialization_mode(&mut self) -> Result<(), SimulationError> {
        self.backend.exit_initialization_mode()
    }

    pub fn step(&mut self, current_time: f64, step_size: f64) -> Result<(), SimulationError> {
        self.backend.step(current_time, step_size)
    }

    pub fn terminate(&mut self) -> Result<(), SimulationError> {
        self.backend.terminate()
    }

    pub fn reset(&mut self) -> Result<(), SimulationError> {
        self.backend.reset()
    }
}
