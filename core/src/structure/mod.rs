//! System structure binding.
//!
//! A `SimulationStructure` is the bound-free description a system loader
//! produces: named model references, unbound connections and parameter
//! sets. `load()` turns it into a live `Simulation` by instantiating
//! every model, distributing parameter sets and binding connections.
//! Structural errors (duplicate names, dangling endpoints, kind
//! mismatches) abort the load.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::algorithm::Algorithm;
use crate::error::SimulationError;
use crate::model::Model;
use crate::models::connection::TransferModifier;
use crate::models::variable::{ScalarKind, ScalarValue, VariableIdentifier};
use crate::simulation::Simulation;

struct ModelEntry {
    instance_name: String,
    model: Arc<dyn Model>,
    step_size_hint: Option<f64>,
}

/// Unbound connection between two identifiers. The optional modifier is
/// honored on real connections.
pub struct ConnectionSpec {
    pub source: VariableIdentifier,
    pub sink: VariableIdentifier,
    pub modifier: Option<TransferModifier<f64, f64>>,
}

/// Collected description of a simulation system, bound at `load()`.
#[derive(Default)]
pub struct SimulationStructure {
    models: Vec<ModelEntry>,
    connections: Vec<ConnectionSpec>,
    parameter_sets: HashMap<String, HashMap<VariableIdentifier, ScalarValue>>,
}

impl SimulationStructure {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_model(
        &mut self,
        instance_name: impl Into<String>,
        model: Arc<dyn Model>,
        step_size_hint: Option<f64>,
    ) -> Result<(), SimulationError> {
        let instance_name = instance_name.into();
        if self
            .models
            .iter()
            .any(|entry| entry.instance_name == instance_name)
        {
            return Err(SimulationError::DuplicateName(format!(
                "a model named '{instance_name}' has already been added"
            )));
        }
        self.models.push(ModelEntry {
            instance_name,
            model,
            step_size_hint,
        });
        Ok(())
    }

    pub fn make_connection(
        &mut self,
        source: VariableIdentifier,
        sink: VariableIdentifier,
        modifier: Option<TransferModifier<f64, f64>>,
    ) {
        self.connections.push(ConnectionSpec {
            source,
            sink,
            modifier,
        });
    }

    pub fn add_parameter_set(
        &mut self,
        name: impl Into<String>,
        parameters: HashMap<VariableIdentifier, ScalarValue>,
    ) {
        self.parameter_sets.insert(name.into(), parameters);
    }

    /// Instantiate every model and bind connections into a simulation.
    pub fn load(self, algorithm: Box<dyn Algorithm>) -> Result<Simulation, SimulationError> {
        let mut sim = Simulation::new(algorithm);

        for entry in &self.models {
            let mut instance = entry
                .model
                .instantiate(&entry.instance_name, entry.step_size_hint)?;

            for (set_name, parameters) in &self.parameter_sets {
                for (id, value) in parameters {
                    if id.instance_name == entry.instance_name {
                        instance.add_parameter_set_entry(
                            set_name,
                            id.variable_name.clone(),
                            value.clone(),
                        );
                    }
                }
            }

            sim.add_slave(instance)?;
        }

        for spec in self.connections {
            let source_kind = sim.state().kind_of(&spec.source);
            if source_kind == Some(ScalarKind::Real) {
                let link = sim.make_real_connection(&spec.source, &spec.sink)?;
                if let Some(modifier) = spec.modifier {
                    link.set_modifier(modifier);
                }
            } else {
                if spec.modifier.is_some() {
                    warn!(
                        "modifier on connection {} -> {} ignored, only real connections take one",
                        spec.source, spec.sink
                    );
                }
                sim.connect(&spec.source, &spec.sink)?;
            }
        }

        debug!(
            "loaded simulation structure with {} instances and {} connections",
            sim.state().num_instances(),
            sim.num_connections()
        );
        Ok(sim)
    }
}
