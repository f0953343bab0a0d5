//! Instance arena and handle-resolved property access.
//!
//! The engine owns a stable collection of instances; connections and
//! scenario actions address properties through the arena rather than
//! holding references into instance tables.

use rayon::prelude::*;

use crate::error::SimulationError;
use crate::models::connection::{Connection, PropertyRef, TypedConnection};
use crate::models::instance::ModelInstance;
use crate::models::variable::{ScalarKind, ScalarValue, VariableIdentifier};

/// Owning collection of every registered model instance.
#[derive(Default)]
pub struct SimulationState {
    instances: Vec<ModelInstance>,
}

impl SimulationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instances(&self) -> &[ModelInstance] {
        &self.instances
    }

    pub fn instances_mut(&mut self) -> &mut [ModelInstance] {
        &mut self.instances
    }

    pub fn num_instances(&self) -> usize {
        self.instances.len()
    }

    pub(crate) fn push_instance(&mut self, instance: ModelInstance) {
        self.instances.push(instance);
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.instances.iter().position(|i| i.name() == name)
    }

    pub fn instance(&self, name: &str) -> Option<&ModelInstance> {
        self.instances.iter().find(|i| i.name() == name)
    }

    pub fn instance_mut(&mut self, name: &str) -> Option<&mut ModelInstance> {
        self.instances.iter_mut().find(|i| i.name() == name)
    }

    /// The scalar kind of the property behind `id`, if it exists.
    pub fn kind_of(&self, id: &VariableIdentifier) -> Option<ScalarKind> {
        let table = self.instance(&id.instance_name)?.properties();
        let name = &id.variable_name;
        if table.real_property(name).is_some() {
            Some(ScalarKind::Real)
        } else if table.int_property(name).is_some() {
            Some(ScalarKind::Integer)
        } else if table.bool_property(name).is_some() {
            Some(ScalarKind::Boolean)
        } else if table.string_property(name).is_some() {
            Some(ScalarKind::String)
        } else {
            None
        }
    }

    /// Resolve an identifier into a handle, checking kind at bind time.
    pub(crate) fn resolve(
        &self,
        id: &VariableIdentifier,
        kind: ScalarKind,
    ) -> Result<PropertyRef, SimulationError> {
        let index = self
            .index_of(&id.instance_name)
            .ok_or_else(|| SimulationError::NotFound(format!("no instance named '{}'", id.instance_name)))?;

        let table = self.instances[index].properties();
        let name = &id.variable_name;
        let present = match kind {
            ScalarKind::Real => table.real_property(name).is_some(),
            ScalarKind::Integer => table.int_property(name).is_some(),
            ScalarKind::Boolean => table.bool_property(name).is_some(),
            ScalarKind::String => table.string_property(name).is_some(),
        };
        if !present {
            return Err(SimulationError::NotFound(format!(
                "no {kind} property named '{id}'"
            )));
        }
        Ok(PropertyRef::new(index, name.clone()))
    }

    /// All known identifiers, per instance in registration order.
    pub fn identifiers(&self) -> Vec<VariableIdentifier> {
        let mut ids = Vec::new();
        for instance in &self.instances {
            for name in instance.properties().property_names() {
                ids.push(VariableIdentifier::new(instance.name(), name));
            }
        }
        ids
    }

    /// Read any property as a tagged scalar. Defensive probe; no error.
    pub fn get_scalar(&self, id: &VariableIdentifier) -> Option<ScalarValue> {
        let table = self.instance(&id.instance_name)?.properties();
        let name = &id.variable_name;
        if let Some(p) = table.real_property(name) {
            Some(ScalarValue::Real(p.get()))
        } else if let Some(p) = table.int_property(name) {
            Some(ScalarValue::Integer(p.get()))
        } else if let Some(p) = table.bool_property(name) {
            Some(ScalarValue::Boolean(p.get()))
        } else {
            table
                .string_property(name)
                .map(|p| ScalarValue::String(p.get()))
        }
    }

    /// Stage a tagged scalar onto the matching property.
    pub fn set_scalar(
        &mut self,
        id: &VariableIdentifier,
        value: ScalarValue,
    ) -> Result<(), SimulationError> {
        let instance = self
            .instance_mut(&id.instance_name)
            .ok_or_else(|| SimulationError::NotFound(format!("no instance named '{}'", id.instance_name)))?;
        let table = instance.properties_mut();
        let name = &id.variable_name;

        match value {
            ScalarValue::Real(v) => table
                .real_property_mut(name)
                .map(|p| p.set(v))
                .ok_or_else(|| SimulationError::NotFound(format!("no real property named '{id}'"))),
            ScalarValue::Integer(v) => table
                .int_property_mut(name)
                .map(|p| p.set(v))
                .ok_or_else(|| SimulationError::NotFound(format!("no int property named '{id}'"))),
            ScalarValue::Boolean(v) => table
                .bool_property_mut(name)
                .map(|p| p.set(v))
                .ok_or_else(|| SimulationError::NotFound(format!("no bool property named '{id}'"))),
            ScalarValue::String(v) => table
                .string_property_mut(name)
                .map(|p| p.set(v))
                .ok_or_else(|| {
                    SimulationError::NotFound(format!("no string property named '{id}'"))
                }),
        }
    }

    /// Apply pending writes and refresh reads on every instance.
    pub(crate) fn apply_and_refresh_all(&mut self, parallel: bool) {
        let pass = |instance: &mut ModelInstance| {
            instance.properties_mut().apply_sets();
            instance.properties_mut().refresh_gets();
        };
        if parallel {
            self.instances.par_iter_mut().for_each(pass);
        } else {
            self.instances.iter_mut().for_each(pass);
        }
    }

    /// Stage the source value of a connection onto its sink.
    pub(crate) fn transfer(&mut self, connection: &Connection) -> Result<(), SimulationError> {
        match connection {
            Connection::Real(link) => {
                let value = self.read_real(&link.source)?;
                let value = match &link.modifier {
                    Some(m) => m(value),
                    None => value,
                };
                self.write_real(&link.sink, value)
            }
            Connection::Integer(link) => {
                let value = self.read_integer(&link.source)?;
                let value = match &link.modifier {
                    Some(m) => m(value),
                    None => value,
                };
                self.write_integer(&link.sink, value)
            }
            Connection::Boolean(link) => {
                let value = self.read_boolean(&link.source)?;
                let value = match &link.modifier {
                    Some(m) => m(value),
                    None => value,
                };
                self.write_boolean(&link.sink, value)
            }
            Connection::String(link) => {
                let value = self.read_string(&link.source)?;
                let value = match &link.modifier {
                    Some(m) => m(value),
                    None => value,
                };
                self.write_string(&link.sink, value)
            }
            Connection::RealToInteger(link) => {
                let value = self.read_real(&link.source)?;
                let modifier = link
                    .modifier
                    .as_ref()
                    .ok_or_else(|| modifier_required(link))?;
                self.write_integer(&link.sink, modifier(value))
            }
            Connection::IntegerToReal(link) => {
                let value = self.read_integer(&link.source)?;
                let modifier = link
                    .modifier
                    .as_ref()
                    .ok_or_else(|| modifier_required(link))?;
                self.write_real(&link.sink, modifier(value))
            }
        }
    }

    fn dangling(&self, r: &PropertyRef) -> SimulationError {
        SimulationError::NotFound(format!(
            "dangling property handle (instance #{}, variable '{}')",
            r.instance, r.variable
        ))
    }

    fn read_real(&self, r: &PropertyRef) -> Result<f64, SimulationError> {
        self.instances
            .get(r.instance)
            .and_then(|i| i.properties().real_property(&r.variable))
            .map(|p| p.get())
            .ok_or_else(|| self.dangling(r))
    }

    fn read_integer(&self, r: &PropertyRef) -> Result<i32, SimulationError> {
        self.instances
            .get(r.instance)
            .and_then(|i| i.properties().int_property(&r.variable))
            .map(|p| p.get())
            .ok_or_else(|| self.dangling(r))
    }

    fn read_boolean(&self, r: &PropertyRef) -> Result<bool, SimulationError> {
        self.instances
            .get(r.instance)
            .and_then(|i| i.properties().bool_property(&r.variable))
            .map(|p| p.get())
            .ok_or_else(|| self.dangling(r))
    }

    fn read_string(&self, r: &PropertyRef) -> Result<String, SimulationError> {
        self.instances
            .get(r.instance)
            .and_then(|i| i.properties().string_property(&r.variable))
            .map(|p| p.get())
            .ok_or_else(|| self.dangling(r))
    }

    fn write_real(&mut self, r: &PropertyRef, value: f64) -> Result<(), SimulationError> {
        let dangling = self.dangling(r);
        self.instances
            .get_mut(r.instance)
            .and_then(|i| i.properties_mut().real_property_mut(&r.variable))
            .map(|p| p.set(value))
            .ok_or(dangling)
    }

    fn write_integer(&mut self, r: &PropertyRef, value: i32) -> Result<(), SimulationError> {
        let dangling = self.dangling(r);
        self.instances
            .get_mut(r.instance)
            .and_then(|i| i.properties_mut().int_property_mut(&r.variable))
            .map(|p| p.set(value))
            .ok_or(dangling)
    }

    fn write_boolean(&mut self, r: &PropertyRef, value: bool) -> Result<(), SimulationError> {
        let dangling = self.dangling(r);
        self.instances
            .get_mut(r.instance)
            .and_then(|i| i.properties_mut().bool_property_mut(&r.variable))
            .map(|p| p.set(value))
            .ok_or(dangling)
    }

    fn write_string(&mut self, r: &PropertyRef, value: String) -> Result<(), SimulationError> {
        let dangling = self.dangling(r);
        self.instances
            .get_mut(r.instance)
            .and_then(|i| i.properties_mut().string_property_mut(&r.variable))
            .map(|p| p.set(value))
            .ok_or(dangling)
    }
}

fn modifier_required<T, E>(link: &TypedConnection<T, E>) -> SimulationError {
    SimulationError::ModifierRequired {
        src: link.source.variable.clone(),
        sink: link.sink.variable.clone(),
    }
}
