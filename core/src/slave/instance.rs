//! Bridge exposing a slave as a `ModelInstance`.
//!
//! Every declared variable becomes a property whose getter and setter go
//! through a shared `BufferedSlave`. A property listener keeps the
//! buffered caches in lockstep with the engine's apply passes: pending
//! property writes land in the write caches, `post_sets` flushes them in
//! one batch per kind, and `pre_gets` refreshes the read caches before the
//! next read phase.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::warn;

use crate::error::SimulationError;
use crate::models::instance::{InstanceBackend, ModelInstance};
use crate::models::property::{Property, PropertyListener};
use crate::models::variable::{ScalarKind, VariableIdentifier};
use crate::slave::{BufferedSlave, Slave};

type SharedSlave = Arc<Mutex<BufferedSlave>>;

fn lock(slave: &Mutex<BufferedSlave>) -> MutexGuard<'_, BufferedSlave> {
    slave.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct SlaveBackend {
    slave: SharedSlave,
}

impl InstanceBackend for SlaveBackend {
    fn setup_experiment(&mut self, start_time: f64) -> Result<(), SimulationError> {
        lock(&self.slave)
            .setup_experiment(start_time, 0.0, 0.0)
            .map_err(Into::into)
    }

    fn enter_initialization_mode(&mut self) -> Result<(), SimulationError> {
        lock(&self.slave)
            .enter_initialization_mode()
            .map_err(Into::into)
    }

    fn exit_initialization_mode(&mut self) -> Result<(), SimulationError> {
        lock(&self.slave)
            .exit_initialization_mode()
            .map_err(Into::into)
    }

    fn step(&mut self, current_time: f64, step_size: f64) -> Result<(), SimulationError> {
        lock(&self.slave)
            .step(current_time, step_size)
            .map_err(Into::into)
    }

    fn terminate(&mut self) -> Result<(), SimulationError> {
        lock(&self.slave).terminate().map_err(Into::into)
    }

    fn reset(&mut self) -> Result<(), SimulationError> {
        lock(&self.slave).reset().map_err(Into::into)
    }
}

struct BufferedSlaveListener {
    slave: SharedSlave,
}

impl PropertyListener for BufferedSlaveListener {
    fn post_sets(&mut self) {
        if let Err(e) = lock(&self.slave).transfer_cached_sets() {
            warn!("failed to flush cached sets: {e}");
        }
    }

    fn pre_gets(&mut self) {
        if let Err(e) = lock(&self.slave).receive_cached_gets() {
            warn!("failed to refresh cached gets: {e}");
        }
    }
}

/// Wrap a slave in the buffering layer and expose it as a model instance.
pub fn slave_instance(slave: Box<dyn Slave>, step_size_hint: Option<f64>) -> ModelInstance {
    let instance_name = slave.name().to_string();
    let description = slave.model_description().clone();
    let shared: SharedSlave = Arc::new(Mutex::new(BufferedSlave::new(slave)));

    let mut instance = ModelInstance::new(
        instance_name.clone(),
        step_size_hint,
        Box::new(SlaveBackend {
            slave: shared.clone(),
        }),
    );

    for variable in &description.variables {
        let id = VariableIdentifier::new(instance_name.clone(), variable.name.clone());
        let vr = variable.value_ref;
        match variable.kind {
            ScalarKind::Real => {
                let getter = shared.clone();
                let setter = shared.clone();
                instance.properties_mut().add_real(Property::new(
                    id,
                    Box::new(move || lock(&getter).read_real(vr)),
                    Some(Box::new(move |v| lock(&setter).write_real(vr, v))),
                ));
            }
            ScalarKind::Integer => {
                let getter = shared.clone();
                let setter = shared.clone();
                instance.properties_mut().add_integer(Property::new(
                    id,
                    Box::new(move || lock(&getter).read_integer(vr)),
                    Some(Box::new(move |v| lock(&setter).write_integer(vr, v))),
                ));
            }
            ScalarKind::Boolean => {
                let getter = shared.clone();
                let setter = shared.clone();
                instance.properties_mut().add_boolean(Property::new(
                    id,
                    Box::new(move || lock(&getter).read_boolean(vr)),
                    Some(Box::new(move |v| lock(&setter).write_boolean(vr, v))),
                ));
            }
            ScalarKind::String => {
                let getter = shared.clone();
                let setter = shared.clone();
                instance.properties_mut().add_string(Property::new(
                    id,
                    Box::new(move || lock(&getter).read_string(vr)),
                    Some(Box::new(move |v| lock(&setter).write_string(vr, v))),
                ));
            }
        }
    }

    instance
        .properties_mut()
        .add_listener(Box::new(BufferedSlaveListener { slave: shared }));

    instance
}
