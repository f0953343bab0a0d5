//! Simulation engine and state machine.
//!
//! The engine ties together instances, connections, the stepping
//! algorithm, the scenario timeline and lifecycle listeners. It moves
//! through `Uninitialized -> Initialized -> Terminated`; `reset()` returns
//! to `Uninitialized` without discarding instances, connections or
//! scenario configuration.
//!
//! # Two-phase data exchange
//!
//! All property writes within a tick are staged: connection transfers and
//! scenario actions call `set()`, never a setter directly. A dedicated
//! apply pass then flushes every table's pending writes and refreshes
//! every table's reads, exactly once per phase boundary. Declaration order
//! of connections and completion order of instances therefore cannot
//! affect the result. During `init` the engine runs one transfer/apply
//! pass per instance so values settle through connection chains (a bounded
//! relaxation, not a fixed-point solve) before continuous stepping begins.

pub mod listener;
pub mod state;

pub use listener::{SimulationListener, SimulationView};
pub use state::SimulationState;

use tracing::{debug, warn};

use crate::algorithm::Algorithm;
use crate::error::SimulationError;
use crate::models::connection::{Connection, TypedConnection};
use crate::models::instance::ModelInstance;
use crate::models::variable::{ScalarKind, VariableIdentifier};
use crate::models::property::Property;
use crate::scenario::{ActionFn, PredicateFn, Scenario};

/// Central co-simulation engine.
pub struct Simulation {
    current_time: f64,
    initialized: bool,
    terminated: bool,
    iterations: u64,

    state: SimulationState,
    scenario: Scenario,
    algorithm: Box<dyn Algorithm>,
    connections: Vec<Connection>,
    listeners: Vec<(String, Box<dyn SimulationListener>)>,
}

impl Simulation {
    pub fn new(algorithm: Box<dyn Algorithm>) -> Self {
        Self {
            current_time: 0.0,
            initialized: false,
            terminated: false,
            iterations: 0,
            state: SimulationState::new(),
            scenario: Scenario::new(),
            algorithm,
            connections: Vec::new(),
            listeners: Vec::new(),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn time(&self) -> f64 {
        self.current_time
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn initialized(&self) -> bool {
        self.initialized
    }

    pub fn terminated(&self) -> bool {
        self.terminated
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    /// Mutable state access, primarily for tests. Direct mutation bypasses
    /// the engine's staging discipline.
    pub fn state_mut(&mut self) -> &mut SimulationState {
        &mut self.state
    }

    pub fn get_instance(&self, name: &str) -> Option<&ModelInstance> {
        self.state.instance(name)
    }

    pub fn identifiers(&self) -> Vec<VariableIdentifier> {
        self.state.identifiers()
    }

    pub fn num_connections(&self) -> usize {
        self.connections.len()
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Register a model instance under its unique name.
    pub fn add_slave(&mut self, instance: ModelInstance) -> Result<(), SimulationError> {
        if self.state.instance(instance.name()).is_some() {
            return Err(SimulationError::DuplicateName(format!(
                "a model instance named '{}' has already been added",
                instance.name()
            )));
        }
        self.algorithm.instance_added(&instance);
        self.state.push_instance(instance);
        Ok(())
    }

    /// Register a named listener. A name collision keeps the existing
    /// listener and warns instead of overwriting.
    pub fn add_listener(&mut self, name: impl Into<String>, listener: Box<dyn SimulationListener>) {
        let name = name.into();
        if self.listeners.iter().any(|(n, _)| *n == name) {
            warn!("a listener named '{name}' already exists, keeping the existing one");
            return;
        }
        self.listeners.push((name, listener));
    }

    pub fn remove_listener(&mut self, name: &str) {
        self.listeners.retain(|(n, _)| n != name);
    }

    // ========================================================================
    // Scenario registration
    // ========================================================================

    pub fn on_init(&mut self, action: ActionFn) {
        self.scenario.on_init(action);
    }

    pub fn invoke_at(&mut self, fire_point: f64, eps: Option<f64>, action: ActionFn) {
        self.scenario.invoke_at(fire_point, eps, action);
    }

    pub fn invoke_when(&mut self, predicate: PredicateFn, action: ActionFn) {
        self.scenario.invoke_when(predicate, action);
    }

    // ========================================================================
    // Connections
    // ========================================================================

    /// Connect two same-kind properties, inferring the kind.
    pub fn connect(
        &mut self,
        source: &VariableIdentifier,
        sink: &VariableIdentifier,
    ) -> Result<(), SimulationError> {
        let source_kind = self
            .state
            .kind_of(source)
            .ok_or_else(|| SimulationError::NotFound(format!("no property named '{source}'")))?;
        let sink_kind = self
            .state
            .kind_of(sink)
            .ok_or_else(|| SimulationError::NotFound(format!("no property named '{sink}'")))?;

        match (source_kind, sink_kind) {
            (ScalarKind::Real, ScalarKind::Real) => self.make_real_connection(source, sink).map(|_| ()),
            (ScalarKind::Integer, ScalarKind::Integer) => {
                self.make_int_connection(source, sink).map(|_| ())
            }
            (ScalarKind::Boolean, ScalarKind::Boolean) => {
                self.make_bool_connection(source, sink).map(|_| ())
            }
            (ScalarKind::String, ScalarKind::String) => {
                self.make_string_connection(source, sink).map(|_| ())
            }
            (source_kind, sink_kind) => Err(SimulationError::TypeMismatch {
                src: source.to_string(),
                source_kind: source_kind.to_string(),
                sink: sink.to_string(),
                sink_kind: sink_kind.to_string(),
            }),
        }
    }

    pub fn make_real_connection(
        &mut self,
        source: &VariableIdentifier,
        sink: &VariableIdentifier,
    ) -> Result<&mut TypedConnection<f64>, SimulationError> {
        let source = self.state.resolve(source, ScalarKind::Real)?;
        let sink = self.state.resolve(sink, ScalarKind::Real)?;
        self.connections
            .push(Connection::Real(TypedConnection::new(source, sink)));
        match self.connections.last_mut() {
            Some(Connection::Real(link)) => Ok(link),
            _ => unreachable!("just pushed a real connection"),
        }
    }

    pub fn make_int_connection(
        &mut self,
        source: &VariableIdentifier,
        sink: &VariableIdentifier,
    ) -> Result<&mut TypedConnection<i32>, SimulationError> {
        let source = self.state.resolve(source, ScalarKind::Integer)?;
        let sink = self.state.resolve(sink, ScalarKind::Integer)?;
        self.connections
            .push(Connection::Integer(TypedConnection::new(source, sink)));
        match self.connections.last_mut() {
            Some(Connection::Integer(link)) => Ok(link),
            _ => unreachable!("just pushed an int connection"),
        }
    }

    pub fn make_bool_connection(
        &mut self,
        source: &VariableIdentifier,
        sink: &VariableIdentifier,
    ) -> Result<&mut TypedConnection<bool>, SimulationError> {
        let source = self.state.resolve(source, ScalarKind::Boolean)?;
        let sink = self.state.resolve(sink, ScalarKind::Boolean)?;
        self.connections
            .push(Connection::Boolean(TypedConnection::new(source, sink)));
        match self.connections.last_mut() {
            Some(Connection::Boolean(link)) => Ok(link),
            _ => unreachable!("just pushed a bool connection"),
        }
    }

    pub fn make_string_connection(
        &mut self,
        source: &VariableIdentifier,
        sink: &VariableIdentifier,
    ) -> Result<&mut TypedConnection<String>, SimulationError> {
        let source = self.state.resolve(source, ScalarKind::String)?;
        let sink = self.state.resolve(sink, ScalarKind::String)?;
        self.connections
            .push(Connection::String(TypedConnection::new(source, sink)));
        match self.connections.last_mut() {
            Some(Connection::String(link)) => Ok(link),
            _ => unreachable!("just pushed a string connection"),
        }
    }

    /// Connect a real source to an integer sink. The connection needs a
    /// modifier before it can transfer.
    pub fn make_real_to_int_connection(
        &mut self,
        source: &VariableIdentifier,
        sink: &VariableIdentifier,
    ) -> Result<&mut TypedConnection<f64, i32>, SimulationError> {
        let source = self.state.resolve(source, ScalarKind::Real)?;
        let sink = self.state.resolve(sink, ScalarKind::Integer)?;
        self.connections
            .push(Connection::RealToInteger(TypedConnection::new(source, sink)));
        match self.connections.last_mut() {
            Some(Connection::RealToInteger(link)) => Ok(link),
            _ => unreachable!("just pushed a real-to-int connection"),
        }
    }

    /// Connect an integer source to a real sink. The connection needs a
    /// modifier before it can transfer.
    pub fn make_int_to_real_connection(
        &mut self,
        source: &VariableIdentifier,
        sink: &VariableIdentifier,
    ) -> Result<&mut TypedConnection<i32, f64>, SimulationError> {
        let source = self.state.resolve(source, ScalarKind::Integer)?;
        let sink = self.state.resolve(sink, ScalarKind::Real)?;
        self.connections
            .push(Connection::IntegerToReal(TypedConnection::new(source, sink)));
        match self.connections.last_mut() {
            Some(Connection::IntegerToReal(link)) => Ok(link),
            _ => unreachable!("just pushed an int-to-real connection"),
        }
    }

    // ========================================================================
    // Property lookup
    // ========================================================================

    pub fn real_property(&self, id: &VariableIdentifier) -> Option<&Property<f64>> {
        self.state
            .instance(&id.instance_name)?
            .properties()
            .real_property(&id.variable_name)
    }

    pub fn real_property_mut(&mut self, id: &VariableIdentifier) -> Option<&mut Property<f64>> {
        self.state
            .instance_mut(&id.instance_name)?
            .properties_mut()
            .real_property_mut(&id.variable_name)
    }

    pub fn int_property(&self, id: &VariableIdentifier) -> Option<&Property<i32>> {
        self.state
            .instance(&id.instance_name)?
            .properties()
            .int_property(&id.variable_name)
    }

    pub fn int_property_mut(&mut self, id: &VariableIdentifier) -> Option<&mut Property<i32>> {
        self.state
            .instance_mut(&id.instance_name)?
            .properties_mut()
            .int_property_mut(&id.variable_name)
    }

    pub fn bool_property(&self, id: &VariableIdentifier) -> Option<&Property<bool>> {
        self.state
            .instance(&id.instance_name)?
            .properties()
            .bool_property(&id.variable_name)
    }

    pub fn bool_property_mut(&mut self, id: &VariableIdentifier) -> Option<&mut Property<bool>> {
        self.state
            .instance_mut(&id.instance_name)?
            .properties_mut()
            .bool_property_mut(&id.variable_name)
    }

    pub fn string_property(&self, id: &VariableIdentifier) -> Option<&Property<String>> {
        self.state
            .instance(&id.instance_name)?
            .properties()
            .string_property(&id.variable_name)
    }

    pub fn string_property_mut(&mut self, id: &VariableIdentifier) -> Option<&mut Property<String>> {
        self.state
            .instance_mut(&id.instance_name)?
            .properties_mut()
            .string_property_mut(&id.variable_name)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Initialize the simulation. A no-op when already initialized.
    ///
    /// Runs instance initialization, applies the named parameter set if
    /// given, runs scenario init actions, and lets values settle through
    /// the connection graph with one transfer/apply pass per instance.
    pub fn init(
        &mut self,
        start_time: Option<f64>,
        parameter_set: Option<&str>,
    ) -> Result<(), SimulationError> {
        if self.initialized {
            return Ok(());
        }

        let start = start_time.unwrap_or(0.0);
        if start < 0.0 {
            return Err(SimulationError::InvalidState(format!(
                "explicitly defined start time must not be negative, got {start}"
            )));
        }

        debug!("initializing simulation");
        self.initialized = true;
        self.current_time = start;

        self.each_listener(|l, view| l.pre_init(view));

        let mut parameter_set_applied_count = 0;
        for instance in self.state.instances_mut() {
            instance.setup_experiment(start)?;
            instance.enter_initialization_mode()?;
            if let Some(name) = parameter_set {
                if instance.apply_parameter_set(name) {
                    parameter_set_applied_count += 1;
                }
            }
        }
        if let Some(name) = parameter_set {
            debug!("parameter set '{name}' applied to {parameter_set_applied_count} instances");
        }

        self.scenario.run_init_actions(&mut self.state);

        // Bounded relaxation so values settle through connection chains.
        for _ in 0..self.state.num_instances() {
            for instance in self.state.instances_mut() {
                instance.properties_mut().apply_sets();
                instance.properties_mut().refresh_gets();
            }
            for connection in &self.connections {
                self.state.transfer(connection)?;
            }
        }

        for instance in self.state.instances_mut() {
            instance.exit_initialization_mode()?;
            instance.properties_mut().refresh_gets();
        }

        for connection in &self.connections {
            self.state.transfer(connection)?;
        }

        for instance in self.state.instances_mut() {
            instance.properties_mut().apply_sets();
            instance.properties_mut().refresh_gets();
        }

        self.each_listener(|l, view| l.post_init(view));

        debug!("initialized");
        Ok(())
    }

    /// Execute `num_steps` ticks; returns the new simulation time.
    pub fn step(&mut self, num_steps: u32) -> Result<f64, SimulationError> {
        if !self.initialized {
            return Err(SimulationError::InvalidState(
                "init() has not been invoked".to_string(),
            ));
        }

        for _ in 0..num_steps {
            self.each_listener(|l, view| l.pre_step(view));

            self.scenario.apply(self.current_time, &mut self.state);

            let new_time = self
                .algorithm
                .step(self.current_time, self.state.instances_mut())?;

            for connection in &self.connections {
                self.state.transfer(connection)?;
            }

            self.state.apply_and_refresh_all(true);

            self.current_time = new_time;
            self.iterations += 1;

            self.each_listener(|l, view| l.post_step(view));
        }

        Ok(self.current_time)
    }

    /// Step until the simulation time reaches or exceeds `t`.
    ///
    /// Warns and leaves the simulation untouched when `t` is not ahead of
    /// the current time.
    pub fn step_until(&mut self, t: f64) -> Result<f64, SimulationError> {
        if t <= self.current_time {
            warn!(
                "input time {t} is not greater than the current simulation time {}, simulation will not progress",
                self.current_time
            );
        } else {
            while self.current_time < t {
                self.step(1)?;
            }
        }
        Ok(self.current_time)
    }

    /// Step forward by `t` time units.
    pub fn step_for(&mut self, t: f64) -> Result<f64, SimulationError> {
        let target = self.current_time + t;
        self.step_until(target)
    }

    /// Terminate every instance. A no-op when already terminated.
    pub fn terminate(&mut self) -> Result<(), SimulationError> {
        if self.terminated {
            return Ok(());
        }
        self.terminated = true;

        debug!("terminating simulation");
        for instance in self.state.instances_mut() {
            instance.terminate()?;
        }
        self.each_listener(|l, view| l.post_terminate(view));
        debug!("terminated");
        Ok(())
    }

    /// Return to `Uninitialized`, keeping instances, connections and
    /// scenario configuration.
    pub fn reset(&mut self) -> Result<(), SimulationError> {
        debug!("resetting simulation at t={}", self.current_time);
        for instance in self.state.instances_mut() {
            instance.reset()?;
        }
        self.scenario.reset();
        for (_, listener) in &mut self.listeners {
            listener.on_reset();
        }
        self.current_time = 0.0;
        self.iterations = 0;
        self.initialized = false;
        self.terminated = false;
        Ok(())
    }

    fn each_listener(&mut self, f: impl Fn(&mut dyn SimulationListener, &SimulationView<'_>)) {
        let view = SimulationView::new(self.current_time, self.iterations, &self.state);
        for (_, listener) in &mut self.listeners {
            f(listener.as_mut(), &view);
        }
    }
}
