//! Simulation lifecycle listeners.

use crate::simulation::state::SimulationState;

/// Read-only view of the engine handed to listeners.
pub struct SimulationView<'a> {
    time: f64,
    iterations: u64,
    state: &'a SimulationState,
}

impl<'a> SimulationView<'a> {
    pub(crate) fn new(time: f64, iterations: u64, state: &'a SimulationState) -> Self {
        Self {
            time,
            iterations,
            state,
        }
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn state(&self) -> &SimulationState {
        self.state
    }
}

/// Hooks around engine lifecycle transitions.
///
/// Telemetry writers implement this; all hooks default to no-ops so an
/// implementation only overrides what it needs.
pub trait SimulationListener: Send {
    fn pre_init(&mut self, _sim: &SimulationView<'_>) {}
    fn post_init(&mut self, _sim: &SimulationView<'_>) {}

    fn pre_step(&mut self, _sim: &SimulationView<'_>) {}
    fn post_step(&mut self, _sim: &SimulationView<'_>) {}

    fn post_terminate(&mut self, _sim: &SimulationView<'_>) {}

    fn on_reset(&mut self) {}
}
