//! Stepping strategies.
//!
//! An algorithm decides which registered instances execute on a given tick
//! and in what execution mode. The fixed-step algorithm advances the whole
//! system by a constant base step and supports multi-rate (decimated)
//! stepping for instances that declare a larger preferred step size.

use rayon::prelude::*;
use tracing::warn;

use crate::error::SimulationError;
use crate::models::instance::ModelInstance;

/// Stateless-step contract used by the simulation engine.
pub trait Algorithm: Send {
    /// Called once per registered instance, in registration order.
    fn instance_added(&mut self, instance: &ModelInstance);

    /// Advance due instances one tick; returns the new simulation time.
    fn step(
        &mut self,
        current_time: f64,
        instances: &mut [ModelInstance],
    ) -> Result<f64, SimulationError>;
}

/// Tolerated deviation between a step-size hint and the realized step.
const STEP_SIZE_EPS: f64 = 1e-3;

/// Fixed base-step orchestration with integer-indexed decimation.
///
/// An instance whose step-size hint is a multiple of the base step only
/// executes every N-th tick, where `N = max(1, ceil(hint / base))`. Due
/// instances run `apply pending writes -> step -> refresh reads`, by
/// default as a data-parallel fan-out with no ordering guarantee.
pub struct FixedStepAlgorithm {
    step_size: f64,
    parallel: bool,
    tick: u64,
    decimation_factors: Vec<u64>,
}

impl FixedStepAlgorithm {
    pub fn new(step_size: f64) -> Self {
        Self::with_parallel(step_size, true)
    }

    pub fn with_parallel(step_size: f64, parallel: bool) -> Self {
        assert!(step_size > 0.0, "step_size must be positive");
        Self {
            step_size,
            parallel,
            tick: 0,
            decimation_factors: Vec::new(),
        }
    }

    pub fn step_size(&self) -> f64 {
        self.step_size
    }

    fn decimation_factor(&self, instance: &ModelInstance) -> u64 {
        let Some(hint) = instance.step_size_hint() else {
            return 1;
        };

        let factor = ((hint / self.step_size).ceil() as i64).max(1) as u64;
        let actual = self.step_size * factor as f64;
        if (actual - hint).abs() >= STEP_SIZE_EPS {
            warn!(
                "actual step size for '{}' will be {} rather than the requested {}",
                instance.name(),
                actual,
                hint
            );
        }
        factor
    }
}

impl Algorithm for FixedStepAlgorithm {
    fn instance_added(&mut self, instance: &ModelInstance) {
        let factor = self.decimation_factor(instance);
        self.decimation_factors.push(factor);
    }

    fn step(
        &mut self,
        current_time: f64,
        instances: &mut [ModelInstance],
    ) -> Result<f64, SimulationError> {
        let tick = self.tick;
        let step_size = self.step_size;
        let factors = &self.decimation_factors;

        let advance = |(index, instance): (usize, &mut ModelInstance)| -> Result<(), SimulationError> {
            let factor = factors.get(index).copied().unwrap_or(1);
            if tick % factor == 0 {
                instance.properties_mut().apply_sets();
                instance.step(current_time, step_size)?;
                instance.properties_mut().refresh_gets();
            }
            Ok(())
        };

        if self.parallel {
            instances
                .par_iter_mut()
                .enumerate()
                .try_for_each(advance)?;
        } else {
            instances.iter_mut().enumerate().try_for_each(advance)?;
        }

        self.tick += 1;
        Ok(current_time + step_size)
    }
}
