//! JSON scenario configuration.
//!
//! A scenario file is a list of timed property assignments:
//!
//! ```json
//! {
//!   "actions": [
//!     { "time": 2.0, "variable": "controller::setpoint", "value": 5.0 },
//!     { "time": 4.0, "variable": "valve::open", "value": true, "eps": 0.01 }
//!   ]
//! }
//! ```
//!
//! Unknown variables warn at fire time and do not abort the run.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::SimulationError;
use crate::models::variable::{ScalarValue, VariableIdentifier};
use crate::simulation::Simulation;

#[derive(Debug, Deserialize)]
pub struct ScenarioConfig {
    pub actions: Vec<ScenarioActionConfig>,
}

#[derive(Debug, Deserialize)]
pub struct ScenarioActionConfig {
    pub time: f64,
    pub variable: String,
    pub value: ScalarValue,
    #[serde(default)]
    pub eps: Option<f64>,
}

/// Load a scenario file and register its actions with the simulation.
pub fn load_scenario(path: &Path, sim: &mut Simulation) -> Result<(), SimulationError> {
    let text = fs::read_to_string(path)?;
    let config: ScenarioConfig = serde_json::from_str(&text)
        .map_err(|e| SimulationError::MalformedConfig(format!("scenario config: {e}")))?;

    let num_actions = config.actions.len();
    for action in config.actions {
        let id: VariableIdentifier = action.variable.parse()?;
        let value = action.value;
        sim.invoke_at(
            action.time,
            action.eps,
            Box::new(move |ctx| {
                if let Err(e) = ctx.state.set_scalar(&id, value.clone()) {
                    warn!("scenario action for '{id}' skipped: {e}");
                }
            }),
        );
    }

    debug!(
        "loaded scenario '{}' with {} actions",
        path.display(),
        num_actions
    );
    Ok(())
}
