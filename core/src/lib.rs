//! Co-Simulation Core - Rust Engine
//!
//! Fixed-step orchestration of independently-executing model instances
//! ("slaves") that conform to a standard stepping interface, with data
//! exchanged between them through declared connections.
//!
//! # Architecture
//!
//! - **models**: Domain types (scalar values, identifiers, properties,
//!   connections, model instances)
//! - **slave**: The stepping interface plus the get/set batching decorator
//! - **algorithm**: Fixed-step orchestration with multi-rate decimation
//! - **scenario**: Timeline of deferred property mutations
//! - **simulation**: The engine state machine tying everything together
//! - **structure**: Binding of loaded system descriptions
//! - **model / resolver**: Seams towards concrete model providers
//!
//! # Critical Invariants
//!
//! 1. Property writes are staged and only land at apply passes
//! 2. Connections observe applied values, never in-flight writes
//! 3. Cross-instance data flow happens only between parallel phases

// Module declarations
pub mod algorithm;
pub mod error;
pub mod model;
pub mod models;
pub mod resolver;
pub mod scenario;
pub mod simulation;
pub mod slave;
pub mod structure;

// Re-exports for convenience
pub use algorithm::{Algorithm, FixedStepAlgorithm};
pub use error::SimulationError;
pub use model::Model;
pub use models::{
    Connection, InstanceBackend, ModelInstance, ParameterSet, ParseError, Property,
    PropertyListener, PropertyTable, ScalarKind, ScalarValue, VariableIdentifier,
};
pub use resolver::{ModelResolver, ModelSubResolver};
pub use scenario::{ActionContext, ActionFn, PredicateAction, PredicateFn, Scenario, TimedAction};
pub use simulation::{Simulation, SimulationListener, SimulationState, SimulationView};
pub use slave::{
    slave_instance, BufferedSlave, ModelDescription, Slave, SlaveError, ValueRef,
    VariableDescription,
};
pub use structure::SimulationStructure;
