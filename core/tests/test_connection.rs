//! Tests for connection binding and transfer semantics.

use std::sync::{Arc, Mutex};

use cosim_core::models::instance::{InstanceBackend, ModelInstance};
use cosim_core::models::property::Property;
use cosim_core::models::variable::VariableIdentifier;
use cosim_core::{FixedStepAlgorithm, Simulation, SimulationError};

struct NoopBackend;

impl InstanceBackend for NoopBackend {
    fn setup_experiment(&mut self, _start_time: f64) -> Result<(), SimulationError> {
        Ok(())
    }
    fn enter_initialization_mode(&mut self) -> Result<(), SimulationError> {
        Ok(())
    }
    fn exit_initialization_mode(&mut self) -> Result<(), SimulationError> {
        Ok(())
    }
    fn step(&mut self, _current_time: f64, _step_size: f64) -> Result<(), SimulationError> {
        Ok(())
    }
    fn terminate(&mut self) -> Result<(), SimulationError> {
        Ok(())
    }
    fn reset(&mut self) -> Result<(), SimulationError> {
        Ok(())
    }
}

struct Handles {
    real: Arc<Mutex<f64>>,
    int: Arc<Mutex<i32>>,
    flag: Arc<Mutex<bool>>,
}

/// Instance exposing one property per scalar kind, backed by shared cells.
fn mock_instance(name: &str) -> (ModelInstance, Handles) {
    let handles = Handles {
        real: Arc::new(Mutex::new(0.0)),
        int: Arc::new(Mutex::new(0)),
        flag: Arc::new(Mutex::new(false)),
    };

    let mut instance = ModelInstance::new(name, None, Box::new(NoopBackend));

    let (getter, setter) = (handles.real.clone(), handles.real.clone());
    instance.properties_mut().add_real(Property::new(
        VariableIdentifier::new(name, "real_prop"),
        Box::new(move || *getter.lock().unwrap()),
        Some(Box::new(move |v| *setter.lock().unwrap() = v)),
    ));

    let (getter, setter) = (handles.int.clone(), handles.int.clone());
    instance.properties_mut().add_integer(Property::new(
        VariableIdentifier::new(name, "integer_prop"),
        Box::new(move || *getter.lock().unwrap()),
        Some(Box::new(move |v| *setter.lock().unwrap() = v)),
    ));

    let (getter, setter) = (handles.flag.clone(), handles.flag.clone());
    instance.properties_mut().add_boolean(Property::new(
        VariableIdentifier::new(name, "boolean_prop"),
        Box::new(move || *getter.lock().unwrap()),
        Some(Box::new(move |v| *setter.lock().unwrap() = v)),
    ));

    (instance, handles)
}

fn two_instance_sim() -> (Simulation, Handles, Handles) {
    let mut sim = Simulation::new(Box::new(FixedStepAlgorithm::new(0.1)));
    let (a, a_handles) = mock_instance("a");
    let (b, b_handles) = mock_instance("b");
    sim.add_slave(a).unwrap();
    sim.add_slave(b).unwrap();
    (sim, a_handles, b_handles)
}

fn id(text: &str) -> VariableIdentifier {
    text.parse().unwrap()
}

#[test]
fn test_real_connection_transfers_on_step() {
    let (mut sim, a, b) = two_instance_sim();
    sim.make_real_connection(&id("a::real_prop"), &id("b::real_prop"))
        .unwrap();
    sim.init(None, None).unwrap();

    *a.real.lock().unwrap() = 5.0;
    assert_eq!(*b.real.lock().unwrap(), 0.0);

    sim.step(1).unwrap();
    assert_eq!(*b.real.lock().unwrap(), 5.0);
    assert_eq!(sim.real_property(&id("b::real_prop")).unwrap().get(), 5.0);
}

#[test]
fn test_real_connection_modifier() {
    let (mut sim, a, b) = two_instance_sim();
    let link = sim
        .make_real_connection(&id("a::real_prop"), &id("b::real_prop"))
        .unwrap();
    link.set_modifier(Box::new(|v| v * 2.0));
    sim.init(None, None).unwrap();

    *a.real.lock().unwrap() = 3.0;
    sim.step(1).unwrap();
    assert_eq!(*b.real.lock().unwrap(), 6.0);
}

#[test]
fn test_values_settle_during_init() {
    let (mut sim, a, b) = two_instance_sim();
    sim.make_real_connection(&id("a::real_prop"), &id("b::real_prop"))
        .unwrap();

    *a.real.lock().unwrap() = 2.5;
    sim.init(None, None).unwrap();
    assert_eq!(*b.real.lock().unwrap(), 2.5);
}

#[test]
fn test_cross_type_connection_without_modifier_fails() {
    let (mut sim, _a, _b) = two_instance_sim();
    sim.make_real_to_int_connection(&id("a::real_prop"), &id("b::integer_prop"))
        .unwrap();

    let result = sim.init(None, None);
    assert!(matches!(
        result,
        Err(SimulationError::ModifierRequired { .. })
    ));
}

#[test]
fn test_cross_type_connection_with_modifier() {
    let (mut sim, a, b) = two_instance_sim();
    let link = sim
        .make_real_to_int_connection(&id("a::real_prop"), &id("b::integer_prop"))
        .unwrap();
    link.set_modifier(Box::new(|v| v.round() as i32));
    sim.init(None, None).unwrap();

    *a.real.lock().unwrap() = 1.4;
    sim.step(1).unwrap();
    assert_eq!(*b.int.lock().unwrap(), 1);
}

#[test]
fn test_int_to_real_connection_with_modifier() {
    let (mut sim, a, b) = two_instance_sim();
    let link = sim
        .make_int_to_real_connection(&id("a::integer_prop"), &id("b::real_prop"))
        .unwrap();
    link.set_modifier(Box::new(|v| f64::from(v)));
    sim.init(None, None).unwrap();

    *a.int.lock().unwrap() = 7;
    sim.step(1).unwrap();
    assert_eq!(*b.real.lock().unwrap(), 7.0);
}

#[test]
fn test_connect_infers_kind() {
    let (mut sim, a, b) = two_instance_sim();
    sim.connect(&id("a::boolean_prop"), &id("b::boolean_prop"))
        .unwrap();
    sim.init(None, None).unwrap();

    *a.flag.lock().unwrap() = true;
    sim.step(1).unwrap();
    assert!(*b.flag.lock().unwrap());
}

#[test]
fn test_connect_incompatible_kinds_fails() {
    let (mut sim, _a, _b) = two_instance_sim();
    let result = sim.connect(&id("a::real_prop"), &id("b::boolean_prop"));
    assert!(matches!(result, Err(SimulationError::TypeMismatch { .. })));
}

#[test]
fn test_unknown_endpoint_fails_at_bind_time() {
    let (mut sim, _a, _b) = two_instance_sim();

    let result = sim.make_real_connection(&id("a::no_such"), &id("b::real_prop"));
    assert!(matches!(result, Err(SimulationError::NotFound(_))));

    let result = sim.make_real_connection(&id("missing::real_prop"), &id("b::real_prop"));
    assert!(matches!(result, Err(SimulationError::NotFound(_))));
}
