//! Integration tests for the engine state machine, decimation and
//! listeners.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use cosim_core::models::instance::{InstanceBackend, ModelInstance};
use cosim_core::models::property::Property;
use cosim_core::models::variable::{ScalarValue, VariableIdentifier};
use cosim_core::simulation::{SimulationListener, SimulationView};
use cosim_core::{FixedStepAlgorithm, Simulation, SimulationError};

#[derive(Default)]
struct Counters {
    setup: AtomicUsize,
    enter_init: AtomicUsize,
    exit_init: AtomicUsize,
    steps: AtomicUsize,
    terminates: AtomicUsize,
    resets: AtomicUsize,
}

struct CountingBackend {
    counters: Arc<Counters>,
}

impl InstanceBackend for CountingBackend {
    fn setup_experiment(&mut self, _start_time: f64) -> Result<(), SimulationError> {
        self.counters.setup.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    fn enter_initialization_mode(&mut self) -> Result<(), SimulationError> {
        self.counters.enter_init.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    fn exit_initialization_mode(&mut self) -> Result<(), SimulationError> {
        self.counters.exit_init.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    fn step(&mut self, _current_time: f64, _step_size: f64) -> Result<(), SimulationError> {
        self.counters.steps.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    fn terminate(&mut self) -> Result<(), SimulationError> {
        self.counters.terminates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    fn reset(&mut self) -> Result<(), SimulationError> {
        self.counters.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn counting_instance(name: &str, step_size_hint: Option<f64>) -> (ModelInstance, Arc<Counters>) {
    let counters = Arc::new(Counters::default());
    let mut instance = ModelInstance::new(
        name,
        step_size_hint,
        Box::new(CountingBackend {
            counters: counters.clone(),
        }),
    );

    let value = Arc::new(Mutex::new(0.0f64));
    let (getter, setter) = (value.clone(), value);
    instance.properties_mut().add_real(Property::new(
        VariableIdentifier::new(name, "value"),
        Box::new(move || *getter.lock().unwrap()),
        Some(Box::new(move |v| *setter.lock().unwrap() = v)),
    ));

    (instance, counters)
}

#[test]
fn test_duplicate_instance_name_rejected() {
    let mut sim = Simulation::new(Box::new(FixedStepAlgorithm::new(0.1)));
    let (a, _) = counting_instance("mock", None);
    let (b, _) = counting_instance("mock", None);

    sim.add_slave(a).unwrap();
    let result = sim.add_slave(b);
    assert!(matches!(result, Err(SimulationError::DuplicateName(_))));
}

#[test]
fn test_step_before_init_fails() {
    let mut sim = Simulation::new(Box::new(FixedStepAlgorithm::new(0.1)));
    let (instance, _) = counting_instance("mock", None);
    sim.add_slave(instance).unwrap();

    let result = sim.step(1);
    assert!(matches!(result, Err(SimulationError::InvalidState(_))));
}

#[test]
fn test_init_is_idempotent() {
    let mut sim = Simulation::new(Box::new(FixedStepAlgorithm::new(0.1)));
    let (instance, counters) = counting_instance("mock", None);
    sim.add_slave(instance).unwrap();

    sim.init(None, None).unwrap();
    sim.init(None, None).unwrap();

    assert!(sim.initialized());
    assert_eq!(counters.enter_init.load(Ordering::SeqCst), 1);
    assert_eq!(counters.exit_init.load(Ordering::SeqCst), 1);
}

#[test]
fn test_negative_start_time_rejected() {
    let mut sim = Simulation::new(Box::new(FixedStepAlgorithm::new(0.1)));
    let (instance, _) = counting_instance("mock", None);
    sim.add_slave(instance).unwrap();

    let result = sim.init(Some(-1.0), None);
    assert!(matches!(result, Err(SimulationError::InvalidState(_))));
    assert!(!sim.initialized());
}

#[test]
fn test_step_advances_time_and_iterations() {
    let mut sim = Simulation::new(Box::new(FixedStepAlgorithm::new(0.1)));
    let (instance, counters) = counting_instance("mock", None);
    sim.add_slave(instance).unwrap();

    sim.init(None, None).unwrap();
    let t = sim.step(10).unwrap();

    assert!((t - 1.0).abs() < 1e-9);
    assert_eq!(sim.iterations(), 10);
    assert_eq!(counters.steps.load(Ordering::SeqCst), 10);
}

#[test]
fn test_decimation_factor_schedules_every_nth_tick() {
    let base = 0.1;
    let mut sim = Simulation::new(Box::new(FixedStepAlgorithm::new(base)));
    let (fast, fast_counters) = counting_instance("fast", None);
    let (slow, slow_counters) = counting_instance("slow", Some(4.0 * base));
    sim.add_slave(fast).unwrap();
    sim.add_slave(slow).unwrap();

    sim.init(None, None).unwrap();
    sim.step(100).unwrap();

    assert_eq!(fast_counters.steps.load(Ordering::SeqCst), 100);
    assert_eq!(slow_counters.steps.load(Ordering::SeqCst), 25);
}

#[test]
fn test_sequential_algorithm_matches_parallel() {
    let base = 0.1;
    let mut sim = Simulation::new(Box::new(FixedStepAlgorithm::with_parallel(base, false)));
    let (slow, slow_counters) = counting_instance("slow", Some(4.0 * base));
    sim.add_slave(slow).unwrap();

    sim.init(None, None).unwrap();
    sim.step(100).unwrap();
    assert_eq!(slow_counters.steps.load(Ordering::SeqCst), 25);
}

#[test]
fn test_step_until_warns_but_does_not_fail_on_past_target() {
    let mut sim = Simulation::new(Box::new(FixedStepAlgorithm::new(0.1)));
    let (instance, counters) = counting_instance("mock", None);
    sim.add_slave(instance).unwrap();

    sim.init(None, None).unwrap();
    sim.step(5).unwrap();

    let t = sim.step_until(0.1).unwrap();
    assert!((t - 0.5).abs() < 1e-9);
    assert_eq!(counters.steps.load(Ordering::SeqCst), 5);
}

#[test]
fn test_step_for() {
    let mut sim = Simulation::new(Box::new(FixedStepAlgorithm::new(0.1)));
    let (instance, _) = counting_instance("mock", None);
    sim.add_slave(instance).unwrap();

    sim.init(None, None).unwrap();
    let t = sim.step_for(1.0).unwrap();
    // Reaches or just passes the target, depending on accumulated rounding.
    assert!(t >= 1.0 - 1e-9);
    assert!(t <= 1.1 + 1e-9);
}

#[test]
fn test_terminate_is_idempotent() {
    let mut sim = Simulation::new(Box::new(FixedStepAlgorithm::new(0.1)));
    let (instance, counters) = counting_instance("mock", None);
    sim.add_slave(instance).unwrap();

    sim.init(None, None).unwrap();
    sim.terminate().unwrap();
    sim.terminate().unwrap();

    assert!(sim.terminated());
    assert_eq!(counters.terminates.load(Ordering::SeqCst), 1);
}

#[test]
fn test_reset_returns_to_uninitialized() {
    let mut sim = Simulation::new(Box::new(FixedStepAlgorithm::new(0.1)));
    let (instance, counters) = counting_instance("mock", None);
    sim.add_slave(instance).unwrap();

    sim.init(None, None).unwrap();
    sim.step(3).unwrap();
    sim.terminate().unwrap();

    sim.reset().unwrap();
    assert!(!sim.initialized());
    assert!(!sim.terminated());
    assert_eq!(sim.time(), 0.0);
    assert_eq!(sim.iterations(), 0);
    assert_eq!(counters.resets.load(Ordering::SeqCst), 1);

    // A fresh run initializes again.
    sim.init(None, None).unwrap();
    assert_eq!(counters.enter_init.load(Ordering::SeqCst), 2);
}

#[test]
fn test_parameter_set_applied_at_init() {
    let mut sim = Simulation::new(Box::new(FixedStepAlgorithm::new(0.1)));
    let (mut instance, _) = counting_instance("mock", None);
    instance.add_parameter_set_entry("initial", "value", ScalarValue::Real(3.5));
    // Unknown variables warn and are skipped.
    instance.add_parameter_set_entry("initial", "no_such_variable", ScalarValue::Real(1.0));
    sim.add_slave(instance).unwrap();

    sim.init(None, Some("initial")).unwrap();

    let id: VariableIdentifier = "mock::value".parse().unwrap();
    assert_eq!(sim.real_property(&id).unwrap().get(), 3.5);
}

#[test]
fn test_integer_parameter_falls_back_to_real_property() {
    let mut sim = Simulation::new(Box::new(FixedStepAlgorithm::new(0.1)));
    let (mut instance, _) = counting_instance("mock", None);
    instance.add_parameter_set_entry("initial", "value", ScalarValue::Integer(2));
    sim.add_slave(instance).unwrap();

    sim.init(None, Some("initial")).unwrap();

    let id: VariableIdentifier = "mock::value".parse().unwrap();
    assert_eq!(sim.real_property(&id).unwrap().get(), 2.0);
}

#[derive(Default)]
struct EventLog {
    events: Mutex<Vec<String>>,
}

struct RecordingListener {
    tag: &'static str,
    log: Arc<EventLog>,
}

impl RecordingListener {
    fn record(&self, event: &str, sim: &SimulationView<'_>) {
        self.log
            .events
            .lock()
            .unwrap()
            .push(format!("{}:{event}@{}", self.tag, sim.iterations()));
    }
}

impl SimulationListener for RecordingListener {
    fn pre_init(&mut self, sim: &SimulationView<'_>) {
        self.record("pre_init", sim);
    }
    fn post_init(&mut self, sim: &SimulationView<'_>) {
        self.record("post_init", sim);
    }
    fn pre_step(&mut self, sim: &SimulationView<'_>) {
        self.record("pre_step", sim);
    }
    fn post_step(&mut self, sim: &SimulationView<'_>) {
        self.record("post_step", sim);
    }
    fn post_terminate(&mut self, sim: &SimulationView<'_>) {
        self.record("post_terminate", sim);
    }
}

#[test]
fn test_listener_lifecycle_order() {
    let mut sim = Simulation::new(Box::new(FixedStepAlgorithm::new(0.1)));
    let (instance, _) = counting_instance("mock", None);
    sim.add_slave(instance).unwrap();

    let log = Arc::new(EventLog::default());
    sim.add_listener(
        "recorder",
        Box::new(RecordingListener {
            tag: "r",
            log: log.clone(),
        }),
    );

    sim.init(None, None).unwrap();
    sim.step(1).unwrap();
    sim.terminate().unwrap();

    let events = log.events.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            "r:pre_init@0".to_string(),
            "r:post_init@0".to_string(),
            "r:pre_step@0".to_string(),
            "r:post_step@1".to_string(),
            "r:post_terminate@1".to_string(),
        ]
    );
}

#[test]
fn test_listener_name_collision_keeps_existing() {
    let mut sim = Simulation::new(Box::new(FixedStepAlgorithm::new(0.1)));
    let (instance, _) = counting_instance("mock", None);
    sim.add_slave(instance).unwrap();

    let log = Arc::new(EventLog::default());
    sim.add_listener(
        "recorder",
        Box::new(RecordingListener {
            tag: "first",
            log: log.clone(),
        }),
    );
    sim.add_listener(
        "recorder",
        Box::new(RecordingListener {
            tag: "second",
            log: log.clone(),
        }),
    );

    sim.init(None, None).unwrap();

    let events = log.events.lock().unwrap().clone();
    assert!(events.iter().all(|e| e.starts_with("first:")));
}

#[test]
fn test_remove_listener() {
    let mut sim = Simulation::new(Box::new(FixedStepAlgorithm::new(0.1)));
    let (instance, _) = counting_instance("mock", None);
    sim.add_slave(instance).unwrap();

    let log = Arc::new(EventLog::default());
    sim.add_listener(
        "recorder",
        Box::new(RecordingListener {
            tag: "r",
            log: log.clone(),
        }),
    );
    sim.remove_listener("recorder");

    sim.init(None, None).unwrap();
    assert!(log.events.lock().unwrap().is_empty());
}

#[test]
fn test_property_lookup_is_defensive() {
    let sim = Simulation::new(Box::new(FixedStepAlgorithm::new(0.1)));
    let id: VariableIdentifier = "ghost::value".parse().unwrap();
    assert!(sim.real_property(&id).is_none());
    assert!(sim.state().get_scalar(&id).is_none());
}

#[test]
fn test_identifiers_lists_all_properties() {
    let mut sim = Simulation::new(Box::new(FixedStepAlgorithm::new(0.1)));
    let (a, _) = counting_instance("a", None);
    let (b, _) = counting_instance("b", None);
    sim.add_slave(a).unwrap();
    sim.add_slave(b).unwrap();

    let ids = sim.identifiers();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&VariableIdentifier::new("a", "value")));
    assert!(ids.contains(&VariableIdentifier::new("b", "value")));
}
