//! Tests for system-structure binding and model resolution.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use cosim_core::models::instance::{InstanceBackend, ModelInstance};
use cosim_core::models::property::Property;
use cosim_core::models::variable::{ScalarValue, VariableIdentifier};
use cosim_core::resolver::{ModelResolver, ModelSubResolver};
use cosim_core::{FixedStepAlgorithm, Model, Simulation, SimulationError, SimulationStructure};

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

/// Model whose instances expose one readable/writable real "value".
struct MockModel;

impl Model for MockModel {
    fn instantiate(
        &self,
        instance_name: &str,
        step_size_hint: Option<f64>,
    ) -> Result<ModelInstance, SimulationError> {
        let mut instance = ModelInstance::new(instance_name, step_size_hint, Box::new(NoopBackend));
        let value = Arc::new(Mutex::new(0.0f64));
        let (getter, setter) = (value.clone(), value);
        instance.properties_mut().add_real(Property::new(
            VariableIdentifier::new(instance_name, "value"),
            Box::new(move || *getter.lock().unwrap()),
            Some(Box::new(move |v| *setter.lock().unwrap() = v)),
        ));
        Ok(instance)
    }
}

fn id(text: &str) -> VariableIdentifier {
    text.parse().unwrap()
}

fn algorithm() -> Box<FixedStepAlgorithm> {
    Box::new(FixedStepAlgorithm::new(0.1))
}

#[test]
fn test_load_binds_instances_and_connections() {
    let model: Arc<dyn Model> = Arc::new(MockModel);

    let mut structure = SimulationStructure::new();
    structure.add_model("source", model.clone(), None).unwrap();
    structure.add_model("sink", model, Some(0.2)).unwrap();
    structure.make_connection(id("source::value"), id("sink::value"), None);

    let mut parameters = HashMap::new();
    parameters.insert(id("source::value"), ScalarValue::Real(5.0));
    structure.add_parameter_set("initial", parameters);

    let mut sim: Simulation = structure.load(algorithm()).unwrap();
    assert_eq!(sim.state().num_instances(), 2);
    assert_eq!(sim.num_connections(), 1);

    sim.init(None, Some("initial")).unwrap();
    sim.step(1).unwrap();
    assert_eq!(sim.real_property(&id("sink::value")).unwrap().get(), 5.0);
}

#[test]
fn test_connection_modifier_applied() {
    let model: Arc<dyn Model> = Arc::new(MockModel);

    let mut structure = SimulationStructure::new();
    structure.add_model("source", model.clone(), None).unwrap();
    structure.add_model("sink", model, None).unwrap();
    structure.make_connection(
        id("source::value"),
        id("sink::value"),
        Some(Box::new(|v| v * 10.0)),
    );

    let mut parameters = HashMap::new();
    parameters.insert(id("source::value"), ScalarValue::Real(2.0));
    let mut sim = {
        let mut s = structure;
        s.add_parameter_set("initial", parameters);
        s.load(algorithm()).unwrap()
    };

    sim.init(None, Some("initial")).unwrap();
    sim.step(1).unwrap();
    assert_eq!(sim.real_property(&id("sink::value")).unwrap().get(), 20.0);
}

#[test]
fn test_duplicate_model_name_rejected() {
    let model: Arc<dyn Model> = Arc::new(MockModel);

    let mut structure = SimulationStructure::new();
    structure.add_model("mock", model.clone(), None).unwrap();
    let result = structure.add_model("mock", model, None);
    assert!(matches!(result, Err(SimulationError::DuplicateName(_))));
}

#[test]
fn test_dangling_connection_endpoint_aborts_load() {
    let model: Arc<dyn Model> = Arc::new(MockModel);

    let mut structure = SimulationStructure::new();
    structure.add_model("source", model, None).unwrap();
    structure.make_connection(id("source::value"), id("ghost::value"), None);

    let result = structure.load(algorithm());
    assert!(matches!(result, Err(SimulationError::NotFound(_))));
}

struct CountingSubResolver {
    calls: Arc<AtomicUsize>,
}

impl ModelSubResolver for CountingSubResolver {
    fn resolve(&self, _base: &Path, uri: &str) -> Option<Arc<dyn Model>> {
        if !uri.ends_with(".mock") {
            return None;
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        Some(Arc::new(MockModel))
    }
}

#[test]
fn test_resolver_caches_by_base_and_uri() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut resolver = ModelResolver::new();
    resolver.add_sub_resolver(Box::new(CountingSubResolver {
        calls: calls.clone(),
    }));

    let base = Path::new(".");
    let first = resolver.resolve(base, "model.mock").unwrap();
    let second = resolver.resolve(base, "model.mock").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    resolver.resolve(base, "other.mock").unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_resolver_without_match_reports_not_found() {
    let mut resolver = ModelResolver::new();
    let result = resolver.resolve(Path::new("."), "model.unknown");
    assert!(matches!(result, Err(SimulationError::NotFound(_))));
}
