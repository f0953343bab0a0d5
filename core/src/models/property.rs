//! Typed properties with deferred-write semantics.
//!
//! A property is the read/write endpoint for one exposed variable of a
//! model instance. Writes are staged in a single-slot cache and only reach
//! the underlying setter when `apply()` runs at a tick boundary. This is
//! what makes the order of connection transfers within a tick irrelevant:
//! readers always observe the last *applied* value, never an in-flight
//! write.

use std::collections::HashMap;

use crate::models::variable::VariableIdentifier;

/// Getter closure for a property value.
pub type Getter<T> = Box<dyn Fn() -> T + Send>;
/// Setter closure for a property value.
pub type Setter<T> = Box<dyn Fn(T) + Send>;
/// Value transformation applied on the way in (set) or out (get).
pub type ValueModifier<T> = Box<dyn Fn(T) -> T + Send>;

/// A typed variable endpoint with a single-slot pending-write cache.
///
/// # Example
/// ```
/// use std::sync::{Arc, Mutex};
/// use cosim_core::models::property::Property;
/// use cosim_core::models::variable::VariableIdentifier;
///
/// let value = Arc::new(Mutex::new(0.0));
/// let (g, s) = (value.clone(), value.clone());
/// let mut p = Property::new(
///     VariableIdentifier::new("tank", "level"),
///     Box::new(move || *g.lock().unwrap()),
///     Some(Box::new(move |v| *s.lock().unwrap() = v)),
/// );
///
/// p.set(2.5);
/// assert_eq!(p.get(), 0.0); // staged only
/// p.apply();
/// assert_eq!(p.get(), 2.5);
/// ```
pub struct Property<T> {
    id: VariableIdentifier,
    getter: Getter<T>,
    setter: Option<Setter<T>>,
    input_modifier: Option<ValueModifier<T>>,
    output_modifier: Option<ValueModifier<T>>,
    pending: Option<T>,
}

impl<T> Property<T> {
    pub fn new(id: VariableIdentifier, getter: Getter<T>, setter: Option<Setter<T>>) -> Self {
        Self {
            id,
            getter,
            setter,
            input_modifier: None,
            output_modifier: None,
            pending: None,
        }
    }

    /// Convenience constructor for a property without a setter.
    pub fn read_only(id: VariableIdentifier, getter: Getter<T>) -> Self {
        Self::new(id, getter, None)
    }

    pub fn id(&self) -> &VariableIdentifier {
        &self.id
    }

    /// Read the current value through the output modifier, if any.
    ///
    /// Never observes the pending write; only `apply()` consumes it.
    pub fn get(&self) -> T {
        let value = (self.getter)();
        match &self.output_modifier {
            Some(m) => m(value),
            None => value,
        }
    }

    /// Stage a value to be applied at the next apply pass.
    pub fn set(&mut self, value: T) {
        self.pending = Some(value);
    }

    /// Flush the pending write through the input modifier into the setter.
    ///
    /// The slot is only consumed when a setter exists.
    pub fn apply(&mut self) {
        if self.setter.is_none() {
            return;
        }
        if let Some(value) = self.pending.take() {
            let value = match &self.input_modifier {
                Some(m) => m(value),
                None => value,
            };
            if let Some(setter) = &self.setter {
                setter(value);
            }
        }
    }

    pub fn set_input_modifier(&mut self, modifier: ValueModifier<T>) {
        self.input_modifier = Some(modifier);
    }

    pub fn clear_input_modifier(&mut self) {
        self.input_modifier = None;
    }

    pub fn set_output_modifier(&mut self, modifier: ValueModifier<T>) {
        self.output_modifier = Some(modifier);
    }

    pub fn clear_output_modifier(&mut self) {
        self.output_modifier = None;
    }
}

/// Hooks invoked around batch apply/refresh cycles.
///
/// The buffered slave layer uses this to flush its write caches right after
/// property setters ran, and to refresh its read caches right before
/// getters are served again.
pub trait PropertyListener: Send {
    /// Called after all pending property writes were applied.
    fn post_sets(&mut self);
    /// Called before property reads are served for the new phase.
    fn pre_gets(&mut self);
}

/// Per-instance table of typed properties.
#[derive(Default)]
pub struct PropertyTable {
    listeners: Vec<Box<dyn PropertyListener>>,
    reals: HashMap<String, Property<f64>>,
    integers: HashMap<String, Property<i32>>,
    booleans: HashMap<String, Property<bool>>,
    strings: HashMap<String, Property<String>>,
}

impl PropertyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_real(&mut self, p: Property<f64>) {
        self.reals.insert(p.id().variable_name.clone(), p);
    }

    pub fn add_integer(&mut self, p: Property<i32>) {
        self.integers.insert(p.id().variable_name.clone(), p);
    }

    pub fn add_boolean(&mut self, p: Property<bool>) {
        self.booleans.insert(p.id().variable_name.clone(), p);
    }

    pub fn add_string(&mut self, p: Property<String>) {
        self.strings.insert(p.id().variable_name.clone(), p);
    }

    pub fn real_property(&self, name: &str) -> Option<&Property<f64>> {
        self.reals.get(name)
    }

    pub fn real_property_mut(&mut self, name: &str) -> Option<&mut Property<f64>> {
        self.reals.get_mut(name)
    }

    pub fn int_property(&self, name: &str) -> Option<&Property<i32>> {
        self.integers.get(name)
    }

    pub fn int_property_mut(&mut self, name: &str) -> Option<&mut Property<i32>> {
        self.integers.get_mut(name)
    }

    pub fn bool_property(&self, name: &str) -> Option<&Property<bool>> {
        self.booleans.get(name)
    }

    pub fn bool_property_mut(&mut self, name: &str) -> Option<&mut Property<bool>> {
        self.booleans.get_mut(name)
    }

    pub fn string_property(&self, name: &str) -> Option<&Property<String>> {
        self.strings.get(name)
    }

    pub fn string_property_mut(&mut self, name: &str) -> Option<&mut Property<String>> {
        self.strings.get_mut(name)
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.reals.contains_key(name)
            || self.integers.contains_key(name)
            || self.booleans.contains_key(name)
            || self.strings.contains_key(name)
    }

    /// All variable names in the table, sorted within each kind.
    pub fn property_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for mut kind_names in [
            self.integers.keys().cloned().collect::<Vec<String>>(),
            self.reals.keys().cloned().collect::<Vec<String>>(),
            self.booleans.keys().cloned().collect::<Vec<String>>(),
            self.strings.keys().cloned().collect::<Vec<String>>(),
        ] {
            kind_names.sort();
            names.extend(kind_names);
        }
        names
    }

    pub fn add_listener(&mut self, listener: Box<dyn PropertyListener>) {
        self.listeners.push(listener);
    }

    /// Apply every pending property write, then notify listeners.
    pub fn apply_sets(&mut self) {
        for p in self.reals.values_mut() {
            p.apply();
        }
        for p in self.integers.values_mut() {
            p.apply();
        }
        for p in self.booleans.values_mut() {
            p.apply();
        }
        for p in self.strings.values_mut() {
            p.apply();
        }

        for l in &mut self.listeners {
            l.post_sets();
        }
    }

    /// Notify listeners that a new read phase begins.
    pub fn refresh_gets(&mut self) {
        for l in &mut self.listeners {
            l.pre_gets();
        }
    }
}
