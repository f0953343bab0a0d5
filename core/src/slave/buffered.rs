//! Get/set batching decorator over a slave.
//!
//! Coalesces per-variable traffic into at most one batched call per scalar
//! kind per flush, which brings the underlying call count per tick from
//! O(variables) down to O(1) per kind. This matters most when the wrapped
//! slave is a remote proxy where every call is a network round trip.
//!
//! Reads are always served from the read cache. A variable joins the
//! fetch list the first time somebody asks for it; if the slave has
//! already entered initialization at that point it is fetched immediately,
//! so the cache is never stale on first use.

use std::collections::HashMap;

use tracing::warn;

use crate::models::variable::ScalarKind;
use crate::slave::{ModelDescription, Slave, SlaveError, ValueRef};

/// Buffering decorator implementing `Slave` itself.
pub struct BufferedSlave {
    inner: Box<dyn Slave>,

    integer_set_cache: HashMap<ValueRef, i32>,
    real_set_cache: HashMap<ValueRef, f64>,
    boolean_set_cache: HashMap<ValueRef, bool>,
    string_set_cache: HashMap<ValueRef, String>,

    integer_get_cache: HashMap<ValueRef, i32>,
    real_get_cache: HashMap<ValueRef, f64>,
    boolean_get_cache: HashMap<ValueRef, bool>,
    string_get_cache: HashMap<ValueRef, String>,

    integers_to_fetch: Vec<ValueRef>,
    reals_to_fetch: Vec<ValueRef>,
    booleans_to_fetch: Vec<ValueRef>,
    strings_to_fetch: Vec<ValueRef>,

    initialized: bool,
}

impl BufferedSlave {
    pub fn new(inner: Box<dyn Slave>) -> Self {
        Self {
            inner,
            integer_set_cache: HashMap::new(),
            real_set_cache: HashMap::new(),
            boolean_set_cache: HashMap::new(),
            string_set_cache: HashMap::new(),
            integer_get_cache: HashMap::new(),
            real_get_cache: HashMap::new(),
            boolean_get_cache: HashMap::new(),
            string_get_cache: HashMap::new(),
            integers_to_fetch: Vec::new(),
            reals_to_fetch: Vec::new(),
            booleans_to_fetch: Vec::new(),
            strings_to_fetch: Vec::new(),
            initialized: false,
        }
    }

    pub fn inner(&mut self) -> &mut dyn Slave {
        self.inner.as_mut()
    }

    /// Flush every non-empty write cache with one batched call per kind.
    pub fn transfer_cached_sets(&mut self) -> Result<(), SlaveError> {
        if !self.integer_set_cache.is_empty() {
            let (vrs, values): (Vec<_>, Vec<_>) = self.integer_set_cache.drain().unzip();
            self.inner.set_integer(&vrs, &values)?;
        }
        if !self.real_set_cache.is_empty() {
            let (vrs, values): (Vec<_>, Vec<_>) = self.real_set_cache.drain().unzip();
            self.inner.set_real(&vrs, &values)?;
        }
        if !self.boolean_set_cache.is_empty() {
            let (vrs, values): (Vec<_>, Vec<_>) = self.boolean_set_cache.drain().unzip();
            self.inner.set_boolean(&vrs, &values)?;
        }
        if !self.string_set_cache.is_empty() {
            let (vrs, values): (Vec<_>, Vec<_>) = self.string_set_cache.drain().unzip();
            self.inner.set_string(&vrs, &values)?;
        }
        Ok(())
    }

    /// Refresh every non-empty read cache with one batched call per kind.
    pub fn receive_cached_gets(&mut self) -> Result<(), SlaveError> {
        if !self.integers_to_fetch.is_empty() {
            let values = self.inner.get_integer(&self.integers_to_fetch)?;
            self.integer_get_cache.clear();
            for (vr, value) in self.integers_to_fetch.iter().zip(values) {
                self.integer_get_cache.insert(*vr, value);
            }
        }
        if !self.reals_to_fetch.is_empty() {
            let values = self.inner.get_real(&self.reals_to_fetch)?;
            self.real_get_cache.clear();
            for (vr, value) in self.reals_to_fetch.iter().zip(values) {
                self.real_get_cache.insert(*vr, value);
            }
        }
        if !self.booleans_to_fetch.is_empty() {
            let values = self.inner.get_boolean(&self.booleans_to_fetch)?;
            self.boolean_get_cache.clear();
            for (vr, value) in self.booleans_to_fetch.iter().zip(values) {
                self.boolean_get_cache.insert(*vr, value);
            }
        }
        if !self.strings_to_fetch.is_empty() {
            let values = self.inner.get_string(&self.strings_to_fetch)?;
            self.string_get_cache.clear();
            for (vr, value) in self.strings_to_fetch.iter().zip(values) {
                self.string_get_cache.insert(*vr, value);
            }
        }
        Ok(())
    }

    /// Register a variable for batched reading.
    ///
    /// Fetches the value right away when the slave is already initialized,
    /// so the first cached read is not stale.
    pub fn mark_for_reading(&mut self, kind: ScalarKind, vr: ValueRef) -> Result<(), SlaveError> {
        let fetch_list = match kind {
            ScalarKind::Integer => &mut self.integers_to_fetch,
            ScalarKind::Real => &mut self.reals_to_fetch,
            ScalarKind::Boolean => &mut self.booleans_to_fetch,
            ScalarKind::String => &mut self.strings_to_fetch,
        };
        if fetch_list.contains(&vr) {
            return Ok(());
        }
        fetch_list.push(vr);

        if self.initialized {
            match kind {
                ScalarKind::Integer => {
                    let value = self.inner.get_integer_single(vr)?;
                    self.integer_get_cache.insert(vr, value);
                }
                ScalarKind::Real => {
                    let value = self.inner.get_real_single(vr)?;
                    self.real_get_cache.insert(vr, value);
                }
                ScalarKind::Boolean => {
                    let value = self.inner.get_boolean_single(vr)?;
                    self.boolean_get_cache.insert(vr, value);
                }
                ScalarKind::String => {
                    let value = self.inner.get_string_single(vr)?;
                    self.string_get_cache.insert(vr, value);
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Infallible single-value access for property closures. Values not
    // yet fetched read as the kind's default until the next refresh.
    // ------------------------------------------------------------------

    pub fn read_integer(&mut self, vr: ValueRef) -> i32 {
        if let Err(e) = self.mark_for_reading(ScalarKind::Integer, vr) {
            warn!("failed to mark int value ref {vr} for reading: {e}");
        }
        self.integer_get_cache.get(&vr).copied().unwrap_or_default()
    }

    pub fn read_real(&mut self, vr: ValueRef) -> f64 {
        if let Err(e) = self.mark_for_reading(ScalarKind::Real, vr) {
            warn!("failed to mark real value ref {vr} for reading: {e}");
        }
        self.real_get_cache.get(&vr).copied().unwrap_or_default()
    }

    pub fn read_boolean(&mut self, vr: ValueRef) -> bool {
        if let Err(e) = self.mark_for_reading(ScalarKind::Boolean, vr) {
            warn!("failed to mark bool value ref {vr} for reading: {e}");
        }
        self.boolean_get_cache.get(&vr).copied().unwrap_or_default()
    }

    pub fn read_string(&mut self, vr: ValueRef) -> String {
        if let Err(e) = self.mark_for_reading(ScalarKind::String, vr) {
            warn!("failed to mark string value ref {vr} for reading: {e}");
        }
        self.string_get_cache.get(&vr).cloned().unwrap_or_default()
    }

    pub fn write_integer(&mut self, vr: ValueRef, value: i32) {
        self.integer_set_cache.insert(vr, value);
    }

    pub fn write_real(&mut self, vr: ValueRef, value: f64) {
        self.real_set_cache.insert(vr, value);
    }

    pub fn write_boolean(&mut self, vr: ValueRef, value: bool) {
        self.boolean_set_cache.insert(vr, value);
    }

    pub fn write_string(&mut self, vr: ValueRef, value: String) {
        self.string_set_cache.insert(vr, value);
    }
}

impl Slave for BufferedSlave {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model_description(&self) -> &ModelDescription {
        self.inner.model_description()
    }

    fn setup_experiment(
        &mut self,
        start_time: f64,
        stop_time: f64,
        tolerance: f64,
    ) -> Result<(), SlaveError> {
        self.inner.setup_experiment(start_time, stop_time, tolerance)
    }

    fn enter_initialization_mode(&mut self) -> Result<(), SlaveError> {
        self.inner.enter_initialization_mode()?;
        self.initialized = true;
        Ok(())
    }

    fn exit_initialization_mode(&mut self) -> Result<(), SlaveError> {
        self.inner.exit_initialization_mode()
    }

    fn step(&mut self, current_time: f64, step_size: f64) -> Result<(), SlaveError> {
        self.inner.step(current_time, step_size)
    }

    fn terminate(&mut self) -> Result<(), SlaveError> {
        self.inner.terminate()
    }

    fn reset(&mut self) -> Result<(), SlaveError> {
        self.inner.reset()?;
        self.initialized = false;
        Ok(())
    }

    fn free_instance(&mut self) {
        self.inner.free_instance();
    }

    fn get_integer(&mut self, vrs: &[ValueRef]) -> Result<Vec<i32>, SlaveError> {
        let mut values = Vec::with_capacity(vrs.len());
        for vr in vrs {
            values.push(self.read_integer(*vr));
        }
        Ok(values)
    }

    fn get_real(&mut self, vrs: &[ValueRef]) -> Result<Vec<f64>, SlaveError> {
        let mut values = Vec::with_capacity(vrs.len());
        for vr in vrs {
            values.push(self.read_real(*vr));
        }
        Ok(values)
    }

    fn get_boolean(&mut self, vrs: &[ValueRef]) -> Result<Vec<bool>, SlaveError> {
        let mut values = Vec::with_capacity(vrs.len());
        for vr in vrs {
            values.push(self.read_boolean(*vr));
        }
        Ok(values)
    }

    fn get_string(&mut self, vrs: &[ValueRef]) -> Result<Vec<String>, SlaveError> {
        let mut values = Vec::with_capacity(vrs.len());
        for vr in vrs {
            values.push(self.read_string(*vr));
        }
        Ok(values)
    }

    fn set_integer(&mut self, vrs: &[ValueRef], values: &[i32]) -> Result<(), SlaveError> {
        for (vr, value) in vrs.iter().zip(values) {
            self.integer_set_cache.insert(*vr, *value);
        }
        Ok(())
    }

    fn set_real(&mut self, vrs: &[ValueRef], values: &[f64]) -> Result<(), SlaveError> {
        for (vr, value) in vrs.iter().zip(values) {
            self.real_set_cache.insert(*vr, *value);
        }
        Ok(())
    }

    fn set_boolean(&mut self, vrs: &[ValueRef], values: &[bool]) -> Result<(), SlaveError> {
        for (vr, value) in vrs.iter().zip(values) {
            self.boolean_set_cache.insert(*vr, *value);
        }
        Ok(())
    }

    fn set_string(&mut self, vrs: &[ValueRef], values: &[String]) -> Result<(), SlaveError> {
        for (vr, value) in vrs.iter().zip(values) {
            self.string_set_cache.insert(*vr, value.clone());
        }
        Ok(())
    }
}
