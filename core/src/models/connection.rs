//! Directed connections between properties.
//!
//! Connections never hold references into instance property tables; they
//! hold handles (`PropertyRef`) resolved through the simulation's instance
//! arena at transfer time. A transfer reads the source and *stages* the
//! value on the sink via `set()`, honoring the deferred-write discipline.

use crate::models::variable::ScalarKind;

/// Handle to one property inside the simulation's instance arena.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyRef {
    pub(crate) instance: usize,
    pub(crate) variable: String,
}

impl PropertyRef {
    pub(crate) fn new(instance: usize, variable: impl Into<String>) -> Self {
        Self {
            instance,
            variable: variable.into(),
        }
    }
}

/// Value transformation applied during a transfer.
pub type TransferModifier<T, E> = Box<dyn Fn(T) -> E + Send>;

/// A directed link from a source property to a sink property.
///
/// For same-kind links the modifier is optional. For cross-kind links
/// (`T != E`) a modifier is mandatory and its absence surfaces as
/// `ModifierRequired` when the connection is transferred.
pub struct TypedConnection<T, E = T> {
    pub(crate) source: PropertyRef,
    pub(crate) sink: PropertyRef,
    pub(crate) modifier: Option<TransferModifier<T, E>>,
}

impl<T, E> TypedConnection<T, E> {
    pub(crate) fn new(source: PropertyRef, sink: PropertyRef) -> Self {
        Self {
            source,
            sink,
            modifier: None,
        }
    }

    pub fn set_modifier(&mut self, modifier: TransferModifier<T, E>) {
        self.modifier = Some(modifier);
    }

    pub fn clear_modifier(&mut self) {
        self.modifier = None;
    }
}

/// Tagged variant over all supported connection shapes.
pub enum Connection {
    Real(TypedConnection<f64>),
    Integer(TypedConnection<i32>),
    Boolean(TypedConnection<bool>),
    String(TypedConnection<String>),
    RealToInteger(TypedConnection<f64, i32>),
    IntegerToReal(TypedConnection<i32, f64>),
}

impl Connection {
    pub fn source_kind(&self) -> ScalarKind {
        match self {
            Connection::Real(_) | Connection::RealToInteger(_) => ScalarKind::Real,
            Connection::Integer(_) | Connection::IntegerToReal(_) => ScalarKind::Integer,
            Connection::Boolean(_) => ScalarKind::Boolean,
            Connection::String(_) => ScalarKind::String,
        }
    }

    pub fn sink_kind(&self) -> ScalarKind {
        match self {
            Connection::Real(_) | Connection::IntegerToReal(_) => ScalarKind::Real,
            Connection::Integer(_) | Connection::RealToInteger(_) => ScalarKind::Integer,
            Connection::Boolean(_) => ScalarKind::Boolean,
            Connection::String(_) => ScalarKind::String,
        }
    }
}
