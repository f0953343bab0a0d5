//! Scenario timeline.
//!
//! An independent schedule of deferred mutations over already-existing
//! properties. Timed actions fire when simulation time passes their fire
//! point (within an epsilon); predicate actions fire once when their
//! predicate first turns true. Fired actions move to a discarded list and
//! come back on `reset()`, so a scenario supports repeatable runs without
//! being rebuilt.

pub mod loader;

use std::cmp::Ordering;

use crate::simulation::state::SimulationState;

/// Effect closure of a scenario action.
pub type ActionFn = Box<dyn FnMut(&mut ActionContext<'_>) + Send>;
/// Condition closure of a predicate action.
pub type PredicateFn = Box<dyn FnMut(&SimulationState) -> bool + Send>;

/// Execution context handed to a firing action.
///
/// Gives scoped access to the instance arena and allows late registration
/// of follow-up actions; those are queued and merged into the timeline on
/// the next `apply` call, which is what makes self-scheduling actions
/// possible.
pub struct ActionContext<'a> {
    pub state: &'a mut SimulationState,
    time: f64,
    queued_timed: &'a mut Vec<TimedAction>,
    queued_predicates: &'a mut Vec<PredicateAction>,
}

impl ActionContext<'_> {
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Schedule a follow-up timed action from inside a firing action.
    pub fn invoke_at(&mut self, fire_point: f64, eps: Option<f64>, action: ActionFn) {
        self.queued_timed
            .push(TimedAction::new(fire_point, eps, action));
    }

    /// Register a follow-up predicate action from inside a firing action.
    pub fn invoke_when(&mut self, predicate: PredicateFn, action: ActionFn) {
        self.queued_predicates
            .push(PredicateAction::new(predicate, action));
    }
}

/// An action firing once when simulation time passes its fire point.
pub struct TimedAction {
    fire_point: f64,
    eps: f64,
    action: ActionFn,
}

impl TimedAction {
    pub fn new(fire_point: f64, eps: Option<f64>, action: ActionFn) -> Self {
        Self {
            fire_point,
            eps: eps.unwrap_or(0.0),
            action,
        }
    }

    pub fn fire_point(&self) -> f64 {
        self.fire_point
    }

    pub fn eps(&self) -> f64 {
        self.eps
    }

    fn due(&self, t: f64) -> bool {
        self.fire_point - self.eps <= t
    }
}

/// An action firing once when its predicate first turns true.
pub struct PredicateAction {
    predicate: PredicateFn,
    action: ActionFn,
}

impl PredicateAction {
    pub fn new(predicate: PredicateFn, action: ActionFn) -> Self {
        Self { predicate, action }
    }
}

/// Timeline of init, timed and predicate actions owned by the engine.
#[derive(Default)]
pub struct Scenario {
    init_actions: Vec<ActionFn>,
    timed: Vec<TimedAction>,
    predicates: Vec<PredicateAction>,

    discarded_timed: Vec<TimedAction>,
    discarded_predicates: Vec<PredicateAction>,

    queued_timed: Vec<TimedAction>,
    queued_predicates: Vec<PredicateAction>,
}

impl Scenario {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action run once during `init`.
    pub fn on_init(&mut self, action: ActionFn) {
        self.init_actions.push(action);
    }

    /// Register a timed action.
    pub fn invoke_at(&mut self, fire_point: f64, eps: Option<f64>, action: ActionFn) {
        self.timed.push(TimedAction::new(fire_point, eps, action));
        sort_next_due_last(&mut self.timed);
    }

    /// Register a predicate action.
    pub fn invoke_when(&mut self, predicate: PredicateFn, action: ActionFn) {
        self.predicates.push(PredicateAction::new(predicate, action));
    }

    pub fn num_pending_timed(&self) -> usize {
        self.timed.len() + self.queued_timed.len()
    }

    pub fn num_pending_predicates(&self) -> usize {
        self.predicates.len() + self.queued_predicates.len()
    }

    /// Run all init actions.
    pub(crate) fn run_init_actions(&mut self, state: &mut SimulationState) {
        let Self {
            init_actions,
            queued_timed,
            queued_predicates,
            ..
        } = self;

        for action in init_actions.iter_mut() {
            let mut ctx = ActionContext {
                state: &mut *state,
                time: 0.0,
                queued_timed: &mut *queued_timed,
                queued_predicates: &mut *queued_predicates,
            };
            action(&mut ctx);
        }
    }

    /// Fire every due action for time `t`.
    pub(crate) fn apply(&mut self, t: f64, state: &mut SimulationState) {
        self.merge_queued();

        let Self {
            timed,
            predicates,
            discarded_timed,
            discarded_predicates,
            queued_timed,
            queued_predicates,
            ..
        } = self;

        // Next-due timed action sits at the back.
        while timed.last().map(|a| a.due(t)).unwrap_or(false) {
            if let Some(mut action) = timed.pop() {
                let mut ctx = ActionContext {
                    state: &mut *state,
                    time: t,
                    queued_timed: &mut *queued_timed,
                    queued_predicates: &mut *queued_predicates,
                };
                (action.action)(&mut ctx);
                discarded_timed.push(action);
            }
        }

        let mut remaining = Vec::with_capacity(predicates.len());
        for mut pa in predicates.drain(..) {
            if (pa.predicate)(state) {
                let mut ctx = ActionContext {
                    state: &mut *state,
                    time: t,
                    queued_timed: &mut *queued_timed,
                    queued_predicates: &mut *queued_predicates,
                };
                (pa.action)(&mut ctx);
                discarded_predicates.push(pa);
            } else {
                remaining.push(pa);
            }
        }
        *predicates = remaining;
    }

    /// Restore discarded actions into the live timeline.
    pub(crate) fn reset(&mut self) {
        self.merge_queued();
        self.timed.append(&mut self.discarded_timed);
        sort_next_due_last(&mut self.timed);
        self.predicates.append(&mut self.discarded_predicates);
    }

    fn merge_queued(&mut self) {
        if !self.queued_timed.is_empty() {
            self.timed.append(&mut self.queued_timed);
            sort_next_due_last(&mut self.timed);
        }
        if !self.queued_predicates.is_empty() {
            self.predicates.append(&mut self.queued_predicates);
        }
    }
}

/// Sort descending by fire point so the earliest action is popped first.
fn sort_next_due_last(actions: &mut [TimedAction]) {
    actions.sort_by(|a, b| {
        b.fire_point
            .partial_cmp(&a.fire_point)
            .unwrap_or(Ordering::Equal)
    });
}
