//! Promise implementation
//!
//! A single-threaded promise with three states:
//! - Pending: computation in progress
//! - Fulfilled: completed with a value
//! - Rejected: failed with a reason
//!
//! Settlement is one-shot; a settled promise ignores further resolve and
//! reject calls. Reactions never run synchronously — settling hands the
//! stored reactions back to the VM, which schedules them on the microtask
//! queue (see `Vm::settle_promise`).

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::value::Value;
use crate::vm::Vm;

/// Shared handle to a promise
pub type PromiseRef = Rc<RefCell<Promise>>;

/// Promise state
#[derive(Debug, Clone)]
pub enum PromiseState {
    /// Computation in progress
    Pending,
    /// Completed successfully with a value
    Fulfilled(Value),
    /// Failed with a reason
    Rejected(Value),
}

/// A promise: state plus the reactions registered while pending
pub struct Promise {
    state: PromiseState,
    reactions: Vec<Reaction>,
}

/// A callback registration waiting on a promise
pub enum Reaction {
    /// A `.then`/`.catch` registration: optional script callables plus the
    /// derived promise their result settles
    Then {
        on_fulfilled: Option<Value>,
        on_rejected: Option<Value>,
        derived: PromiseRef,
    },
    /// A host continuation (AWAIT resumption, native promise bridging)
    Native(Box<dyn FnOnce(&mut Vm, Result<Value, Value>)>),
}

impl Promise {
    /// Create a new pending promise handle
    pub fn pending() -> PromiseRef {
        Rc::new(RefCell::new(Self {
            state: PromiseState::Pending,
            reactions: Vec::new(),
        }))
    }

    /// Current state (cloned)
    pub fn state(&self) -> PromiseState {
        self.state.clone()
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, PromiseState::Pending)
    }

    /// State label used by value rendering
    pub fn state_name(&self) -> &'static str {
        match self.state {
            PromiseState::Pending => "pending",
            PromiseState::Fulfilled(_) => "fulfilled",
            PromiseState::Rejected(_) => "rejected",
        }
    }

    /// The settled outcome, if any
    pub fn outcome(&self) -> Option<Result<Value, Value>> {
        match &self.state {
            PromiseState::Pending => None,
            PromiseState::Fulfilled(value) => Some(Ok(value.clone())),
            PromiseState::Rejected(reason) => Some(Err(reason.clone())),
        }
    }

    /// Transition to a settled state. Returns the reactions to schedule, or
    /// `None` if the promise was already settled (one-shot semantics).
    pub fn settle(&mut self, outcome: Result<Value, Value>) -> Option<Vec<Reaction>> {
        if !self.is_pending() {
            return None;
        }
        self.state = match outcome {
            Ok(value) => PromiseState::Fulfilled(value),
            Err(reason) => PromiseState::Rejected(reason),
        };
        Some(std::mem::take(&mut self.reactions))
    }

    /// Register a reaction. While pending it is stored; on a settled promise
    /// the reaction is handed back with the outcome so the caller can
    /// schedule it immediately.
    pub fn add_reaction(
        &mut self,
        reaction: Reaction,
    ) -> Option<(Reaction, Result<Value, Value>)> {
        match self.outcome() {
            None => {
                self.reactions.push(reaction);
                None
            }
            Some(outcome) => Some((reaction, outcome)),
        }
    }
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Promise({})", self.state_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_then() -> Reaction {
        Reaction::Then {
            on_fulfilled: None,
            on_rejected: None,
            derived: Promise::pending(),
        }
    }

    #[test]
    fn test_settlement_is_one_shot() {
        let promise = Promise::pending();
        let first = promise.borrow_mut().settle(Ok(Value::Number(1.0)));
        assert!(first.is_some());
        let second = promise.borrow_mut().settle(Err(Value::string("late")));
        assert!(second.is_none());
        assert_eq!(promise.borrow().state_name(), "fulfilled");
    }

    #[test]
    fn test_pending_reactions_are_stored() {
        let promise = Promise::pending();
        assert!(promise.borrow_mut().add_reaction(dummy_then()).is_none());
        let reactions = promise
            .borrow_mut()
            .settle(Ok(Value::Null))
            .expect("first settle");
        assert_eq!(reactions.len(), 1);
    }

    #[test]
    fn test_settled_reactions_hand_back_outcome() {
        let promise = Promise::pending();
        promise.borrow_mut().settle(Err(Value::string("boom")));
        let (_, outcome) = promise
            .borrow_mut()
            .add_reaction(dummy_then())
            .expect("settled promise returns outcome");
        assert!(outcome.is_err());
    }
}
