//! Hooks: shared storage cells for captured locals.
//!
//! A hook starts *attached*, aliasing a stack slot of its owning frame
//! (named by frame id, never by pointer, so a dead frame cannot leave a
//! dangling alias). When the owning scope is torn down the hook is
//! *detached* exactly once, snapshotting the slot's value; it then owns
//! the value independently. Every closure that captured the same
//! variable shares the same hook, so writes through one are visible
//! through all.

use std::cell::RefCell;
use std::rc::Rc;

use crate::value::Value;

#[derive(Debug, Clone)]
pub struct Hook(Rc<RefCell<HookState>>);

#[derive(Debug, Clone)]
enum HookState {
    Attached { frame: u64, slot: usize },
    Detached(Value),
}

impl Hook {
    /// A hook aliasing `slot` of the frame identified by `frame`.
    pub fn attached(frame: u64, slot: usize) -> Self {
        Hook(Rc::new(RefCell::new(HookState::Attached { frame, slot })))
    }

    /// A hook that already owns its value.
    pub fn detached(value: Value) -> Self {
        Hook(Rc::new(RefCell::new(HookState::Detached(value))))
    }

    /// The (frame id, slot) this hook aliases, or `None` once detached.
    pub fn attachment(&self) -> Option<(u64, usize)> {
        match *self.0.borrow() {
            HookState::Attached { frame, slot } => Some((frame, slot)),
            HookState::Detached(_) => None,
        }
    }

    /// Transition attached → detached with the slot's final value.
    /// One-way; detaching twice is an interpreter bug.
    pub fn detach(&self, value: Value) {
        let mut state = self.0.borrow_mut();
        debug_assert!(
            matches!(*state, HookState::Attached { .. }),
            "hook detached twice"
        );
        *state = HookState::Detached(value);
    }

    /// The owned value, or `None` while still attached.
    pub fn detached_value(&self) -> Option<Value> {
        match &*self.0.borrow() {
            HookState::Detached(value) => Some(value.clone()),
            HookState::Attached { .. } => None,
        }
    }

    /// Overwrite the owned value. Returns false while still attached
    /// (the write must go to the aliased slot instead).
    pub fn set_detached(&self, value: Value) -> bool {
        let mut state = self.0.borrow_mut();
        match &mut *state {
            HookState::Detached(slot) => {
                *slot = value;
                true
            }
            HookState::Attached { .. } => false,
        }
    }

    /// Whether two hooks are the same cell.
    pub fn same_cell(&self, other: &Hook) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
