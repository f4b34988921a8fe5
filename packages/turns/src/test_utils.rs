//! Testing utilities shared by the unit tests of this crate.

use std::cell::RefCell;
use std::rc::Rc;

/// An ordered record of observations made by callbacks during a test.
///
/// Clones share the same record, so a clone can be moved into each callback while the test
/// keeps one to inspect afterwards.
#[derive(Clone, Debug, Default)]
pub(crate) struct Journal {
    entries: Rc<RefCell<Vec<String>>>,
}

impl Journal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&self, entry: impl Into<String>) {
        self.entries.borrow_mut().push(entry.into());
    }

    pub(crate) fn entries(&self) -> Vec<String> {
        self.entries.borrow().clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.borrow().len()
    }
}
