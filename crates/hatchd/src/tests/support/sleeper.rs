//! Sleeper that records requested pauses instead of blocking.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use crate::connection::Sleeper;

#[derive(Debug, Clone, Default)]
pub struct RecordingSleeper {
    pauses: Rc<RefCell<Vec<Duration>>>,
}

impl RecordingSleeper {
    #[must_use]
    pub fn pauses(&self) -> Vec<Duration> {
        self.pauses.borrow().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&mut self, duration: Duration) {
        self.pauses.borrow_mut().push(duration);
    }
}
