//! Unbounded blocking FIFO for events delivered by the reader task.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

pub struct Inbox<T> {
  queue: Mutex<VecDeque<T>>,
  available: Condvar,
}

impl<T> Inbox<T> {
  pub fn new() -> Self {
    Self {
      queue: Mutex::new(VecDeque::new()),
      available: Condvar::new(),
    }
  }

  pub fn push(&self, item: T) {
    self.queue.lock().push_back(item);
    self.available.notify_one();
  }

  /// Pop the oldest item, waiting for one if `block` is set.
  ///
  /// `None` means nothing arrived in time.
  pub fn pop(&self, block: bool, timeout: Option<Duration>) -> Option<T> {
    let mut queue = self.queue.lock();
    if block && queue.is_empty() {
      match timeout {
        Some(timeout) => {
          self
            .available
            .wait_while_for(&mut queue, |queue| queue.is_empty(), timeout);
        }
        None => {
          self.available.wait_while(&mut queue, |queue| queue.is_empty());
        }
      }
    }
    queue.pop_front()
  }

  pub fn len(&self) -> usize {
    self.queue.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.queue.lock().is_empty()
  }
}

impl<T> Default for Inbox<T> {
  fn default() -> Self {
    Self::new()
  }
}
