//! Single-assignment values that are read by blocking.
//!
//! A [`Promise`] starts out inactive. [`Promise::activate`] hands out the one
//! [`Resolver`] allowed for it, and the resolver stores the value exactly once.
//! Readers call [`Promise::ask`], which returns the stored value immediately
//! once it exists and otherwise parks the calling thread until it does.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseError {
  #[error("Promise is not active")]
  NotActive,
  #[error("Promise is already active")]
  AlreadyActive,
  #[error("Promise has already been fulfilled")]
  AlreadyFulfilled,
  #[error("Promise has no value yet")]
  Empty,
}

struct Slot<T> {
  active: bool,
  value: Option<T>,
}

struct Shared<T> {
  slot: Mutex<Slot<T>>,
  ready: Condvar,
}

/// A value that may not exist yet.
///
/// Cloning a promise yields another handle to the same cell.
pub struct Promise<T> {
  shared: Arc<Shared<T>>,
}

/// One-shot writer for a [`Promise`].
pub struct Resolver<T> {
  shared: Arc<Shared<T>>,
}

impl<T: Clone> Promise<T> {
  /// Create an inactive promise.
  pub fn new() -> Self {
    Self {
      shared: Arc::new(Shared {
        slot: Mutex::new(Slot {
          active: false,
          value: None,
        }),
        ready: Condvar::new(),
      }),
    }
  }

  /// Create an activated promise together with its resolver.
  pub fn pair() -> (Self, Resolver<T>) {
    let promise = Self::new();
    let resolver = Resolver {
      shared: promise.shared.clone(),
    };
    promise.shared.slot.lock().active = true;
    (promise, resolver)
  }

  /// Activate the promise, returning the only resolver it will ever have.
  pub fn activate(&self) -> Result<Resolver<T>, PromiseError> {
    let mut slot = self.shared.slot.lock();
    if slot.active {
      return Err(PromiseError::AlreadyActive);
    }
    slot.active = true;
    Ok(Resolver {
      shared: self.shared.clone(),
    })
  }

  /// Ask for the promised value.
  ///
  /// With `block` unset this only succeeds if the value is already there.
  /// Otherwise the calling thread waits, forever when `timeout` is `None`,
  /// and fails with [`PromiseError::Empty`] once the timeout elapses.
  pub fn ask(&self, block: bool, timeout: Option<Duration>) -> Result<T, PromiseError> {
    let mut slot = self.shared.slot.lock();
    if !slot.active {
      return Err(PromiseError::NotActive);
    }
    if let Some(value) = &slot.value {
      return Ok(value.clone());
    }
    if !block {
      return Err(PromiseError::Empty);
    }

    match timeout {
      Some(timeout) => {
        self
          .shared
          .ready
          .wait_while_for(&mut slot, |slot| slot.value.is_none(), timeout);
      }
      None => {
        self
          .shared
          .ready
          .wait_while(&mut slot, |slot| slot.value.is_none());
      }
    }

    slot.value.clone().ok_or(PromiseError::Empty)
  }

  /// Ask for the value without blocking.
  pub fn ask_nowait(&self) -> Result<T, PromiseError> {
    self.ask(false, None)
  }

  /// Whether the value has been delivered.
  pub fn is_fulfilled(&self) -> bool {
    self.shared.slot.lock().value.is_some()
  }
}

impl<T: Clone> Default for Promise<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> Clone for Promise<T> {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
    }
  }
}

impl<T> fmt::Debug for Promise<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let slot = self.shared.slot.lock();
    f.debug_struct("Promise")
      .field("active", &slot.active)
      .field("fulfilled", &slot.value.is_some())
      .finish()
  }
}

impl<T> Resolver<T> {
  /// Deliver the value. Only the first call on a promise succeeds.
  pub fn fulfill(&self, value: T) -> Result<(), PromiseError> {
    let mut slot = self.shared.slot.lock();
    if slot.value.is_some() {
      return Err(PromiseError::AlreadyFulfilled);
    }
    slot.value = Some(value);
    self.shared.ready.notify_all();
    Ok(())
  }
}

// Clones share the single fulfillment; they do not grant a second one.
impl<T> Clone for Resolver<T> {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
    }
  }
}

impl<T> fmt::Debug for Resolver<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Resolver").finish_non_exhaustive()
  }
}
