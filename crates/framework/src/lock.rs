//! Per-module state-changing lock.
//!
//! # Invariants
//!
//! * At most one thread owns the lock. The owner's [`ThreadId`] is recorded so a
//!   second acquisition from the same thread fails immediately instead of deadlocking.
//! * Waiting is bounded: a contender waits for at most `max_wait_slices` slices of
//!   `wait_slice` and then fails with [`StateChangeReason::TimedOut`].
//! * Release only happens from the owning thread and wakes exactly one waiter.
//!
//! The lifecycle code sometimes releases early (before publishing STARTED or
//! LAZY_ACTIVATION) through [`StateChangeGuard::release`]; dropping an already
//! released guard is a no-op.

use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{LifecycleError, StateChangeReason};

/// Bounded wait policy for contended acquisitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
	pub wait_slice: Duration,
	pub max_wait_slices: u32,
}

impl Default for WaitPolicy {
	fn default() -> Self {
		Self {
			wait_slice: Duration::from_secs(5),
			max_wait_slices: 2,
		}
	}
}

impl WaitPolicy {
	fn budget(&self) -> Duration {
		self.wait_slice.saturating_mul(self.max_wait_slices)
	}
}

#[derive(Debug)]
struct Owner {
	thread: ThreadId,
	name: String,
}

#[derive(Debug, Default)]
pub struct StateChangeLock {
	owner: Mutex<Option<Owner>>,
	released: Condvar,
}

impl StateChangeLock {
	pub fn new() -> Self {
		Self::default()
	}

	/// Acquires the lock for the current thread.
	pub fn begin(&self, module: &str, policy: WaitPolicy) -> Result<StateChangeGuard<'_>, LifecycleError> {
		let current = thread::current();
		let deadline = Instant::now() + policy.budget();
		let mut owner = self.owner.lock();

		loop {
			let Some(holder) = owner.as_ref() else {
				*owner = Some(Owner {
					thread: current.id(),
					name: thread_label(&current),
				});
				return Ok(StateChangeGuard { lock: self, held: true });
			};

			if holder.thread == current.id() {
				return Err(LifecycleError::StateChange {
					module: module.to_string(),
					holder: holder.name.clone(),
					reason: StateChangeReason::Reentrant,
				});
			}

			let now = Instant::now();
			if now >= deadline {
				tracing::warn!(module, holder = %holder.name, "lifecycle.state_change.timed_out");
				return Err(LifecycleError::StateChange {
					module: module.to_string(),
					holder: holder.name.clone(),
					reason: StateChangeReason::TimedOut,
				});
			}

			tracing::trace!(module, holder = %holder.name, "lifecycle.state_change.waiting");
			let slice_end = deadline.min(now + policy.wait_slice);
			let _ = self.released.wait_until(&mut owner, slice_end);
		}
	}

	/// Returns true if any thread currently holds the lock.
	pub fn is_held(&self) -> bool {
		self.owner.lock().is_some()
	}

	/// Returns true if the current thread holds the lock.
	pub fn is_held_by_current_thread(&self) -> bool {
		self.owner.lock().as_ref().is_some_and(|o| o.thread == thread::current().id())
	}

	fn complete(&self) {
		let mut owner = self.owner.lock();
		if owner.as_ref().is_some_and(|o| o.thread == thread::current().id()) {
			*owner = None;
			self.released.notify_one();
		}
	}
}

fn thread_label(thread: &thread::Thread) -> String {
	match thread.name() {
		Some(name) => name.to_string(),
		None => format!("{:?}", thread.id()),
	}
}

/// Ownership of a [`StateChangeLock`]; releases on drop.
#[derive(Debug)]
pub struct StateChangeGuard<'a> {
	lock: &'a StateChangeLock,
	held: bool,
}

impl StateChangeGuard<'_> {
	/// Releases the lock early. Later calls and the eventual drop do nothing.
	pub fn release(&mut self) {
		if std::mem::take(&mut self.held) {
			self.lock.complete();
		}
	}

	pub fn is_held(&self) -> bool {
		self.held
	}
}

impl Drop for StateChangeGuard<'_> {
	fn drop(&mut self) {
		self.release();
	}
}
