//! One-shot collector of listener snapshots for a single event occurrence.
//!
//! A [`DispatchQueue`] is writable until its first dispatch. Dispatching freezes the
//! collected `(listener set, dispatcher)` sequence; later `queue_*` calls fail with
//! [`DispatchError::AlreadyDispatched`] while further dispatches reuse the frozen
//! sequence.
//!
//! Delivery order is queue insertion order, then registration order inside each set.
//! A listener that returns an error or panics is logged and skipped; the remaining
//! listeners still run.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::{DispatchError, DispatchHandle, EventDispatcher, ListenerSet};

/// Outcome of delivering one event through a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchReport {
	pub delivered: usize,
	pub failed: usize,
}

struct Entry<L: ?Sized, E> {
	listeners: ListenerSet<L, E>,
	dispatcher: Option<Arc<dyn EventDispatcher<L, E>>>,
}

enum Phase<L: ?Sized, E> {
	Writable(Vec<Entry<L, E>>),
	Dispatched(Arc<[Entry<L, E>]>),
}

/// Write-once sequence of listener sets bound to one [`DispatchHandle`].
pub struct DispatchQueue<L: ?Sized, E> {
	manager: DispatchHandle,
	phase: Phase<L, E>,
}

impl<L: ?Sized, E> DispatchQueue<L, E> {
	pub fn new(manager: DispatchHandle) -> Self {
		Self {
			manager,
			phase: Phase::Writable(Vec::new()),
		}
	}

	/// Queues `listeners`, delivering to all of them through `dispatcher`.
	pub fn queue_listeners(&mut self, listeners: ListenerSet<L, E>, dispatcher: Arc<dyn EventDispatcher<L, E>>) -> Result<(), DispatchError> {
		self.push(Entry {
			listeners,
			dispatcher: Some(dispatcher),
		})
	}

	/// Queues `listeners`, delivering through each registration's own dispatcher.
	pub fn queue_registered(&mut self, listeners: ListenerSet<L, E>) -> Result<(), DispatchError> {
		self.push(Entry { listeners, dispatcher: None })
	}

	/// Returns true once the queue has been dispatched.
	pub fn is_dispatched(&self) -> bool {
		matches!(self.phase, Phase::Dispatched(_))
	}

	/// Total listeners across all queued sets.
	pub fn listener_count(&self) -> usize {
		self.entries().iter().map(|e| e.listeners.len()).sum()
	}

	/// Delivers `event` on the calling thread, returning once every listener ran.
	pub fn dispatch_sync(&mut self, event: &E) -> DispatchReport {
		let entries = self.freeze();
		deliver(&entries, event)
	}

	fn push(&mut self, entry: Entry<L, E>) -> Result<(), DispatchError> {
		match &mut self.phase {
			Phase::Writable(entries) => {
				entries.push(entry);
				Ok(())
			}
			Phase::Dispatched(_) => Err(DispatchError::AlreadyDispatched),
		}
	}

	fn entries(&self) -> &[Entry<L, E>] {
		match &self.phase {
			Phase::Writable(entries) => entries,
			Phase::Dispatched(entries) => entries,
		}
	}

	fn freeze(&mut self) -> Arc<[Entry<L, E>]> {
		if let Phase::Writable(entries) = &mut self.phase {
			let frozen: Arc<[Entry<L, E>]> = Arc::from(std::mem::take(entries));
			self.phase = Phase::Dispatched(frozen);
		}
		match &self.phase {
			Phase::Dispatched(entries) => Arc::clone(entries),
			Phase::Writable(_) => Arc::from([]),
		}
	}
}

impl<L, E> DispatchQueue<L, E>
where
	L: ?Sized + Send + Sync + 'static,
	E: Send + 'static,
{
	/// Hands the frozen sequence to the manager's delivery thread and returns immediately.
	pub fn dispatch_async(&mut self, event: E) -> Result<(), DispatchError> {
		let entries = self.freeze();
		self.manager.submit(move || {
			deliver(&entries, &event);
		})
	}
}

fn deliver<L: ?Sized, E>(entries: &[Entry<L, E>], event: &E) -> DispatchReport {
	let mut report = DispatchReport::default();
	for entry in entries {
		for registration in &entry.listeners {
			let dispatcher = entry.dispatcher.as_ref().unwrap_or(registration.dispatcher());
			let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| dispatcher.dispatch(registration.listener(), event)));
			match outcome {
				Ok(Ok(())) => report.delivered += 1,
				Ok(Err(message)) => {
					report.failed += 1;
					tracing::warn!(error = %message, "dispatch.listener.failed");
				}
				Err(payload) => {
					report.failed += 1;
					tracing::warn!(panic = %panic_message(payload.as_ref()), "dispatch.listener.panicked");
				}
			}
		}
	}
	report
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
	if let Some(msg) = payload.downcast_ref::<&str>() {
		msg
	} else if let Some(msg) = payload.downcast_ref::<String>() {
		msg
	} else {
		"non-string panic payload"
	}
}
