//! Asynchronous delivery thread for one group of dispatch queues.
//!
//! A [`DispatchManager`] owns one dedicated OS thread consuming a FIFO job channel.
//! Jobs submitted through the same manager run in submission order. Independent
//! managers make no ordering promise relative to each other.
//!
//! Owner/client split: the [`DispatchManager`] owner shuts the thread down when dropped,
//! [`DispatchHandle`] clones share the channel but never trigger shutdown.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::Mutex;

use crate::DispatchError;

type Task = Box<dyn FnOnce() + Send + 'static>;

enum Job {
	Deliver(Task),
	Flush { ack: mpsc::Sender<()> },
	Shutdown,
}

#[derive(Default)]
struct Stats {
	pending: AtomicUsize,
	completed: AtomicU64,
	panicked: AtomicU64,
}

struct Shared {
	name: String,
	closed: AtomicBool,
	stats: Stats,
	thread_id: ThreadId,
}

/// Counters describing one manager's delivery thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchStats {
	/// Jobs submitted but not yet finished.
	pub pending: usize,
	/// Jobs that ran to completion, including ones whose listeners failed.
	pub completed: u64,
	/// Jobs that panicked outside listener isolation.
	pub panicked: u64,
}

/// Owner of one asynchronous delivery thread.
pub struct DispatchManager {
	handle: DispatchHandle,
	thread: Mutex<Option<JoinHandle<()>>>,
}

/// Cloneable submission port for a [`DispatchManager`].
#[derive(Clone)]
pub struct DispatchHandle {
	tx: mpsc::Sender<Job>,
	shared: Arc<Shared>,
}

impl DispatchManager {
	/// Spawns the delivery thread, named `<name>-dispatch`.
	pub fn new(name: impl Into<String>) -> std::io::Result<Self> {
		let name = name.into();
		let (tx, rx) = mpsc::channel::<Job>();
		let shared_slot: Arc<Mutex<Option<Arc<Shared>>>> = Arc::new(Mutex::new(None));
		let worker_slot = Arc::clone(&shared_slot);
		let (ready_tx, ready_rx) = mpsc::channel::<()>();

		let thread = thread::Builder::new().name(format!("{name}-dispatch")).spawn(move || {
			let _ = ready_rx.recv();
			let Some(shared) = worker_slot.lock().take() else {
				return;
			};
			run_worker(&shared, rx);
		})?;

		let shared = Arc::new(Shared {
			name,
			closed: AtomicBool::new(false),
			stats: Stats::default(),
			thread_id: thread.thread().id(),
		});
		*shared_slot.lock() = Some(Arc::clone(&shared));
		let _ = ready_tx.send(());

		tracing::debug!(manager = %shared.name, "dispatch.manager.start");
		Ok(Self {
			handle: DispatchHandle { tx, shared },
			thread: Mutex::new(Some(thread)),
		})
	}

	/// Returns a non-owning submission handle.
	pub fn handle(&self) -> DispatchHandle {
		self.handle.clone()
	}

	pub fn name(&self) -> &str {
		&self.handle.shared.name
	}

	/// Submits one job. See [`DispatchHandle::submit`].
	pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> Result<(), DispatchError> {
		self.handle.submit(job)
	}

	/// Blocks until every job submitted before this call has finished.
	pub fn flush(&self) {
		self.handle.flush();
	}

	pub fn stats(&self) -> DispatchStats {
		self.handle.stats()
	}

	pub fn is_closed(&self) -> bool {
		self.handle.is_closed()
	}

	/// Drains queued jobs, stops the delivery thread and joins it.
	///
	/// Jobs submitted after `close` fail with [`DispatchError::ManagerClosed`]. Calling
	/// `close` from the delivery thread itself stops the thread without joining it.
	pub fn close(&self) {
		let shared = &self.handle.shared;
		if shared.closed.swap(true, Ordering::AcqRel) {
			return;
		}
		let _ = self.handle.tx.send(Job::Shutdown);
		let Some(thread) = self.thread.lock().take() else {
			return;
		};
		if thread::current().id() == shared.thread_id {
			return;
		}
		if thread.join().is_err() {
			tracing::warn!(manager = %shared.name, "dispatch.manager.join_failed");
		}
		tracing::debug!(manager = %shared.name, "dispatch.manager.closed");
	}
}

impl Drop for DispatchManager {
	fn drop(&mut self) {
		self.close();
	}
}

impl DispatchHandle {
	/// Enqueues one job for FIFO execution on the delivery thread. Never blocks.
	pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> Result<(), DispatchError> {
		if self.shared.closed.load(Ordering::Acquire) {
			return Err(self.closed_error());
		}
		self.shared.stats.pending.fetch_add(1, Ordering::AcqRel);
		if self.tx.send(Job::Deliver(Box::new(job))).is_err() {
			self.shared.stats.pending.fetch_sub(1, Ordering::AcqRel);
			return Err(self.closed_error());
		}
		Ok(())
	}

	/// Blocks until every job submitted before this call has finished.
	///
	/// Returns immediately when called from the delivery thread or after close.
	pub fn flush(&self) {
		if thread::current().id() == self.shared.thread_id {
			return;
		}
		let (ack_tx, ack_rx) = mpsc::channel();
		if self.tx.send(Job::Flush { ack: ack_tx }).is_err() {
			return;
		}
		let _ = ack_rx.recv();
	}

	pub fn stats(&self) -> DispatchStats {
		let stats = &self.shared.stats;
		DispatchStats {
			pending: stats.pending.load(Ordering::Acquire),
			completed: stats.completed.load(Ordering::Acquire),
			panicked: stats.panicked.load(Ordering::Acquire),
		}
	}

	pub fn is_closed(&self) -> bool {
		self.shared.closed.load(Ordering::Acquire)
	}

	/// Returns true when called from this manager's delivery thread.
	pub fn is_delivery_thread(&self) -> bool {
		thread::current().id() == self.shared.thread_id
	}

	pub fn name(&self) -> &str {
		&self.shared.name
	}

	fn closed_error(&self) -> DispatchError {
		DispatchError::ManagerClosed {
			name: self.shared.name.clone(),
		}
	}
}

fn run_worker(shared: &Shared, rx: mpsc::Receiver<Job>) {
	while let Ok(job) = rx.recv() {
		match job {
			Job::Deliver(task) => deliver(shared, task),
			Job::Flush { ack } => {
				let _ = ack.send(());
			}
			Job::Shutdown => break,
		}
	}
	// A submit that passed the closed check before `close` can land behind the shutdown
	// marker. It was accepted, so it still runs; flushers behind the marker are released.
	while let Ok(job) = rx.try_recv() {
		match job {
			Job::Deliver(task) => deliver(shared, task),
			Job::Flush { ack } => {
				let _ = ack.send(());
			}
			Job::Shutdown => {}
		}
	}
}

fn deliver(shared: &Shared, task: Task) {
	if std::panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
		shared.stats.panicked.fetch_add(1, Ordering::AcqRel);
		tracing::warn!(manager = %shared.name, "dispatch.job.panicked");
	}
	shared.stats.completed.fetch_add(1, Ordering::AcqRel);
	shared.stats.pending.fetch_sub(1, Ordering::AcqRel);
}
