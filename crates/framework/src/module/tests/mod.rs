//! Lifecycle invariants, grouped by the operation that must uphold them.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::config::{RuntimeConfig, StateChangeConfig};
use crate::context::ModuleContext;
use crate::descriptor::{Activator, ModuleDescriptor};
use crate::error::{ActivatorPhase, LifecycleError, Severity, StateChangeReason, StorageError};
use crate::event::{Delivery, ModuleEvent, ModuleEventKind, RuntimeEvent};
use crate::options::{ModuleStatus, StartOptions, StopOptions};
use crate::runtime::Runtime;
use crate::state::ModuleState;
use crate::storage::{MemoryStorage, Storage, StorageOperation};
use crate::version::Version;

mod lifecycle;
mod transactions;

fn config() -> RuntimeConfig {
	RuntimeConfig {
		name: "module-test".into(),
		state_change: StateChangeConfig {
			wait_slice_ms: 50,
			max_wait_slices: 2,
		},
		..RuntimeConfig::default()
	}
}

/// Launched runtime with in-memory storage.
fn launched() -> Runtime {
	let runtime = Runtime::new(config()).unwrap();
	runtime.launch().unwrap();
	runtime
}

fn descriptor(name: &str) -> ModuleDescriptor {
	ModuleDescriptor::new(name, Version::new(1, 0, 0), format!("mem:{name}"))
}

/// Records `(kind, module name)` for every module event, synchronously.
#[derive(Clone, Default)]
struct EventLog(Arc<Mutex<Vec<(ModuleEventKind, String)>>>);

impl EventLog {
	fn attach(runtime: &Runtime) -> Self {
		let log = Self::default();
		let sink = Arc::clone(&log.0);
		runtime.add_module_listener(
			Delivery::Synchronous,
			Arc::new(move |event: &ModuleEvent| -> Result<(), String> {
				sink.lock().push((event.kind, event.module.symbolic_name()));
				Ok(())
			}),
		);
		log
	}

	/// Kinds recorded for `name`, draining the log.
	fn take(&self, name: &str) -> Vec<ModuleEventKind> {
		let mut events = self.0.lock();
		let kinds = events.iter().filter(|(_, n)| n == name).map(|(k, _)| *k).collect();
		events.clear();
		kinds
	}
}

/// Collects runtime events; call [`Runtime::flush_events`] before reading.
#[derive(Clone, Default)]
struct RuntimeLog(Arc<Mutex<Vec<RuntimeEvent>>>);

impl RuntimeLog {
	fn attach(runtime: &Runtime) -> Self {
		let log = Self::default();
		let sink = Arc::clone(&log.0);
		runtime.add_runtime_listener(Arc::new(move |event: &RuntimeEvent| -> Result<(), String> {
			sink.lock().push(event.clone());
			Ok(())
		}));
		log
	}

	fn errors(&self) -> Vec<LifecycleError> {
		self.0
			.lock()
			.iter()
			.filter_map(|event| match event {
				RuntimeEvent::Error { error, .. } => Some(error.clone()),
				_ => None,
			})
			.collect()
	}
}

struct Quiet;

impl Activator for Quiet {
	fn start(&mut self, _context: &ModuleContext) -> Result<(), String> {
		Ok(())
	}
}

struct Failing;

impl Activator for Failing {
	fn start(&mut self, _context: &ModuleContext) -> Result<(), String> {
		Err("boom".into())
	}
}

/// Memory storage whose update and uninstall commits can be made to fail.
#[derive(Clone, Default)]
struct FlakyStorage {
	inner: MemoryStorage,
	fail_update: Arc<AtomicBool>,
	fail_uninstall: Arc<AtomicBool>,
}

struct FlakyOperation {
	inner: Box<dyn StorageOperation>,
	fail: bool,
}

impl StorageOperation for FlakyOperation {
	fn begin(&mut self) -> Result<(), StorageError> {
		self.inner.begin()
	}

	fn commit(&mut self) -> Result<(), StorageError> {
		if self.fail {
			return Err(StorageError::Other("disk full".into()));
		}
		self.inner.commit()
	}

	fn undo(&mut self) -> Result<(), StorageError> {
		self.inner.undo()
	}
}

impl Storage for FlakyStorage {
	fn load_status(&self, location: &str) -> Result<ModuleStatus, StorageError> {
		self.inner.load_status(location)
	}

	fn save_status(&self, location: &str, status: ModuleStatus) -> Result<(), StorageError> {
		self.inner.save_status(location, status)
	}

	fn update_operation(&self, location: &str) -> Box<dyn StorageOperation> {
		Box::new(FlakyOperation {
			inner: self.inner.update_operation(location),
			fail: self.fail_update.load(Ordering::SeqCst),
		})
	}

	fn uninstall_operation(&self, location: &str) -> Box<dyn StorageOperation> {
		Box::new(FlakyOperation {
			inner: self.inner.uninstall_operation(location),
			fail: self.fail_uninstall.load(Ordering::SeqCst),
		})
	}
}

fn launched_with(storage: &FlakyStorage) -> Runtime {
	let runtime = Runtime::builder(config()).storage(Arc::new(storage.clone())).build().unwrap();
	runtime.launch().unwrap();
	runtime
}
