//! Execution context handed to activators.
//!
//! A context exists while its module is STARTING, ACTIVE or STOPPING. Closing it
//! invalidates the handle and unregisters every listener added through it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::{LifecycleError, Result};
use crate::event::{Delivery, ModuleListener, NotifyModule, NotifyRuntime, RuntimeListener};
use crate::extensions::{Extension, ExtensionListener, ExtensionReader};
use crate::module::ModuleRef;
use crate::permissions::AdminPermission;
use crate::runtime::RuntimeShared;
use crate::state::ModuleId;

enum Added {
	Module(Delivery, Arc<dyn ModuleListener>),
	Runtime(Arc<dyn RuntimeListener>),
	Extension(String, Arc<dyn ExtensionListener>),
}

pub struct ModuleContext {
	module: ModuleId,
	symbolic_name: String,
	runtime: Weak<RuntimeShared>,
	valid: AtomicBool,
	added: Mutex<Vec<Added>>,
}

impl ModuleContext {
	pub(crate) fn new(module: ModuleId, symbolic_name: String, runtime: Weak<RuntimeShared>) -> Self {
		Self {
			module,
			symbolic_name,
			runtime,
			valid: AtomicBool::new(true),
			added: Mutex::new(Vec::new()),
		}
	}

	pub fn module_id(&self) -> ModuleId {
		self.module
	}

	pub fn symbolic_name(&self) -> &str {
		&self.symbolic_name
	}

	pub fn is_valid(&self) -> bool {
		self.valid.load(Ordering::Acquire)
	}

	/// The module owning this context.
	pub fn module(&self) -> Result<ModuleRef> {
		let runtime = self.runtime()?;
		runtime.modules.get(&self.module).ok_or_else(|| LifecycleError::NotFound(self.symbolic_name.clone()))
	}

	/// Every installed module, in id order.
	pub fn modules(&self) -> Result<Vec<ModuleRef>> {
		let runtime = self.runtime()?;
		self.check_metadata(&runtime)?;
		Ok(runtime.modules.values())
	}

	/// Ordered extensions contributed to `point`.
	pub fn extensions(&self, point: &str) -> Result<Vec<Extension>> {
		let runtime = self.runtime()?;
		self.check_metadata(&runtime)?;
		Ok(runtime.extensions.extensions_for(point))
	}

	pub fn add_module_listener(&self, delivery: Delivery, listener: Arc<dyn ModuleListener>) -> Result<()> {
		let runtime = self.runtime()?;
		runtime.events.module_listeners.add(delivery, Arc::clone(&listener), Arc::new(NotifyModule));
		self.added.lock().push(Added::Module(delivery, listener));
		Ok(())
	}

	pub fn add_runtime_listener(&self, listener: Arc<dyn RuntimeListener>) -> Result<()> {
		let runtime = self.runtime()?;
		runtime.events.runtime_listeners.add((), Arc::clone(&listener), Arc::new(NotifyRuntime));
		self.added.lock().push(Added::Runtime(listener));
		Ok(())
	}

	pub fn add_extension_listener(&self, point: impl Into<String>, listener: Arc<dyn ExtensionListener>) -> Result<()> {
		let point = point.into();
		let runtime = self.runtime()?;
		runtime.extensions.add_listener(point.clone(), Arc::clone(&listener));
		self.added.lock().push(Added::Extension(point, listener));
		Ok(())
	}

	fn runtime(&self) -> Result<Arc<RuntimeShared>> {
		if !self.is_valid() {
			return Err(LifecycleError::InvalidOperation {
				message: format!("context of module '{}' is no longer valid", self.symbolic_name),
				severity: crate::Severity::Error,
			});
		}
		self.runtime.upgrade().ok_or(LifecycleError::RuntimeClosed)
	}

	fn check_metadata(&self, runtime: &RuntimeShared) -> Result<()> {
		match runtime.modules.get(&self.module) {
			Some(module) => runtime.check_permission(&module, AdminPermission::Metadata),
			None => Ok(()),
		}
	}

	/// Invalidates the context and drops every listener registered through it.
	pub(crate) fn close(&self) {
		if !self.valid.swap(false, Ordering::AcqRel) {
			return;
		}
		let added = std::mem::take(&mut *self.added.lock());
		let Some(runtime) = self.runtime.upgrade() else {
			return;
		};
		for entry in added {
			match entry {
				Added::Module(delivery, listener) => {
					runtime.events.module_listeners.remove(&delivery, &listener);
				}
				Added::Runtime(listener) => {
					runtime.events.runtime_listeners.remove(&(), &listener);
				}
				Added::Extension(point, listener) => {
					runtime.extensions.remove_listener(&point, &listener);
				}
			}
		}
		tracing::trace!(module = %self.symbolic_name, "lifecycle.context.closed");
	}
}

impl std::fmt::Debug for ModuleContext {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ModuleContext")
			.field("module", &self.module)
			.field("symbolic_name", &self.symbolic_name)
			.field("valid", &self.is_valid())
			.finish()
	}
}
