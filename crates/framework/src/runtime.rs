//! Module registry and runtime.
//!
//! # Mental model
//!
//! [`Runtime`] owns the module registry (a [`SnapshotMap`] from id to module), the
//! single [`DispatchManager`] used for lifecycle events, the extension registry and the
//! status storage. Modules reach it through a weak handle; there is no global instance.
//!
//! # Concurrency & ordering
//!
//! * The registry lock covers only the check-and-mutate step of install, update and
//!   uninstall. Lifecycle work on different modules runs in parallel.
//! * Resolution is serialized by its own lock; RESOLVED events are published after it is
//!   released.
//! * Synchronous module listeners run on the transitioning thread before asynchronous
//!   ones are queued. Asynchronous module, runtime and extension events share one delivery
//!   thread, so all of them observe one per-runtime order.
//! * Start level changes are serialized; modules resume in ascending `(start level, id)`
//!   order and suspend in the reverse order.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use bramble_eventmgr::{DispatchManager, DispatchQueue, ListenerRegistry, SnapshotMap};
use parking_lot::Mutex;

use crate::config::RuntimeConfig;
use crate::descriptor::ModuleDescriptor;
use crate::error::{LifecycleError, Result, Severity};
use crate::event::{Delivery, ModuleDispatcher, ModuleEvent, ModuleEventKind, ModuleListener, NotifyModule, NotifyRuntime, RuntimeEvent, RuntimeListener};
use crate::extensions::{ExtensionListener, ExtensionRegistry};
use crate::module::{Module, ModuleRef};
use crate::options::ModuleStatus;
use crate::permissions::{AdminPermission, PermissionChecker, allow_all};
use crate::resolver;
use crate::state::{ModuleId, ModuleState};
use crate::storage::{FileStorage, MemoryStorage, Storage};

pub(crate) struct EventHub {
	manager: DispatchManager,
	pub(crate) module_listeners: ListenerRegistry<Delivery, dyn ModuleListener, ModuleEvent>,
	pub(crate) runtime_listeners: ListenerRegistry<(), dyn RuntimeListener, RuntimeEvent>,
}

impl EventHub {
	fn publish_module(&self, event: ModuleEvent) {
		let sync = self.module_listeners.listeners(&Delivery::Synchronous);
		if !sync.is_empty() {
			let mut queue = DispatchQueue::new(self.manager.handle());
			if queue.queue_registered(sync).is_ok() {
				queue.dispatch_sync(&event);
			}
		}

		let later = self.module_listeners.listeners(&Delivery::Asynchronous);
		if later.is_empty() {
			return;
		}
		let mut queue = DispatchQueue::new(self.manager.handle());
		if queue.queue_registered(later).is_ok() {
			if let Err(error) = queue.dispatch_async(event) {
				tracing::debug!(%error, "runtime.module_event.dropped");
			}
		}
	}

	fn publish_runtime(&self, event: RuntimeEvent) {
		let listeners = self.runtime_listeners.listeners(&());
		if listeners.is_empty() {
			return;
		}
		let mut queue = DispatchQueue::new(self.manager.handle());
		if queue.queue_registered(listeners).is_ok() {
			if let Err(error) = queue.dispatch_async(event) {
				tracing::debug!(%error, "runtime.event.dropped");
			}
		}
	}
}

/// State shared between the runtime owner, its modules and module contexts.
pub(crate) struct RuntimeShared {
	pub(crate) config: RuntimeConfig,
	pub(crate) modules: SnapshotMap<ModuleId, ModuleRef>,
	pub(crate) registry_lock: Mutex<()>,
	resolver_lock: Mutex<()>,
	start_level_lock: Mutex<()>,
	next_id: AtomicU64,
	active: AtomicBool,
	closed: AtomicBool,
	active_level: AtomicU32,
	pub(crate) storage: Arc<dyn Storage>,
	permissions: Arc<dyn PermissionChecker>,
	pub(crate) events: EventHub,
	pub(crate) extensions: ExtensionRegistry,
}

impl RuntimeShared {
	pub(crate) fn is_active(&self) -> bool {
		self.active.load(Ordering::Acquire)
	}

	pub(crate) fn is_closed(&self) -> bool {
		self.closed.load(Ordering::Acquire)
	}

	pub(crate) fn active_start_level(&self) -> u32 {
		self.active_level.load(Ordering::Acquire)
	}

	fn ensure_open(&self) -> Result<()> {
		if self.is_closed() {
			return Err(LifecycleError::RuntimeClosed);
		}
		Ok(())
	}

	pub(crate) fn check_permission(&self, module: &Module, permission: AdminPermission) -> Result<()> {
		self.permissions.check(module, permission).map_err(|reason| LifecycleError::Security {
			module: module.symbolic_name(),
			permission,
			reason,
		})
	}

	/// Rejects descriptors that collide with another installed module. Caller holds the
	/// registry lock.
	pub(crate) fn check_installable(&self, descriptor: &ModuleDescriptor, replacing: Option<ModuleId>) -> Result<()> {
		if descriptor.symbolic_name.trim().is_empty() {
			return Err(LifecycleError::InvalidOperation {
				message: format!("module at {} has no symbolic name", descriptor.location),
				severity: Severity::Error,
			});
		}
		if descriptor.start_level == Some(0) {
			return Err(LifecycleError::InvalidOperation {
				message: format!("module '{}' declares start level 0", descriptor.symbolic_name),
				severity: Severity::Error,
			});
		}
		for module in self.modules.snapshot().values() {
			if Some(module.id()) == replacing {
				continue;
			}
			if module.location() == descriptor.location {
				return Err(LifecycleError::Duplicate {
					location: descriptor.location.clone(),
				});
			}
			let existing = module.descriptor();
			if existing.symbolic_name == descriptor.symbolic_name && existing.version == descriptor.version {
				return Err(LifecycleError::AlreadyInstalled {
					symbolic_name: descriptor.symbolic_name.clone(),
					version: descriptor.version.clone(),
				});
			}
		}
		Ok(())
	}

	pub(crate) fn publish_module(&self, kind: ModuleEventKind, module: &ModuleRef) {
		self.events.publish_module(ModuleEvent {
			kind,
			module: Arc::clone(module),
		});
	}

	pub(crate) fn publish_runtime(&self, event: RuntimeEvent) {
		self.events.publish_runtime(event);
	}

	/// Reports an error that a lifecycle call does not rethrow.
	pub(crate) fn publish_error(&self, module: Option<&Module>, error: LifecycleError) {
		let name = module.map(Module::symbolic_name).unwrap_or_default();
		let module = module.and_then(Module::to_ref);
		if error.severity() == Severity::Warning {
			tracing::warn!(module = %name, %error, "runtime.warning");
			self.publish_runtime(RuntimeEvent::Warning { module, error });
		} else {
			tracing::warn!(module = %name, %error, "runtime.error");
			self.publish_runtime(RuntimeEvent::Error { module, error });
		}
	}

	/// Resolves `targets` and their requirements, returning the errors of targets that
	/// stay INSTALLED.
	pub(crate) fn resolve_modules(&self, targets: &[ModuleId]) -> BTreeMap<ModuleId, LifecycleError> {
		let (resolved, failures) = {
			let _resolving = self.resolver_lock.lock();
			let modules = self.modules.values();
			let plan = resolver::plan(&modules, targets);

			let mut resolved = Vec::new();
			for id in plan.resolvable {
				let Some(module) = self.modules.get(&id) else {
					continue;
				};
				if module.mark_resolved() {
					let descriptor = module.descriptor();
					self.extensions.add_contributions(id, &descriptor.symbolic_name, &descriptor.extensions);
					resolved.push(module);
				}
			}
			(resolved, plan.failures)
		};

		for module in &resolved {
			tracing::debug!(module = %module.symbolic_name(), id = %module.id(), state = %ModuleState::Resolved, "lifecycle.transition");
			self.publish_module(ModuleEventKind::Resolved, module);
		}

		failures
			.into_iter()
			.map(|(id, causes)| {
				let name = self.modules.get(&id).map(|m| m.symbolic_name()).unwrap_or_else(|| id.to_string());
				tracing::debug!(module = %name, id = %id, causes = causes.len(), "lifecycle.resolve.failed");
				(id, resolver::resolve_error(&name, &causes))
			})
			.collect()
	}

	fn modules_by_level(&self) -> Vec<ModuleRef> {
		let mut modules = self.modules.values();
		modules.sort_by_key(|m| (m.start_level(), m.id()));
		modules
	}

	fn set_start_level(&self, level: u32) -> Result<()> {
		self.ensure_open()?;
		let _levels = self.start_level_lock.lock();
		let current = self.active_start_level();

		if level > current {
			let installed: Vec<ModuleId> = self.modules.values().iter().filter(|m| m.state() == ModuleState::Installed).map(|m| m.id()).collect();
			if !installed.is_empty() {
				self.resolve_modules(&installed);
			}
			for step in current + 1..=level {
				self.active_level.store(step, Ordering::Release);
				for module in self.modules_by_level().iter().filter(|m| m.start_level() == step) {
					module.resume(self);
				}
			}
		} else if level < current {
			for step in (level + 1..=current).rev() {
				for module in self.modules_by_level().iter().rev().filter(|m| m.start_level() == step) {
					module.suspend(self);
				}
				self.active_level.store(step - 1, Ordering::Release);
			}
		} else {
			return Ok(());
		}

		tracing::info!(runtime = %self.config.name, level, "runtime.start_level");
		self.publish_runtime(RuntimeEvent::StartLevelChanged { level });
		Ok(())
	}
}

/// Builder for [`Runtime`].
pub struct RuntimeBuilder {
	config: RuntimeConfig,
	storage: Option<Arc<dyn Storage>>,
	permissions: Option<Arc<dyn PermissionChecker>>,
}

impl RuntimeBuilder {
	/// Overrides the storage chosen from `storage_dir`.
	pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
		self.storage = Some(storage);
		self
	}

	pub fn permissions(mut self, permissions: Arc<dyn PermissionChecker>) -> Self {
		self.permissions = Some(permissions);
		self
	}

	pub fn build(self) -> Result<Runtime> {
		self.config.validate().map_err(|e| LifecycleError::Startup(e.to_string()))?;
		let storage: Arc<dyn Storage> = match (self.storage, &self.config.storage_dir) {
			(Some(storage), _) => storage,
			(None, Some(dir)) => Arc::new(FileStorage::open(dir.clone())?),
			(None, None) => Arc::new(MemoryStorage::new()),
		};
		let manager = DispatchManager::new(self.config.name.clone()).map_err(|e| LifecycleError::Startup(e.to_string()))?;
		let extensions = ExtensionRegistry::new(manager.handle());

		tracing::debug!(runtime = %self.config.name, "runtime.build");
		Ok(Runtime {
			shared: Arc::new(RuntimeShared {
				config: self.config,
				modules: SnapshotMap::new(),
				registry_lock: Mutex::new(()),
				resolver_lock: Mutex::new(()),
				start_level_lock: Mutex::new(()),
				next_id: AtomicU64::new(1),
				active: AtomicBool::new(false),
				closed: AtomicBool::new(false),
				active_level: AtomicU32::new(0),
				storage,
				permissions: self.permissions.unwrap_or_else(allow_all),
				events: EventHub {
					manager,
					module_listeners: ListenerRegistry::new(),
					runtime_listeners: ListenerRegistry::new(),
				},
				extensions,
			}),
		})
	}
}

/// Owner of the module registry. Shuts down when dropped.
pub struct Runtime {
	shared: Arc<RuntimeShared>,
}

impl Runtime {
	pub fn builder(config: RuntimeConfig) -> RuntimeBuilder {
		RuntimeBuilder {
			config,
			storage: None,
			permissions: None,
		}
	}

	pub fn new(config: RuntimeConfig) -> Result<Self> {
		Self::builder(config).build()
	}

	pub fn config(&self) -> &RuntimeConfig {
		&self.shared.config
	}

	/// Installs a module in INSTALLED state and publishes INSTALLED.
	///
	/// The persisted status recorded for the location is loaded so a later launch resumes
	/// modules that were persistently started.
	pub fn install(&self, descriptor: ModuleDescriptor) -> Result<ModuleRef> {
		let rt = &self.shared;
		rt.ensure_open()?;

		let module = {
			let _registry = rt.registry_lock.lock();
			rt.check_installable(&descriptor, None)?;
			let id = ModuleId(rt.next_id.fetch_add(1, Ordering::AcqRel));
			let status = match rt.storage.load_status(&descriptor.location) {
				Ok(status) => status,
				Err(error) => {
					rt.publish_error(None, error.into());
					ModuleStatus::empty()
				}
			};
			let level = descriptor.start_level.unwrap_or(rt.config.default_module_start_level);
			let module = Module::new_ref(id, descriptor, status, level, Arc::downgrade(rt));
			rt.check_permission(&module, AdminPermission::Lifecycle)?;
			rt.modules.insert(id, Arc::clone(&module));
			module
		};

		tracing::info!(module = %module.symbolic_name(), id = %module.id(), location = %module.location(), "lifecycle.install");
		rt.publish_module(ModuleEventKind::Installed, &module);
		Ok(module)
	}

	pub fn module(&self, id: ModuleId) -> Option<ModuleRef> {
		self.shared.modules.get(&id)
	}

	pub fn module_by_location(&self, location: &str) -> Option<ModuleRef> {
		self.shared.modules.snapshot().values().find(|m| m.location() == location).cloned()
	}

	/// Installed modules named `symbolic_name`, highest version first.
	pub fn find(&self, symbolic_name: &str) -> Vec<ModuleRef> {
		let mut found: Vec<ModuleRef> = self.shared.modules.values().into_iter().filter(|m| m.symbolic_name() == symbolic_name).collect();
		found.sort_by(|a, b| b.version().cmp(&a.version()).then_with(|| a.id().cmp(&b.id())));
		found
	}

	/// Every installed module, in id order.
	pub fn modules(&self) -> Vec<ModuleRef> {
		self.shared.modules.values()
	}

	/// Resolves the given modules (every INSTALLED module when empty). Returns the
	/// failures of modules that stayed INSTALLED.
	pub fn resolve(&self, modules: &[ModuleRef]) -> Result<Vec<(ModuleRef, LifecycleError)>> {
		let rt = &self.shared;
		rt.ensure_open()?;
		let targets: Vec<ModuleRef> = if modules.is_empty() { rt.modules.values() } else { modules.to_vec() };
		for module in &targets {
			rt.check_permission(module, AdminPermission::Resolve)?;
		}
		let ids: Vec<ModuleId> = targets.iter().filter(|m| m.state() == ModuleState::Installed).map(|m| m.id()).collect();
		let failures = rt.resolve_modules(&ids);
		Ok(targets
			.into_iter()
			.filter_map(|m| failures.get(&m.id()).cloned().map(|error| (m, error)))
			.collect())
	}

	/// Activates the runtime and raises the start level to `initial_start_level`.
	pub fn launch(&self) -> Result<()> {
		let rt = &self.shared;
		rt.ensure_open()?;
		if rt.active.swap(true, Ordering::AcqRel) {
			return Ok(());
		}
		tracing::info!(runtime = %rt.config.name, level = rt.config.initial_start_level, "runtime.launch");
		rt.set_start_level(rt.config.initial_start_level)?;
		rt.publish_runtime(RuntimeEvent::Started);
		Ok(())
	}

	pub fn is_active(&self) -> bool {
		self.shared.is_active()
	}

	pub fn is_closed(&self) -> bool {
		self.shared.is_closed()
	}

	pub fn start_level(&self) -> u32 {
		self.shared.active_start_level()
	}

	/// Moves the active start level, resuming or suspending modules on the way.
	pub fn set_start_level(&self, level: u32) -> Result<()> {
		if !self.is_active() {
			return Err(LifecycleError::InvalidOperation {
				message: "start level can only change after launch".into(),
				severity: Severity::Error,
			});
		}
		self.shared.set_start_level(level)
	}

	/// Changes one module's start level, resuming or suspending it against the active level.
	pub fn set_module_start_level(&self, module: &ModuleRef, level: u32) -> Result<()> {
		let rt = &self.shared;
		rt.ensure_open()?;
		module.check_valid()?;
		rt.check_permission(module, AdminPermission::Execute)?;
		if level == 0 {
			return Err(LifecycleError::InvalidOperation {
				message: format!("module '{}' cannot use start level 0", module.symbolic_name()),
				severity: Severity::Error,
			});
		}

		let _levels = rt.start_level_lock.lock();
		module.set_start_level(level);
		if !rt.is_active() {
			return Ok(());
		}
		if level <= rt.active_start_level() {
			module.resume(rt);
		} else {
			module.suspend(rt);
		}
		Ok(())
	}

	/// Stops every module, publishes [`RuntimeEvent::Stopped`], drains pending events and
	/// closes the runtime. Idempotent.
	pub fn shutdown(&self) {
		let rt = &self.shared;
		if rt.is_closed() {
			return;
		}
		if rt.is_active() {
			if let Err(error) = rt.set_start_level(0) {
				tracing::warn!(runtime = %rt.config.name, %error, "runtime.shutdown.suspend_failed");
			}
			rt.active.store(false, Ordering::Release);
		}
		tracing::info!(runtime = %rt.config.name, "runtime.shutdown");
		rt.publish_runtime(RuntimeEvent::Stopped);
		rt.closed.store(true, Ordering::Release);
		rt.events.manager.close();
	}

	/// Registers a module listener with the default dispatcher.
	pub fn add_module_listener(&self, delivery: Delivery, listener: Arc<dyn ModuleListener>) -> bool {
		self.add_module_listener_with(delivery, listener, Arc::new(NotifyModule))
	}

	pub fn add_module_listener_with(&self, delivery: Delivery, listener: Arc<dyn ModuleListener>, dispatcher: ModuleDispatcher) -> bool {
		self.shared.events.module_listeners.add(delivery, listener, dispatcher)
	}

	pub fn remove_module_listener(&self, listener: &Arc<dyn ModuleListener>) -> bool {
		self.shared.events.module_listeners.remove_everywhere(listener) > 0
	}

	pub fn add_runtime_listener(&self, listener: Arc<dyn RuntimeListener>) -> bool {
		self.shared.events.runtime_listeners.add((), listener, Arc::new(NotifyRuntime))
	}

	pub fn remove_runtime_listener(&self, listener: &Arc<dyn RuntimeListener>) -> bool {
		self.shared.events.runtime_listeners.remove(&(), listener)
	}

	pub fn add_extension_listener(&self, point: impl Into<String>, listener: Arc<dyn ExtensionListener>) -> bool {
		self.shared.extensions.add_listener(point, listener)
	}

	/// Read access to contributed extensions.
	pub fn extensions(&self) -> &ExtensionRegistry {
		&self.shared.extensions
	}

	/// Blocks until every asynchronous event published so far has been delivered.
	pub fn flush_events(&self) {
		self.shared.events.manager.flush();
	}
}

impl Drop for Runtime {
	fn drop(&mut self) {
		self.shutdown();
	}
}

impl std::fmt::Debug for Runtime {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Runtime")
			.field("name", &self.shared.config.name)
			.field("active", &self.is_active())
			.field("start_level", &self.start_level())
			.field("modules", &self.shared.modules.len())
			.finish()
	}
}

#[cfg(test)]
mod tests;
