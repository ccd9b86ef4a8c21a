//! Installed module: identity, descriptor, lifecycle state and persistent status.
//!
//! # Mental model
//!
//! A [`Module`] is created by [`Runtime::install`](crate::Runtime::install) and owned by
//! the runtime's registry for its whole life. Callers hold [`ModuleRef`]s; the module
//! only keeps a weak handle to its runtime, so dropping the runtime closes every module.
//!
//! # Invariants
//!
//! * Every lifecycle transition happens while the calling thread owns the module's
//!   state-changing lock, except resolution, which is serialized runtime-wide.
//! * UNINSTALLED is terminal: every later lifecycle call fails with
//!   [`LifecycleError::IllegalState`].
//! * An activation (activator instance plus context) exists only in STARTING, ACTIVE and
//!   STOPPING, and is torn down before the module reports RESOLVED.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::context::ModuleContext;
use crate::descriptor::{Activator, ModuleDescriptor, ModuleKind};
use crate::error::{LifecycleError, Result};
use crate::event::ModuleEventKind;
use crate::lock::{StateChangeGuard, StateChangeLock};
use crate::options::{ModuleStatus, StartOptions, StopOptions};
use crate::permissions::AdminPermission;
use crate::runtime::RuntimeShared;
use crate::state::{ModuleId, ModuleState};
use crate::version::Version;

mod lifecycle;

pub type ModuleRef = Arc<Module>;

struct Activation {
	activator: Option<Box<dyn Activator>>,
	context: Arc<ModuleContext>,
}

pub struct Module {
	id: ModuleId,
	location: String,
	descriptor: ArcSwap<ModuleDescriptor>,
	state: Mutex<ModuleState>,
	status: Mutex<ModuleStatus>,
	start_level: AtomicU32,
	state_change: StateChangeLock,
	activation: Mutex<Option<Activation>>,
	runtime: Weak<RuntimeShared>,
	this: Weak<Module>,
}

impl Module {
	pub(crate) fn new_ref(
		id: ModuleId,
		descriptor: ModuleDescriptor,
		status: ModuleStatus,
		start_level: u32,
		runtime: Weak<RuntimeShared>,
	) -> ModuleRef {
		Arc::new_cyclic(|this| Module {
			id,
			location: descriptor.location.clone(),
			descriptor: ArcSwap::from_pointee(descriptor),
			state: Mutex::new(ModuleState::Installed),
			status: Mutex::new(status),
			start_level: AtomicU32::new(start_level),
			state_change: StateChangeLock::new(),
			activation: Mutex::new(None),
			runtime,
			this: this.clone(),
		})
	}

	pub fn id(&self) -> ModuleId {
		self.id
	}

	pub fn location(&self) -> &str {
		&self.location
	}

	/// Current descriptor. Replaced wholesale by [`Module::update`].
	pub fn descriptor(&self) -> Arc<ModuleDescriptor> {
		self.descriptor.load_full()
	}

	pub fn symbolic_name(&self) -> String {
		self.descriptor.load().symbolic_name.clone()
	}

	pub fn version(&self) -> Version {
		self.descriptor.load().version.clone()
	}

	pub fn kind(&self) -> ModuleKind {
		self.descriptor.load().kind
	}

	pub fn state(&self) -> ModuleState {
		*self.state.lock()
	}

	pub fn start_level(&self) -> u32 {
		self.start_level.load(Ordering::Acquire)
	}

	/// Persisted status bits as last recorded.
	pub fn persistent_status(&self) -> ModuleStatus {
		*self.status.lock()
	}

	/// Context of the current activation, if any.
	pub fn context(&self) -> Option<Arc<ModuleContext>> {
		self.activation.lock().as_ref().map(|a| Arc::clone(&a.context))
	}

	/// True while another lifecycle operation owns this module.
	pub fn is_state_changing(&self) -> bool {
		self.state_change.is_held()
	}

	/// Resolves this module and whatever it requires.
	pub fn resolve(&self) -> Result<()> {
		self.check_valid()?;
		let rt = self.runtime()?;
		rt.check_permission(self, AdminPermission::Resolve)?;
		if self.state() != ModuleState::Installed {
			return Ok(());
		}
		match rt.resolve_modules(&[self.id]).remove(&self.id) {
			Some(error) => Err(error),
			None => Ok(()),
		}
	}

	/// Starts the module.
	///
	/// No-op when ACTIVE. Resolves an INSTALLED module first. A module above the active
	/// start level is deferred, except that a transient start fails with a
	/// warning-severity [`LifecycleError::InvalidOperation`].
	pub fn start(&self, options: StartOptions) -> Result<()> {
		self.check_valid()?;
		let rt = self.runtime()?;
		rt.check_permission(self, AdminPermission::Execute)?;
		let mut guard = self.begin_state_change(&rt)?;
		self.check_valid()?;
		self.start_worker(&rt, &mut guard, options)
	}

	/// Stops the module. No-op unless STARTING or ACTIVE.
	pub fn stop(&self, options: StopOptions) -> Result<()> {
		self.check_valid()?;
		let rt = self.runtime()?;
		rt.check_permission(self, AdminPermission::Execute)?;
		let _guard = self.begin_state_change(&rt)?;
		self.check_valid()?;
		self.stop_worker(&rt, options)
	}

	/// Replaces the module's descriptor, or reloads the current one when `replacement`
	/// is `None`. Transactional: any failure restores the previous descriptor.
	pub fn update(&self, replacement: Option<ModuleDescriptor>) -> Result<()> {
		self.check_valid()?;
		let rt = self.runtime()?;
		rt.check_permission(self, AdminPermission::Lifecycle)?;
		let mut guard = self.begin_state_change(&rt)?;
		self.check_valid()?;
		tracing::info!(module = %self.symbolic_name(), id = %self.id, "lifecycle.update");
		self.update_worker(&rt, &mut guard, replacement)
	}

	/// Removes the module from the runtime. Terminal on success.
	pub fn uninstall(&self) -> Result<()> {
		self.check_valid()?;
		let rt = self.runtime()?;
		rt.check_permission(self, AdminPermission::Lifecycle)?;
		let mut guard = self.begin_state_change(&rt)?;
		self.check_valid()?;
		tracing::info!(module = %self.symbolic_name(), id = %self.id, "lifecycle.uninstall");
		self.uninstall_worker(&rt, &mut guard)
	}

	/// Moves a resolved module back to INSTALLED. An active module is stopped first and
	/// restarted afterwards.
	pub fn refresh(&self) -> Result<()> {
		self.check_valid()?;
		let rt = self.runtime()?;
		rt.check_permission(self, AdminPermission::Resolve)?;
		let mut guard = self.begin_state_change(&rt)?;
		self.check_valid()?;
		self.refresh_worker(&rt, &mut guard)
	}

	pub(crate) fn check_valid(&self) -> Result<()> {
		if self.state() == ModuleState::Uninstalled {
			return Err(LifecycleError::IllegalState {
				module: self.symbolic_name(),
				location: self.location.clone(),
			});
		}
		Ok(())
	}

	fn runtime(&self) -> Result<Arc<RuntimeShared>> {
		let rt = self.runtime.upgrade().ok_or(LifecycleError::RuntimeClosed)?;
		if rt.is_closed() {
			return Err(LifecycleError::RuntimeClosed);
		}
		Ok(rt)
	}

	fn begin_state_change(&self, rt: &RuntimeShared) -> Result<StateChangeGuard<'_>> {
		self.state_change.begin(&self.symbolic_name(), rt.config.wait_policy())
	}

	fn set_state(&self, state: ModuleState) {
		*self.state.lock() = state;
		tracing::debug!(module = %self.symbolic_name(), id = %self.id, state = %state, "lifecycle.transition");
	}

	/// INSTALLED -> RESOLVED. Returns false if the module was in any other state.
	pub(crate) fn mark_resolved(&self) -> bool {
		let mut state = self.state.lock();
		if *state != ModuleState::Installed {
			return false;
		}
		*state = ModuleState::Resolved;
		true
	}

	pub(crate) fn set_start_level(&self, level: u32) {
		self.start_level.store(level, Ordering::Release);
	}

	/// Updates one persistent status bit, saving only on change. Save failures are
	/// reported as runtime errors.
	fn set_status(&self, rt: &RuntimeShared, mask: ModuleStatus, on: bool) {
		let snapshot = {
			let mut status = self.status.lock();
			if status.contains(mask) == on {
				return;
			}
			status.set(mask, on);
			*status
		};
		if let Err(error) = rt.storage.save_status(&self.location, snapshot) {
			rt.publish_error(Some(self), error.into());
		}
	}

	fn publish(&self, rt: &RuntimeShared, kind: ModuleEventKind) {
		if let Some(this) = self.this.upgrade() {
			rt.publish_module(kind, &this);
		}
	}

	pub(crate) fn to_ref(&self) -> Option<ModuleRef> {
		self.this.upgrade()
	}
}

impl fmt::Debug for Module {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let descriptor = self.descriptor.load();
		f.debug_struct("Module")
			.field("id", &self.id)
			.field("symbolic_name", &descriptor.symbolic_name)
			.field("version", &descriptor.version)
			.field("location", &self.location)
			.field("state", &self.state())
			.finish()
	}
}

impl fmt::Display for Module {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let descriptor = self.descriptor.load();
		write!(f, "{} {} [{}]", descriptor.symbolic_name, descriptor.version, self.id.0)
	}
}

#[cfg(test)]
mod tests;
