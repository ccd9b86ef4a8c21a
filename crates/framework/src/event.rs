//! Lifecycle and runtime events plus the listener traits that receive them.

use std::fmt;
use std::sync::Arc;

use bramble_eventmgr::EventDispatcher;

use crate::error::LifecycleError;
use crate::module::ModuleRef;

/// Kind of a module lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleEventKind {
	Installed,
	Resolved,
	LazyActivation,
	Starting,
	Started,
	Stopping,
	Stopped,
	Updated,
	Unresolved,
	Uninstalled,
}

impl ModuleEventKind {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Installed => "INSTALLED",
			Self::Resolved => "RESOLVED",
			Self::LazyActivation => "LAZY_ACTIVATION",
			Self::Starting => "STARTING",
			Self::Started => "STARTED",
			Self::Stopping => "STOPPING",
			Self::Stopped => "STOPPED",
			Self::Updated => "UPDATED",
			Self::Unresolved => "UNRESOLVED",
			Self::Uninstalled => "UNINSTALLED",
		}
	}
}

impl fmt::Display for ModuleEventKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone)]
pub struct ModuleEvent {
	pub kind: ModuleEventKind,
	pub module: ModuleRef,
}

/// Runtime-level notifications, including errors that lifecycle calls do not rethrow.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
	Started,
	StartLevelChanged { level: u32 },
	Error { module: Option<ModuleRef>, error: LifecycleError },
	Warning { module: Option<ModuleRef>, error: LifecycleError },
	Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeEventKind {
	Started,
	StartLevelChanged,
	Error,
	Warning,
	Stopped,
}

impl RuntimeEvent {
	pub fn kind(&self) -> RuntimeEventKind {
		match self {
			Self::Started => RuntimeEventKind::Started,
			Self::StartLevelChanged { .. } => RuntimeEventKind::StartLevelChanged,
			Self::Error { .. } => RuntimeEventKind::Error,
			Self::Warning { .. } => RuntimeEventKind::Warning,
			Self::Stopped => RuntimeEventKind::Stopped,
		}
	}
}

/// How module listeners are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Delivery {
	/// On the thread performing the transition, before the lifecycle call returns.
	Synchronous,
	/// On the runtime's delivery thread, in per-runtime FIFO order.
	Asynchronous,
}

pub trait ModuleListener: Send + Sync {
	fn module_changed(&self, event: &ModuleEvent) -> Result<(), String>;
}

impl<F> ModuleListener for F
where
	F: Fn(&ModuleEvent) -> Result<(), String> + Send + Sync,
{
	fn module_changed(&self, event: &ModuleEvent) -> Result<(), String> {
		self(event)
	}
}

pub trait RuntimeListener: Send + Sync {
	fn runtime_event(&self, event: &RuntimeEvent) -> Result<(), String>;
}

impl<F> RuntimeListener for F
where
	F: Fn(&RuntimeEvent) -> Result<(), String> + Send + Sync,
{
	fn runtime_event(&self, event: &RuntimeEvent) -> Result<(), String> {
		self(event)
	}
}

pub type ModuleDispatcher = Arc<dyn EventDispatcher<dyn ModuleListener, ModuleEvent>>;
pub type RuntimeDispatcher = Arc<dyn EventDispatcher<dyn RuntimeListener, RuntimeEvent>>;

/// Calls [`ModuleListener::module_changed`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NotifyModule;

impl EventDispatcher<dyn ModuleListener, ModuleEvent> for NotifyModule {
	fn dispatch(&self, listener: &dyn ModuleListener, event: &ModuleEvent) -> Result<(), String> {
		listener.module_changed(event)
	}
}

/// Calls [`RuntimeListener::runtime_event`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NotifyRuntime;

impl EventDispatcher<dyn RuntimeListener, RuntimeEvent> for NotifyRuntime {
	fn dispatch(&self, listener: &dyn RuntimeListener, event: &RuntimeEvent) -> Result<(), String> {
		listener.runtime_event(event)
	}
}
