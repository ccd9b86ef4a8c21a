//! Module lifecycle runtime.
//!
//! A [`Runtime`] installs [`Module`]s from [`ModuleDescriptor`]s and drives each through
//! INSTALLED, RESOLVED, STARTING, ACTIVE, STOPPING and UNINSTALLED. Every transition is
//! announced as a [`ModuleEvent`] through the listener and dispatch layers of
//! `bramble-eventmgr`.
//!
//! # Layout
//!
//! - [`runtime`]: registry of installed modules, start levels, event hub
//! - [`module`]: per-module state machine and lifecycle operations
//! - [`lock`]: per-module state-changing lock with bounded waits
//! - [`resolver`]: requirement and native path resolution
//! - [`storage`]: persisted [`ModuleStatus`] plus update/uninstall transactions
//! - [`extensions`]: extension contributions and change notifications
//! - [`context`]: handle passed to activators while a module is active

pub mod config;
pub mod context;
pub mod descriptor;
pub mod error;
pub mod event;
pub mod extensions;
pub mod lock;
pub mod module;
pub mod options;
pub mod permissions;
pub mod resolver;
pub mod runtime;
pub mod state;
pub mod storage;
pub mod version;

pub use config::{RuntimeConfig, StateChangeConfig};
pub use context::ModuleContext;
pub use descriptor::{Activator, ActivatorFactory, ExtensionContribution, ModuleDescriptor, ModuleKind, Requirement};
pub use error::{ActivatorPhase, ConfigError, LifecycleError, ResolveErrorKind, Result, Severity, StateChangeReason, StorageError};
pub use event::{
	Delivery, ModuleDispatcher, ModuleEvent, ModuleEventKind, ModuleListener, NotifyModule, NotifyRuntime, RuntimeDispatcher, RuntimeEvent,
	RuntimeEventKind, RuntimeListener,
};
pub use extensions::{Extension, ExtensionDelta, ExtensionDeltaKind, ExtensionListener, ExtensionReader, ExtensionRegistry, NotifyExtension};
pub use lock::{StateChangeGuard, StateChangeLock, WaitPolicy};
pub use module::{Module, ModuleRef};
pub use options::{ModuleStatus, StartOptions, StopOptions};
pub use permissions::{AdminPermission, AllowAll, PermissionChecker};
pub use runtime::{Runtime, RuntimeBuilder};
pub use state::{ModuleId, ModuleState};
pub use storage::{FileStorage, MemoryStorage, Storage, StorageOperation};
pub use version::{Version, VersionError, VersionRange};
