//! Error taxonomy for lifecycle operations.

use std::fmt;
use std::path::PathBuf;

use crate::permissions::AdminPermission;
use crate::version::Version;

/// Severity carried by errors that downstream reporters may downgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
	Info,
	Warning,
	Error,
}

/// Sub-kind of a resolution failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolveErrorKind {
	/// One or more requirements have no matching provider.
	Unresolved,
	/// A declared native code path is missing.
	NativeCode,
}

/// Which activator hook failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivatorPhase {
	Start,
	Stop,
}

impl fmt::Display for ActivatorPhase {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Start => "start",
			Self::Stop => "stop",
		})
	}
}

/// Why a state-changing lock could not be acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateChangeReason {
	/// The calling thread already holds the lock.
	Reentrant,
	/// Another thread kept the lock past the bounded wait.
	TimedOut,
}

/// Errors raised by module lifecycle operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LifecycleError {
	#[error("state change in progress for module '{module}' (held by {holder}, {reason:?})")]
	StateChange {
		module: String,
		holder: String,
		reason: StateChangeReason,
	},
	#[error("module '{module}' could not be resolved: {}", .causes.join(", "))]
	Resolve {
		module: String,
		kind: ResolveErrorKind,
		causes: Vec<String>,
	},
	#[error("activator {phase} failed for module '{module}': {message}")]
	Activator { module: String, phase: ActivatorPhase, message: String },
	#[error("{message}")]
	InvalidOperation { message: String, severity: Severity },
	#[error("permission {permission:?} denied for module '{module}': {reason}")]
	Security {
		module: String,
		permission: AdminPermission,
		reason: String,
	},
	#[error("module '{module}' at {location} is uninstalled")]
	IllegalState { module: String, location: String },
	#[error(transparent)]
	Storage(#[from] StorageError),
	#[error("a module is already installed at {location}")]
	Duplicate { location: String },
	#[error("module '{symbolic_name}' {version} is already installed")]
	AlreadyInstalled { symbolic_name: String, version: Version },
	#[error("module '{0}' not found")]
	NotFound(String),
	#[error("runtime startup failed: {0}")]
	Startup(String),
	#[error("runtime is closed")]
	RuntimeClosed,
}

impl LifecycleError {
	/// Severity used when the error is surfaced as a runtime event.
	pub fn severity(&self) -> Severity {
		match self {
			Self::InvalidOperation { severity, .. } => *severity,
			Self::StateChange { .. } => Severity::Warning,
			_ => Severity::Error,
		}
	}
}

/// Errors raised by module status storage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
	#[error("failed to access {}: {message}", .path.display())]
	Io { path: PathBuf, message: String },
	#[error("invalid status record {}: {message}", .path.display())]
	Parse { path: PathBuf, message: String },
	#[error("storage operation {operation} used out of order")]
	OutOfOrder { operation: &'static str },
	#[error("{0}")]
	Other(String),
}

impl StorageError {
	pub(crate) fn io(path: impl Into<PathBuf>, error: std::io::Error) -> Self {
		Self::Io {
			path: path.into(),
			message: error.to_string(),
		}
	}
}

/// Errors raised while loading runtime configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("failed to read config {}: {source}", .path.display())]
	Read {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
	#[error("config parse error: {0}")]
	Parse(#[from] toml::de::Error),
	#[error("invalid config: {0}")]
	Invalid(String),
}

pub type Result<T, E = LifecycleError> = std::result::Result<T, E>;
