use std::fmt;

/// Identifier assigned to a module at install time. Never reused within one runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModuleId(pub u64);

impl fmt::Display for ModuleId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

/// Lifecycle state of a module.
///
/// ```text
/// INSTALLED --resolve--> RESOLVED --start--> STARTING --> ACTIVE
/// ACTIVE --stop--> STOPPING --> RESOLVED --refresh--> INSTALLED
/// any live state --uninstall--> UNINSTALLED (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleState {
	Installed,
	Resolved,
	Starting,
	Active,
	Stopping,
	Uninstalled,
}

impl ModuleState {
	/// True for STARTING and ACTIVE.
	#[inline]
	pub fn is_active(self) -> bool {
		matches!(self, Self::Starting | Self::Active)
	}

	/// True once the module has been resolved and not since unresolved.
	#[inline]
	pub fn is_resolved(self) -> bool {
		matches!(self, Self::Resolved | Self::Starting | Self::Active | Self::Stopping)
	}

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Installed => "INSTALLED",
			Self::Resolved => "RESOLVED",
			Self::Starting => "STARTING",
			Self::Active => "ACTIVE",
			Self::Stopping => "STOPPING",
			Self::Uninstalled => "UNINSTALLED",
		}
	}
}

impl fmt::Display for ModuleState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}
