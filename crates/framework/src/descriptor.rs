//! Static description of an installable module.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::ModuleContext;
use crate::version::{Version, VersionRange};

/// Structural role of a module. Stored as data; all kinds share one lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
	/// Regular module with its own activator.
	#[default]
	Host,
	/// Module assembled from other modules' contents.
	Composite,
	/// Stand-in for a module provided elsewhere.
	Surrogate,
}

/// Dependency on another module by symbolic name and version range.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Requirement {
	pub symbolic_name: String,
	#[serde(default)]
	pub range: VersionRange,
}

impl Requirement {
	pub fn new(symbolic_name: impl Into<String>, range: VersionRange) -> Self {
		Self {
			symbolic_name: symbolic_name.into(),
			range,
		}
	}
}

impl fmt::Display for Requirement {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} {}", self.symbolic_name, self.range)
	}
}

/// One extension a module contributes to an extension point, in document order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExtensionContribution {
	/// Fully qualified extension point id.
	pub point: String,
	#[serde(default)]
	pub id: Option<String>,
	#[serde(default)]
	pub attributes: BTreeMap<String, String>,
}

impl ExtensionContribution {
	pub fn new(point: impl Into<String>) -> Self {
		Self {
			point: point.into(),
			..Self::default()
		}
	}

	pub fn with_id(mut self, id: impl Into<String>) -> Self {
		self.id = Some(id.into());
		self
	}

	pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.attributes.insert(key.into(), value.into());
		self
	}
}

/// User code run when a module starts and stops.
///
/// A fresh activator is created through the module's [`ActivatorFactory`] on every
/// activation and dropped once the module stops.
pub trait Activator: Send {
	fn start(&mut self, context: &ModuleContext) -> Result<(), String>;

	fn stop(&mut self, context: &ModuleContext) -> Result<(), String> {
		let _ = context;
		Ok(())
	}
}

/// Builds one activator instance per activation.
pub type ActivatorFactory = Arc<dyn Fn() -> Box<dyn Activator> + Send + Sync>;

/// Everything the runtime needs to install a module.
#[derive(Clone, Default)]
pub struct ModuleDescriptor {
	pub symbolic_name: String,
	pub version: Version,
	pub location: String,
	/// Start level override; the runtime default applies when unset.
	pub start_level: Option<u32>,
	/// Declares the lazy activation policy.
	pub lazy_start: bool,
	pub kind: ModuleKind,
	pub requirements: Vec<Requirement>,
	/// Native libraries that must exist for the module to resolve.
	pub native_paths: Vec<PathBuf>,
	pub activator: Option<ActivatorFactory>,
	pub extensions: Vec<ExtensionContribution>,
}

impl ModuleDescriptor {
	pub fn new(symbolic_name: impl Into<String>, version: Version, location: impl Into<String>) -> Self {
		Self {
			symbolic_name: symbolic_name.into(),
			version,
			location: location.into(),
			..Self::default()
		}
	}

	pub fn with_start_level(mut self, level: u32) -> Self {
		self.start_level = Some(level);
		self
	}

	pub fn with_lazy_start(mut self, lazy: bool) -> Self {
		self.lazy_start = lazy;
		self
	}

	pub fn with_kind(mut self, kind: ModuleKind) -> Self {
		self.kind = kind;
		self
	}

	pub fn with_requirement(mut self, requirement: Requirement) -> Self {
		self.requirements.push(requirement);
		self
	}

	pub fn with_native_path(mut self, path: impl Into<PathBuf>) -> Self {
		self.native_paths.push(path.into());
		self
	}

	pub fn with_activator(mut self, factory: ActivatorFactory) -> Self {
		self.activator = Some(factory);
		self
	}

	/// Uses `build` to create one activator per activation.
	pub fn with_activator_fn<A, F>(self, build: F) -> Self
	where
		A: Activator + 'static,
		F: Fn() -> A + Send + Sync + 'static,
	{
		self.with_activator(Arc::new(move || Box::new(build()) as Box<dyn Activator>))
	}

	pub fn with_extension(mut self, extension: ExtensionContribution) -> Self {
		self.extensions.push(extension);
		self
	}
}

impl fmt::Debug for ModuleDescriptor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ModuleDescriptor")
			.field("symbolic_name", &self.symbolic_name)
			.field("version", &self.version)
			.field("location", &self.location)
			.field("start_level", &self.start_level)
			.field("lazy_start", &self.lazy_start)
			.field("kind", &self.kind)
			.field("requirements", &self.requirements)
			.field("native_paths", &self.native_paths)
			.field("activator", &self.activator.is_some())
			.field("extensions", &self.extensions)
			.finish()
	}
}
