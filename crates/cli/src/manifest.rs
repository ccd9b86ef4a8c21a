//! Module manifest: the list of modules a `bramble` invocation installs.
//!
//! ```toml
//! [[module]]
//! name = "org.bramble.core"
//! version = "1.2.0"
//! start_level = 1
//! activator = "log"
//!
//! [[module]]
//! name = "org.bramble.ui"
//! version = "0.4.0"
//! lazy = true
//! requires = [{ name = "org.bramble.core", range = "[1.0.0,2.0.0)" }]
//!
//! [[module.extension]]
//! point = "org.bramble.ui.views"
//! id = "outline"
//! attributes = { title = "Outline" }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use bramble_framework::{Activator, ExtensionContribution, ModuleContext, ModuleDescriptor, ModuleKind, Requirement, Version, VersionRange};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleManifest {
	#[serde(default, rename = "module")]
	pub modules: Vec<ModuleEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleEntry {
	pub name: String,
	pub version: Version,
	/// Defaults to `manifest:<name>`.
	pub location: Option<String>,
	pub start_level: Option<u32>,
	#[serde(default)]
	pub lazy: bool,
	#[serde(default)]
	pub kind: EntryKind,
	/// Built-in activator: `log` or `fail`.
	pub activator: Option<String>,
	#[serde(default)]
	pub requires: Vec<RequirementEntry>,
	#[serde(default)]
	pub native_paths: Vec<PathBuf>,
	#[serde(default, rename = "extension")]
	pub extensions: Vec<ExtensionEntry>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
	#[default]
	Host,
	Composite,
	Surrogate,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequirementEntry {
	pub name: String,
	pub range: Option<VersionRange>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtensionEntry {
	pub point: String,
	pub id: Option<String>,
	#[serde(default)]
	pub attributes: BTreeMap<String, String>,
}

impl ModuleManifest {
	pub fn load(path: &Path) -> Result<Self> {
		let content = std::fs::read_to_string(path).with_context(|| format!("failed to read manifest {}", path.display()))?;
		let manifest: Self = toml::from_str(&content).with_context(|| format!("invalid manifest {}", path.display()))?;
		Ok(manifest.anchored(path.parent().unwrap_or_else(|| Path::new("."))))
	}

	/// Native paths are relative to the manifest's directory.
	fn anchored(mut self, base: &Path) -> Self {
		for entry in &mut self.modules {
			for path in &mut entry.native_paths {
				if path.is_relative() {
					*path = base.join(&*path);
				}
			}
		}
		self
	}

	pub fn descriptors(&self) -> Result<Vec<ModuleDescriptor>> {
		self.modules.iter().map(ModuleEntry::descriptor).collect()
	}
}

impl ModuleEntry {
	pub fn descriptor(&self) -> Result<ModuleDescriptor> {
		let location = self.location.clone().unwrap_or_else(|| format!("manifest:{}", self.name));
		let mut descriptor = ModuleDescriptor::new(&self.name, self.version.clone(), location)
			.with_lazy_start(self.lazy)
			.with_kind(match self.kind {
				EntryKind::Host => ModuleKind::Host,
				EntryKind::Composite => ModuleKind::Composite,
				EntryKind::Surrogate => ModuleKind::Surrogate,
			});
		if let Some(level) = self.start_level {
			descriptor = descriptor.with_start_level(level);
		}
		for requirement in &self.requires {
			descriptor = descriptor.with_requirement(Requirement::new(&requirement.name, requirement.range.clone().unwrap_or_else(VersionRange::any)));
		}
		for path in &self.native_paths {
			descriptor = descriptor.with_native_path(path);
		}
		for extension in &self.extensions {
			let mut contribution = ExtensionContribution::new(&extension.point);
			if let Some(id) = &extension.id {
				contribution = contribution.with_id(id);
			}
			for (key, value) in &extension.attributes {
				contribution = contribution.with_attribute(key, value);
			}
			descriptor = descriptor.with_extension(contribution);
		}

		match self.activator.as_deref() {
			None => {}
			Some("log") => descriptor = descriptor.with_activator_fn(|| LogActivator),
			Some("fail") => descriptor = descriptor.with_activator_fn(|| FailActivator),
			Some(other) => bail!("module '{}': unknown activator '{other}' (expected 'log' or 'fail')", self.name),
		}
		Ok(descriptor)
	}
}

/// Logs start and stop.
struct LogActivator;

impl Activator for LogActivator {
	fn start(&mut self, context: &ModuleContext) -> Result<(), String> {
		tracing::info!(module = %context.symbolic_name(), "activator.start");
		Ok(())
	}

	fn stop(&mut self, context: &ModuleContext) -> Result<(), String> {
		tracing::info!(module = %context.symbolic_name(), "activator.stop");
		Ok(())
	}
}

/// Always refuses to start.
struct FailActivator;

impl Activator for FailActivator {
	fn start(&mut self, context: &ModuleContext) -> Result<(), String> {
		Err(format!("{} is configured to fail", context.symbolic_name()))
	}
}
