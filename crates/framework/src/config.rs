//! Runtime configuration loaded from TOML.
//!
//! Every field has a default, so an empty document is a valid configuration:
//!
//! ```toml
//! name = "bramble"
//! initial_start_level = 1
//! default_module_start_level = 1
//! storage_dir = "/var/lib/bramble"
//!
//! [state_change]
//! wait_slice_ms = 5000
//! max_wait_slices = 2
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::lock::WaitPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StateChangeConfig {
	pub wait_slice_ms: u64,
	pub max_wait_slices: u32,
}

impl Default for StateChangeConfig {
	fn default() -> Self {
		let policy = WaitPolicy::default();
		Self {
			wait_slice_ms: policy.wait_slice.as_millis() as u64,
			max_wait_slices: policy.max_wait_slices,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
	/// Names the runtime's dispatch thread and log records.
	pub name: String,
	/// Start level reached by [`Runtime::launch`](crate::Runtime::launch).
	pub initial_start_level: u32,
	/// Start level of modules whose descriptor does not set one.
	pub default_module_start_level: u32,
	pub state_change: StateChangeConfig,
	/// Directory for persisted module status. In-memory storage when unset.
	pub storage_dir: Option<PathBuf>,
}

impl Default for RuntimeConfig {
	fn default() -> Self {
		Self {
			name: "bramble".to_string(),
			initial_start_level: 1,
			default_module_start_level: 1,
			state_change: StateChangeConfig::default(),
			storage_dir: None,
		}
	}
}

impl RuntimeConfig {
	/// Reads and validates a TOML config file.
	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
			path: path.to_path_buf(),
			source,
		})?;
		let mut config = Self::from_toml_str(&content)?;
		if let Some(dir) = config.storage_dir.take() {
			// Relative storage paths are anchored at the config file.
			let base = path.parent().unwrap_or_else(|| Path::new("."));
			config.storage_dir = Some(if dir.is_relative() { base.join(dir) } else { dir });
		}
		Ok(config)
	}

	pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(content)?;
		config.validate()?;
		Ok(config)
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.name.trim().is_empty() {
			return Err(ConfigError::Invalid("name must not be empty".into()));
		}
		if self.default_module_start_level == 0 {
			return Err(ConfigError::Invalid("default_module_start_level must be at least 1".into()));
		}
		if self.state_change.max_wait_slices == 0 {
			return Err(ConfigError::Invalid("state_change.max_wait_slices must be at least 1".into()));
		}
		Ok(())
	}

	pub fn wait_policy(&self) -> WaitPolicy {
		WaitPolicy {
			wait_slice: Duration::from_millis(self.state_change.wait_slice_ms),
			max_wait_slices: self.state_change.max_wait_slices,
		}
	}
}
