//! Durable module status and update/uninstall transactions.
//!
//! Only [`ModuleStatus`] is persisted, keyed by module location so a record follows its
//! module across restarts whatever order modules are installed in. Every other piece of
//! lifecycle state is rebuilt at install time. Update and uninstall run inside a [`StorageOperation`]:
//! `begin` captures what is needed to roll back, `commit` makes the change durable and
//! `undo` restores the captured record.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::options::ModuleStatus;

/// Persistence backend for module status.
pub trait Storage: Send + Sync {
	/// Returns the status recorded for `location`, or empty status for unknown modules.
	fn load_status(&self, location: &str) -> Result<ModuleStatus, StorageError>;

	fn save_status(&self, location: &str, status: ModuleStatus) -> Result<(), StorageError>;

	/// Opens a transaction replacing the module's contents in place.
	fn update_operation(&self, location: &str) -> Box<dyn StorageOperation>;

	/// Opens a transaction removing the module's record.
	fn uninstall_operation(&self, location: &str) -> Box<dyn StorageOperation>;
}

/// One update or uninstall transaction.
pub trait StorageOperation: Send {
	fn begin(&mut self) -> Result<(), StorageError>;
	fn commit(&mut self) -> Result<(), StorageError>;
	fn undo(&mut self) -> Result<(), StorageError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Purpose {
	Update,
	Uninstall,
}

/// Status kept in memory for the lifetime of the process.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
	records: Arc<Mutex<HashMap<String, ModuleStatus>>>,
}

impl MemoryStorage {
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the locations that currently have a record.
	pub fn locations(&self) -> Vec<String> {
		let mut locations: Vec<_> = self.records.lock().keys().cloned().collect();
		locations.sort();
		locations
	}
}

impl Storage for MemoryStorage {
	fn load_status(&self, location: &str) -> Result<ModuleStatus, StorageError> {
		Ok(self.records.lock().get(location).copied().unwrap_or_default())
	}

	fn save_status(&self, location: &str, status: ModuleStatus) -> Result<(), StorageError> {
		self.records.lock().insert(location.to_string(), status);
		Ok(())
	}

	fn update_operation(&self, location: &str) -> Box<dyn StorageOperation> {
		Box::new(MemoryOperation {
			records: Arc::clone(&self.records),
			location: location.to_string(),
			purpose: Purpose::Update,
			saved: None,
		})
	}

	fn uninstall_operation(&self, location: &str) -> Box<dyn StorageOperation> {
		Box::new(MemoryOperation {
			records: Arc::clone(&self.records),
			location: location.to_string(),
			purpose: Purpose::Uninstall,
			saved: None,
		})
	}
}

struct MemoryOperation {
	records: Arc<Mutex<HashMap<String, ModuleStatus>>>,
	location: String,
	purpose: Purpose,
	saved: Option<Option<ModuleStatus>>,
}

impl StorageOperation for MemoryOperation {
	fn begin(&mut self) -> Result<(), StorageError> {
		self.saved = Some(self.records.lock().get(&self.location).copied());
		Ok(())
	}

	fn commit(&mut self) -> Result<(), StorageError> {
		if self.saved.is_none() {
			return Err(StorageError::OutOfOrder { operation: "commit" });
		}
		if self.purpose == Purpose::Uninstall {
			self.records.lock().remove(&self.location);
		}
		Ok(())
	}

	fn undo(&mut self) -> Result<(), StorageError> {
		let Some(saved) = self.saved.take() else {
			return Ok(());
		};
		let mut records = self.records.lock();
		match saved {
			Some(status) => records.insert(self.location.clone(), status),
			None => records.remove(&self.location),
		};
		Ok(())
	}
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StatusRecord {
	#[serde(default)]
	location: String,
	#[serde(default)]
	started: bool,
	#[serde(default)]
	activation_policy: bool,
}

impl StatusRecord {
	fn new(location: &str, status: ModuleStatus) -> Self {
		Self {
			location: location.to_string(),
			started: status.contains(ModuleStatus::STARTED),
			activation_policy: status.contains(ModuleStatus::ACTIVATION_POLICY),
		}
	}
}

impl From<StatusRecord> for ModuleStatus {
	fn from(record: StatusRecord) -> Self {
		let mut status = ModuleStatus::empty();
		status.set(ModuleStatus::STARTED, record.started);
		status.set(ModuleStatus::ACTIVATION_POLICY, record.activation_policy);
		status
	}
}

/// One TOML status file per module location under a directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
	dir: PathBuf,
}

impl FileStorage {
	/// Uses `dir` for status files, creating it if needed.
	pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
		let dir = dir.into();
		std::fs::create_dir_all(&dir).map_err(|e| StorageError::io(&dir, e))?;
		Ok(Self { dir })
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	fn path_for(&self, location: &str) -> PathBuf {
		self.dir.join(format!("module-{}.toml", file_stem(location)))
	}
}

/// Escapes every byte outside `[A-Za-z0-9._-]` as `%XX`, so distinct locations map to
/// distinct file names on every platform.
fn file_stem(location: &str) -> String {
	let mut stem = String::with_capacity(location.len());
	for byte in location.bytes() {
		match byte {
			b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'.' | b'_' | b'-' => stem.push(char::from(byte)),
			_ => stem.push_str(&format!("%{byte:02X}")),
		}
	}
	stem
}

fn read_record(path: &Path) -> Result<Option<ModuleStatus>, StorageError> {
	let content = match std::fs::read_to_string(path) {
		Ok(content) => content,
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
		Err(e) => return Err(StorageError::io(path, e)),
	};
	let record: StatusRecord = toml::from_str(&content).map_err(|e| StorageError::Parse {
		path: path.to_path_buf(),
		message: e.to_string(),
	})?;
	Ok(Some(record.into()))
}

fn write_record(path: &Path, location: &str, status: ModuleStatus) -> Result<(), StorageError> {
	let content = toml::to_string(&StatusRecord::new(location, status)).map_err(|e| StorageError::Other(e.to_string()))?;
	let tmp = path.with_extension("toml.tmp");
	std::fs::write(&tmp, content).map_err(|e| StorageError::io(&tmp, e))?;
	std::fs::rename(&tmp, path).map_err(|e| StorageError::io(path, e))
}

fn remove_record(path: &Path) -> Result<(), StorageError> {
	match std::fs::remove_file(path) {
		Ok(()) => Ok(()),
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
		Err(e) => Err(StorageError::io(path, e)),
	}
}

impl Storage for FileStorage {
	fn load_status(&self, location: &str) -> Result<ModuleStatus, StorageError> {
		Ok(read_record(&self.path_for(location))?.unwrap_or_default())
	}

	fn save_status(&self, location: &str, status: ModuleStatus) -> Result<(), StorageError> {
		write_record(&self.path_for(location), location, status)
	}

	fn update_operation(&self, location: &str) -> Box<dyn StorageOperation> {
		Box::new(FileOperation {
			path: self.path_for(location),
			location: location.to_string(),
			purpose: Purpose::Update,
			saved: None,
		})
	}

	fn uninstall_operation(&self, location: &str) -> Box<dyn StorageOperation> {
		Box::new(FileOperation {
			path: self.path_for(location),
			location: location.to_string(),
			purpose: Purpose::Uninstall,
			saved: None,
		})
	}
}

struct FileOperation {
	path: PathBuf,
	location: String,
	purpose: Purpose,
	saved: Option<Option<ModuleStatus>>,
}

impl StorageOperation for FileOperation {
	fn begin(&mut self) -> Result<(), StorageError> {
		self.saved = Some(read_record(&self.path)?);
		Ok(())
	}

	fn commit(&mut self) -> Result<(), StorageError> {
		if self.saved.is_none() {
			return Err(StorageError::OutOfOrder { operation: "commit" });
		}
		match self.purpose {
			Purpose::Update => Ok(()),
			Purpose::Uninstall => remove_record(&self.path),
		}
	}

	fn undo(&mut self) -> Result<(), StorageError> {
		match self.saved.take() {
			None => Ok(()),
			Some(Some(status)) => write_record(&self.path, &self.location, status),
			Some(None) => remove_record(&self.path),
		}
	}
}
