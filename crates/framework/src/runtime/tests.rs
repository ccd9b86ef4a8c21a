use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::*;
use crate::config::StateChangeConfig;
use crate::context::ModuleContext;
use crate::descriptor::Activator;
use crate::options::{StartOptions, StopOptions};
use crate::version::Version;

type Log = Arc<Mutex<Vec<String>>>;

struct Recording {
	name: &'static str,
	log: Log,
}

impl Activator for Recording {
	fn start(&mut self, _context: &ModuleContext) -> std::result::Result<(), String> {
		self.log.lock().push(format!("start {}", self.name));
		Ok(())
	}

	fn stop(&mut self, _context: &ModuleContext) -> std::result::Result<(), String> {
		self.log.lock().push(format!("stop {}", self.name));
		Ok(())
	}
}

fn config(initial_start_level: u32) -> RuntimeConfig {
	RuntimeConfig {
		name: "rt-test".into(),
		initial_start_level,
		state_change: StateChangeConfig {
			wait_slice_ms: 50,
			max_wait_slices: 2,
		},
		..RuntimeConfig::default()
	}
}

fn recorded(name: &'static str, level: u32, log: &Log) -> ModuleDescriptor {
	let log = Arc::clone(log);
	ModuleDescriptor::new(name, Version::new(1, 0, 0), format!("mem:{name}"))
		.with_start_level(level)
		.with_activator_fn(move || Recording { name, log: Arc::clone(&log) })
}

#[test]
fn ids_are_assigned_in_install_order() {
	let runtime = Runtime::new(config(1)).unwrap();
	let a = runtime.install(ModuleDescriptor::new("a", Version::new(1, 0, 0), "mem:a")).unwrap();
	let b = runtime.install(ModuleDescriptor::new("b", Version::new(1, 0, 0), "mem:b")).unwrap();
	assert_eq!(a.id(), ModuleId(1));
	assert_eq!(b.id(), ModuleId(2));
	assert_eq!(b.start_level(), 1);
	assert_eq!(runtime.modules().len(), 2);
	assert!(runtime.module_by_location("mem:b").is_some_and(|m| Arc::ptr_eq(&m, &b)));
}

#[test]
fn install_rejects_collisions() {
	let runtime = Runtime::new(config(1)).unwrap();
	runtime.install(ModuleDescriptor::new("a", Version::new(1, 0, 0), "mem:a")).unwrap();

	let same_location = runtime.install(ModuleDescriptor::new("other", Version::new(1, 0, 0), "mem:a"));
	assert!(matches!(same_location, Err(LifecycleError::Duplicate { .. })));

	let same_version = runtime.install(ModuleDescriptor::new("a", Version::new(1, 0, 0), "mem:a2"));
	assert!(matches!(same_version, Err(LifecycleError::AlreadyInstalled { .. })));

	let zero_level = runtime.install(ModuleDescriptor::new("z", Version::new(1, 0, 0), "mem:z").with_start_level(0));
	assert!(matches!(zero_level, Err(LifecycleError::InvalidOperation { .. })));

	runtime.install(ModuleDescriptor::new("a", Version::new(2, 0, 0), "mem:a2")).unwrap();
	let found: Vec<Version> = runtime.find("a").iter().map(|m| m.version()).collect();
	assert_eq!(found, vec![Version::new(2, 0, 0), Version::new(1, 0, 0)]);
}

#[test]
fn start_before_launch_only_records_status() {
	let log = Log::default();
	let runtime = Runtime::new(config(1)).unwrap();
	let module = runtime.install(recorded("a", 1, &log)).unwrap();

	module.start(StartOptions::empty()).unwrap();
	assert_eq!(module.state(), ModuleState::Installed);
	assert!(module.persistent_status().contains(ModuleStatus::STARTED));
	assert!(log.lock().is_empty());

	runtime.launch().unwrap();
	assert_eq!(module.state(), ModuleState::Active);
	assert_eq!(*log.lock(), vec!["start a"]);
}

#[test]
fn start_levels_resume_ascending_and_suspend_descending() {
	let log = Log::default();
	let runtime = Runtime::new(config(3)).unwrap();
	let c = runtime.install(recorded("c", 3, &log)).unwrap();
	let b2 = runtime.install(recorded("b2", 2, &log)).unwrap();
	let b1 = runtime.install(recorded("b1", 2, &log)).unwrap();
	let a = runtime.install(recorded("a", 1, &log)).unwrap();
	for module in [&c, &b2, &b1, &a] {
		module.start(StartOptions::empty()).unwrap();
	}

	runtime.launch().unwrap();
	assert_eq!(runtime.start_level(), 3);
	assert_eq!(*log.lock(), vec!["start a", "start b2", "start b1", "start c"]);

	log.lock().clear();
	runtime.set_start_level(1).unwrap();
	assert_eq!(*log.lock(), vec!["stop c", "stop b1", "stop b2"]);
	assert_eq!(a.state(), ModuleState::Active);
	assert_eq!(b1.state(), ModuleState::Resolved);
	assert!(b1.persistent_status().contains(ModuleStatus::STARTED));
}

#[test]
fn module_start_level_change_resumes_or_suspends() {
	let log = Log::default();
	let runtime = Runtime::new(config(2)).unwrap();
	let module = runtime.install(recorded("m", 3, &log)).unwrap();
	module.start(StartOptions::empty()).unwrap();
	runtime.launch().unwrap();
	assert_eq!(module.state(), ModuleState::Resolved);

	runtime.set_module_start_level(&module, 2).unwrap();
	assert_eq!(module.state(), ModuleState::Active);

	runtime.set_module_start_level(&module, 5).unwrap();
	assert_eq!(module.state(), ModuleState::Resolved);
	assert_eq!(*log.lock(), vec!["start m", "stop m"]);
}

#[test]
fn set_start_level_requires_launch() {
	let runtime = Runtime::new(config(1)).unwrap();
	assert!(matches!(runtime.set_start_level(2), Err(LifecycleError::InvalidOperation { .. })));
}

#[test]
fn shutdown_stops_modules_and_closes() {
	let log = Log::default();
	let runtime = Runtime::new(config(1)).unwrap();
	let module = runtime.install(recorded("a", 1, &log)).unwrap();
	runtime.launch().unwrap();
	module.start(StartOptions::empty()).unwrap();

	runtime.shutdown();
	runtime.shutdown();
	assert!(runtime.is_closed());
	assert!(!runtime.is_active());
	assert_eq!(module.state(), ModuleState::Resolved);
	assert_eq!(*log.lock(), vec!["start a", "stop a"]);

	assert_eq!(module.stop(StopOptions::empty()), Err(LifecycleError::RuntimeClosed));
	let late = runtime.install(ModuleDescriptor::new("late", Version::new(1, 0, 0), "mem:late"));
	assert!(matches!(late, Err(LifecycleError::RuntimeClosed)));
}

#[test]
fn dropping_the_runtime_closes_modules() {
	let runtime = Runtime::new(config(1)).unwrap();
	let module = runtime.install(ModuleDescriptor::new("a", Version::new(1, 0, 0), "mem:a")).unwrap();
	drop(runtime);
	assert_eq!(module.resolve(), Err(LifecycleError::RuntimeClosed));
}

#[test]
fn async_events_arrive_in_publication_order() {
	let runtime = Runtime::new(config(1)).unwrap();
	let seen = Arc::new(Mutex::new(Vec::new()));
	let sink = Arc::clone(&seen);
	runtime.add_module_listener(
		Delivery::Asynchronous,
		Arc::new(move |event: &ModuleEvent| -> std::result::Result<(), String> {
			std::thread::sleep(Duration::from_millis(1));
			sink.lock().push(event.kind);
			Ok(())
		}),
	);

	runtime.launch().unwrap();
	let module = runtime.install(ModuleDescriptor::new("a", Version::new(1, 0, 0), "mem:a")).unwrap();
	module.start(StartOptions::empty()).unwrap();
	module.stop(StopOptions::empty()).unwrap();
	runtime.flush_events();

	assert_eq!(
		*seen.lock(),
		vec![
			ModuleEventKind::Installed,
			ModuleEventKind::Resolved,
			ModuleEventKind::Starting,
			ModuleEventKind::Started,
			ModuleEventKind::Stopping,
			ModuleEventKind::Stopped,
		]
	);
}

#[test]
fn storage_dir_selects_file_storage() {
	let dir = tempfile::tempdir().unwrap();
	let cfg = RuntimeConfig {
		storage_dir: Some(dir.path().to_path_buf()),
		..config(1)
	};
	{
		let runtime = Runtime::new(cfg.clone()).unwrap();
		let module = runtime.install(ModuleDescriptor::new("a", Version::new(1, 0, 0), "mem:a")).unwrap();
		module.start(StartOptions::empty()).unwrap();
	}

	let runtime = Runtime::new(cfg).unwrap();
	let module = runtime.install(ModuleDescriptor::new("a", Version::new(1, 0, 0), "mem:a")).unwrap();
	assert!(module.persistent_status().contains(ModuleStatus::STARTED));
	runtime.launch().unwrap();
	assert_eq!(module.state(), ModuleState::Active);
}
