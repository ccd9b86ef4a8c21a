use super::*;

/// A failing start hook must leave the module RESOLVED, never ACTIVE.
///
/// - Enforced in: `Module::start_worker`
/// - Failure symptom: module stuck in STARTING, or listeners see STARTED for a dead module.
#[test]
fn failing_activator_ends_resolved() {
	let runtime = launched();
	let log = EventLog::attach(&runtime);
	let module = runtime.install(descriptor("m").with_activator_fn(|| Failing)).unwrap();
	module.resolve().unwrap();
	assert_eq!(log.take("m"), vec![ModuleEventKind::Installed, ModuleEventKind::Resolved]);

	let err = module.start(StartOptions::empty()).unwrap_err();
	assert!(matches!(
		err,
		LifecycleError::Activator {
			phase: ActivatorPhase::Start,
			ref message,
			..
		} if message == "boom"
	));
	assert_eq!(module.state(), ModuleState::Resolved);
	assert_eq!(
		log.take("m"),
		vec![ModuleEventKind::Starting, ModuleEventKind::Stopping, ModuleEventKind::Stopped]
	);
	assert!(module.context().is_none());
}

#[test]
fn panicking_activator_is_a_start_failure() {
	struct Panics;
	impl Activator for Panics {
		fn start(&mut self, _context: &ModuleContext) -> Result<(), String> {
			panic!("activator exploded");
		}
	}

	let runtime = launched();
	let module = runtime.install(descriptor("p").with_activator_fn(|| Panics)).unwrap();
	let err = module.start(StartOptions::empty()).unwrap_err();
	assert!(matches!(err, LifecycleError::Activator { ref message, .. } if message.contains("activator exploded")));
	assert_eq!(module.state(), ModuleState::Resolved);
	assert!(!module.is_state_changing());
}

/// UNINSTALLED is terminal.
///
/// - Enforced in: `Module::check_valid`
/// - Failure symptom: an uninstalled module restarts or re-enters the registry.
#[test]
fn uninstalled_module_rejects_every_operation() {
	let runtime = launched();
	let module = runtime.install(descriptor("gone").with_activator_fn(|| Quiet)).unwrap();
	module.start(StartOptions::empty()).unwrap();
	module.uninstall().unwrap();
	assert_eq!(module.state(), ModuleState::Uninstalled);
	assert!(runtime.module(module.id()).is_none());

	let illegal = |result: crate::Result<()>| matches!(result, Err(LifecycleError::IllegalState { .. }));
	assert!(illegal(module.start(StartOptions::empty())));
	assert!(illegal(module.stop(StopOptions::empty())));
	assert!(illegal(module.resolve()));
	assert!(illegal(module.refresh()));
	assert!(illegal(module.update(None)));
	assert!(illegal(module.uninstall()));
	assert!(illegal(runtime.set_module_start_level(&module, 2)));
}

#[test]
fn starting_an_active_module_fires_nothing() {
	let runtime = launched();
	let log = EventLog::attach(&runtime);
	let module = runtime.install(descriptor("a").with_activator_fn(|| Quiet)).unwrap();
	module.start(StartOptions::empty()).unwrap();
	log.take("a");

	module.start(StartOptions::empty()).unwrap();
	module.start(StartOptions::TRANSIENT).unwrap();
	assert_eq!(module.state(), ModuleState::Active);
	assert!(log.take("a").is_empty());
}

#[test]
fn stopping_a_resolved_module_is_a_noop() {
	let runtime = launched();
	let log = EventLog::attach(&runtime);
	let module = runtime.install(descriptor("r")).unwrap();
	module.resolve().unwrap();
	log.take("r");

	module.stop(StopOptions::empty()).unwrap();
	assert_eq!(module.state(), ModuleState::Resolved);
	assert!(log.take("r").is_empty());
}

#[test]
fn failing_stop_hook_still_releases_the_context() {
	struct StopFails;
	impl Activator for StopFails {
		fn start(&mut self, _context: &ModuleContext) -> Result<(), String> {
			Ok(())
		}

		fn stop(&mut self, _context: &ModuleContext) -> Result<(), String> {
			Err("refusing".into())
		}
	}

	let runtime = launched();
	let log = EventLog::attach(&runtime);
	let module = runtime.install(descriptor("s").with_activator_fn(|| StopFails)).unwrap();
	module.start(StartOptions::empty()).unwrap();
	let context = module.context().unwrap();
	log.take("s");

	let err = module.stop(StopOptions::empty()).unwrap_err();
	assert!(matches!(err, LifecycleError::Activator { phase: ActivatorPhase::Stop, .. }));
	assert_eq!(module.state(), ModuleState::Resolved);
	assert!(!context.is_valid());
	assert_eq!(log.take("s"), vec![ModuleEventKind::Stopping, ModuleEventKind::Stopped]);
}

#[test]
fn context_listeners_are_removed_when_the_module_stops() {
	let seen: Arc<Mutex<Vec<(ModuleEventKind, String)>>> = Arc::default();
	let sink = Arc::clone(&seen);
	let runtime = launched();
	let module = runtime
		.install(descriptor("watcher").with_activator_fn(move || Watcher { seen: Arc::clone(&sink) }))
		.unwrap();

	struct Watcher {
		seen: Arc<Mutex<Vec<(ModuleEventKind, String)>>>,
	}
	impl Activator for Watcher {
		fn start(&mut self, context: &ModuleContext) -> Result<(), String> {
			let seen = Arc::clone(&self.seen);
			context
				.add_module_listener(
					Delivery::Synchronous,
					Arc::new(move |event: &ModuleEvent| -> Result<(), String> {
						seen.lock().push((event.kind, event.module.symbolic_name()));
						Ok(())
					}),
				)
				.map_err(|e| e.to_string())
		}
	}

	module.start(StartOptions::empty()).unwrap();
	runtime.install(descriptor("first")).unwrap();
	module.stop(StopOptions::empty()).unwrap();
	runtime.install(descriptor("second")).unwrap();

	let seen = seen.lock().clone();
	assert_eq!(
		seen,
		vec![
			(ModuleEventKind::Started, "watcher".to_string()),
			(ModuleEventKind::Installed, "first".to_string()),
			(ModuleEventKind::Stopping, "watcher".to_string()),
		]
	);
	assert!(module.context().is_none());
}

#[test]
fn persistent_flags_follow_non_transient_calls() {
	let runtime = launched();
	let module = runtime.install(descriptor("flags").with_activator_fn(|| Quiet)).unwrap();

	module.start(StartOptions::TRANSIENT).unwrap();
	assert_eq!(module.persistent_status(), ModuleStatus::empty());
	module.stop(StopOptions::TRANSIENT).unwrap();

	module.start(StartOptions::empty()).unwrap();
	assert_eq!(module.persistent_status(), ModuleStatus::STARTED);
	module.stop(StopOptions::TRANSIENT).unwrap();
	assert_eq!(module.persistent_status(), ModuleStatus::STARTED);
	module.stop(StopOptions::empty()).unwrap();
	assert_eq!(module.persistent_status(), ModuleStatus::empty());
}

/// A transient start against a deferred module is an error with warning severity.
///
/// - Enforced in: `Module::start_worker`
/// - Failure symptom: caller believes a transient start succeeded while the module stays RESOLVED.
#[test]
fn transient_start_above_active_level_warns() {
	let runtime = launched();
	let module = runtime.install(descriptor("high").with_start_level(4).with_activator_fn(|| Quiet)).unwrap();

	let err = module.start(StartOptions::TRANSIENT).unwrap_err();
	assert!(matches!(
		err,
		LifecycleError::InvalidOperation {
			severity: Severity::Warning,
			..
		}
	));
	assert_eq!(err.severity(), Severity::Warning);

	module.start(StartOptions::empty()).unwrap();
	assert_eq!(module.state(), ModuleState::Resolved);
	assert!(module.persistent_status().contains(ModuleStatus::STARTED));

	runtime.set_start_level(4).unwrap();
	assert_eq!(module.state(), ModuleState::Active);
}

#[test]
fn lazy_activation_defers_the_activator() {
	let runs = Arc::new(Mutex::new(0u32));
	let counter = Arc::clone(&runs);
	struct Counted(Arc<Mutex<u32>>);
	impl Activator for Counted {
		fn start(&mut self, _context: &ModuleContext) -> Result<(), String> {
			*self.0.lock() += 1;
			Ok(())
		}
	}

	let runtime = launched();
	let log = EventLog::attach(&runtime);
	let module = runtime
		.install(
			descriptor("lazy")
				.with_lazy_start(true)
				.with_activator_fn(move || Counted(Arc::clone(&counter))),
		)
		.unwrap();
	log.take("lazy");

	module.start(StartOptions::USE_ACTIVATION_POLICY).unwrap();
	assert_eq!(module.state(), ModuleState::Starting);
	assert_eq!(*runs.lock(), 0);
	assert_eq!(log.take("lazy"), vec![ModuleEventKind::Resolved, ModuleEventKind::LazyActivation]);
	assert_eq!(module.persistent_status(), ModuleStatus::STARTED | ModuleStatus::ACTIVATION_POLICY);

	module.start(StartOptions::empty()).unwrap();
	assert_eq!(module.state(), ModuleState::Active);
	assert_eq!(*runs.lock(), 1);
	assert_eq!(log.take("lazy"), vec![ModuleEventKind::Starting, ModuleEventKind::Started]);
	assert_eq!(module.persistent_status(), ModuleStatus::STARTED);
}

#[test]
fn lazy_module_stops_without_an_activation() {
	let runtime = launched();
	let log = EventLog::attach(&runtime);
	let module = runtime.install(descriptor("idle").with_lazy_start(true).with_activator_fn(|| Quiet)).unwrap();
	module.start(StartOptions::USE_ACTIVATION_POLICY).unwrap();
	log.take("idle");

	module.stop(StopOptions::empty()).unwrap();
	assert_eq!(module.state(), ModuleState::Resolved);
	assert_eq!(log.take("idle"), vec![ModuleEventKind::Stopping, ModuleEventKind::Stopped]);
}

#[test]
fn denied_permissions_surface_as_security_errors() {
	use crate::permissions::AdminPermission;

	let runtime = Runtime::builder(config())
		.permissions(Arc::new(|module: &crate::Module, permission: AdminPermission| -> Result<(), String> {
			if module.symbolic_name() == "locked" && permission == AdminPermission::Execute {
				return Err("locked modules cannot run".into());
			}
			Ok(())
		}))
		.build()
		.unwrap();
	runtime.launch().unwrap();
	let module = runtime.install(descriptor("locked").with_activator_fn(|| Quiet)).unwrap();

	let err = module.start(StartOptions::empty()).unwrap_err();
	assert!(matches!(
		err,
		LifecycleError::Security {
			permission: AdminPermission::Execute,
			..
		}
	));
	assert_eq!(module.state(), ModuleState::Installed);
	module.resolve().unwrap();
}
