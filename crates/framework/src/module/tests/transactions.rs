use crate::descriptor::ExtensionContribution;
use crate::extensions::ExtensionReader;

use super::*;

#[test]
fn update_swaps_the_descriptor_and_restarts() {
	let runtime = launched();
	let log = EventLog::attach(&runtime);
	let module = runtime.install(descriptor("svc").with_activator_fn(|| Quiet)).unwrap();
	module.start(StartOptions::empty()).unwrap();
	log.take("svc");

	let next = ModuleDescriptor::new("svc", Version::new(1, 1, 0), "ignored").with_activator_fn(|| Quiet);
	module.update(Some(next)).unwrap();

	assert_eq!(module.version(), Version::new(1, 1, 0));
	assert_eq!(module.location(), "mem:svc");
	assert_eq!(module.descriptor().location, "mem:svc");
	assert_eq!(module.state(), ModuleState::Active);
	assert_eq!(
		log.take("svc"),
		vec![
			ModuleEventKind::Stopping,
			ModuleEventKind::Stopped,
			ModuleEventKind::Unresolved,
			ModuleEventKind::Updated,
			ModuleEventKind::Resolved,
			ModuleEventKind::Starting,
			ModuleEventKind::Started,
		]
	);
}

#[test]
fn update_of_an_installed_module_only_swaps() {
	let runtime = launched();
	let log = EventLog::attach(&runtime);
	let module = runtime.install(descriptor("cold")).unwrap();
	log.take("cold");

	module.update(Some(ModuleDescriptor::new("cold", Version::new(2, 0, 0), "mem:cold"))).unwrap();
	assert_eq!(module.state(), ModuleState::Installed);
	assert_eq!(log.take("cold"), vec![ModuleEventKind::Updated]);
}

/// A failed update restores the previous module and its ACTIVE state.
///
/// - Enforced in: `Module::update_transaction`, `Module::update_worker`
/// - Failure symptom: module left RESOLVED with the rejected descriptor after a storage failure.
#[test]
fn failed_update_restores_the_active_module() {
	let storage = FlakyStorage::default();
	let runtime = launched_with(&storage);
	let events = RuntimeLog::attach(&runtime);
	let module = runtime.install(descriptor("svc").with_activator_fn(|| Quiet)).unwrap();
	module.start(StartOptions::empty()).unwrap();

	storage.fail_update.store(true, Ordering::SeqCst);
	let err = module
		.update(Some(ModuleDescriptor::new("svc", Version::new(9, 0, 0), "mem:svc").with_activator_fn(|| Failing)))
		.unwrap_err();

	assert!(matches!(err, LifecycleError::Storage(StorageError::Other(_))));
	assert_eq!(module.version(), Version::new(1, 0, 0));
	assert_eq!(module.state(), ModuleState::Active);
	assert_eq!(module.persistent_status(), ModuleStatus::STARTED);
	runtime.flush_events();
	assert!(events.errors().is_empty());
}

/// A rejected replacement leaves a RESOLVED module RESOLVED, and every state change it
/// went through is published.
///
/// - Enforced in: `Module::update_transaction`
/// - Failure symptom: module silently left INSTALLED with its extensions withdrawn.
#[test]
fn denied_update_re_resolves_the_previous_descriptor() {
	use crate::permissions::AdminPermission;

	let runtime = Runtime::builder(config())
		.permissions(Arc::new(|module: &crate::Module, permission: AdminPermission| -> Result<(), String> {
			if permission == AdminPermission::Lifecycle && module.version() == Version::new(2, 0, 0) {
				return Err("2.0.0 is not trusted".into());
			}
			Ok(())
		}))
		.build()
		.unwrap();
	runtime.launch().unwrap();
	let log = EventLog::attach(&runtime);
	let module = runtime
		.install(descriptor("m").with_extension(ExtensionContribution::new("ui.views").with_id("main")))
		.unwrap();
	module.resolve().unwrap();
	log.take("m");

	let err = module
		.update(Some(ModuleDescriptor::new("m", Version::new(2, 0, 0), "mem:m")))
		.unwrap_err();

	assert!(matches!(
		err,
		LifecycleError::Security {
			permission: AdminPermission::Lifecycle,
			..
		}
	));
	assert_eq!(module.version(), Version::new(1, 0, 0));
	assert_eq!(module.state(), ModuleState::Resolved);
	assert_eq!(log.take("m"), vec![ModuleEventKind::Unresolved, ModuleEventKind::Resolved]);
	assert_eq!(runtime.extensions().extensions_for("ui.views").len(), 1);
}

#[test]
fn update_rejects_a_colliding_identity() {
	let runtime = launched();
	runtime.install(ModuleDescriptor::new("svc", Version::new(2, 0, 0), "mem:svc-2")).unwrap();
	let module = runtime.install(descriptor("svc").with_activator_fn(|| Quiet)).unwrap();
	module.start(StartOptions::empty()).unwrap();

	let err = module.update(Some(ModuleDescriptor::new("svc", Version::new(2, 0, 0), "x"))).unwrap_err();
	assert!(matches!(err, LifecycleError::AlreadyInstalled { .. }));
	assert_eq!(module.version(), Version::new(1, 0, 0));
	assert_eq!(module.state(), ModuleState::Active);
}

/// Restart failures after a successful update are reported, not returned.
///
/// - Enforced in: `Module::update_worker`
/// - Failure symptom: `update` reports failure although the new descriptor is installed.
#[test]
fn restart_failure_after_update_is_a_runtime_error() {
	let runtime = launched();
	let events = RuntimeLog::attach(&runtime);
	let module = runtime.install(descriptor("svc").with_activator_fn(|| Quiet)).unwrap();
	module.start(StartOptions::empty()).unwrap();

	module
		.update(Some(ModuleDescriptor::new("svc", Version::new(2, 0, 0), "mem:svc").with_activator_fn(|| Failing)))
		.unwrap();
	assert_eq!(module.version(), Version::new(2, 0, 0));
	assert_eq!(module.state(), ModuleState::Resolved);

	runtime.flush_events();
	let errors = events.errors();
	assert_eq!(errors.len(), 1);
	assert!(matches!(errors[0], LifecycleError::Activator { phase: ActivatorPhase::Start, .. }));
}

#[test]
fn uninstall_removes_status_and_contributions() {
	let storage = FlakyStorage::default();
	let runtime = launched_with(&storage);
	let log = EventLog::attach(&runtime);
	let module = runtime
		.install(descriptor("ext").with_activator_fn(|| Quiet).with_extension(ExtensionContribution::new("ui.views")))
		.unwrap();
	module.start(StartOptions::empty()).unwrap();
	assert_eq!(storage.inner.locations(), vec![module.location().to_string()]);
	assert_eq!(runtime.extensions().extensions_for("ui.views").len(), 1);
	log.take("ext");

	module.uninstall().unwrap();
	assert_eq!(
		log.take("ext"),
		vec![
			ModuleEventKind::Stopping,
			ModuleEventKind::Stopped,
			ModuleEventKind::Unresolved,
			ModuleEventKind::Uninstalled,
		]
	);
	assert!(storage.inner.locations().is_empty());
	assert!(runtime.extensions().extensions_for("ui.views").is_empty());
}

#[test]
fn failed_uninstall_reinstates_the_module() {
	let storage = FlakyStorage::default();
	let runtime = launched_with(&storage);
	let module = runtime.install(descriptor("sticky").with_activator_fn(|| Quiet)).unwrap();
	module.start(StartOptions::empty()).unwrap();

	storage.fail_uninstall.store(true, Ordering::SeqCst);
	let err = module.uninstall().unwrap_err();
	assert!(matches!(err, LifecycleError::Storage(_)));
	assert_eq!(module.state(), ModuleState::Active);
	assert!(runtime.module(module.id()).is_some_and(|m| Arc::ptr_eq(&m, &module)));
	assert_eq!(storage.inner.locations(), vec![module.location().to_string()]);

	storage.fail_uninstall.store(false, Ordering::SeqCst);
	module.uninstall().unwrap();
	assert!(runtime.module(module.id()).is_none());
}

#[test]
fn uninstall_frees_the_location_for_reinstall() {
	let runtime = launched();
	let first = runtime.install(descriptor("again")).unwrap();
	first.uninstall().unwrap();
	let second = runtime.install(descriptor("again")).unwrap();
	assert_ne!(first.id(), second.id());
}
