//! Lifecycle workers. Callers own the module's state-changing lock.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use super::{Activation, Module};
use crate::context::ModuleContext;
use crate::descriptor::{Activator, ModuleDescriptor};
use crate::error::{ActivatorPhase, LifecycleError, Result, Severity};
use crate::event::ModuleEventKind;
use crate::lock::StateChangeGuard;
use crate::options::{ModuleStatus, StartOptions, StopOptions};
use crate::permissions::AdminPermission;
use crate::runtime::RuntimeShared;
use crate::state::ModuleState;
use crate::storage::StorageOperation;

/// Runs an activator hook, turning panics into hook failures.
fn run_hook(hook: impl FnOnce() -> std::result::Result<(), String>) -> std::result::Result<(), String> {
	match std::panic::catch_unwind(AssertUnwindSafe(hook)) {
		Ok(outcome) => outcome,
		Err(payload) => Err(match payload.downcast_ref::<&str>() {
			Some(msg) => format!("activator panicked: {msg}"),
			None => match payload.downcast_ref::<String>() {
				Some(msg) => format!("activator panicked: {msg}"),
				None => "activator panicked".to_string(),
			},
		}),
	}
}

impl Module {
	pub(super) fn start_worker(&self, rt: &RuntimeShared, guard: &mut StateChangeGuard<'_>, options: StartOptions) -> Result<()> {
		if !options.contains(StartOptions::TRANSIENT) {
			self.set_status(rt, ModuleStatus::STARTED, true);
			self.set_status(rt, ModuleStatus::ACTIVATION_POLICY, options.contains(StartOptions::USE_ACTIVATION_POLICY));
		}
		if !rt.is_active() || self.state() == ModuleState::Active {
			return Ok(());
		}

		if self.state() == ModuleState::Installed {
			if let Some(error) = rt.resolve_modules(&[self.id]).remove(&self.id) {
				return Err(error);
			}
		}

		let active_level = rt.active_start_level();
		if self.start_level() > active_level {
			if options.contains(StartOptions::TRANSIENT) {
				return Err(LifecycleError::InvalidOperation {
					message: format!(
						"module '{}' cannot start transiently: start level {} is above active level {active_level}",
						self.symbolic_name(),
						self.start_level()
					),
					severity: Severity::Warning,
				});
			}
			return Ok(());
		}

		let descriptor = self.descriptor();
		if options.contains(StartOptions::USE_ACTIVATION_POLICY) && descriptor.lazy_start {
			if self.state() == ModuleState::Resolved {
				self.set_state(ModuleState::Starting);
				guard.release();
				self.publish(rt, ModuleEventKind::LazyActivation);
			}
			return Ok(());
		}

		self.set_state(ModuleState::Starting);
		self.publish(rt, ModuleEventKind::Starting);

		let context = Arc::new(ModuleContext::new(self.id, descriptor.symbolic_name.clone(), self.runtime.clone()));
		let mut activator: Option<Box<dyn Activator>> = None;
		let outcome = run_hook(|| {
			if let Some(factory) = &descriptor.activator {
				activator.insert(factory()).start(&context)?;
			}
			Ok(())
		});

		match outcome {
			Ok(()) => {
				*self.activation.lock() = Some(Activation { activator, context });
				self.set_state(ModuleState::Active);
				guard.release();
				self.publish(rt, ModuleEventKind::Started);
				Ok(())
			}
			Err(message) => {
				tracing::warn!(module = %descriptor.symbolic_name, id = %self.id, error = %message, "lifecycle.start.failed");
				self.set_state(ModuleState::Stopping);
				self.publish(rt, ModuleEventKind::Stopping);
				context.close();
				drop(activator);
				self.set_state(ModuleState::Resolved);
				self.publish(rt, ModuleEventKind::Stopped);
				Err(LifecycleError::Activator {
					module: descriptor.symbolic_name.clone(),
					phase: ActivatorPhase::Start,
					message,
				})
			}
		}
	}

	pub(super) fn stop_worker(&self, rt: &RuntimeShared, options: StopOptions) -> Result<()> {
		if !options.contains(StopOptions::TRANSIENT) {
			self.set_status(rt, ModuleStatus::STARTED, false);
			self.set_status(rt, ModuleStatus::ACTIVATION_POLICY, false);
		}
		if !self.state().is_active() {
			return Ok(());
		}

		self.set_state(ModuleState::Stopping);
		self.publish(rt, ModuleEventKind::Stopping);

		// A lazily STARTING module has no activation yet.
		let activation = self.activation.lock().take();
		let outcome = match activation {
			Some(Activation { activator, context }) => {
				let outcome = match activator {
					Some(mut activator) => run_hook(|| activator.stop(&context)),
					None => Ok(()),
				};
				context.close();
				outcome
			}
			None => Ok(()),
		};

		self.check_valid()?;
		self.set_state(ModuleState::Resolved);
		self.publish(rt, ModuleEventKind::Stopped);

		outcome.map_err(|message| {
			tracing::warn!(module = %self.symbolic_name(), id = %self.id, error = %message, "lifecycle.stop.failed");
			LifecycleError::Activator {
				module: self.symbolic_name(),
				phase: ActivatorPhase::Stop,
				message,
			}
		})
	}

	pub(super) fn update_worker(&self, rt: &RuntimeShared, guard: &mut StateChangeGuard<'_>, replacement: Option<ModuleDescriptor>) -> Result<()> {
		let previous = self.state();
		if previous.is_active() {
			if let Err(error) = self.stop_worker(rt, StopOptions::TRANSIENT) {
				rt.publish_error(Some(self), error.clone());
				if self.state().is_active() {
					return Err(error);
				}
			}
		}

		let result = self.update_transaction(rt, replacement);
		if result.is_ok() {
			self.publish(rt, ModuleEventKind::Updated);
		}

		if previous.is_active() {
			let mut options = StartOptions::TRANSIENT;
			if previous == ModuleState::Starting {
				options |= StartOptions::USE_ACTIVATION_POLICY;
			}
			if let Err(error) = self.start_worker(rt, guard, options) {
				rt.publish_error(Some(self), error);
			}
		}
		result
	}

	fn update_transaction(&self, rt: &RuntimeShared, replacement: Option<ModuleDescriptor>) -> Result<()> {
		let old = self.descriptor();
		let mut next = replacement.unwrap_or_else(|| (*old).clone());
		next.location = self.location.clone();

		let mut operation = rt.storage.update_operation(&self.location);
		// Some(was_resolved) once the replacement descriptor is in place.
		let mut reloaded = None;
		let outcome = self.apply_update(rt, operation.as_mut(), next, &mut reloaded);
		if let Err(error) = outcome {
			tracing::warn!(module = %self.symbolic_name(), id = %self.id, %error, "lifecycle.update.rollback");
			if let Err(undo) = operation.undo() {
				rt.publish_error(Some(self), undo.into());
			}
			if let Some(was_resolved) = reloaded {
				{
					let _registry = rt.registry_lock.lock();
					self.reload(rt, old);
				}
				if was_resolved {
					rt.resolve_modules(&[self.id]);
				}
			}
			return Err(error);
		}
		Ok(())
	}

	fn apply_update(&self, rt: &RuntimeShared, operation: &mut dyn StorageOperation, next: ModuleDescriptor, reloaded: &mut Option<bool>) -> Result<()> {
		operation.begin()?;
		let was_resolved = {
			let _registry = rt.registry_lock.lock();
			rt.check_installable(&next, Some(self.id))?;
			self.reload(rt, Arc::new(next))
		};
		*reloaded = Some(was_resolved);
		if was_resolved {
			self.publish(rt, ModuleEventKind::Unresolved);
		}
		rt.check_permission(self, AdminPermission::Lifecycle)?;
		operation.commit()?;
		Ok(())
	}

	/// Swaps the descriptor in, leaving the module INSTALLED. Returns whether it was RESOLVED.
	fn reload(&self, rt: &RuntimeShared, descriptor: Arc<ModuleDescriptor>) -> bool {
		let unloaded = self.unload(rt);
		if let Some(level) = descriptor.start_level {
			self.set_start_level(level);
		}
		self.descriptor.store(descriptor);
		unloaded
	}

	/// RESOLVED -> INSTALLED, withdrawing extension contributions. Publishes nothing.
	fn unload(&self, rt: &RuntimeShared) -> bool {
		{
			let mut state = self.state.lock();
			if *state != ModuleState::Resolved {
				return false;
			}
			*state = ModuleState::Installed;
		}
		rt.extensions.remove_contributions(self.id);
		true
	}

	pub(super) fn uninstall_worker(&self, rt: &RuntimeShared, guard: &mut StateChangeGuard<'_>) -> Result<()> {
		let was_active = self.state().is_active();
		if was_active {
			if let Err(error) = self.stop_worker(rt, StopOptions::TRANSIENT) {
				rt.publish_error(Some(self), error);
			}
		}

		if let Err(error) = self.uninstall_transaction(rt) {
			if was_active {
				if let Err(restart) = self.start_worker(rt, guard, StartOptions::TRANSIENT) {
					rt.publish_error(Some(self), restart);
				}
			}
			return Err(error);
		}

		self.publish(rt, ModuleEventKind::Uninstalled);
		Ok(())
	}

	fn uninstall_transaction(&self, rt: &RuntimeShared) -> Result<()> {
		let mut operation = rt.storage.uninstall_operation(&self.location);
		let mut unloaded = false;
		let outcome = self.apply_uninstall(rt, operation.as_mut(), &mut unloaded);
		if let Err(error) = outcome {
			tracing::warn!(module = %self.symbolic_name(), id = %self.id, %error, "lifecycle.uninstall.rollback");
			if let Err(undo) = operation.undo() {
				rt.publish_error(Some(self), undo.into());
			}
			if unloaded {
				let _registry = rt.registry_lock.lock();
				if let Some(this) = self.to_ref() {
					rt.modules.insert(self.id, this);
				}
			}
			return Err(error);
		}
		Ok(())
	}

	fn apply_uninstall(&self, rt: &RuntimeShared, operation: &mut dyn StorageOperation, unloaded: &mut bool) -> Result<()> {
		operation.begin()?;
		let previous = self.state();
		{
			let _registry = rt.registry_lock.lock();
			rt.modules.remove(&self.id);
		}
		self.unload(rt);
		*unloaded = true;
		if previous == ModuleState::Resolved {
			self.publish(rt, ModuleEventKind::Unresolved);
		}
		operation.commit()?;
		self.activation.lock().take();
		self.set_state(ModuleState::Uninstalled);
		Ok(())
	}

	pub(super) fn refresh_worker(&self, rt: &RuntimeShared, guard: &mut StateChangeGuard<'_>) -> Result<()> {
		let previous = self.state();
		if previous.is_active() {
			if let Err(error) = self.stop_worker(rt, StopOptions::TRANSIENT) {
				rt.publish_error(Some(self), error.clone());
				if self.state().is_active() {
					return Err(error);
				}
			}
		}

		if self.unload(rt) {
			self.publish(rt, ModuleEventKind::Unresolved);
		}

		if previous.is_active() {
			let mut options = StartOptions::TRANSIENT;
			if previous == ModuleState::Starting {
				options |= StartOptions::USE_ACTIVATION_POLICY;
			}
			if let Err(error) = self.start_worker(rt, guard, options) {
				rt.publish_error(Some(self), error);
			}
		}
		Ok(())
	}

	/// Starts the module if its start level and persistent status call for it.
	/// Failures become runtime events.
	pub(crate) fn resume(&self, rt: &RuntimeShared) {
		if self.state() == ModuleState::Uninstalled {
			return;
		}
		let mut guard = match self.begin_state_change(rt) {
			Ok(guard) => guard,
			Err(error) => {
				rt.publish_error(Some(self), error);
				return;
			}
		};
		if self.ready_to_resume(rt, &mut guard) {
			if let Err(error) = self.start_worker(rt, &mut guard, StartOptions::TRANSIENT) {
				rt.publish_error(Some(self), error);
			}
		}
	}

	fn ready_to_resume(&self, rt: &RuntimeShared, guard: &mut StateChangeGuard<'_>) -> bool {
		if self.start_level() > rt.active_start_level() {
			return false;
		}
		let status = self.persistent_status();
		if !status.contains(ModuleStatus::STARTED) {
			return false;
		}
		if !status.contains(ModuleStatus::ACTIVATION_POLICY) || !self.descriptor().lazy_start {
			return true;
		}
		if self.state() == ModuleState::Resolved {
			self.set_state(ModuleState::Starting);
			guard.release();
			self.publish(rt, ModuleEventKind::LazyActivation);
		}
		false
	}

	/// Stops the module transiently. Failures become runtime events.
	pub(crate) fn suspend(&self, rt: &RuntimeShared) {
		if self.state() == ModuleState::Uninstalled {
			return;
		}
		let result = self.begin_state_change(rt).and_then(|_guard| self.stop_worker(rt, StopOptions::TRANSIENT));
		if let Err(error) = result {
			rt.publish_error(Some(self), error);
		}
	}
}
