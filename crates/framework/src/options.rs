//! Option bits for lifecycle calls and persisted module status.

bitflags::bitflags! {
	/// Flags accepted by [`Module::start`](crate::Module::start).
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
	pub struct StartOptions: u8 {
		/// Do not record the start in the module's persistent status.
		const TRANSIENT = 1 << 0;
		/// Honor the module's lazy activation policy.
		const USE_ACTIVATION_POLICY = 1 << 1;
	}
}

bitflags::bitflags! {
	/// Flags accepted by [`Module::stop`](crate::Module::stop).
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
	pub struct StopOptions: u8 {
		/// Keep the persistent started flag set.
		const TRANSIENT = 1 << 0;
	}
}

bitflags::bitflags! {
	/// Durable per-module status bits.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
	pub struct ModuleStatus: u8 {
		/// The module was persistently started and resumes at launch.
		const STARTED = 1 << 0;
		/// The persistent start requested the lazy activation policy.
		const ACTIVATION_POLICY = 1 << 1;
	}
}
