//! Administrative permission checks consulted at every lifecycle entry point.

use std::sync::Arc;

use crate::Module;

/// Capability a caller needs for a lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdminPermission {
	/// `start` and `stop`.
	Execute,
	/// `install`, `update` and `uninstall`.
	Lifecycle,
	/// `resolve` and `refresh`.
	Resolve,
	/// Reading persisted status and descriptors through a module context.
	Metadata,
}

/// Decides whether an operation on `module` is allowed.
pub trait PermissionChecker: Send + Sync {
	fn check(&self, module: &Module, permission: AdminPermission) -> Result<(), String>;
}

impl<F> PermissionChecker for F
where
	F: Fn(&Module, AdminPermission) -> Result<(), String> + Send + Sync,
{
	fn check(&self, module: &Module, permission: AdminPermission) -> Result<(), String> {
		self(module, permission)
	}
}

/// Grants everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PermissionChecker for AllowAll {
	fn check(&self, _module: &Module, _permission: AdminPermission) -> Result<(), String> {
		Ok(())
	}
}

pub(crate) fn allow_all() -> Arc<dyn PermissionChecker> {
	Arc::new(AllowAll)
}
