/// Errors raised by dispatch queues and managers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
	/// The queue was already dispatched and became read-only.
	#[error("dispatch queue already dispatched; no further listeners can be queued")]
	AlreadyDispatched,

	/// The manager's delivery thread has shut down.
	#[error("dispatch manager '{name}' is closed")]
	ManagerClosed { name: String },
}
