//! Copy-on-write event distribution for the bramble module runtime.
//!
//! Layers, leaves first:
//! - [`SnapshotMap`]: concurrent map publishing whole immutable snapshots
//! - [`ListenerRegistry`]: identity-keyed `(listener, dispatcher)` sets per topic
//! - [`DispatchQueue`]: write-once capture of listener sets for one event occurrence
//! - [`DispatchManager`]: dedicated delivery thread with per-manager FIFO ordering

mod error;
mod listeners;
mod manager;
mod queue;
mod snapshot_map;

pub use error::DispatchError;
pub use listeners::{EventDispatcher, ListenerRegistry, ListenerSet, Registration, same_listener};
pub use manager::{DispatchHandle, DispatchManager, DispatchStats};
pub use queue::{DispatchQueue, DispatchReport};
pub use snapshot_map::SnapshotMap;
