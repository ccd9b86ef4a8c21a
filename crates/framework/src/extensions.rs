//! Extension registry fed by resolved modules.
//!
//! # Ordering contract
//!
//! Extensions of one point are sorted ascending by contributing module name compared
//! case-insensitively. Extensions from the same contributor keep their document order.
//! Downstream consumers register views and listeners in this order, so it never depends
//! on resolution timing.
//!
//! # Lifecycle
//!
//! Contributions are added when their module resolves and removed when it unresolves
//! or uninstalls. Every change is announced as an [`ExtensionDelta`] to listeners of the
//! affected point, delivered on the runtime's dispatch thread.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use bramble_eventmgr::{DispatchHandle, DispatchQueue, EventDispatcher, ListenerRegistry, SnapshotMap};

use crate::descriptor::ExtensionContribution;
use crate::state::ModuleId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
	pub point: String,
	pub id: Option<String>,
	/// Symbolic name of the contributing module.
	pub contributor: String,
	pub contributor_id: ModuleId,
	pub attributes: BTreeMap<String, String>,
}

/// Read access to extensions, as consumed by UI and registry layers.
pub trait ExtensionReader: Send + Sync {
	/// Extensions contributed to the fully qualified `point`, in contract order.
	fn extensions_for(&self, point: &str) -> Vec<Extension>;

	/// Extensions for point `point_name` declared by plugin `plugin_id`.
	fn extensions(&self, plugin_id: &str, point_name: &str) -> Vec<Extension> {
		self.extensions_for(&format!("{plugin_id}.{point_name}"))
	}

	/// Every point that currently has at least one extension.
	fn extension_points(&self) -> Vec<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtensionDeltaKind {
	Added,
	Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionDelta {
	pub kind: ExtensionDeltaKind,
	pub point: String,
	pub extensions: Vec<Extension>,
}

pub trait ExtensionListener: Send + Sync {
	fn extensions_changed(&self, delta: &ExtensionDelta) -> Result<(), String>;
}

impl<F> ExtensionListener for F
where
	F: Fn(&ExtensionDelta) -> Result<(), String> + Send + Sync,
{
	fn extensions_changed(&self, delta: &ExtensionDelta) -> Result<(), String> {
		self(delta)
	}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NotifyExtension;

impl EventDispatcher<dyn ExtensionListener, ExtensionDelta> for NotifyExtension {
	fn dispatch(&self, listener: &dyn ExtensionListener, delta: &ExtensionDelta) -> Result<(), String> {
		listener.extensions_changed(delta)
	}
}

fn cmp_contributor(a: &Extension, b: &Extension) -> Ordering {
	let lower = |s: &str| s.chars().flat_map(char::to_lowercase).collect::<Vec<_>>();
	lower(&a.contributor)
		.cmp(&lower(&b.contributor))
		.then_with(|| a.contributor_id.cmp(&b.contributor_id))
}

pub struct ExtensionRegistry {
	points: SnapshotMap<String, Arc<[Extension]>>,
	listeners: ListenerRegistry<String, dyn ExtensionListener, ExtensionDelta>,
	delivery: DispatchHandle,
}

impl ExtensionRegistry {
	pub fn new(delivery: DispatchHandle) -> Self {
		Self {
			points: SnapshotMap::new(),
			listeners: ListenerRegistry::new(),
			delivery,
		}
	}

	pub fn add_listener(&self, point: impl Into<String>, listener: Arc<dyn ExtensionListener>) -> bool {
		self.listeners.add(point.into(), listener, Arc::new(NotifyExtension))
	}

	pub fn remove_listener(&self, point: &str, listener: &Arc<dyn ExtensionListener>) -> bool {
		self.listeners.remove(&point.to_string(), listener)
	}

	/// Publishes `contributions` from one module. Replaces anything it contributed before.
	pub fn add_contributions(&self, contributor_id: ModuleId, contributor: &str, contributions: &[ExtensionContribution]) {
		if contributions.is_empty() {
			return;
		}

		let mut by_point: BTreeMap<&str, Vec<Extension>> = BTreeMap::new();
		for contribution in contributions {
			by_point.entry(&contribution.point).or_default().push(Extension {
				point: contribution.point.clone(),
				id: contribution.id.clone(),
				contributor: contributor.to_string(),
				contributor_id,
				attributes: contribution.attributes.clone(),
			});
		}

		self.points.modify(|points| {
			for (point, added) in &by_point {
				let mut merged: Vec<Extension> = points
					.get(*point)
					.map(|current| current.iter().filter(|e| e.contributor_id != contributor_id).cloned().collect())
					.unwrap_or_default();
				merged.extend(added.iter().cloned());
				merged.sort_by(cmp_contributor);
				points.insert((*point).to_string(), Arc::from(merged));
			}
		});

		for (point, added) in by_point {
			tracing::debug!(point, contributor, count = added.len(), "extensions.added");
			self.announce(ExtensionDelta {
				kind: ExtensionDeltaKind::Added,
				point: point.to_string(),
				extensions: added,
			});
		}
	}

	/// Withdraws every extension contributed by `contributor_id`.
	pub fn remove_contributions(&self, contributor_id: ModuleId) {
		let removed: Vec<(String, Vec<Extension>)> = self.points.modify(|points| {
			let mut removed = Vec::new();
			let keys: Vec<String> = points.keys().cloned().collect();
			for point in keys {
				let Some(current) = points.get(&point).cloned() else {
					continue;
				};
				let (gone, kept): (Vec<Extension>, Vec<Extension>) = current.iter().cloned().partition(|e| e.contributor_id == contributor_id);
				if gone.is_empty() {
					continue;
				}
				if kept.is_empty() {
					points.remove(&point);
				} else {
					points.insert(point.clone(), Arc::from(kept));
				}
				removed.push((point, gone));
			}
			removed
		});

		for (point, extensions) in removed {
			tracing::debug!(point = %point, count = extensions.len(), "extensions.removed");
			self.announce(ExtensionDelta {
				kind: ExtensionDeltaKind::Removed,
				point,
				extensions,
			});
		}
	}

	fn announce(&self, delta: ExtensionDelta) {
		let listeners = self.listeners.listeners(&delta.point);
		if listeners.is_empty() {
			return;
		}
		let mut queue = DispatchQueue::new(self.delivery.clone());
		if queue.queue_registered(listeners).is_err() {
			return;
		}
		if let Err(error) = queue.dispatch_async(delta) {
			tracing::debug!(%error, "extensions.delta.dropped");
		}
	}
}

impl ExtensionReader for ExtensionRegistry {
	fn extensions_for(&self, point: &str) -> Vec<Extension> {
		self.points.get(point).map(|e| e.to_vec()).unwrap_or_default()
	}

	fn extension_points(&self) -> Vec<String> {
		self.points.keys()
	}
}
