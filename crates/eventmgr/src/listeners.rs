//! Topic-keyed listener registrations stored in a [`SnapshotMap`].
//!
//! Registrations are identity-keyed: two `Arc`s pointing at the same listener are the
//! same registration, two equal-but-distinct listeners are not. Every mutation publishes
//! a new snapshot, so a [`ListenerSet`] captured for one event keeps its membership even
//! while listeners are added or removed concurrently.

use std::fmt;
use std::sync::Arc;

use crate::SnapshotMap;

/// Strategy that delivers one event to one listener.
///
/// Failures are reported as plain messages and never abort delivery to other listeners.
pub trait EventDispatcher<L: ?Sized, E>: Send + Sync {
	fn dispatch(&self, listener: &L, event: &E) -> Result<(), String>;
}

impl<L, E, F> EventDispatcher<L, E> for F
where
	L: ?Sized,
	F: Fn(&L, &E) -> Result<(), String> + Send + Sync,
{
	fn dispatch(&self, listener: &L, event: &E) -> Result<(), String> {
		self(listener, event)
	}
}

/// Returns true if both handles point at the same listener allocation.
#[inline]
pub fn same_listener<L: ?Sized>(a: &Arc<L>, b: &Arc<L>) -> bool {
	std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// One `(listener, dispatcher)` pair.
pub struct Registration<L: ?Sized, E> {
	listener: Arc<L>,
	dispatcher: Arc<dyn EventDispatcher<L, E>>,
}

impl<L: ?Sized, E> Clone for Registration<L, E> {
	fn clone(&self) -> Self {
		Self {
			listener: Arc::clone(&self.listener),
			dispatcher: Arc::clone(&self.dispatcher),
		}
	}
}

impl<L: ?Sized, E> Registration<L, E> {
	pub fn new(listener: Arc<L>, dispatcher: Arc<dyn EventDispatcher<L, E>>) -> Self {
		Self { listener, dispatcher }
	}

	pub fn listener(&self) -> &Arc<L> {
		&self.listener
	}

	pub fn dispatcher(&self) -> &Arc<dyn EventDispatcher<L, E>> {
		&self.dispatcher
	}
}

impl<L: ?Sized, E> fmt::Debug for Registration<L, E> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Registration").field("listener", &Arc::as_ptr(&self.listener).cast::<()>()).finish()
	}
}

/// Immutable set of registrations for one topic, in registration order.
pub struct ListenerSet<L: ?Sized, E> {
	entries: Arc<[Registration<L, E>]>,
}

impl<L: ?Sized, E> Clone for ListenerSet<L, E> {
	fn clone(&self) -> Self {
		Self {
			entries: Arc::clone(&self.entries),
		}
	}
}

impl<L: ?Sized, E> Default for ListenerSet<L, E> {
	fn default() -> Self {
		Self { entries: Arc::from([]) }
	}
}

impl<L: ?Sized, E> fmt::Debug for ListenerSet<L, E> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_list().entries(self.entries.iter()).finish()
	}
}

impl<L: ?Sized, E> ListenerSet<L, E> {
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn iter(&self) -> std::slice::Iter<'_, Registration<L, E>> {
		self.entries.iter()
	}

	/// Returns true if `listener` is registered in this set.
	pub fn contains(&self, listener: &Arc<L>) -> bool {
		self.entries.iter().any(|r| same_listener(&r.listener, listener))
	}

	fn position(&self, listener: &Arc<L>) -> Option<usize> {
		self.entries.iter().position(|r| same_listener(&r.listener, listener))
	}

	fn with_entries(entries: Vec<Registration<L, E>>) -> Self {
		Self { entries: Arc::from(entries) }
	}
}

impl<'a, L: ?Sized, E> IntoIterator for &'a ListenerSet<L, E> {
	type Item = &'a Registration<L, E>;
	type IntoIter = std::slice::Iter<'a, Registration<L, E>>;

	fn into_iter(self) -> Self::IntoIter {
		self.entries.iter()
	}
}

/// Concurrent registry of listener sets keyed by topic.
pub struct ListenerRegistry<T, L: ?Sized, E> {
	topics: SnapshotMap<T, ListenerSet<L, E>>,
}

impl<T, L: ?Sized, E> Default for ListenerRegistry<T, L, E> {
	fn default() -> Self {
		Self { topics: SnapshotMap::new() }
	}
}

impl<T, L, E> ListenerRegistry<T, L, E>
where
	T: Ord + Clone,
	L: ?Sized,
{
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers `listener` under `topic`.
	///
	/// Returns `true` for a new registration. Re-registering the same listener keeps its
	/// position and replaces its dispatcher.
	pub fn add(&self, topic: T, listener: Arc<L>, dispatcher: Arc<dyn EventDispatcher<L, E>>) -> bool {
		self.topics.modify(|topics| {
			let current = topics.get(&topic).cloned().unwrap_or_default();
			let mut entries = current.entries.to_vec();
			let added = match current.position(&listener) {
				Some(idx) => {
					entries[idx] = Registration::new(listener, dispatcher);
					false
				}
				None => {
					entries.push(Registration::new(listener, dispatcher));
					true
				}
			};
			topics.insert(topic, ListenerSet::with_entries(entries));
			added
		})
	}

	/// Removes `listener` from `topic`. Empty topics are dropped.
	pub fn remove(&self, topic: &T, listener: &Arc<L>) -> bool {
		if !self.listeners(topic).contains(listener) {
			return false;
		}
		self.topics.modify(|topics| {
			let Some(current) = topics.get(topic).cloned() else {
				return false;
			};
			let Some(idx) = current.position(listener) else {
				return false;
			};
			let mut entries = current.entries.to_vec();
			entries.remove(idx);
			if entries.is_empty() {
				topics.remove(topic);
			} else {
				topics.insert(topic.clone(), ListenerSet::with_entries(entries));
			}
			true
		})
	}

	/// Removes `listener` from every topic, returning how many registrations were dropped.
	pub fn remove_everywhere(&self, listener: &Arc<L>) -> usize {
		self.topics.modify(|topics| {
			let mut removed = 0;
			let keys: Vec<T> = topics.keys().cloned().collect();
			for key in keys {
				let Some(current) = topics.get(&key).cloned() else {
					continue;
				};
				let Some(idx) = current.position(listener) else {
					continue;
				};
				removed += 1;
				let mut entries = current.entries.to_vec();
				entries.remove(idx);
				if entries.is_empty() {
					topics.remove(&key);
				} else {
					topics.insert(key, ListenerSet::with_entries(entries));
				}
			}
			removed
		})
	}

	/// Returns the listener set snapshot for `topic`. Missing topics yield an empty set.
	pub fn listeners(&self, topic: &T) -> ListenerSet<L, E> {
		self.topics.get(topic).unwrap_or_default()
	}

	/// Returns every topic that currently has listeners.
	pub fn topics(&self) -> Vec<T> {
		self.topics.keys()
	}

	/// Drops every registration under `topic`.
	pub fn clear_topic(&self, topic: &T) {
		self.topics.remove(topic);
	}

	/// Drops every registration.
	pub fn clear(&self) {
		self.topics.clear();
	}

	/// Returns the total number of registrations across topics.
	pub fn len(&self) -> usize {
		self.topics.snapshot().values().map(ListenerSet::len).sum()
	}

	pub fn is_empty(&self) -> bool {
		self.topics.is_empty()
	}
}
