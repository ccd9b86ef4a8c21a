//! Copy-on-write map with atomic snapshot publication.
//!
//! # Mental model
//!
//! * Readers pin an `Arc<BTreeMap<K, V>>` and resolve lookups against that immutable view.
//! * Writers take the single write mutex, clone the current map, mutate the clone and
//!   publish it with one atomic store.
//!
//! # Invariants
//!
//! * A pinned snapshot never changes after publication. Readers observe either the map
//!   before a write or the map after it, never a mix (see `tests::readers_never_observe_torn_writes`).
//! * An old snapshot stays alive and complete until its last reader drops it.
//! * Writers are serialized by the write mutex. The mutation is applied to whatever snapshot is
//!   current when the lock is acquired; there is no merge and no retry.
//!
//! # Concurrency & ordering
//!
//! * Reads are lock-free (`ArcSwap` load + immutable lookups).
//! * Writes cost O(n) in the current size because the whole backing store is cloned.
//! * Equality and ordering compare full snapshots, never partial state.

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

/// Concurrent ordered map whose writes publish whole new snapshots.
pub struct SnapshotMap<K, V> {
	current: ArcSwap<BTreeMap<K, V>>,
	write: Mutex<()>,
}

impl<K, V> Default for SnapshotMap<K, V> {
	fn default() -> Self {
		Self {
			current: ArcSwap::from_pointee(BTreeMap::new()),
			write: Mutex::new(()),
		}
	}
}

impl<K, V> SnapshotMap<K, V> {
	/// Creates an empty map.
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the current snapshot.
	///
	/// The returned map is immutable and stays valid across later writes.
	#[inline]
	pub fn snapshot(&self) -> Arc<BTreeMap<K, V>> {
		self.current.load_full()
	}

	/// Returns the number of entries in the current snapshot.
	pub fn len(&self) -> usize {
		self.current.load().len()
	}

	/// Returns true if the current snapshot is empty.
	pub fn is_empty(&self) -> bool {
		self.current.load().is_empty()
	}
}

impl<K, V> SnapshotMap<K, V>
where
	K: Ord + Clone,
	V: Clone,
{
	/// Looks up one value in the current snapshot.
	#[inline]
	pub fn get<Q>(&self, key: &Q) -> Option<V>
	where
		K: Borrow<Q>,
		Q: Ord + ?Sized,
	{
		self.current.load().get(key).cloned()
	}

	/// Returns true if the current snapshot holds `key`.
	pub fn contains_key<Q>(&self, key: &Q) -> bool
	where
		K: Borrow<Q>,
		Q: Ord + ?Sized,
	{
		self.current.load().contains_key(key)
	}

	/// Returns the keys of the current snapshot in order.
	pub fn keys(&self) -> Vec<K> {
		self.current.load().keys().cloned().collect()
	}

	/// Returns the values of the current snapshot in key order.
	pub fn values(&self) -> Vec<V> {
		self.current.load().values().cloned().collect()
	}

	/// Clones the current snapshot, applies `f` to the clone and publishes it.
	///
	/// Holds the write mutex only for the clone+mutate+publish step.
	pub fn modify<R>(&self, f: impl FnOnce(&mut BTreeMap<K, V>) -> R) -> R {
		let _write = self.write.lock();
		let mut next = (**self.current.load()).clone();
		let out = f(&mut next);
		self.current.store(Arc::new(next));
		out
	}

	/// Inserts one entry, returning the previous value for `key`.
	pub fn insert(&self, key: K, value: V) -> Option<V> {
		self.modify(|map| map.insert(key, value))
	}

	/// Removes one entry, returning its value.
	pub fn remove<Q>(&self, key: &Q) -> Option<V>
	where
		K: Borrow<Q>,
		Q: Ord + ?Sized,
	{
		if !self.contains_key(key) {
			return None;
		}
		self.modify(|map| map.remove(key))
	}

	/// Removes all entries.
	pub fn clear(&self) {
		let _write = self.write.lock();
		self.current.store(Arc::new(BTreeMap::new()));
	}
}

impl<K, V> Clone for SnapshotMap<K, V> {
	/// Creates an independent map starting from the same snapshot.
	fn clone(&self) -> Self {
		Self {
			current: ArcSwap::new(self.current.load_full()),
			write: Mutex::new(()),
		}
	}
}

impl<K, V> FromIterator<(K, V)> for SnapshotMap<K, V>
where
	K: Ord,
{
	fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
		Self {
			current: ArcSwap::from_pointee(iter.into_iter().collect()),
			write: Mutex::new(()),
		}
	}
}

impl<K, V> PartialEq for SnapshotMap<K, V>
where
	K: PartialEq,
	V: PartialEq,
{
	fn eq(&self, other: &Self) -> bool {
		*self.current.load_full() == *other.current.load_full()
	}
}

impl<K, V> Eq for SnapshotMap<K, V>
where
	K: Eq,
	V: Eq,
{
}

impl<K, V> PartialOrd for SnapshotMap<K, V>
where
	K: PartialOrd,
	V: PartialOrd,
{
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		self.current.load_full().partial_cmp(&other.current.load_full())
	}
}

impl<K, V> fmt::Debug for SnapshotMap<K, V>
where
	K: fmt::Debug,
	V: fmt::Debug,
{
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_map().entries(self.current.load().iter()).finish()
	}
}
