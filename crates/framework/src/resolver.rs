//! Requirement resolution.
//!
//! The resolver works on a snapshot of installed modules and never mutates them; the
//! runtime applies the resulting [`Plan`].
//!
//! Resolution is optimistic so cycles resolve: every INSTALLED module starts out viable,
//! then modules with an unsatisfied requirement or a missing native path are pruned until
//! nothing changes. A requirement is satisfied by a module of the same symbolic name
//! whose version is in range and which is either already resolved or still viable.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use crate::descriptor::Requirement;
use crate::error::{LifecycleError, ResolveErrorKind};
use crate::module::ModuleRef;
use crate::state::{ModuleId, ModuleState};
use crate::version::Version;

/// One unsatisfied constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveCause {
	/// No module with this symbolic name is installed.
	Missing(Requirement),
	/// The name exists but no installed version is in range.
	VersionMismatch { requirement: Requirement, available: Vec<Version> },
	/// Matching providers exist but none of them can resolve.
	Unresolvable(Requirement),
	NativePath(PathBuf),
}

impl fmt::Display for ResolveCause {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Missing(req) => write!(f, "missing requirement {req}"),
			Self::VersionMismatch { requirement, available } => {
				let versions: Vec<String> = available.iter().map(Version::to_string).collect();
				write!(
					f,
					"requirement {requirement} not met by installed version(s) {}",
					versions.join(" ")
				)
			}
			Self::Unresolvable(req) => write!(f, "requirement {req} only provided by unresolvable modules"),
			Self::NativePath(path) => write!(f, "native code path {} not found", path.display()),
		}
	}
}

/// Builds the error reported for `module` from its causes.
pub fn resolve_error(module: &str, causes: &[ResolveCause]) -> LifecycleError {
	let kind = if causes.iter().any(|c| matches!(c, ResolveCause::NativePath(_))) {
		ResolveErrorKind::NativeCode
	} else {
		ResolveErrorKind::Unresolved
	};
	LifecycleError::Resolve {
		module: module.to_string(),
		kind,
		causes: causes.iter().map(ToString::to_string).collect(),
	}
}

/// Outcome of one resolution pass.
#[derive(Debug, Default)]
pub struct Plan {
	/// INSTALLED modules to move to RESOLVED, ascending by id.
	pub resolvable: Vec<ModuleId>,
	/// Targets that cannot resolve, with every unsatisfied constraint.
	pub failures: BTreeMap<ModuleId, Vec<ResolveCause>>,
}

struct Candidate {
	id: ModuleId,
	name: String,
	version: Version,
	requirements: Vec<Requirement>,
	native_paths: Vec<PathBuf>,
	state: ModuleState,
}

impl Candidate {
	fn provides(&self, requirement: &Requirement) -> bool {
		self.name == requirement.symbolic_name && requirement.range.includes(&self.version)
	}
}

/// Plans resolution of `targets` (and whatever they need) against `modules`.
pub fn plan(modules: &[ModuleRef], targets: &[ModuleId]) -> Plan {
	let candidates: Vec<Candidate> = modules
		.iter()
		.filter(|m| m.state() != ModuleState::Uninstalled)
		.map(|m| {
			let descriptor = m.descriptor();
			Candidate {
				id: m.id(),
				name: descriptor.symbolic_name.clone(),
				version: descriptor.version.clone(),
				requirements: descriptor.requirements.clone(),
				native_paths: descriptor.native_paths.clone(),
				state: m.state(),
			}
		})
		.collect();

	let mut viable: BTreeSet<ModuleId> = candidates.iter().filter(|c| c.state == ModuleState::Installed).map(|c| c.id).collect();
	let mut causes: BTreeMap<ModuleId, Vec<ResolveCause>> = BTreeMap::new();

	loop {
		let mut pruned = Vec::new();
		for candidate in candidates.iter().filter(|c| viable.contains(&c.id)) {
			let found = unsatisfied(candidate, &candidates, &viable);
			if !found.is_empty() {
				pruned.push((candidate.id, found));
			}
		}
		if pruned.is_empty() {
			break;
		}
		for (id, found) in pruned {
			viable.remove(&id);
			causes.insert(id, found);
		}
	}

	// Resolve the targets plus the viable providers they pull in.
	let by_id: BTreeMap<ModuleId, &Candidate> = candidates.iter().map(|c| (c.id, c)).collect();
	let mut plan = Plan::default();
	let mut selected = BTreeSet::new();
	let mut pending: Vec<ModuleId> = Vec::new();
	for id in targets {
		if viable.contains(id) {
			pending.push(*id);
		} else if let Some(found) = causes.get(id) {
			plan.failures.insert(*id, found.clone());
		}
	}

	while let Some(id) = pending.pop() {
		if !selected.insert(id) {
			continue;
		}
		let Some(candidate) = by_id.get(&id) else {
			continue;
		};
		for requirement in &candidate.requirements {
			let already = candidates.iter().any(|c| c.id != id && c.state.is_resolved() && c.provides(requirement));
			if already {
				continue;
			}
			let provider = candidates
				.iter()
				.filter(|c| c.id != id && viable.contains(&c.id) && c.provides(requirement))
				.max_by(|a, b| a.version.cmp(&b.version).then_with(|| b.id.cmp(&a.id)));
			if let Some(provider) = provider {
				pending.push(provider.id);
			}
		}
	}

	plan.resolvable = selected.into_iter().collect();
	plan
}

fn unsatisfied(candidate: &Candidate, all: &[Candidate], viable: &BTreeSet<ModuleId>) -> Vec<ResolveCause> {
	let mut found = Vec::new();
	for requirement in &candidate.requirements {
		let named: Vec<&Candidate> = all.iter().filter(|c| c.id != candidate.id && c.name == requirement.symbolic_name).collect();
		if named.is_empty() {
			found.push(ResolveCause::Missing(requirement.clone()));
			continue;
		}
		let in_range: Vec<&&Candidate> = named.iter().filter(|c| requirement.range.includes(&c.version)).collect();
		if in_range.is_empty() {
			found.push(ResolveCause::VersionMismatch {
				requirement: requirement.clone(),
				available: named.iter().map(|c| c.version.clone()).collect(),
			});
			continue;
		}
		if !in_range.iter().any(|c| c.state.is_resolved() || viable.contains(&c.id)) {
			found.push(ResolveCause::Unresolvable(requirement.clone()));
		}
	}
	for path in &candidate.native_paths {
		if !path.exists() {
			found.push(ResolveCause::NativePath(path.clone()));
		}
	}
	found
}
