//! Module versions and version ranges.
//!
//! A [`Version`] is `major[.minor[.micro[.qualifier]]]`; omitted numeric parts are zero
//! and the qualifier compares as a plain string after the numeric parts.
//!
//! A [`VersionRange`] is either interval notation (`[1.0,2.0)`, `(1.0,2.0]`) or a bare
//! version meaning "at least this version".

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
	#[error("empty version")]
	Empty,
	#[error("invalid version component '{component}' in '{input}'")]
	Component { input: String, component: String },
	#[error("too many version components in '{0}'")]
	TooManyComponents(String),
	#[error("invalid version qualifier in '{0}'")]
	Qualifier(String),
	#[error("invalid version range '{0}'")]
	Range(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
	pub major: u32,
	pub minor: u32,
	pub micro: u32,
	pub qualifier: String,
}

impl Version {
	pub const fn new(major: u32, minor: u32, micro: u32) -> Self {
		Self {
			major,
			minor,
			micro,
			qualifier: String::new(),
		}
	}

	pub fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
		self.qualifier = qualifier.into();
		self
	}
}

impl FromStr for Version {
	type Err = VersionError;

	fn from_str(input: &str) -> Result<Self, Self::Err> {
		let trimmed = input.trim();
		if trimmed.is_empty() {
			return Err(VersionError::Empty);
		}

		let mut parts = trimmed.splitn(4, '.');
		let mut numbers = [0u32; 3];
		for slot in numbers.iter_mut() {
			let Some(part) = parts.next() else {
				break;
			};
			*slot = part.parse().map_err(|_| VersionError::Component {
				input: input.to_string(),
				component: part.to_string(),
			})?;
		}

		let qualifier = match parts.next() {
			Some("") => return Err(VersionError::Qualifier(input.to_string())),
			Some(qualifier) => qualifier,
			None => "",
		};
		if qualifier.contains('.') {
			return Err(VersionError::TooManyComponents(input.to_string()));
		}
		if !qualifier.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
			return Err(VersionError::Qualifier(input.to_string()));
		}

		let [major, minor, micro] = numbers;
		Ok(Version::new(major, minor, micro).with_qualifier(qualifier))
	}
}

impl TryFrom<String> for Version {
	type Error = VersionError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		value.parse()
	}
}

impl From<Version> for String {
	fn from(value: Version) -> Self {
		value.to_string()
	}
}

impl fmt::Display for Version {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}.{}.{}", self.major, self.minor, self.micro)?;
		if !self.qualifier.is_empty() {
			write!(f, ".{}", self.qualifier)?;
		}
		Ok(())
	}
}

/// Interval of acceptable versions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionRange {
	pub floor: Version,
	pub floor_inclusive: bool,
	/// `None` means unbounded.
	pub ceiling: Option<Version>,
	pub ceiling_inclusive: bool,
}

impl VersionRange {
	/// Range accepting every version.
	pub fn any() -> Self {
		Self::at_least(Version::default())
	}

	pub fn at_least(floor: Version) -> Self {
		Self {
			floor,
			floor_inclusive: true,
			ceiling: None,
			ceiling_inclusive: false,
		}
	}

	pub fn includes(&self, version: &Version) -> bool {
		let above_floor = if self.floor_inclusive { *version >= self.floor } else { *version > self.floor };
		let below_ceiling = match &self.ceiling {
			None => true,
			Some(ceiling) if self.ceiling_inclusive => version <= ceiling,
			Some(ceiling) => version < ceiling,
		};
		above_floor && below_ceiling
	}
}

impl Default for VersionRange {
	fn default() -> Self {
		Self::any()
	}
}

impl FromStr for VersionRange {
	type Err = VersionError;

	fn from_str(input: &str) -> Result<Self, Self::Err> {
		let trimmed = input.trim();
		let floor_inclusive = match trimmed.chars().next() {
			Some('[') => true,
			Some('(') => false,
			_ => return trimmed.parse().map(Self::at_least),
		};
		let ceiling_inclusive = match trimmed.chars().last() {
			Some(']') => true,
			Some(')') => false,
			_ => return Err(VersionError::Range(input.to_string())),
		};

		let inner = &trimmed[1..trimmed.len() - 1];
		let Some((floor, ceiling)) = inner.split_once(',') else {
			return Err(VersionError::Range(input.to_string()));
		};
		let floor: Version = floor.parse()?;
		let ceiling: Version = ceiling.parse()?;
		if ceiling < floor {
			return Err(VersionError::Range(input.to_string()));
		}

		Ok(Self {
			floor,
			floor_inclusive,
			ceiling: Some(ceiling),
			ceiling_inclusive,
		})
	}
}

impl TryFrom<String> for VersionRange {
	type Error = VersionError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		value.parse()
	}
}

impl From<VersionRange> for String {
	fn from(value: VersionRange) -> Self {
		value.to_string()
	}
}

impl fmt::Display for VersionRange {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.ceiling {
			None => write!(f, "{}", self.floor),
			Some(ceiling) => write!(
				f,
				"{}{},{}{}",
				if self.floor_inclusive { '[' } else { '(' },
				self.floor,
				ceiling,
				if self.ceiling_inclusive { ']' } else { ')' }
			),
		}
	}
}
