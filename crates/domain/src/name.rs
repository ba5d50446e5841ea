//! Hierarchical device names.
//!
//! A [`DeviceName`] is a non-empty sequence of segments written with dots
//! (`motion.drive`). Hubs resolve the first segment to a child and hand the
//! rest of the name to that child.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ControlError;

/// Separator between name segments.
pub const SEPARATOR: char = '.';

/// Dotted, hierarchical device name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceName {
    segments: Vec<String>,
}

impl DeviceName {
    /// Parse a dotted name, rejecting empty names and empty segments.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::InvalidName`] when a segment is empty.
    pub fn parse(raw: &str) -> Result<Self, ControlError> {
        if raw.is_empty() {
            return Err(ControlError::InvalidName(raw.to_string()));
        }
        let segments: Vec<String> = raw.split(SEPARATOR).map(str::to_string).collect();
        if segments.iter().any(|segment| segment.trim().is_empty()) {
            return Err(ControlError::InvalidName(raw.to_string()));
        }
        Ok(Self { segments })
    }

    /// Build a single-segment name.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::InvalidName`] for an empty token or one
    /// containing the separator.
    pub fn single(token: &str) -> Result<Self, ControlError> {
        if token.trim().is_empty() || token.contains(SEPARATOR) {
            return Err(ControlError::InvalidName(token.to_string()));
        }
        Ok(Self {
            segments: vec![token.to_string()],
        })
    }

    /// The leading segment.
    #[must_use]
    pub fn first(&self) -> &str {
        &self.segments[0]
    }

    /// Everything after the leading segment, if anything.
    #[must_use]
    pub fn rest(&self) -> Option<Self> {
        if self.segments.len() > 1 {
            Some(Self {
                segments: self.segments[1..].to_vec(),
            })
        } else {
            None
        }
    }

    /// Append `other` below this name.
    #[must_use]
    pub fn join(&self, other: &Self) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(other.segments.iter().cloned());
        Self { segments }
    }

    #[must_use]
    pub fn is_single(&self) -> bool {
        self.segments.len() == 1
    }

    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl fmt::Display for DeviceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, segment) in self.segments.iter().enumerate() {
            if index > 0 {
                write!(f, "{SEPARATOR}")?;
            }
            f.write_str(segment)?;
        }
        Ok(())
    }
}

impl FromStr for DeviceName {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for DeviceName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DeviceName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_parse_dotted_name_into_segments() {
        let name = DeviceName::parse("motion.drive").unwrap();
        assert_eq!(name.segments(), ["motion", "drive"]);
        assert_eq!(name.first(), "motion");
        assert!(!name.is_single());
    }

    #[test]
    fn should_roundtrip_through_display() {
        let name: DeviceName = "a.b.c".parse().unwrap();
        assert_eq!(name.to_string(), "a.b.c");
    }

    #[test]
    fn should_reject_empty_segments() {
        assert!(DeviceName::parse("").is_err());
        assert!(DeviceName::parse("a..b").is_err());
        assert!(DeviceName::parse(".a").is_err());
    }

    #[test]
    fn should_reject_separator_in_single_token() {
        assert!(matches!(
            DeviceName::single("a.b"),
            Err(ControlError::InvalidName(_))
        ));
    }

    #[test]
    fn should_split_rest_after_first_segment() {
        let name = DeviceName::parse("hub.motion.drive").unwrap();
        assert_eq!(name.rest().unwrap().to_string(), "motion.drive");
        assert!(DeviceName::parse("leaf").unwrap().rest().is_none());
    }

    #[test]
    fn should_join_names() {
        let parent = DeviceName::single("motion").unwrap();
        let child = DeviceName::single("drive").unwrap();
        assert_eq!(parent.join(&child).to_string(), "motion.drive");
    }

    #[test]
    fn should_serialize_as_dotted_string() {
        let name = DeviceName::parse("motion.drive").unwrap();
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, "\"motion.drive\"");
        let back: DeviceName = serde_json::from_str(&json).unwrap();
        assert_eq!(back, name);
    }
}
