//! Simulation version numbers.
//!
//! Versions follow `MAJOR.MINOR.MAINTENANCE[-TESTTYPE.TESTNUMBER]`, e.g.
//! `1.2.0` or `1.2.3-rc.4`. A trailing `-brand` suffix from an older naming
//! scheme is tolerated by the parser and discarded.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::error::{MaintenanceError, Result};

/// Test type marking a release candidate.
pub const RELEASE_CANDIDATE: &str = "rc";

const VERSION_PATTERN: &str = r"^(\d+)\.(\d+)\.(\d+)(-([^.-]+)\.(\d+))?(-([^.-]+))?$";

fn version_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(VERSION_PATTERN).expect("version pattern is valid"))
}

/// A parsed simulation version.
///
/// `test_type` and `test_number` are either both present or both absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SimVersionRecord", into = "SimVersionRecord")]
pub struct SimVersion {
    major: u32,
    minor: u32,
    maintenance: u32,
    test: Option<(String, u32)>,
    build_timestamp: Option<String>,
}

impl SimVersion {
    /// A version without a test qualifier.
    pub fn new(major: u32, minor: u32, maintenance: u32) -> Self {
        Self {
            major,
            minor,
            maintenance,
            test: None,
            build_timestamp: None,
        }
    }

    /// Attach a test qualifier, e.g. `rc.3`.
    pub fn with_test(mut self, test_type: impl Into<String>, test_number: u32) -> Self {
        self.test = Some((test_type.into(), test_number));
        self
    }

    pub fn with_build_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.build_timestamp = Some(timestamp.into());
        self
    }

    /// Parse `MAJOR.MINOR.MAINTENANCE[-TESTTYPE.TESTNUMBER][-BRAND]`.
    ///
    /// # Errors
    ///
    /// - [`MaintenanceError::Parse`] when `text` does not match the grammar.
    pub fn parse(text: &str, build_timestamp: Option<String>) -> Result<Self> {
        let caps = version_regex()
            .captures(text)
            .ok_or_else(|| MaintenanceError::Parse(format!("invalid version string: {text:?}")))?;

        let number = |idx: usize| -> Result<u32> {
            caps[idx]
                .parse()
                .map_err(|e| MaintenanceError::Parse(format!("version {text:?}: {e}")))
        };

        let test = match (caps.get(5), caps.get(6)) {
            (Some(kind), Some(num)) => Some((
                kind.as_str().to_string(),
                num.as_str()
                    .parse()
                    .map_err(|e| MaintenanceError::Parse(format!("version {text:?}: {e}")))?,
            )),
            _ => None,
        };

        Ok(Self {
            major: number(1)?,
            minor: number(2)?,
            maintenance: number(3)?,
            test,
            build_timestamp,
        })
    }

    /// Version implied by a release branch name such as `1.9`.
    ///
    /// # Errors
    ///
    /// - [`MaintenanceError::Parse`] unless the name is exactly two
    ///   dot-separated integers.
    pub fn from_branch(branch: &str) -> Result<Self> {
        let bits: Vec<&str> = branch.split('.').collect();
        if bits.len() != 2 {
            return Err(MaintenanceError::Parse(format!(
                "invalid branch name for version: {branch:?}"
            )));
        }
        let component = |bit: &str| -> Result<u32> {
            if bit.is_empty() || !bit.bytes().all(|b| b.is_ascii_digit()) {
                return Err(MaintenanceError::Parse(format!(
                    "invalid branch name for version: {branch:?}"
                )));
            }
            bit.parse()
                .map_err(|e| MaintenanceError::Parse(format!("branch {branch:?}: {e}")))
        };
        Ok(Self::new(component(bits[0])?, component(bits[1])?, 0))
    }

    /// Compare by `(major, minor, maintenance)`, ignoring test qualifiers.
    pub fn compare_number(&self, other: &SimVersion) -> Ordering {
        (self.major, self.minor, self.maintenance).cmp(&(
            other.major,
            other.minor,
            other.maintenance,
        ))
    }

    /// `major >= 1` with no test qualifier.
    pub fn is_unpublished(&self) -> bool {
        self.major >= 1 && self.test.is_none()
    }

    pub fn is_release_candidate(&self) -> bool {
        self.test_type() == Some(RELEASE_CANDIDATE)
    }

    pub fn major(&self) -> u32 {
        self.major
    }

    pub fn minor(&self) -> u32 {
        self.minor
    }

    pub fn maintenance(&self) -> u32 {
        self.maintenance
    }

    pub fn test_type(&self) -> Option<&str> {
        self.test.as_ref().map(|(kind, _)| kind.as_str())
    }

    pub fn test_number(&self) -> Option<u32> {
        self.test.as_ref().map(|(_, number)| *number)
    }

    pub fn build_timestamp(&self) -> Option<&str> {
        self.build_timestamp.as_deref()
    }
}

impl fmt::Display for SimVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.maintenance)?;
        if let Some((kind, number)) = &self.test {
            write!(f, "-{kind}.{number}")?;
        }
        Ok(())
    }
}

impl FromStr for SimVersion {
    type Err = MaintenanceError;

    fn from_str(text: &str) -> Result<Self> {
        Self::parse(text, None)
    }
}

/// Persisted layout of a [`SimVersion`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SimVersionRecord {
    major: u32,
    minor: u32,
    maintenance: u32,
    #[serde(default)]
    test_type: Option<String>,
    #[serde(default)]
    test_number: Option<u32>,
    #[serde(default)]
    build_timestamp: Option<String>,
}

impl TryFrom<SimVersionRecord> for SimVersion {
    type Error = MaintenanceError;

    fn try_from(record: SimVersionRecord) -> Result<Self> {
        let test = match (record.test_type, record.test_number) {
            (Some(kind), Some(number)) => Some((kind, number)),
            (None, None) => None,
            _ => {
                return Err(MaintenanceError::Parse(
                    "testType and testNumber must be set together".to_string(),
                ))
            }
        };
        Ok(Self {
            major: record.major,
            minor: record.minor,
            maintenance: record.maintenance,
            test,
            build_timestamp: record.build_timestamp,
        })
    }
}

impl From<SimVersion> for SimVersionRecord {
    fn from(version: SimVersion) -> Self {
        let (test_type, test_number) = match version.test {
            Some((kind, number)) => (Some(kind), Some(number)),
            None => (None, None),
        };
        Self {
            major: version.major,
            minor: version.minor,
            maintenance: version.maintenance,
            test_type,
            test_number,
            build_timestamp: version.build_timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_version() {
        let v = SimVersion::parse("1.2.3", None).unwrap();
        assert_eq!((v.major(), v.minor(), v.maintenance()), (1, 2, 3));
        assert_eq!(v.test_type(), None);
        assert_eq!(v.test_number(), None);
    }

    #[test]
    fn test_parse_test_qualifier() {
        let v = SimVersion::parse("1.2.0-rc.5", Some("2024-01-01".to_string())).unwrap();
        assert_eq!(v.test_type(), Some("rc"));
        assert_eq!(v.test_number(), Some(5));
        assert_eq!(v.build_timestamp(), Some("2024-01-01"));
        assert!(v.is_release_candidate());
    }

    #[test]
    fn test_parse_ignores_brand_suffix() {
        let v = SimVersion::parse("1.3.0-dev.2-phetio", None).unwrap();
        assert_eq!(v.to_string(), "1.3.0-dev.2");

        let v = SimVersion::parse("1.3.0-phetio", None).unwrap();
        assert_eq!(v.to_string(), "1.3.0");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for text in ["", "1.2", "1.2.x", "v1.2.3", "1.2.3-rc.x", "1.2.3-a-b", "1.2.3 "] {
            assert!(
                matches!(SimVersion::parse(text, None), Err(MaintenanceError::Parse(_))),
                "{text:?} should not parse"
            );
        }
    }

    #[test]
    fn test_display_roundtrip() {
        for text in ["0.0.0", "1.2.3", "2.10.1-rc.12", "1.0.0-dev.1"] {
            let v: SimVersion = text.parse().unwrap();
            assert_eq!(v.to_string(), text);
            assert_eq!(SimVersion::parse(&v.to_string(), None).unwrap(), v);
        }
    }

    #[test]
    fn test_from_branch() {
        let v = SimVersion::from_branch("1.9").unwrap();
        assert_eq!(v, SimVersion::new(1, 9, 0));

        for name in ["1.9.2", "1", "master", "1.x", "1.", ".9", "+1.9"] {
            assert!(
                matches!(SimVersion::from_branch(name), Err(MaintenanceError::Parse(_))),
                "{name:?} should not be a release branch"
            );
        }
    }

    #[test]
    fn test_compare_number_ignores_test_fields() {
        let plain = SimVersion::new(1, 2, 0);
        let rc = SimVersion::new(1, 2, 0).with_test("rc", 5);
        assert_eq!(plain.compare_number(&rc), Ordering::Equal);
        assert_eq!(rc.compare_number(&plain), Ordering::Equal);
        assert_ne!(plain, rc);
    }

    #[test]
    fn test_compare_number_ordering() {
        let versions = [
            SimVersion::new(0, 9, 9),
            SimVersion::new(1, 0, 0),
            SimVersion::new(1, 0, 1).with_test("rc", 1),
            SimVersion::new(1, 1, 0),
            SimVersion::new(2, 0, 0),
        ];
        for (i, a) in versions.iter().enumerate() {
            for (j, b) in versions.iter().enumerate() {
                assert_eq!(a.compare_number(b), i.cmp(&j), "{a} vs {b}");
            }
        }
    }

    #[test]
    fn test_is_unpublished_literal_semantics() {
        assert!(SimVersion::new(1, 0, 0).is_unpublished());
        assert!(!SimVersion::new(1, 0, 0).with_test("rc", 1).is_unpublished());
        assert!(!SimVersion::new(0, 5, 0).is_unpublished());
    }

    #[test]
    fn test_serde_layout() {
        let v = SimVersion::new(1, 2, 3).with_test("rc", 4);
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "major": 1,
                "minor": 2,
                "maintenance": 3,
                "testType": "rc",
                "testNumber": 4,
                "buildTimestamp": null,
            })
        );
        let back: SimVersion = serde_json::from_value(json).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn test_serde_rejects_unpaired_test_fields() {
        let json = serde_json::json!({
            "major": 1,
            "minor": 2,
            "maintenance": 3,
            "testType": "rc",
            "testNumber": null,
        });
        assert!(serde_json::from_value::<SimVersion>(json).is_err());
    }
}
