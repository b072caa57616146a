//! Reference dataset for the foreign national correction.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::path::Path;

#[derive(thiserror::Error, Debug)]
pub enum ReferenceError {
    #[error("could not read reference dataset: {0}")]
    Io(#[from] io::Error),
    #[error("could not parse YAML reference dataset: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("could not parse JSON reference dataset: {0}")]
    Json(#[from] serde_json::Error),
}

/// Last known good count of confirmed foreign nationals per region, versioned
/// and timestamped so that the correction can be audited and updated without
/// touching code.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ForeignCaseReference {
    pub version: String,
    pub as_of: Option<DateTime<Utc>>,
    #[serde(default)]
    pub foreign: BTreeMap<String, i64>,
}

impl ForeignCaseReference {
    pub fn new<V: Into<String>>(version: V, foreign: BTreeMap<String, i64>) -> Self {
        ForeignCaseReference {
            version: version.into(),
            as_of: None,
            foreign,
        }
    }

    /// Loads a dataset from YAML, or JSON when the file has a `.json` extension.
    pub fn from_file(path: &Path) -> Result<Self, ReferenceError> {
        let file = File::open(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let reference = if is_json {
            serde_json::from_reader(file)?
        } else {
            serde_yaml::from_reader(file)?
        };
        Ok(reference)
    }

    pub fn foreign_cases(&self, location: &str) -> Option<i64> {
        self.foreign.get(location.trim()).copied()
    }

    /// Splits a combined confirmed count of `location` into
    /// `(domestic, foreign)`, keeping their sum unchanged. Regions absent from
    /// the reference have no foreign cases.
    pub fn split(&self, location: &str, confirmed: i64) -> (i64, i64) {
        match self.foreign_cases(location) {
            Some(foreign) => (confirmed - foreign, foreign),
            None => (confirmed, 0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp_file(suffix: &str, s: &str) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::Builder::new()
            .suffix(suffix)
            .tempfile()
            .expect("create temp file");
        write!(tmp, "{}", s).expect("write reference");
        tmp
    }

    #[test]
    fn test_split_present_region() {
        let reference =
            ForeignCaseReference::new("test", BTreeMap::from([("Haryana".to_string(), 14)]));
        assert_eq!(reference.split("Haryana", 50), (36, 14));
        assert_eq!(reference.split(" Haryana ", 50), (36, 14));
    }

    #[test]
    fn test_split_absent_region() {
        let reference = ForeignCaseReference::default();
        assert_eq!(reference.split("Goa", 5), (5, 0));
    }

    #[test]
    fn test_load_yaml() {
        let tmp = write_tmp_file(
            ".yaml",
            r#"
            version: "v1"
            as_of: "2020-03-31T14:30:00Z"
            foreign:
                Kerala: 8
                Tamil Nadu: 6
            "#,
        );
        let reference = ForeignCaseReference::from_file(tmp.path()).unwrap();
        assert_eq!(reference.version, "v1");
        assert!(reference.as_of.is_some());
        assert_eq!(reference.foreign_cases("Tamil Nadu"), Some(6));
    }

    #[test]
    fn test_load_json() {
        let tmp = write_tmp_file(".json", r#"{"version":"v2","foreign":{"Delhi":1}}"#);
        let reference = ForeignCaseReference::from_file(tmp.path()).unwrap();
        assert_eq!(reference.version, "v2");
        assert_eq!(reference.as_of, None);
        assert_eq!(reference.foreign_cases("Delhi"), Some(1));
    }

    #[test]
    fn test_bundled_reference_parses() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("data/foreign_cases_reference.yaml");
        let reference = ForeignCaseReference::from_file(&path).unwrap();
        assert_eq!(reference.foreign_cases("Haryana"), Some(14));
        assert_eq!(reference.foreign_cases("Goa"), None);
    }
}
