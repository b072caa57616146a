use serde::Deserialize;
use std::path::PathBuf;
use url::Url;

/// Errors raised by [`Config::validate`]
#[derive(thiserror::Error, Debug)]
pub enum ValidationError {
    #[error("Source URL for {0} must use http or https")]
    InvalidSourceUrl(&'static str),

    #[error("Filesystem store base_dir cannot be empty")]
    EmptyBaseDir,

    #[error("Patient db requires at least one sheet")]
    NoPatientSheets,

    #[error("Patient db sheet {0} has an empty spreadsheet id or range")]
    IncompleteSheet(usize),

    #[error("Patient db api_key cannot be empty")]
    EmptyApiKey,
}

#[derive(Clone, Default, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum StoreType {
    Filesystem {
        base_dir: PathBuf,
    },
    #[default]
    Memory,
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Sources {
    /// Official case count page (HTML).
    pub official_url: Url,
    /// Per-state JSON feed; preferred over the HTML table when present.
    pub state_feed_url: Option<Url>,
    pub testing_url: Url,
    pub hospital_beds_url: Url,
    pub medical_colleges_url: Url,
    /// Previously materialized daily series, `{ "data": [...] }`.
    pub history_comparison_url: Option<Url>,
}

impl Sources {
    fn all(&self) -> Vec<(&'static str, &Url)> {
        let mut urls = vec![
            ("official_url", &self.official_url),
            ("testing_url", &self.testing_url),
            ("hospital_beds_url", &self.hospital_beds_url),
            ("medical_colleges_url", &self.medical_colleges_url),
        ];
        if let Some(url) = &self.state_feed_url {
            urls.push(("state_feed_url", url));
        }
        if let Some(url) = &self.history_comparison_url {
            urls.push(("history_comparison_url", url));
        }
        urls
    }
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Reference {
    pub path: PathBuf,
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Sheet {
    pub spreadsheet_id: String,
    pub range: String,
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct PatientDb {
    pub api_key: String,
    /// Ordered oldest to newest; later sheets win on conflicting patient ids.
    pub sheets: Vec<Sheet>,
    pub statewise: Option<Sheet>,
    pub base_url: Option<Url>,
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Annotation {
    pub url: Url,
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub store: StoreType,
    pub sources: Sources,
    pub reference: Reference,
    pub patient_db: Option<PatientDb>,
    pub annotation: Option<Annotation>,
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (name, url) in self.sources.all() {
            if !matches!(url.scheme(), "http" | "https") {
                return Err(ValidationError::InvalidSourceUrl(name));
            }
        }

        if let StoreType::Filesystem { base_dir } = &self.store
            && base_dir.as_os_str().is_empty()
        {
            return Err(ValidationError::EmptyBaseDir);
        }

        if let Some(patient_db) = &self.patient_db {
            if patient_db.api_key.is_empty() {
                return Err(ValidationError::EmptyApiKey);
            }
            if patient_db.sheets.is_empty() {
                return Err(ValidationError::NoPatientSheets);
            }
            for (idx, sheet) in patient_db.sheets.iter().chain(&patient_db.statewise).enumerate() {
                if sheet.spreadsheet_id.is_empty() || sheet.range.is_empty() {
                    return Err(ValidationError::IncompleteSheet(idx));
                }
            }
        }

        Ok(())
    }
}
