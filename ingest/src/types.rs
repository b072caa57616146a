use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::timestamp::iso_millis;

/// Location name of the synthetic region absorbing the difference between a
/// stated grand total and the sum of per-region rows.
pub const UNKNOWN_LOCATION: &str = "unknown";

/// Case counts of one administrative region.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionalCaseRecord {
    #[serde(rename = "loc")]
    pub location: String,
    #[serde(default)]
    pub confirmed_cases_indian: i64,
    #[serde(default)]
    pub confirmed_cases_foreign: i64,
    #[serde(default)]
    pub discharged: i64,
    #[serde(default)]
    pub deaths: i64,
    /// Always `confirmed_cases_indian + confirmed_cases_foreign`.
    #[serde(default)]
    pub total_confirmed: i64,
}

impl RegionalCaseRecord {
    pub fn new<L: Into<String>>(
        location: L,
        confirmed_cases_indian: i64,
        confirmed_cases_foreign: i64,
        discharged: i64,
        deaths: i64,
    ) -> Self {
        RegionalCaseRecord {
            location: location.into(),
            confirmed_cases_indian,
            confirmed_cases_foreign,
            discharged,
            deaths,
            total_confirmed: confirmed_cases_indian + confirmed_cases_foreign,
        }
    }

    /// The synthetic region for cases whose location was not identified.
    pub fn unidentified(count: i64) -> Self {
        RegionalCaseRecord::new(UNKNOWN_LOCATION, count, 0, 0, 0)
    }

    pub fn is_unidentified(&self) -> bool {
        self.location == UNKNOWN_LOCATION
    }

    /// Recomputes the derived total, e.g. after deserializing an older snapshot.
    pub fn normalized(mut self) -> Self {
        self.total_confirmed = self.confirmed_cases_indian + self.confirmed_cases_foreign;
        self
    }
}

/// Regional records as published at one origin update. Identified by its
/// origin timestamp and never modified once written.
#[derive(Clone, Debug, PartialEq)]
pub struct CaseCountSnapshot {
    pub origin_timestamp: DateTime<Utc>,
    pub records: Vec<RegionalCaseRecord>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseCountSummary {
    pub total: i64,
    pub confirmed_cases_indian: i64,
    pub confirmed_cases_foreign: i64,
    pub discharged: i64,
    pub deaths: i64,
    #[serde(default)]
    pub confirmed_but_location_unidentified: i64,
}

/// Totals published by an unofficial source, attached to the live record
/// when available.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnofficialSummary {
    pub source: String,
    pub total: i64,
    pub recovered: i64,
    pub deaths: i64,
    pub active: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalCaseCountRecord {
    pub summary: CaseCountSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unofficial_summary: Option<Vec<UnofficialSummary>>,
    pub regional: Vec<RegionalCaseRecord>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DailyCaseCountEntry {
    pub day: String,
    #[serde(flatten)]
    pub record: CanonicalCaseCountRecord,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NotificationEntry {
    pub title: String,
    pub link: String,
}

/// One line item of the crowd sourced patient database. `patient_id` is the
/// identity; everything else is optional because sheets are sparsely filled.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported_on: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub onset_estimate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age_estimate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub district: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contracted_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
    /// Fields contributed by the annotation service.
    #[serde(flatten)]
    pub annotations: Map<String, JsonValue>,
}

impl PatientRecord {
    pub fn populated_fields(&self) -> usize {
        let optional = [
            self.reported_on.is_some(),
            self.onset_estimate.is_some(),
            self.age_estimate.is_some(),
            self.gender.is_some(),
            self.city.is_some(),
            self.district.is_some(),
            self.state.is_some(),
            self.status.is_some(),
            self.contracted_from.is_some(),
            self.notes.is_some(),
        ];
        usize::from(self.patient_id.is_some())
            + optional.iter().filter(|set| **set).count()
            + usize::from(!self.sources.is_empty())
            + self.annotations.len()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestingRecord {
    #[serde(with = "iso_millis")]
    pub timestamp: DateTime<Utc>,
    pub total_samples_tested: Option<i64>,
    pub total_individuals_tested: Option<i64>,
    pub total_positive_cases: Option<i64>,
    pub source: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyTestingEntry {
    pub day: String,
    pub total_samples_tested: Option<i64>,
    pub total_individuals_tested: Option<i64>,
    pub total_positive_cases: Option<i64>,
    pub source: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regional_record_json_shape() {
        let record = RegionalCaseRecord::new("Kerala", 233, 8, 20, 2);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "loc": "Kerala",
                "confirmedCasesIndian": 233,
                "confirmedCasesForeign": 8,
                "discharged": 20,
                "deaths": 2,
                "totalConfirmed": 241
            })
        );
    }

    #[test]
    fn test_older_snapshot_without_total() {
        let record: RegionalCaseRecord = serde_json::from_str(
            r#"{"loc":"Delhi","confirmedCasesIndian":120,"confirmedCasesForeign":1,"discharged":6,"deaths":2}"#,
        )
        .unwrap();
        assert_eq!(record.total_confirmed, 0);
        assert_eq!(record.normalized().total_confirmed, 121);
    }

    #[test]
    fn test_patient_populated_fields() {
        let mut record = PatientRecord {
            patient_id: Some(1),
            ..Default::default()
        };
        assert_eq!(record.populated_fields(), 1);
        record.reported_on = Some("30/01/2020".into());
        record.sources = vec!["a".into(), "b".into()];
        assert_eq!(record.populated_fields(), 3);
    }

    #[test]
    fn test_patient_annotations_flatten() {
        let record: PatientRecord =
            serde_json::from_str(r#"{"patientId":3,"notes":"x","travel":"Dubai"}"#).unwrap();
        assert_eq!(record.patient_id, Some(3));
        assert_eq!(record.annotations.get("travel").unwrap(), "Dubai");
    }
}
