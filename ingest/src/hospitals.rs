//! Hospital capacity feeds: statewise bed counts and medical colleges.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::errors::RefreshError;
use crate::field_map::parse_count;
use crate::timestamp::{iso_millis, parse_utc_datetime};

/// Cited for the medical colleges feed, which carries no source of its own.
pub const MEDICAL_COLLEGES_SOURCE: &str =
    "http://www.indiaenvironmentportal.org.in/files/file/NHP%202018.pdf";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BedCounts {
    pub rural_hospitals: i64,
    pub rural_beds: i64,
    pub urban_hospitals: i64,
    pub urban_beds: i64,
    pub total_hospitals: i64,
    pub total_beds: i64,
}

impl BedCounts {
    fn add(&mut self, other: &BedCounts) {
        self.rural_hospitals += other.rural_hospitals;
        self.rural_beds += other.rural_beds;
        self.urban_hospitals += other.urban_hospitals;
        self.urban_beds += other.urban_beds;
        self.total_hospitals = self.rural_hospitals + self.urban_hospitals;
        self.total_beds = self.rural_beds + self.urban_beds;
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionalBeds {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(flatten)]
    pub counts: BedCounts,
    #[serde(with = "iso_millis")]
    pub as_on: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BedSource {
    pub url: String,
    #[serde(with = "iso_millis")]
    pub last_updated: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HospitalBeds {
    pub summary: BedCounts,
    pub sources: Vec<BedSource>,
    pub regional: Vec<RegionalBeds>,
}

impl HospitalBeds {
    /// Latest `lastUpdated` among the sources, if any.
    pub fn last_origin_update(&self) -> Option<DateTime<Utc>> {
        self.sources.iter().map(|s| s.last_updated).max()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicalCollege {
    pub state: Option<String>,
    pub name: Option<String>,
    pub city: Option<String>,
    pub ownership: Option<String>,
    pub admission_capacity: i64,
    pub hospital_beds: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicalColleges {
    pub medical_colleges: Vec<MedicalCollege>,
    pub sources: Vec<String>,
}

fn non_empty_array<'v>(content: &'v JsonValue) -> Result<&'v Vec<JsonValue>, RefreshError> {
    content
        .as_array()
        .filter(|rows| !rows.is_empty())
        .ok_or_else(|| RefreshError::MalformedShape("response not an array".into()))
}

fn text(row: &Map<String, JsonValue>, key: &str) -> Option<String> {
    match row.get(key)? {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Null => None,
        other => Some(other.to_string()),
    }
}

/// Missing fields count as zero.
fn lenient_count(row: &Map<String, JsonValue>, key: &str) -> i64 {
    match row.get(key) {
        Some(JsonValue::Number(n)) => n.as_i64().unwrap_or(0),
        Some(JsonValue::String(s)) => parse_count(s).unwrap_or(0),
        _ => 0,
    }
}

/// Only plain digit strings are accepted; anything else is zero.
fn strict_count(row: &Map<String, JsonValue>, key: &str) -> i64 {
    match row.get(key) {
        Some(JsonValue::Number(n)) => n.as_i64().unwrap_or(0),
        Some(JsonValue::String(s)) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => {
            s.parse().unwrap_or(0)
        }
        _ => 0,
    }
}

pub fn hospital_beds_from_feed(content: &JsonValue) -> Result<HospitalBeds, RefreshError> {
    let rows = non_empty_array(content)?;

    let mut summary = BedCounts::default();
    let mut sources: Vec<BedSource> = Vec::new();
    let mut regional = Vec::with_capacity(rows.len());

    for row in rows {
        let Some(row) = row.as_object() else {
            return Err(RefreshError::MalformedShape("hospital beds row is not an object".into()));
        };
        let as_on = parse_utc_datetime(&text(row, "LastUpdated").unwrap_or_default());

        if let Some(url) = text(row, "Source").filter(|s| !s.is_empty())
            && !sources.iter().any(|s| s.url == url)
        {
            sources.push(BedSource {
                url,
                last_updated: as_on,
            });
        }

        let mut counts = BedCounts {
            rural_hospitals: lenient_count(row, "RuralHospitalsCount"),
            rural_beds: lenient_count(row, "RuralBeds"),
            urban_hospitals: lenient_count(row, "UrbanHospitals"),
            urban_beds: lenient_count(row, "UrbanBeds"),
            ..Default::default()
        };
        counts.total_hospitals = counts.rural_hospitals + counts.urban_hospitals;
        counts.total_beds = counts.rural_beds + counts.urban_beds;
        summary.add(&counts);

        regional.push(RegionalBeds {
            state: text(row, "State"),
            counts,
            as_on,
        });
    }

    Ok(HospitalBeds {
        summary,
        sources,
        regional,
    })
}

pub fn medical_colleges_from_feed(content: &JsonValue) -> Result<MedicalColleges, RefreshError> {
    let rows = non_empty_array(content)?;

    let medical_colleges = rows
        .iter()
        .filter_map(JsonValue::as_object)
        .map(|row| MedicalCollege {
            state: text(row, "State/UT"),
            name: text(row, "MedicalCollegeName"),
            city: text(row, "City/Town"),
            ownership: text(row, "Govt/Private"),
            admission_capacity: strict_count(row, "AdmissionCapacity"),
            hospital_beds: strict_count(row, "BedsInAttachedHospital"),
        })
        .collect();

    Ok(MedicalColleges {
        medical_colleges,
        sources: vec![MEDICAL_COLLEGES_SOURCE.to_string()],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hospital_beds() {
        let feed = json!([
            {
                "State": "Kerala",
                "RuralHospitalsCount": "981",
                "RuralBeds": "16865",
                "UrbanHospitals": "299",
                "UrbanBeds": "21139",
                "Source": "https://pib.gov.in/a",
                "LastUpdated": "2020-03-20 9:15:00"
            },
            {
                "State": "Goa",
                "UrbanBeds": "1405",
                "Source": "https://pib.gov.in/a",
                "LastUpdated": "2020-03-21 10:00:00"
            },
            {
                "State": "Delhi",
                "RuralHospitalsCount": 0,
                "UrbanHospitals": 109,
                "UrbanBeds": 24383,
                "Source": "https://pib.gov.in/b",
                "LastUpdated": ""
            }
        ]);

        let beds = hospital_beds_from_feed(&feed).unwrap();
        assert_eq!(beds.regional.len(), 3);
        assert_eq!(beds.regional[1].counts.total_beds, 1405);
        assert_eq!(beds.regional[1].counts.rural_hospitals, 0);
        assert_eq!(beds.summary.total_hospitals, 981 + 299 + 109);
        assert_eq!(beds.summary.total_beds, 16865 + 21139 + 1405 + 24383);

        assert_eq!(beds.sources.len(), 2);
        assert_eq!(beds.sources[0].url, "https://pib.gov.in/a");
        assert_eq!(
            beds.sources[0].last_updated.to_rfc3339(),
            "2020-03-20T09:15:00+00:00"
        );
        assert_eq!(beds.sources[1].last_updated, DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(beds.last_origin_update(), Some(beds.sources[0].last_updated));

        let json = serde_json::to_value(&beds.regional[0]).unwrap();
        assert_eq!(json["asOn"], "2020-03-20T09:15:00.000Z");
        assert_eq!(json["ruralBeds"], 16865);
    }

    #[test]
    fn test_not_an_array() {
        assert!(matches!(
            hospital_beds_from_feed(&json!({"error": "quota"})),
            Err(RefreshError::MalformedShape(_))
        ));
        assert!(matches!(
            medical_colleges_from_feed(&json!([])),
            Err(RefreshError::MalformedShape(_))
        ));
    }

    #[test]
    fn test_medical_colleges() {
        let feed = json!([
            {
                "State/UT": "Kerala",
                "MedicalCollegeName": "Government Medical College, Thrissur",
                "City/Town": "Thrissur",
                "Govt/Private": "Govt.",
                "AdmissionCapacity": "175",
                "BedsInAttachedHospital": "NA"
            }
        ]);

        let colleges = medical_colleges_from_feed(&feed).unwrap();
        let college = &colleges.medical_colleges[0];
        assert_eq!(college.city.as_deref(), Some("Thrissur"));
        assert_eq!(college.admission_capacity, 175);
        assert_eq!(college.hospital_beds, 0);
        assert_eq!(colleges.sources, vec![MEDICAL_COLLEGES_SOURCE]);
    }
}
