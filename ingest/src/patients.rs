//! Patient level records from the crowd sourced sheets.
//!
//! Every sheet is mapped to `PatientRecord`s through the header rules below,
//! trimmed of trailing footer rows and then merged across sheets so that the
//! newest sheet's version of a patient wins.

use std::collections::HashMap;

use crate::field_map::{self, FieldMap, FieldRule, FieldValue, HeaderMatch};
use crate::sheets::Grid;
use crate::types::PatientRecord;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatientField {
    PatientId,
    ReportedOn,
    OnsetEstimate,
    AgeEstimate,
    Gender,
    City,
    District,
    State,
    Status,
    ContractedFrom,
    Notes,
    Sources,
}

fn gender(value: &str) -> Option<FieldValue> {
    let value = value.trim().to_lowercase();
    if value.is_empty() {
        return None;
    }
    let gender = if value.starts_with('m') { "male" } else { "female" };
    Some(FieldValue::Text(gender.to_string()))
}

pub const PATIENT_COLUMNS: FieldMap<PatientField> = FieldMap::new(&[
    FieldRule {
        matcher: HeaderMatch::StartsWith("patient"),
        field: PatientField::PatientId,
        transform: field_map::int,
    },
    FieldRule {
        matcher: HeaderMatch::StartsWith("date"),
        field: PatientField::ReportedOn,
        transform: field_map::text,
    },
    FieldRule {
        matcher: HeaderMatch::StartsWith("estimated"),
        field: PatientField::OnsetEstimate,
        transform: field_map::text,
    },
    FieldRule {
        matcher: HeaderMatch::Contains("age"),
        field: PatientField::AgeEstimate,
        transform: field_map::text,
    },
    FieldRule {
        matcher: HeaderMatch::StartsWith("gender"),
        field: PatientField::Gender,
        transform: gender,
    },
    FieldRule {
        matcher: HeaderMatch::StartsWith("detected city"),
        field: PatientField::City,
        transform: field_map::text,
    },
    FieldRule {
        matcher: HeaderMatch::StartsWith("detected district"),
        field: PatientField::District,
        transform: field_map::text,
    },
    FieldRule {
        matcher: HeaderMatch::StartsWith("detected state"),
        field: PatientField::State,
        transform: field_map::text,
    },
    FieldRule {
        matcher: HeaderMatch::Contains("current status"),
        field: PatientField::Status,
        transform: field_map::text,
    },
    FieldRule {
        matcher: HeaderMatch::StartsWith("contracted from"),
        field: PatientField::ContractedFrom,
        transform: field_map::text,
    },
    FieldRule {
        matcher: HeaderMatch::StartsWith("notes"),
        field: PatientField::Notes,
        transform: field_map::text,
    },
    FieldRule {
        matcher: HeaderMatch::StartsWith("source"),
        field: PatientField::Sources,
        transform: field_map::list,
    },
]);

fn apply(record: &mut PatientRecord, field: PatientField, value: FieldValue) {
    match (field, value) {
        (PatientField::PatientId, FieldValue::Int(id)) => record.patient_id = Some(id),
        (PatientField::Sources, FieldValue::List(sources)) => record.sources.extend(sources),
        (field, FieldValue::Text(text)) => {
            let slot = match field {
                PatientField::ReportedOn => &mut record.reported_on,
                PatientField::OnsetEstimate => &mut record.onset_estimate,
                PatientField::AgeEstimate => &mut record.age_estimate,
                PatientField::Gender => &mut record.gender,
                PatientField::City => &mut record.city,
                PatientField::District => &mut record.district,
                PatientField::State => &mut record.state,
                PatientField::Status => &mut record.status,
                PatientField::ContractedFrom => &mut record.contracted_from,
                PatientField::Notes => &mut record.notes,
                PatientField::PatientId | PatientField::Sources => return,
            };
            *slot = Some(text);
        }
        _ => {}
    }
}

/// Maps a sheet grid (header row + data rows) to patient records. Cells that
/// are missing or blank leave the field unset.
pub fn records_from_grid(grid: &Grid) -> Vec<PatientRecord> {
    let Some((header, rows)) = grid.split_first() else {
        return Vec::new();
    };
    let columns = PATIENT_COLUMNS.columns(header);

    rows.iter()
        .map(|row| {
            let mut record = PatientRecord::default();
            for (rule, cell) in columns.iter().zip(row) {
                if let Some(rule) = rule
                    && let Some(value) = (rule.transform)(cell.as_str())
                {
                    apply(&mut record, rule.field, value);
                }
            }
            record
        })
        .collect()
}

/// Drops trailing rows up to the last record that has more than one populated
/// field and both a patient id and a report date.
pub fn trim_trailing(mut records: Vec<PatientRecord>) -> Vec<PatientRecord> {
    let keep = records
        .iter()
        .rposition(|r| r.populated_fields() > 1 && r.patient_id.is_some() && r.reported_on.is_some())
        .map_or(0, |idx| idx + 1);

    if keep < records.len() {
        tracing::debug!(dropped = records.len() - keep, "Trimmed trailing sheet rows");
    }
    records.truncate(keep);
    records
}

/// Merges record lists ordered oldest to newest. A record whose patient id
/// was already seen replaces the earlier record wholesale, keeping its
/// position; its sources accumulate. Records without an id cannot be keyed
/// and are dropped.
pub fn merge_sources<I>(sources: I) -> Vec<PatientRecord>
where
    I: IntoIterator<Item = Vec<PatientRecord>>,
{
    let mut merged: Vec<PatientRecord> = Vec::new();
    let mut positions: HashMap<i64, usize> = HashMap::new();
    let mut dropped = 0;

    for records in sources {
        for mut record in records {
            let Some(id) = record.patient_id else {
                dropped += 1;
                continue;
            };

            match positions.get(&id) {
                Some(&idx) => {
                    let mut sources = std::mem::take(&mut merged[idx].sources);
                    for source in record.sources.drain(..) {
                        if !sources.contains(&source) {
                            sources.push(source);
                        }
                    }
                    record.sources = sources;
                    merged[idx] = record;
                }
                None => {
                    positions.insert(id, merged.len());
                    merged.push(record);
                }
            }
        }
    }

    if dropped > 0 {
        tracing::warn!(dropped, "Dropped patient records without a patient id");
    }
    merged
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StatewiseField {
    State,
    Confirmed,
    Recovered,
    Deaths,
    Active,
}

const STATEWISE_COLUMNS: FieldMap<StatewiseField> = FieldMap::new(&[
    FieldRule {
        matcher: HeaderMatch::StartsWith("state"),
        field: StatewiseField::State,
        transform: field_map::text,
    },
    FieldRule {
        matcher: HeaderMatch::StartsWith("confirmed"),
        field: StatewiseField::Confirmed,
        transform: field_map::int,
    },
    FieldRule {
        matcher: HeaderMatch::StartsWith("recovered"),
        field: StatewiseField::Recovered,
        transform: field_map::int,
    },
    FieldRule {
        matcher: HeaderMatch::StartsWith("deaths"),
        field: StatewiseField::Deaths,
        transform: field_map::int,
    },
    FieldRule {
        matcher: HeaderMatch::StartsWith("active"),
        field: StatewiseField::Active,
        transform: field_map::int,
    },
]);

#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StatewiseCounts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default)]
    pub confirmed: i64,
    #[serde(default)]
    pub recovered: i64,
    #[serde(default)]
    pub deaths: i64,
    #[serde(default)]
    pub active: i64,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StatewiseSummary {
    pub total: StatewiseCounts,
    pub statewise: Vec<StatewiseCounts>,
}

/// Maps the statewise sheet. The first data row holds the national total;
/// trailing rows with at most one populated cell are dropped.
pub fn statewise_from_grid(grid: &Grid) -> Option<StatewiseSummary> {
    let (header, rows) = grid.split_first()?;
    let columns = STATEWISE_COLUMNS.columns(header);

    let mut parsed: Vec<(usize, StatewiseCounts)> = rows
        .iter()
        .map(|row| {
            let mut counts = StatewiseCounts::default();
            let mut populated = 0;
            for (rule, cell) in columns.iter().zip(row) {
                let Some(rule) = rule else { continue };
                let Some(value) = (rule.transform)(cell.as_str()) else {
                    continue;
                };
                populated += 1;
                match (rule.field, value) {
                    (StatewiseField::State, FieldValue::Text(s)) => counts.state = Some(s),
                    (StatewiseField::Confirmed, FieldValue::Int(n)) => counts.confirmed = n,
                    (StatewiseField::Recovered, FieldValue::Int(n)) => counts.recovered = n,
                    (StatewiseField::Deaths, FieldValue::Int(n)) => counts.deaths = n,
                    (StatewiseField::Active, FieldValue::Int(n)) => counts.active = n,
                    _ => populated -= 1,
                }
            }
            (populated, counts)
        })
        .collect();

    let keep = parsed
        .iter()
        .rposition(|(populated, _)| *populated > 1)
        .map_or(0, |idx| idx + 1);
    parsed.truncate(keep);

    let mut rows = parsed.into_iter().map(|(_, counts)| counts);
    let mut total = rows.next()?;
    total.state = None;

    Some(StatewiseSummary {
        total,
        statewise: rows.collect(),
    })
}
