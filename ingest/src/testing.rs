//! Testing counters: raw per-update series and the one-per-day reduction.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::errors::RefreshError;
use crate::field_map::parse_count;
use crate::timestamp::{day_of, parse_testing_timestamp};
use crate::types::{DailyTestingEntry, TestingRecord};

#[derive(Deserialize)]
struct TestingRow {
    #[serde(default)]
    updatetimestamp: String,
    #[serde(default)]
    totalsamplestested: JsonValue,
    #[serde(default)]
    totalindividualstested: JsonValue,
    #[serde(default)]
    totalpositivecases: JsonValue,
    #[serde(default)]
    source: Option<String>,
}

fn counter(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n.as_i64(),
        JsonValue::String(s) => parse_count(s),
        _ => None,
    }
}

/// Maps the `tested` array of the upstream document to raw testing records,
/// preserving upstream order. A row whose timestamp cannot be parsed fails
/// the whole conversion.
pub fn records_from_feed(document: &JsonValue) -> Result<Vec<TestingRecord>, RefreshError> {
    let rows = document
        .get("tested")
        .and_then(JsonValue::as_array)
        .filter(|rows| !rows.is_empty())
        .ok_or_else(|| RefreshError::MalformedShape("response not an array".into()))?;

    rows.iter()
        .map(|row| -> Result<TestingRecord, RefreshError> {
            let row = TestingRow::deserialize(row)?;
            Ok(TestingRecord {
                timestamp: parse_testing_timestamp(&row.updatetimestamp)?,
                total_samples_tested: counter(&row.totalsamplestested),
                total_individuals_tested: counter(&row.totalindividualstested),
                total_positive_cases: counter(&row.totalpositivecases),
                source: row.source.filter(|s| !s.trim().is_empty()),
            })
        })
        .collect()
}

/// One entry per UTC day, ascending. When several records fall on the same
/// day the one with the latest timestamp wins; on equal timestamps the one
/// appearing last in `records`.
pub fn per_day(records: &[TestingRecord]) -> Vec<DailyTestingEntry> {
    let mut by_day: BTreeMap<String, &TestingRecord> = BTreeMap::new();
    for record in records {
        by_day
            .entry(day_of(&record.timestamp))
            .and_modify(|kept| {
                if record.timestamp >= kept.timestamp {
                    *kept = record;
                }
            })
            .or_insert(record);
    }

    by_day
        .into_iter()
        .map(|(day, record)| DailyTestingEntry {
            day,
            total_samples_tested: record.total_samples_tested,
            total_individuals_tested: record.total_individuals_tested,
            total_positive_cases: record.total_positive_cases,
            source: record.source.clone(),
        })
        .collect()
}
