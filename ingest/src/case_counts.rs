//! Extraction of per-region case counts from the official sources.
//!
//! Two upstream shapes are supported: the HTML table of the official
//! dashboard (legacy) and the per-state JSON feed (preferred). Both produce
//! the same list of `RegionalCaseRecord`s, optionally ending with the
//! synthetic `unknown` region.

use serde::{Deserialize, Deserializer};
use serde_json::Value as JsonValue;

use crate::errors::RefreshError;
use crate::field_map::{self, FieldMap, FieldRule, FieldValue, HeaderMatch, parse_count};
use crate::html;
use crate::reference::ForeignCaseReference;
use crate::types::RegionalCaseRecord;

/// A stated grand total at or above this multiple of the per-region sum is
/// assumed to be a misparse rather than unidentified cases.
const GRAND_TOTAL_SANITY_FACTOR: i64 = 3;

const MIN_POPULATED_FIELDS: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CaseField {
    Location,
    ConfirmedIndian,
    ConfirmedForeign,
    Discharged,
    Deaths,
}

const CASE_COLUMNS: FieldMap<CaseField> = FieldMap::new(&[
    FieldRule {
        matcher: HeaderMatch::Contains("name"),
        field: CaseField::Location,
        transform: field_map::text,
    },
    FieldRule {
        matcher: HeaderMatch::ContainsAll(&["confirmed", "indian"]),
        field: CaseField::ConfirmedIndian,
        transform: field_map::int,
    },
    FieldRule {
        matcher: HeaderMatch::ContainsAll(&["confirmed", "foreign"]),
        field: CaseField::ConfirmedForeign,
        transform: field_map::int,
    },
    FieldRule {
        matcher: HeaderMatch::Contains("discharged"),
        field: CaseField::Discharged,
        transform: field_map::int,
    },
    FieldRule {
        matcher: HeaderMatch::Contains("death"),
        field: CaseField::Deaths,
        transform: field_map::int,
    },
]);

/// A row as read from the upstream, before defaults are applied.
#[derive(Debug, Default)]
struct PartialRecord {
    location: Option<String>,
    confirmed_indian: Option<i64>,
    confirmed_foreign: Option<i64>,
    discharged: Option<i64>,
    deaths: Option<i64>,
}

impl PartialRecord {
    fn populated(&self) -> usize {
        [
            self.location.is_some(),
            self.confirmed_indian.is_some(),
            self.confirmed_foreign.is_some(),
            self.discharged.is_some(),
            self.deaths.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count()
    }

    fn set(&mut self, field: CaseField, value: FieldValue) {
        match (field, value) {
            (CaseField::Location, FieldValue::Text(loc)) => self.location = Some(fix_location(&loc)),
            (CaseField::ConfirmedIndian, FieldValue::Int(n)) => self.confirmed_indian = Some(n),
            (CaseField::ConfirmedForeign, FieldValue::Int(n)) => self.confirmed_foreign = Some(n),
            (CaseField::Discharged, FieldValue::Int(n)) => self.discharged = Some(n),
            (CaseField::Deaths, FieldValue::Int(n)) => self.deaths = Some(n),
            _ => {}
        }
    }
}

pub struct CaseCountExtractor<'a> {
    reference: &'a ForeignCaseReference,
}

impl<'a> CaseCountExtractor<'a> {
    pub fn new(reference: &'a ForeignCaseReference) -> Self {
        CaseCountExtractor { reference }
    }

    /// Extracts regional records from the case count table of the dashboard.
    ///
    /// The first table row is the header. Data rows are read until a row
    /// whose first cell starts with "total"; that row is the stated grand
    /// total and nothing after it is considered.
    pub fn from_html(&self, content: &str) -> Result<Vec<RegionalCaseRecord>, RefreshError> {
        let rows = html::table_rows(content);
        let Some((header, data)) = rows.split_first() else {
            return Err(RefreshError::MalformedShape("no case count table found".into()));
        };

        let columns = CASE_COLUMNS.columns(header);
        let has_foreign_column = columns
            .iter()
            .flatten()
            .any(|rule| rule.field == CaseField::ConfirmedForeign);

        let mut partials = Vec::new();
        let mut grand_total = None;

        for row in data {
            let Some(first) = row.first() else { continue };
            let first = first.trim().to_lowercase();

            if first.starts_with("total") {
                grand_total = stated_total(row, &columns);
                break;
            }

            let has_serial = parse_count(&first).is_some();
            if !has_serial && first.is_empty() {
                tracing::debug!(?row, "Skipping row without serial number or name");
                continue;
            }

            let mut partial = PartialRecord::default();
            for (cell, rule) in row.iter().zip(&columns) {
                if let Some(rule) = rule
                    && let Some(value) = (rule.transform)(cell.as_str())
                {
                    partial.set(rule.field, value);
                }
            }

            if partial.location.is_none() {
                tracing::debug!(?row, "Skipping row without a location");
                continue;
            }
            partials.push(partial);
        }

        validate(&partials)?;

        let mut records: Vec<RegionalCaseRecord> = partials
            .into_iter()
            .map(|p| {
                let location = p.location.unwrap_or_default();
                let indian = p.confirmed_indian.unwrap_or(0);
                let (indian, foreign) = if has_foreign_column {
                    (indian, p.confirmed_foreign.unwrap_or(0))
                } else {
                    self.reference.split(&location, indian)
                };
                RegionalCaseRecord::new(
                    location,
                    indian,
                    foreign,
                    p.discharged.unwrap_or(0),
                    p.deaths.unwrap_or(0),
                )
            })
            .collect();

        add_unidentified(&mut records, grand_total);
        Ok(records)
    }

    /// Extracts regional records from the per-state JSON feed.
    ///
    /// The feed no longer splits domestic and foreign cases, so the domestic
    /// count is `active + cured + death` with the reference foreign count
    /// subtracted. An element without a state name carries the grand total.
    pub fn from_state_feed(&self, feed: &JsonValue) -> Result<Vec<RegionalCaseRecord>, RefreshError> {
        let rows = feed
            .as_array()
            .ok_or_else(|| RefreshError::MalformedShape("response not an array".into()))?;
        if rows.is_empty() {
            return Err(RefreshError::MalformedShape("response is an empty array".into()));
        }

        let mut partials = Vec::with_capacity(rows.len());
        let mut grand_total = None;

        for row in rows {
            let row = StateFeedRow::deserialize(row)?;
            let confirmed = row.active + row.cured + row.death;
            let name = row.state_name.trim();

            if name.is_empty() || name.to_lowercase().starts_with("total") {
                grand_total = Some(confirmed);
                continue;
            }

            partials.push(PartialRecord {
                location: Some(fix_location(name)),
                confirmed_indian: Some(confirmed),
                confirmed_foreign: None,
                discharged: Some(row.cured),
                deaths: Some(row.death),
            });
        }

        validate(&partials)?;

        let mut records: Vec<RegionalCaseRecord> = partials
            .into_iter()
            .map(|p| {
                let location = p.location.unwrap_or_default();
                let (indian, foreign) = self
                    .reference
                    .split(&location, p.confirmed_indian.unwrap_or(0));
                RegionalCaseRecord::new(
                    location,
                    indian,
                    foreign,
                    p.discharged.unwrap_or(0),
                    p.deaths.unwrap_or(0),
                )
            })
            .collect();

        add_unidentified(&mut records, grand_total);
        Ok(records)
    }
}

#[derive(Deserialize)]
struct StateFeedRow {
    #[serde(default)]
    state_name: String,
    #[serde(default, deserialize_with = "count")]
    active: i64,
    #[serde(default, deserialize_with = "count")]
    cured: i64,
    #[serde(default, deserialize_with = "count")]
    death: i64,
}

/// Counters arrive either as numbers or as numeric strings.
fn count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    match JsonValue::deserialize(deserializer)? {
        JsonValue::Number(n) => Ok(n.as_i64().unwrap_or(0)),
        JsonValue::String(s) => Ok(parse_count(&s).unwrap_or(0)),
        _ => Ok(0),
    }
}

fn validate(partials: &[PartialRecord]) -> Result<(), RefreshError> {
    match partials.first() {
        None => Err(RefreshError::MalformedShape(
            "no regional case counts found".into(),
        )),
        Some(first) if first.populated() < MIN_POPULATED_FIELDS => {
            Err(RefreshError::MalformedShape(format!(
                "first regional record has only {} populated fields",
                first.populated()
            )))
        }
        Some(_) => Ok(()),
    }
}

/// Reads the grand total stated in the "Total" row. The label usually spans
/// the leading columns, so a short row is aligned with the header from the
/// right before the confirmed columns are summed.
fn stated_total(row: &[String], columns: &[Option<&'static FieldRule<CaseField>>]) -> Option<i64> {
    if let Some(offset) = columns.len().checked_sub(row.len()) {
        let confirmed: Vec<i64> = row
            .iter()
            .enumerate()
            .filter_map(|(i, cell)| match columns.get(i + offset).copied().flatten().map(|r| r.field) {
                Some(CaseField::ConfirmedIndian | CaseField::ConfirmedForeign) => parse_count(cell),
                _ => None,
            })
            .collect();
        if !confirmed.is_empty() {
            return Some(confirmed.iter().sum());
        }
    }
    row.iter().skip(1).find_map(|cell| parse_count(cell))
}

/// Appends the `unknown` region when the stated grand total exceeds the sum of
/// the regional rows, but by less than the sanity factor.
fn add_unidentified(records: &mut Vec<RegionalCaseRecord>, grand_total: Option<i64>) {
    let Some(grand_total) = grand_total else {
        return;
    };
    let regional_total: i64 = records.iter().map(|r| r.total_confirmed).sum();

    if grand_total > regional_total && grand_total < GRAND_TOTAL_SANITY_FACTOR * regional_total {
        let surplus = grand_total - regional_total;
        tracing::info!(grand_total, regional_total, surplus, "Recording unidentified cases");
        records.push(RegionalCaseRecord::unidentified(surplus));
    } else if grand_total > regional_total {
        tracing::warn!(
            grand_total,
            regional_total,
            "Ignoring implausible grand total"
        );
    }
}

/// Normalizes location names that changed over time upstream.
pub fn fix_location(name: &str) -> String {
    name.trim()
        .replace("Union Territory of ", "")
        .replace("Pondicherry", "Puducherry")
}
