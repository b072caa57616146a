use crate::types::{CanonicalCaseCountRecord, CaseCountSummary, RegionalCaseRecord};

/// Folds regional records into the canonical summary + regional form.
///
/// The synthetic unidentified region is left out of `regional`; its count is
/// reported in `summary.confirmed_but_location_unidentified` and included in
/// `summary.total`.
pub fn build_canonical_record(records: &[RegionalCaseRecord]) -> CanonicalCaseCountRecord {
    let mut summary = CaseCountSummary::default();
    let mut regional = Vec::with_capacity(records.len());

    for record in records {
        if record.is_unidentified() {
            summary.confirmed_but_location_unidentified +=
                record.confirmed_cases_indian + record.confirmed_cases_foreign;
            continue;
        }

        summary.confirmed_cases_indian += record.confirmed_cases_indian;
        summary.confirmed_cases_foreign += record.confirmed_cases_foreign;
        summary.discharged += record.discharged;
        summary.deaths += record.deaths;
        regional.push(record.clone().normalized());
    }

    summary.total = summary.confirmed_cases_indian
        + summary.confirmed_cases_foreign
        + summary.confirmed_but_location_unidentified;

    CanonicalCaseCountRecord {
        summary,
        unofficial_summary: None,
        regional,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input() {
        let record = build_canonical_record(&[]);
        assert_eq!(record.summary, CaseCountSummary::default());
        assert!(record.regional.is_empty());
    }

    #[test]
    fn test_summary_totals() {
        let records = vec![
            RegionalCaseRecord::new("Kerala", 233, 8, 20, 2),
            RegionalCaseRecord::new("Delhi", 120, 1, 6, 2),
            RegionalCaseRecord::unidentified(17),
        ];
        let record = build_canonical_record(&records);

        assert_eq!(
            record.summary,
            CaseCountSummary {
                total: 379,
                confirmed_cases_indian: 353,
                confirmed_cases_foreign: 9,
                discharged: 26,
                deaths: 4,
                confirmed_but_location_unidentified: 17,
            }
        );
        assert_eq!(record.regional.len(), 2);
        assert!(record.regional.iter().all(|r| !r.is_unidentified()));
    }

    #[test]
    fn test_total_invariant() {
        let records = vec![
            RegionalCaseRecord::new("Goa", 5, 0, 0, 0),
            RegionalCaseRecord::new("Haryana", 36, 14, 20, 1),
        ];
        let summary = build_canonical_record(&records).summary;
        assert_eq!(
            summary.total,
            summary.confirmed_cases_indian
                + summary.confirmed_cases_foreign
                + summary.confirmed_but_location_unidentified
        );
    }

    #[test]
    fn test_regional_totals_recomputed() {
        let mut stale = RegionalCaseRecord::new("Goa", 5, 1, 0, 0);
        stale.total_confirmed = 0;
        let record = build_canonical_record(&[stale]);
        assert_eq!(record.regional[0].total_confirmed, 6);
    }
}
