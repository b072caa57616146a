//! Rebuilds the one-entry-per-day case count series from stored snapshots.
//!
//! Snapshots are written under `case_counts/<ISO-8601 instant>`, so within a
//! day the lexicographically greatest key is the latest snapshot.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use crate::canonical::build_canonical_record;
use crate::keys::SNAPSHOT_PREFIX;
use crate::metrics_defs::{HISTORY_DAYS_COMPUTED, HISTORY_DAYS_REUSED};
use crate::store::{KeyListing, KeyValueStore, StoreError, get_json};
use crate::timestamp::to_iso_millis;
use crate::types::{CaseCountSnapshot, DailyCaseCountEntry, RegionalCaseRecord};
use shared::counter;

/// Entries at the tail of a previous series that are always recomputed.
const RECOMPUTE_TAIL: usize = 2;

pub fn snapshot_key(origin: &DateTime<Utc>) -> String {
    format!("{SNAPSHOT_PREFIX}{}", to_iso_millis(origin))
}

/// `case_counts/2020-03-31T14:30:00.000Z` -> `2020-03-31`.
pub fn day_from_snapshot_key(key: &str) -> Option<&str> {
    key.strip_prefix(SNAPSHOT_PREFIX)?.get(..10)
}

/// Reduces snapshot keys to the latest key of each day.
pub fn latest_key_per_day<I, S>(keys: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut by_day: BTreeMap<String, String> = BTreeMap::new();
    for key in keys {
        let key = key.as_ref();
        let Some(day) = day_from_snapshot_key(key) else {
            tracing::warn!(key, "Ignoring key outside the snapshot namespace");
            continue;
        };
        match by_day.get_mut(day) {
            Some(existing) if existing.as_str() >= key => {}
            Some(existing) => *existing = key.to_string(),
            None => {
                by_day.insert(day.to_string(), key.to_string());
            }
        }
    }
    by_day
}

pub struct HistoricalReconstructor<'a> {
    store: &'a dyn KeyValueStore,
}

impl<'a> HistoricalReconstructor<'a> {
    pub fn new(store: &'a dyn KeyValueStore) -> Self {
        HistoricalReconstructor { store }
    }

    /// Builds the daily series.
    ///
    /// `previous` is a previously materialized series; its days are reused
    /// except for the last two, which are recomputed from local snapshots.
    /// `live` is the snapshot just produced by the current refresh and is
    /// considered even if the store's listing does not show it yet.
    pub async fn reconstruct(
        &self,
        previous: &[DailyCaseCountEntry],
        live: Option<&CaseCountSnapshot>,
    ) -> Result<Vec<DailyCaseCountEntry>, StoreError> {
        let keys = KeyListing::new(self.store, SNAPSHOT_PREFIX).collect_all().await?;
        let mut latest = latest_key_per_day(&keys);

        let live_key = live.map(|snapshot| snapshot_key(&snapshot.origin_timestamp));
        if let Some(key) = &live_key
            && let Some(day) = day_from_snapshot_key(key)
            && latest.get(day).is_none_or(|existing| existing < key)
        {
            latest.insert(day.to_string(), key.clone());
        }

        let reused = &previous[..previous.len().saturating_sub(RECOMPUTE_TAIL)];
        let reused_days: BTreeSet<&str> = reused.iter().map(|e| e.day.as_str()).collect();

        let mut series: Vec<DailyCaseCountEntry> = reused.to_vec();
        let mut computed = 0u64;

        for (day, key) in &latest {
            if reused_days.contains(day.as_str()) {
                continue;
            }

            let records: Vec<RegionalCaseRecord> = match (live, &live_key) {
                (Some(snapshot), Some(live_key)) if live_key == key => snapshot.records.clone(),
                _ => match get_json(self.store, key).await? {
                    Some(records) => records,
                    None => {
                        tracing::warn!(key, "Listed snapshot is missing, skipping day");
                        continue;
                    }
                },
            };

            series.push(DailyCaseCountEntry {
                day: day.clone(),
                record: build_canonical_record(&records),
            });
            computed += 1;
        }

        series.sort_by(|a, b| a.day.cmp(&b.day));
        series.dedup_by(|later, earlier| later.day == earlier.day);

        counter!(HISTORY_DAYS_COMPUTED).increment(computed);
        counter!(HISTORY_DAYS_REUSED).increment(reused.len() as u64);
        tracing::info!(
            days = series.len(),
            computed,
            reused = reused.len(),
            "Rebuilt case count history"
        );
        Ok(series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, put_json};
    use crate::timestamp::parse_utc_datetime;

    fn records(kerala: i64) -> Vec<RegionalCaseRecord> {
        vec![
            RegionalCaseRecord::new("Kerala", kerala, 8, 0, 0),
            RegionalCaseRecord::new("Delhi", 30, 1, 6, 1),
        ]
    }

    async fn seed(store: &MemoryStore, instant: &str, kerala: i64) {
        let key = snapshot_key(&parse_utc_datetime(instant));
        put_json(store, &key, &records(kerala)).await.unwrap();
    }

    fn kerala_indian(entry: &DailyCaseCountEntry) -> i64 {
        entry
            .record
            .regional
            .iter()
            .find(|r| r.location == "Kerala")
            .map(|r| r.confirmed_cases_indian)
            .unwrap()
    }

    #[test]
    fn test_snapshot_key_and_day() {
        let origin = parse_utc_datetime("2020-03-31 14:30:00");
        let key = snapshot_key(&origin);
        assert_eq!(key, "case_counts/2020-03-31T14:30:00.000Z");
        assert_eq!(day_from_snapshot_key(&key), Some("2020-03-31"));
        assert_eq!(day_from_snapshot_key("notifications"), None);
    }

    #[test]
    fn test_latest_key_per_day() {
        let latest = latest_key_per_day([
            "case_counts/2020-03-31T14:30:00.000Z",
            "case_counts/2020-03-31T04:30:00.000Z",
            "case_counts/2020-04-01T02:30:00.000Z",
        ]);
        assert_eq!(latest.len(), 2);
        assert_eq!(latest["2020-03-31"], "case_counts/2020-03-31T14:30:00.000Z");
    }

    #[tokio::test]
    async fn test_reconstruct_from_snapshots() {
        let store = MemoryStore::with_page_size(2);
        seed(&store, "2020-03-30 04:30:00", 180).await;
        seed(&store, "2020-03-31 04:30:00", 200).await;
        seed(&store, "2020-03-31 14:30:00", 215).await;
        seed(&store, "2020-04-01 02:30:00", 233).await;

        let series = HistoricalReconstructor::new(&store)
            .reconstruct(&[], None)
            .await
            .unwrap();

        let days: Vec<_> = series.iter().map(|e| e.day.as_str()).collect();
        assert_eq!(days, vec!["2020-03-30", "2020-03-31", "2020-04-01"]);
        assert_eq!(kerala_indian(&series[1]), 215);
        assert_eq!(series[1].record.summary.total, 215 + 8 + 31);
    }

    #[tokio::test]
    async fn test_reconstruct_is_idempotent() {
        let store = MemoryStore::default();
        seed(&store, "2020-03-29 10:00:00", 170).await;
        seed(&store, "2020-03-30 10:00:00", 180).await;
        seed(&store, "2020-03-31 10:00:00", 200).await;

        let reconstructor = HistoricalReconstructor::new(&store);
        let first = reconstructor.reconstruct(&[], None).await.unwrap();
        let second = reconstructor.reconstruct(&[], None).await.unwrap();
        let incremental = reconstructor.reconstruct(&first, None).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first, incremental);
    }

    #[tokio::test]
    async fn test_previous_days_reused_except_tail() {
        let store = MemoryStore::default();
        seed(&store, "2020-03-29 10:00:00", 170).await;
        seed(&store, "2020-03-30 10:00:00", 180).await;
        seed(&store, "2020-03-31 10:00:00", 200).await;

        let reconstructor = HistoricalReconstructor::new(&store);
        let mut previous = reconstructor.reconstruct(&[], None).await.unwrap();
        // Make the previous series distinguishable from local snapshots.
        for entry in previous.iter_mut() {
            entry.record.summary.deaths = 99;
        }

        let series = reconstructor.reconstruct(&previous, None).await.unwrap();
        assert_eq!(series.len(), 3);
        assert_eq!(series[0].record.summary.deaths, 99);
        assert_eq!(series[1].record.summary.deaths, 1);
        assert_eq!(series[2].record.summary.deaths, 1);
    }

    #[tokio::test]
    async fn test_previous_days_without_snapshots_are_kept() {
        let store = MemoryStore::default();
        seed(&store, "2020-03-31 10:00:00", 200).await;

        let older = HistoricalReconstructor::new(&store)
            .reconstruct(&[], None)
            .await
            .unwrap();
        let mut previous = older.clone();
        previous[0].day = "2020-03-01".into();
        previous.extend(older.iter().cloned().map(|mut e| {
            e.day = "2020-03-02".into();
            e
        }));
        previous.extend(older);

        let series = HistoricalReconstructor::new(&store)
            .reconstruct(&previous, None)
            .await
            .unwrap();
        let days: Vec<_> = series.iter().map(|e| e.day.as_str()).collect();
        assert_eq!(days, vec!["2020-03-01", "2020-03-31"]);
    }

    #[tokio::test]
    async fn test_live_snapshot_considered_before_listing() {
        let store = MemoryStore::default();
        seed(&store, "2020-03-31 04:30:00", 200).await;

        let live = CaseCountSnapshot {
            origin_timestamp: parse_utc_datetime("2020-03-31 14:30:00"),
            records: records(233),
        };
        let series = HistoricalReconstructor::new(&store)
            .reconstruct(&[], Some(&live))
            .await
            .unwrap();

        assert_eq!(series.len(), 1);
        assert_eq!(kerala_indian(&series[0]), 233);
    }

    #[tokio::test]
    async fn test_missing_snapshot_skipped() {
        struct Lagging(MemoryStore);

        #[async_trait::async_trait]
        impl KeyValueStore for Lagging {
            async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
                if key.ends_with("2020-03-30T10:00:00.000Z") {
                    return Ok(None);
                }
                self.0.get(key).await
            }

            async fn put(&self, key: &str, value: String) -> Result<(), StoreError> {
                self.0.put(key, value).await
            }

            async fn list(
                &self,
                prefix: &str,
                cursor: Option<&str>,
            ) -> Result<crate::store::KeyPage, StoreError> {
                self.0.list(prefix, cursor).await
            }
        }

        let inner = MemoryStore::default();
        seed(&inner, "2020-03-30 10:00:00", 180).await;
        seed(&inner, "2020-03-31 10:00:00", 200).await;
        let store = Lagging(inner);

        let series = HistoricalReconstructor::new(&store)
            .reconstruct(&[], None)
            .await
            .unwrap();
        let days: Vec<_> = series.iter().map(|e| e.day.as_str()).collect();
        assert_eq!(days, vec!["2020-03-31"]);
    }
}
