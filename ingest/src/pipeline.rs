//! Refresh orchestration: fetch each upstream source, normalize it and
//! persist the results to the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use crate::annotation::{self, AnnotationService, HttpAnnotationService};
use crate::canonical::build_canonical_record;
use crate::case_counts::CaseCountExtractor;
use crate::config::{Config, Sources, StoreType};
use crate::errors::{RefreshError, Result};
use crate::fetch::{HttpFetch, ReqwestFetch, fetch_ok};
use crate::history::{HistoricalReconstructor, snapshot_key};
use crate::hospitals::{self, HospitalBeds};
use crate::keys;
use crate::locks::{RefreshLocks, Source};
use crate::metrics_defs::{
    HISTORY_LENGTH, REFRESH_DURATION, REFRESH_FAILURES, SNAPSHOTS_SKIPPED, SNAPSHOTS_WRITTEN,
};
use crate::notifications::extract_notifications;
use crate::patients::{self, StatewiseSummary};
use crate::reference::{ForeignCaseReference, ReferenceError};
use crate::sheets::{GoogleSheetsSource, SpreadsheetSource};
use crate::store::{FilesystemStore, KeyValueStore, MemoryStore, get_json, put_json, put_once};
use crate::testing;
use crate::timestamp::{from_millis, iso_millis, parse_origin_update};
use crate::types::{CaseCountSnapshot, DailyCaseCountEntry, PatientRecord, UnofficialSummary};
use shared::{counter, gauge, histogram};

/// A sheet range read from one spreadsheet.
pub struct SheetRange {
    pub source: Arc<dyn SpreadsheetSource>,
    pub range: String,
}

/// Patient level sheets, ordered oldest to newest, plus the optional
/// statewise summary sheet.
pub struct PatientSheets {
    pub sheets: Vec<SheetRange>,
    pub statewise: Option<SheetRange>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OfficialRefresh {
    /// `None` when the page carried no recognizable "as on" time.
    pub origin_update: Option<DateTime<Utc>>,
    pub regions: usize,
    pub notifications: usize,
    pub snapshot_written: bool,
    pub history_days: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TestingRefresh {
    pub records: usize,
    pub days: usize,
    pub last_origin_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HospitalRefresh {
    pub regions: usize,
    pub medical_colleges: usize,
    pub last_origin_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatientDbRefresh {
    pub patients: usize,
    pub statewise: bool,
}

/// Value cached under `cached_unofficial_src_covid19india.org`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientDbDocument {
    pub source: String,
    #[serde(with = "iso_millis")]
    pub last_refreshed: DateTime<Utc>,
    pub summary: PatientDbSummary,
    pub raw_patient_data: Vec<PatientRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientDbSummary {
    pub total: usize,
}

/// Value cached under `cached_unofficial_src_covid19india.org_statewise`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatewiseDocument {
    pub source: String,
    #[serde(with = "iso_millis")]
    pub last_refreshed: DateTime<Utc>,
    #[serde(flatten)]
    pub summary: StatewiseSummary,
}

/// Envelope of a previously materialized history series.
#[derive(Deserialize)]
struct SeriesEnvelope {
    data: Vec<DailyCaseCountEntry>,
}

fn statewise_key() -> String {
    keys::unofficial_source(&format!("{}_statewise", keys::PATIENT_DB_SOURCE))
}

pub struct Pipeline {
    sources: Sources,
    store: Arc<dyn KeyValueStore>,
    fetch: Arc<dyn HttpFetch>,
    reference: ForeignCaseReference,
    patient_sheets: Option<PatientSheets>,
    annotator: Option<Arc<dyn AnnotationService>>,
    locks: RefreshLocks,
}

impl Pipeline {
    pub fn new(
        sources: Sources,
        store: Arc<dyn KeyValueStore>,
        fetch: Arc<dyn HttpFetch>,
        reference: ForeignCaseReference,
    ) -> Self {
        Pipeline {
            sources,
            store,
            fetch,
            reference,
            patient_sheets: None,
            annotator: None,
            locks: RefreshLocks::new(),
        }
    }

    pub fn with_patient_sheets(mut self, sheets: PatientSheets) -> Self {
        self.patient_sheets = Some(sheets);
        self
    }

    pub fn with_annotator(mut self, annotator: Arc<dyn AnnotationService>) -> Self {
        self.annotator = Some(annotator);
        self
    }

    /// Wires up the production adapters described by `config`.
    pub fn from_config(config: &Config) -> std::result::Result<Self, ReferenceError> {
        let reference = ForeignCaseReference::from_file(&config.reference.path)?;
        tracing::info!(
            version = %reference.version,
            regions = reference.foreign.len(),
            "Loaded foreign case reference"
        );

        let store: Arc<dyn KeyValueStore> = match &config.store {
            StoreType::Filesystem { base_dir } => Arc::new(FilesystemStore::new(base_dir)),
            StoreType::Memory => Arc::new(MemoryStore::new()),
        };
        let fetch: Arc<dyn HttpFetch> = Arc::new(ReqwestFetch::new());

        let mut pipeline = Pipeline::new(config.sources.clone(), store, fetch.clone(), reference);

        if let Some(patient_db) = &config.patient_db {
            let sheet = |spreadsheet_id: &str, range: &str| {
                let mut source = GoogleSheetsSource::new(
                    fetch.clone(),
                    spreadsheet_id.to_string(),
                    patient_db.api_key.clone(),
                );
                if let Some(base_url) = &patient_db.base_url {
                    source = source.with_base_url(base_url.as_str());
                }
                SheetRange {
                    source: Arc::new(source),
                    range: range.to_string(),
                }
            };

            pipeline = pipeline.with_patient_sheets(PatientSheets {
                sheets: patient_db
                    .sheets
                    .iter()
                    .map(|s| sheet(&s.spreadsheet_id, &s.range))
                    .collect(),
                statewise: patient_db
                    .statewise
                    .as_ref()
                    .map(|s| sheet(&s.spreadsheet_id, &s.range)),
            });
        }

        if let Some(annotation) = &config.annotation {
            pipeline = pipeline.with_annotator(Arc::new(HttpAnnotationService::new(
                fetch,
                annotation.url.clone(),
            )));
        }

        Ok(pipeline)
    }

    pub fn store(&self) -> &dyn KeyValueStore {
        self.store.as_ref()
    }

    /// Holds the refresh permit of `source` while `refresh` runs and records
    /// its duration and outcome.
    async fn instrumented<T, F>(&self, source: Source, refresh: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let _permit = self.locks.try_permit(source)?;
        let start = Instant::now();
        tracing::info!(source = source.as_str(), "Refresh started");

        let result = refresh.await;

        histogram!(REFRESH_DURATION, "source" => source.as_str())
            .record(start.elapsed().as_secs_f64());
        match &result {
            Ok(_) => tracing::info!(
                source = source.as_str(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Refresh finished"
            ),
            Err(err) => {
                counter!(REFRESH_FAILURES, "source" => source.as_str()).increment(1);
                tracing::error!(source = source.as_str(), error = %err, "Refresh failed");
            }
        }
        result
    }

    /// Refreshes the official case counts, notifications, the live canonical
    /// record and the daily history.
    pub async fn refresh_official(&self) -> Result<OfficialRefresh> {
        self.instrumented(Source::Official, self.official()).await
    }

    async fn official(&self) -> Result<OfficialRefresh> {
        let store = self.store.as_ref();
        let previous_origin: i64 = store
            .get(keys::LAST_UPDATED_ORIGIN)
            .await?
            .and_then(|raw| raw.trim().parse().ok())
            .unwrap_or(0);

        let page = fetch_ok(self.fetch.as_ref(), self.sources.official_url.as_str()).await?;
        let content = page.text();
        let current_origin = parse_origin_update(content);
        let refreshed = Utc::now().timestamp_millis();

        let extractor = CaseCountExtractor::new(&self.reference);
        let records = match &self.sources.state_feed_url {
            Some(url) => {
                let feed: JsonValue = fetch_ok(self.fetch.as_ref(), url.as_str()).await?.json()?;
                extractor.from_state_feed(&feed)?
            }
            None => extractor.from_html(content)?,
        };
        let notifications = extract_notifications(content, &self.sources.official_url);

        let case_counts = serde_json::to_string(&records)?;
        let origin_update = from_millis(current_origin).filter(|_| current_origin > 0);
        let live = origin_update.map(|origin_timestamp| CaseCountSnapshot {
            origin_timestamp,
            records: records.clone(),
        });

        // The origin marker only advances once the snapshot is stored, so a
        // failed write is retried on the next refresh.
        let mut snapshot_written = false;
        if let Some(snapshot) = &live
            && current_origin > previous_origin
        {
            let key = snapshot_key(&snapshot.origin_timestamp);
            snapshot_written = put_once(store, &key, case_counts.clone()).await?;
            if snapshot_written {
                tracing::info!(key, "Wrote case count snapshot");
            }
        }
        if snapshot_written {
            counter!(SNAPSHOTS_WRITTEN).increment(1);
        } else {
            counter!(SNAPSHOTS_SKIPPED).increment(1);
            tracing::debug!(current_origin, previous_origin, "No newer origin update, snapshot skipped");
        }

        tokio::try_join!(
            store.put(keys::LAST_UPDATED_ORIGIN, current_origin.to_string()),
            store.put(keys::LAST_REFRESHED, refreshed.to_string()),
            store.put(keys::CASE_COUNTS, case_counts),
            put_json(store, keys::NOTIFICATIONS, &notifications),
        )?;

        let mut canonical = build_canonical_record(&records);
        canonical.unofficial_summary = self.unofficial_summary().await.map(|s| vec![s]);
        put_json(store, keys::CACHED_CASE_COUNTS, &canonical).await?;

        let previous = self.previous_history().await?;
        let history = HistoricalReconstructor::new(store)
            .reconstruct(&previous, live.as_ref())
            .await?;
        put_json(store, keys::CACHED_CASE_COUNTS_HISTORY, &history).await?;
        gauge!(HISTORY_LENGTH).set(history.len() as f64);

        Ok(OfficialRefresh {
            origin_update,
            regions: records.len(),
            notifications: notifications.len(),
            snapshot_written,
            history_days: history.len(),
        })
    }

    /// Latest statewise total of the unofficial source. Any failure means
    /// "no summary".
    async fn unofficial_summary(&self) -> Option<UnofficialSummary> {
        match get_json::<StatewiseDocument>(self.store.as_ref(), &statewise_key()).await {
            Ok(Some(document)) => {
                let total = document.summary.total;
                Some(UnofficialSummary {
                    source: document.source,
                    total: total.confirmed,
                    recovered: total.recovered,
                    deaths: total.deaths,
                    active: total.active,
                })
            }
            Ok(None) => None,
            Err(err) => {
                tracing::debug!(error = %err, "Unofficial summary unavailable");
                None
            }
        }
    }

    async fn previous_history(&self) -> Result<Vec<DailyCaseCountEntry>> {
        match &self.sources.history_comparison_url {
            Some(url) => {
                let envelope: SeriesEnvelope =
                    fetch_ok(self.fetch.as_ref(), url.as_str()).await?.json()?;
                Ok(envelope.data)
            }
            None => Ok(get_json(self.store.as_ref(), keys::CACHED_CASE_COUNTS_HISTORY)
                .await?
                .unwrap_or_default()),
        }
    }

    /// Refreshes the raw and per-day testing series.
    pub async fn refresh_testing(&self) -> Result<TestingRefresh> {
        self.instrumented(Source::Testing, self.testing()).await
    }

    async fn testing(&self) -> Result<TestingRefresh> {
        let document: JsonValue = fetch_ok(self.fetch.as_ref(), self.sources.testing_url.as_str())
            .await?
            .json()?;
        let records = testing::records_from_feed(&document)?;
        let daily = testing::per_day(&records);

        let store = self.store.as_ref();
        tokio::try_join!(
            put_json(store, keys::CACHED_TESTING_HISTORY_RAW, &records),
            put_json(store, keys::CACHED_TESTING_HISTORY, &daily),
        )?;

        Ok(TestingRefresh {
            records: records.len(),
            days: daily.len(),
            last_origin_update: records.last().map(|r| r.timestamp),
        })
    }

    /// Refreshes hospital bed counts and medical colleges. Both feeds are
    /// attempted; the first failure is returned.
    pub async fn refresh_hospital_beds(&self) -> Result<HospitalRefresh> {
        self.instrumented(Source::HospitalBeds, self.hospital_beds()).await
    }

    async fn hospital_beds(&self) -> Result<HospitalRefresh> {
        let beds = self.bed_counts().await;
        let colleges = self.medical_colleges().await;
        let beds = beds?;

        Ok(HospitalRefresh {
            regions: beds.regional.len(),
            medical_colleges: colleges?,
            last_origin_update: beds.last_origin_update(),
        })
    }

    async fn bed_counts(&self) -> Result<HospitalBeds> {
        let content: JsonValue =
            fetch_ok(self.fetch.as_ref(), self.sources.hospital_beds_url.as_str())
                .await?
                .json()?;
        let beds = hospitals::hospital_beds_from_feed(&content)?;
        put_json(self.store.as_ref(), keys::CACHED_HOSPITAL_BEDS_COUNT, &beds).await?;
        Ok(beds)
    }

    async fn medical_colleges(&self) -> Result<usize> {
        let content: JsonValue =
            fetch_ok(self.fetch.as_ref(), self.sources.medical_colleges_url.as_str())
                .await?
                .json()?;
        let colleges = hospitals::medical_colleges_from_feed(&content)?;
        put_json(self.store.as_ref(), keys::CACHED_MEDICAL_COLLEGES, &colleges).await?;
        Ok(colleges.medical_colleges.len())
    }

    /// Refreshes the crowd sourced patient database and statewise summary.
    /// Returns `None` when no patient sheets are configured.
    pub async fn refresh_patient_db(&self) -> Result<Option<PatientDbRefresh>> {
        let Some(sheets) = &self.patient_sheets else {
            tracing::debug!("No patient sheets configured");
            return Ok(None);
        };
        self.instrumented(Source::PatientDb, self.patient_db(sheets))
            .await
            .map(Some)
    }

    async fn patient_db(&self, sheets: &PatientSheets) -> Result<PatientDbRefresh> {
        let mut per_sheet = Vec::with_capacity(sheets.sheets.len());
        for sheet in &sheets.sheets {
            let grid = sheet.source.rows(&sheet.range).await?;
            let records = patients::trim_trailing(patients::records_from_grid(&grid));
            tracing::debug!(
                sheet = sheet.source.name(),
                range = %sheet.range,
                records = records.len(),
                "Read patient sheet"
            );
            per_sheet.push(records);
        }

        let mut merged = patients::merge_sources(per_sheet);
        if let Some(annotator) = &self.annotator {
            merged = annotation::enrich(merged, annotator.as_ref()).await?;
        }

        let now = Utc::now();
        let store = self.store.as_ref();
        let document = PatientDbDocument {
            source: keys::PATIENT_DB_SOURCE.to_string(),
            last_refreshed: now,
            summary: PatientDbSummary {
                total: merged.len(),
            },
            raw_patient_data: merged,
        };
        put_json(store, &keys::unofficial_source(keys::PATIENT_DB_SOURCE), &document).await?;

        let mut statewise = false;
        if let Some(sheet) = &sheets.statewise {
            let grid = sheet.source.rows(&sheet.range).await?;
            let summary = patients::statewise_from_grid(&grid).ok_or_else(|| {
                RefreshError::MalformedShape(format!(
                    "statewise sheet {} has no data rows",
                    sheet.source.name()
                ))
            })?;
            let document = StatewiseDocument {
                source: keys::PATIENT_DB_SOURCE.to_string(),
                last_refreshed: now,
                summary,
            };
            put_json(store, &statewise_key(), &document).await?;
            statewise = true;
        }

        Ok(PatientDbRefresh {
            patients: document.summary.total,
            statewise,
        })
    }

    /// Runs every refresh concurrently. Each source reports independently.
    pub async fn refresh_all(&self) -> Vec<(Source, Result<()>)> {
        let (official, testing, hospitals, patient_db) = tokio::join!(
            self.refresh_official(),
            self.refresh_testing(),
            self.refresh_hospital_beds(),
            self.refresh_patient_db(),
        );

        vec![
            (Source::Official, official.map(drop)),
            (Source::Testing, testing.map(drop)),
            (Source::HospitalBeds, hospitals.map(drop)),
            (Source::PatientDb, patient_db.map(drop)),
        ]
    }
}
