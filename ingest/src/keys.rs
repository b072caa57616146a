//! Store keys written by the refresh pipeline.

/// Latest regional case counts. Snapshots live under `case_counts/<instant>`.
pub const CASE_COUNTS: &str = "case_counts";
pub const SNAPSHOT_PREFIX: &str = "case_counts/";
pub const LAST_UPDATED_ORIGIN: &str = "last_updated_origin";
pub const LAST_REFRESHED: &str = "last_refreshed";
pub const NOTIFICATIONS: &str = "notifications";

pub const CACHED_CASE_COUNTS: &str = "cached_case_counts";
pub const CACHED_CASE_COUNTS_HISTORY: &str = "cached_case_counts_history";
pub const CACHED_TESTING_HISTORY: &str = "cached_testing_history";
pub const CACHED_TESTING_HISTORY_RAW: &str = "cached_testing_history_raw";
pub const CACHED_HOSPITAL_BEDS_COUNT: &str = "cached_hospital_beds_count";
pub const CACHED_MEDICAL_COLLEGES: &str = "cached_medical_colleges";
pub const CACHED_UNOFFICIAL_SRC_PREFIX: &str = "cached_unofficial_src_";

pub const PATIENT_DB_SOURCE: &str = "covid19india.org";

pub fn unofficial_source(source: &str) -> String {
    format!("{CACHED_UNOFFICIAL_SRC_PREFIX}{source}")
}
