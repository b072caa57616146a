//! Metrics definitions for the refresh pipeline.

use shared::metrics_defs::{MetricDef, MetricType};

pub const REFRESH_DURATION: MetricDef = MetricDef {
    name: "refresh.duration",
    metric_type: MetricType::Histogram,
    description: "Time to complete a refresh of one upstream source in seconds",
};

pub const REFRESH_FAILURES: MetricDef = MetricDef {
    name: "refresh.failures",
    metric_type: MetricType::Counter,
    description: "Number of refreshes that ended in an error",
};

pub const SNAPSHOTS_WRITTEN: MetricDef = MetricDef {
    name: "snapshots.written",
    metric_type: MetricType::Counter,
    description: "Number of case count snapshots persisted",
};

pub const SNAPSHOTS_SKIPPED: MetricDef = MetricDef {
    name: "snapshots.skipped",
    metric_type: MetricType::Counter,
    description: "Number of refreshes that did not produce a newer snapshot",
};

pub const ENRICHMENT_BATCHES: MetricDef = MetricDef {
    name: "enrichment.batches",
    metric_type: MetricType::Counter,
    description: "Number of patient batches sent to the annotation service",
};

pub const HISTORY_DAYS_COMPUTED: MetricDef = MetricDef {
    name: "history.days.computed",
    metric_type: MetricType::Counter,
    description: "Number of days rebuilt from stored snapshots",
};

pub const HISTORY_DAYS_REUSED: MetricDef = MetricDef {
    name: "history.days.reused",
    metric_type: MetricType::Counter,
    description: "Number of days taken from the previously materialized series",
};

pub const HISTORY_LENGTH: MetricDef = MetricDef {
    name: "history.length",
    metric_type: MetricType::Gauge,
    description: "Number of days in the materialized case count history",
};

pub const ALL_METRICS: &[MetricDef] = &[
    REFRESH_DURATION,
    REFRESH_FAILURES,
    SNAPSHOTS_WRITTEN,
    SNAPSHOTS_SKIPPED,
    ENRICHMENT_BATCHES,
    HISTORY_DAYS_COMPUTED,
    HISTORY_DAYS_REUSED,
    HISTORY_LENGTH,
];
