//! Normalization and historical reconstruction of COVID-19 case data for
//! India.
//!
//! Upstream sources (the official dashboard, the testing feed, hospital
//! capacity feeds and crowd sourced sheets) are fetched, normalized into the
//! record types of [`types`] and cached in a [`store::KeyValueStore`].
//! [`pipeline::Pipeline`] drives a refresh of each source.

pub mod annotation;
pub mod canonical;
pub mod case_counts;
pub mod config;
pub mod errors;
pub mod fetch;
pub mod field_map;
pub mod history;
pub mod hospitals;
pub mod html;
pub mod keys;
pub mod locks;
pub mod metrics_defs;
pub mod notifications;
pub mod patients;
pub mod pipeline;
pub mod reference;
pub mod sheets;
pub mod store;
pub mod testing;
pub mod timestamp;
pub mod types;

#[cfg(test)]
mod testutils;

pub use errors::{ErrorPayload, RefreshError};
pub use pipeline::Pipeline;
