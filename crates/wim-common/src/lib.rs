//! Shared types for the web inventory reconciliation pipeline.
//!
//! [`types`] holds the persisted entities (domains, FQDNs, certificates) and
//! their status enums, [`facts`] the raw observations an enrichment source
//! produces, and [`report`] the run-level outcome records.

pub mod dns;
pub mod facts;
pub mod report;
pub mod types;
