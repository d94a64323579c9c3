//! Asset reconciliation pipeline.
//!
//! [`orchestrator::ReconciliationOrchestrator`] enumerates due assets, asks
//! an [`source::EnrichmentSource`] for fresh facts, derives status with
//! [`derive::derive`] and writes through [`upsert::BatchUpsertEngine`].
//! [`reclaim::CertificateReclamationJob`] is the independent housekeeping
//! job for orphaned certificates.

pub mod derive;
pub mod orchestrator;
pub mod reclaim;
pub mod source;
pub mod upsert;

pub use derive::{derive, DerivationPolicy, DerivedStatus, ValidationError};
pub use orchestrator::{ReconcileOptions, ReconciliationOrchestrator};
pub use reclaim::CertificateReclamationJob;
pub use source::{EnrichmentSource, FetchError};
pub use upsert::{BatchUpsertEngine, FlushOutcome, UpsertError};
