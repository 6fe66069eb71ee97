//! Concurrent multi-source harvesting under one shared document budget.

pub mod ledger;
pub mod orchestrator;
pub mod pull;

pub use ledger::{LedgerEntry, QuotaWait, SessionLedger, SourceReport, SourceStatus};
pub use orchestrator::{HarvestOutcome, HarvestReport, Harvester};
pub use pull::pull;
