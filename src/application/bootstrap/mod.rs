//! Bootstrap: idempotent startup verification. Owns the one-time setup
//! sequence the scheduler waits on before starting recurring tasks.

pub mod orchestrator;

pub use orchestrator::{
    BootstrapOrchestrator, BootstrapReport, BootstrapSources, BootstrapStatus,
    LiveStreamIngesterHandle, WalletFreshnessCheck, ALL_DRIVERS, REQUIRED_DRIVERS,
};
