//! Learning loop: an append-only trade-event log, a scope-lattice lesson
//! miner, and a materializer that turns active lessons into the override
//! rows the engine and execution collaborator consume.

pub mod event_logger;
pub mod materializer;
pub mod meta_learning;
pub mod miner;

pub use event_logger::{log_closed_trade, PmActionStrand};
pub use materializer::materialize_overrides;
pub use meta_learning::{cluster_lessons, estimate_half_lives, suggest_regime_weights, LessonCluster};
pub use miner::{compute_lesson_stats, mine_lessons, mine_tuning_rate_lessons, TuningRateCounts, N_MIN, VAR_PRIOR};
