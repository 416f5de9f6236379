//! Cooperative scheduler: collector, TA+engine, rollup, and learning tasks.

pub mod scheduler;

pub use scheduler::{
    run_materializer_pass, run_meta_learning_pass, run_miner_pass, run_ta_engine_pass,
    spawn_shutdown_listener, DirectCollectors, RegimeScheduler,
};
