//! Regime driver pipeline: price collection, TA feature computation, the
//! uptrend state engine, and the aggressiveness/exitness calculator that
//! consumes its output.

pub mod collector;
pub mod regime_ae;
pub mod ta_tracker;
pub mod uptrend_engine;

pub use collector::{
    compute_alt_composite, compute_bucket_composite, composite_ohlc, dominance_point,
    PriceCollector,
};
pub use regime_ae::{compute_a_e, AeInputs, DriverSnapshot};
pub use ta_tracker::compute_ta_feature_block;
pub use uptrend_engine::{bucket_driver_key, evaluate_tick};
