//! Regime/uptrend engine and learning-loop domain types. Pure data and
//! pure functions only — no I/O, no framework dependencies.

/// Regime driver pipeline: bars, positions, TA features, engine payload/meta,
/// and the storage/candle-source port traits every other component depends on.
pub mod regime;

/// Learning loop: trade events, scope, lessons, overrides.
pub mod learning;

/// Domain-specific error taxonomy.
pub mod errors;
