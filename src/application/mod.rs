//! Application layer: the components that turn domain types into the
//! regime/uptrend pipeline and the learning loop. No component here talks
//! to the outside world directly — collaborators are injected as trait
//! objects (`StorageGateway`, `CandleSource`) from `infrastructure`.

/// Bootstrap: idempotent startup verification and driver priming.
pub mod bootstrap;

/// Hand-rolled technical indicators (EMA/ATR/ADX/RSI/regression/volume z-score).
pub mod indicators;

/// Regime driver pipeline: price collection, TA tracking, uptrend engine, A/E calculator.
pub mod regime;

/// Learning loop: event logging, lesson mining, override materialization.
pub mod learning;

/// Recurring-task scheduler wiring the above into cooperating tokio tasks.
pub mod system;
