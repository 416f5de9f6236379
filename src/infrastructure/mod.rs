/// Candle sources: venue-specific adapters (Binance, Hyperliquid,
/// dominance feed) plus a deterministic mock for tests.
pub mod candle_sources;

/// Shared HTTP client factory and circuit breaker.
pub mod core;

/// Push-based metrics (Prometheus registry + JSON snapshot reporter).
pub mod observability;

/// SQLite-backed storage gateway and schema.
pub mod persistence;
