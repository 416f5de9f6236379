use thiserror::Error;

/// Errors surfaced by the storage gateway. Callers branch on variant rather
/// than message text — `Transient` is retryable by the scheduler, the rest
/// are not.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("not found: {what}")]
    NotFound { what: String },

    #[error("conflict writing {what}: {reason}")]
    Conflict { what: String, reason: String },

    #[error("transient storage failure: {reason}")]
    Transient { reason: String },

    #[error("fatal storage failure: {reason}")]
    Fatal { reason: String },
}

impl StorageError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Transient { .. })
    }
}

/// Errors from bar ingestion and alignment.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("source {source} unreachable: {reason}")]
    SourceUnreachable { source: String, reason: String },

    #[error("bar for {key} at {timestamp} failed validation: {reason}")]
    InvalidBar {
        key: String,
        timestamp: i64,
        reason: String,
    },

    #[error("bar timestamp {timestamp} is not aligned to {timeframe} boundaries")]
    Misaligned { timestamp: i64, timeframe: String },

    #[error("rate limited by {source}: retry after {retry_after_secs}s")]
    RateLimited {
        source: String,
        retry_after_secs: u64,
    },
}

/// Errors from the technical-analysis tracker.
#[derive(Debug, Error)]
pub enum TaError {
    #[error("insufficient bars for {key}: have {have}, need {need}")]
    InsufficientBars {
        key: String,
        have: usize,
        need: usize,
    },

    #[error("non-finite value encountered computing {what} for {key}")]
    NonFinite { key: String, what: String },
}

/// Errors from the uptrend state-machine evaluation.
#[derive(Debug, Error)]
pub enum RegimeError {
    #[error("missing ta feature block for {key}")]
    MissingFeatures { key: String },

    #[error("missing or stale engine meta for {key}: {reason}")]
    InvalidMeta { key: String, reason: String },

    #[error("driver {driver} has no composite bars for timeframe {timeframe}")]
    MissingDriverBars { driver: String, timeframe: String },
}

/// Errors from the learning loop (event logging, lesson mining, materialization).
#[derive(Debug, Error)]
pub enum LearningError {
    #[error("trade event {id} missing required scope dimension: {dimension}")]
    IncompleteScope { id: String, dimension: String },

    #[error("lesson scope {scope} has insufficient sample size: {n} < {min}")]
    InsufficientSample { scope: String, n: usize, min: usize },

    #[error("materializer produced an out-of-range multiplier {value} for {kind}")]
    MultiplierOutOfRange { kind: String, value: f64 },
}

/// Errors from bootstrap orchestration.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("required table {table} missing or unreadable: {reason}")]
    SchemaCheckFailed { table: String, reason: String },

    #[error("driver position creation failed for {driver}: {reason}")]
    DriverCreationFailed { driver: String, reason: String },

    #[error("backfill failed for {key}: {reason}")]
    BackfillFailed { key: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_error_transient_is_retryable() {
        let err = StorageError::Transient {
            reason: "pool exhausted".into(),
        };
        assert!(err.is_retryable());
        let err = StorageError::Fatal {
            reason: "disk full".into(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn ingest_error_formatting() {
        let err = IngestError::Misaligned {
            timestamp: 61,
            timeframe: "1m".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("61"));
        assert!(msg.contains("1m"));
    }
}
