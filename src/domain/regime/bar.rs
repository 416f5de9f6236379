use super::timeframe::Timeframe;
use serde::{Deserialize, Serialize};

/// Where a bar's values came from. Mirrors the `source` column on the
/// driver OHLC table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BarSource {
    Binance,
    Hyperliquid,
    Composite,
    Rollup,
    Coingecko,
}

impl BarSource {
    pub fn as_str(self) -> &'static str {
        match self {
            BarSource::Binance => "binance",
            BarSource::Hyperliquid => "hyperliquid",
            BarSource::Composite => "composite",
            BarSource::Rollup => "rollup",
            BarSource::Coingecko => "coingecko",
        }
    }
}

/// A validated OHLCV quadruple shared by both bar families.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ohlc {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum OhlcValidationError {
    #[error("non-positive price in bar (open={open}, high={high}, low={low}, close={close})")]
    NonPositivePrice {
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    },
    #[error("high {high} below max(open,close,low)")]
    HighTooLow { high: f64 },
    #[error("low {low} above min(open,close,high)")]
    LowTooHigh { low: f64 },
    #[error("negative volume {volume}")]
    NegativeVolume { volume: f64 },
}

impl Ohlc {
    pub fn new(open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Composites may legitimately carry an all-zero native leg, so this only
    /// validates the *given* values, never treats zero as an error by itself
    /// unless it makes the bar inverted.
    pub fn validate(&self) -> Result<(), OhlcValidationError> {
        if self.open <= 0.0 || self.high <= 0.0 || self.low <= 0.0 || self.close <= 0.0 {
            return Err(OhlcValidationError::NonPositivePrice {
                open: self.open,
                high: self.high,
                low: self.low,
                close: self.close,
            });
        }
        let max_oc_l = self.open.max(self.close).max(self.low);
        if self.high < max_oc_l {
            return Err(OhlcValidationError::HighTooLow { high: self.high });
        }
        let min_oc_h = self.open.min(self.close).min(self.high);
        if self.low > min_oc_h {
            return Err(OhlcValidationError::LowTooHigh { low: self.low });
        }
        if self.volume < 0.0 {
            return Err(OhlcValidationError::NegativeVolume {
                volume: self.volume,
            });
        }
        Ok(())
    }
}

/// A regime-driver bar: USD-only, scoped by `book_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverBar {
    pub driver: String,
    pub timeframe: Timeframe,
    pub book_id: String,
    pub timestamp: i64,
    pub ohlc_usd: Ohlc,
    pub source: BarSource,
}

impl DriverBar {
    pub fn validate(&self) -> Result<(), OhlcValidationError> {
        self.ohlc_usd.validate()
    }

    pub fn is_timestamp_aligned(&self) -> bool {
        self.timeframe.is_aligned(self.timestamp)
    }
}

/// A tradable (major or lowcap) bar: native + USD OHLC, keyed by
/// `(token_contract, chain, timeframe, timestamp)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradableBar {
    pub token_contract: String,
    pub chain: String,
    pub timeframe: Timeframe,
    pub timestamp: i64,
    pub ohlc_usd: Ohlc,
    /// Native-asset OHLC. Composites may set this to all-zero.
    pub ohlc_native: Option<Ohlc>,
}

impl TradableBar {
    pub fn validate(&self) -> Result<(), OhlcValidationError> {
        self.ohlc_usd.validate()?;
        if let Some(native) = &self.ohlc_native
            && native.open != 0.0
        {
            native.validate()?;
        }
        Ok(())
    }
}

/// A detected gap in a driver's bar series. Logged, never interpolated.
#[derive(Debug, Clone, Copy)]
pub struct Gap {
    pub prev_timestamp: i64,
    pub next_timestamp: i64,
    pub timeframe: Timeframe,
}

impl Gap {
    pub fn length_bars(&self) -> i64 {
        (self.next_timestamp - self.prev_timestamp) / self.timeframe.seconds()
    }
}

/// Scans an ascending-ordered timestamp series for gaps: a gap of length *k*
/// is flagged when successive stored timestamps differ by more than `1.1 * t`.
pub fn detect_gaps(timeframe: Timeframe, timestamps: &[i64]) -> Vec<Gap> {
    let t = timeframe.seconds() as f64;
    timestamps
        .windows(2)
        .filter_map(|pair| {
            let (prev, next) = (pair[0], pair[1]);
            if (next - prev) as f64 > 1.1 * t {
                Some(Gap {
                    prev_timestamp: prev,
                    next_timestamp: next,
                    timeframe,
                })
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ohlc(o: f64, h: f64, l: f64, c: f64, v: f64) -> Ohlc {
        Ohlc::new(o, h, l, c, v)
    }

    #[test]
    fn valid_bar_passes() {
        assert!(ohlc(10.0, 12.0, 9.0, 11.0, 100.0).validate().is_ok());
    }

    #[test]
    fn inverted_high_rejected() {
        assert!(ohlc(10.0, 9.0, 9.0, 11.0, 100.0).validate().is_err());
    }

    #[test]
    fn negative_volume_rejected() {
        assert!(ohlc(10.0, 12.0, 9.0, 11.0, -1.0).validate().is_err());
    }

    #[test]
    fn gap_detection_flags_missing_bars() {
        let timestamps = vec![0, 60, 120, 300, 360];
        let gaps = detect_gaps(Timeframe::M1, &timestamps);
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].prev_timestamp, 120);
        assert_eq!(gaps[0].next_timestamp, 300);
    }
}
