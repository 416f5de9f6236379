use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the three timeframes the regime engine tracks. Ordering matters
/// for cadence (macro/meso/micro weighting in the alignment/exposure calculator).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 3] = [Timeframe::M1, Timeframe::H1, Timeframe::D1];

    /// Bucket width in seconds, used for alignment checks (`timestamp mod t == 0`).
    pub fn seconds(self) -> i64 {
        match self {
            Timeframe::M1 => 60,
            Timeframe::H1 => 3_600,
            Timeframe::D1 => 86_400,
        }
    }

    /// Minimum bars the TA tracker requires before it will emit a feature block.
    pub fn min_bars(self) -> usize {
        match self {
            Timeframe::M1 => 333,
            Timeframe::H1 => 72,
            Timeframe::D1 => 30,
        }
    }

    /// Per-timeframe backfill cap.
    pub fn backfill_cap_bars(self) -> usize {
        match self {
            Timeframe::M1 => 2_880, // 2 days
            Timeframe::H1 => 30 * 24,
            Timeframe::D1 => 730,
        }
    }

    pub fn backfill_cap_days(self) -> i64 {
        match self {
            Timeframe::M1 => 2,
            Timeframe::H1 => 30,
            Timeframe::D1 => 730,
        }
    }

    /// True when `ts` falls exactly on this timeframe's bucket boundary.
    pub fn is_aligned(self, ts: i64) -> bool {
        ts.rem_euclid(self.seconds()) == 0
    }

    /// Floors `ts` down to this timeframe's bucket boundary.
    pub fn align(self, ts: i64) -> i64 {
        ts - ts.rem_euclid(self.seconds())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::H1 => "1h",
            Timeframe::D1 => "1d",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Timeframe {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Timeframe::M1),
            "1h" => Ok(Timeframe::H1),
            "1d" => Ok(Timeframe::D1),
            other => anyhow::bail!("invalid timeframe: {other}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_respects_bucket_width() {
        assert!(Timeframe::M1.is_aligned(120));
        assert!(!Timeframe::M1.is_aligned(121));
        assert!(Timeframe::H1.is_aligned(3_600 * 7));
        assert_eq!(Timeframe::D1.align(86_400 + 5), 86_400);
    }
}
