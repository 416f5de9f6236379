use serde::{Deserialize, Serialize};
use std::fmt;

/// Market-cap tier. A token belongs to exactly one bucket at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    Nano,
    Small,
    Mid,
    Big,
}

impl Bucket {
    pub const ALL: [Bucket; 4] = [Bucket::Nano, Bucket::Small, Bucket::Mid, Bucket::Big];

    /// Classify a cached USD market cap into a bucket.
    pub fn classify(market_cap_usd: f64) -> Bucket {
        const TEN_M: f64 = 10_000_000.0;
        const FIFTY_M: f64 = 50_000_000.0;
        const TWO_HUNDRED_M: f64 = 200_000_000.0;

        if market_cap_usd < TEN_M {
            Bucket::Nano
        } else if market_cap_usd < FIFTY_M {
            Bucket::Small
        } else if market_cap_usd < TWO_HUNDRED_M {
            Bucket::Mid
        } else {
            Bucket::Big
        }
    }

    pub fn driver_name(self) -> &'static str {
        match self {
            Bucket::Nano => "nano",
            Bucket::Small => "small",
            Bucket::Mid => "mid",
            Bucket::Big => "big",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.driver_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_matches_thresholds() {
        assert_eq!(Bucket::classify(1.0), Bucket::Nano);
        assert_eq!(Bucket::classify(9_999_999.0), Bucket::Nano);
        assert_eq!(Bucket::classify(10_000_000.0), Bucket::Small);
        assert_eq!(Bucket::classify(49_999_999.0), Bucket::Small);
        assert_eq!(Bucket::classify(50_000_000.0), Bucket::Mid);
        assert_eq!(Bucket::classify(199_999_999.0), Bucket::Mid);
        assert_eq!(Bucket::classify(200_000_000.0), Bucket::Big);
        assert_eq!(Bucket::classify(5_000_000_000.0), Bucket::Big);
    }
}
