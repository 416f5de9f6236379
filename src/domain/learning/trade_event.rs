use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::scope::ScopeMap;

/// The coarse action a trade event represents. Hard partition: lessons
/// never mix entries with exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionCategory {
    Entry,
    Add,
    Trim,
    Exit,
    EmergencyExit,
}

/// Whether a signal was acted on or passed over. Only set on events that
/// also carry an `outcome`, i.e. signal-evaluation episodes rather than
/// plain trade closures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Acted,
    Skipped,
}

/// Realized result of a signal-evaluation episode, independent of `rr`.
/// Lets the tuning miner compute miss/false-positive rates from the same
/// fact table the pm-strength miner reads `rr` from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeOutcome {
    Success,
    Failure,
}

/// One append-only record in the trade-event log. Written once at the
/// moment an outcome is known (never updated); the miner treats the log
/// as a pure fact table. `decision`/`outcome` are only populated for
/// signal-evaluation episodes the tuning miner consumes; plain trade
/// closures leave them `None` and only feed the pm-strength miner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeEvent {
    pub id: Uuid,
    /// The closed position's id, shared by every strand the event logger
    /// emits for that trade. This, not `id`, is the dedup key (§3/§6):
    /// re-processing the same `position_closed` event must not insert
    /// fresh rows.
    pub trade_id: String,
    pub module: String,
    pub pattern_key: String,
    pub action_category: ActionCategory,
    pub scope: ScopeMap,
    /// Realized return ratio for this event (R-multiple or pct return,
    /// module-defined; the miner treats it as dimensionless).
    pub rr: f64,
    /// Realized USD P&L for this event, copied from the trade summary.
    pub pnl_usd: f64,
    pub decision: Option<Decision>,
    pub outcome: Option<EpisodeOutcome>,
    pub timestamp: DateTime<Utc>,
}

impl TradeEvent {
    pub fn group_key(&self) -> (String, ActionCategory) {
        (self.pattern_key.clone(), self.action_category)
    }
}
