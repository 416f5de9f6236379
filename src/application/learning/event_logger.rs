//! Event logger: turns a closed trade's recorded `pm_action` strands into
//! rows in the append-only trade-event log. Idempotent by `trade_id`.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::info;

use crate::domain::errors::StorageError;
use crate::domain::learning::{ScopeMap, TradeEvent};
use crate::domain::regime::StorageGateway;

/// One recorded position-management action within a closed trade, the
/// unit the execution collaborator hands to the logger.
#[derive(Debug, Clone)]
pub struct PmActionStrand {
    pub trade_id: String,
    pub module: String,
    pub pattern_key: String,
    pub action_category: crate::domain::learning::ActionCategory,
    pub scope: ScopeMap,
    pub rr: f64,
    pub pnl_usd: f64,
}

/// Appends one `TradeEvent` per strand in `strands`, skipping any whose
/// `trade_id` is already present in storage (per §4.1's `get_events(since,
/// limit)` with optional `trade_id` filter). The `pattern_trade_events`
/// unique index on `(trade_id, action_category)` is the backstop — this
/// query just avoids resubmitting rows we already know are there.
pub async fn log_closed_trade(
    storage: &Arc<dyn StorageGateway>,
    strands: &[PmActionStrand],
) -> Result<usize, StorageError> {
    let mut already_logged: BTreeSet<String> = BTreeSet::new();
    for trade_id in strands.iter().map(|s| s.trade_id.as_str()).collect::<BTreeSet<_>>() {
        let existing = storage.get_trade_events(None, 1, Some(trade_id)).await?;
        if !existing.is_empty() {
            already_logged.insert(trade_id.to_string());
        }
    }

    let fresh: Vec<TradeEvent> = strands
        .iter()
        .filter(|s| !already_logged.contains(&s.trade_id))
        .map(|s| TradeEvent {
            id: uuid::Uuid::new_v4(),
            trade_id: s.trade_id.clone(),
            module: s.module.clone(),
            pattern_key: s.pattern_key.clone(),
            action_category: s.action_category,
            scope: s.scope.clone(),
            rr: s.rr,
            pnl_usd: s.pnl_usd,
            decision: None,
            outcome: None,
            timestamp: chrono::Utc::now(),
        })
        .collect();

    if fresh.is_empty() {
        return Ok(0);
    }
    let n = storage.insert_trade_events(&fresh).await?;
    info!(inserted = n, "logged trade events");
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::learning::ActionCategory;

    fn strand(trade_id: &str, rr: f64) -> PmActionStrand {
        PmActionStrand {
            trade_id: trade_id.to_string(),
            module: "pm".to_string(),
            pattern_key: "s1_entry".to_string(),
            action_category: ActionCategory::Entry,
            scope: ScopeMap::new(),
            rr,
            pnl_usd: 0.0,
        }
    }

    #[test]
    fn strands_filter_skips_seen_trade_ids() {
        let strands = vec![strand("t1", 0.5), strand("t2", -0.2)];
        let seen: BTreeSet<String> = BTreeSet::from(["t1".to_string()]);
        let fresh: Vec<_> = strands.iter().filter(|s| !seen.contains(&s.trade_id)).collect();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].trade_id, "t2");
    }
}
