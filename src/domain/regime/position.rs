use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::engine_meta::EngineMeta;
use super::engine_payload::{EnginePayload, EngineState};
use super::ta_features::TaFeatureBlock;
use super::timeframe::Timeframe;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Active,
    RegimeDriver,
    Closed,
}

/// The free-form `features` map, modeled as three tagged structs rather
/// than an untyped JSON blob. Serialized as a single JSON document at the
/// storage boundary (`read_features`/`write_features`) — never partially
/// written.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Features {
    pub ta: Option<TaFeatureBlock>,
    pub uptrend_engine_v4: Option<EnginePayload>,
    pub uptrend_engine_v4_meta: Option<EngineMeta>,
    /// Optional support/resistance geometry, consumed by `sr_context`.
    pub geometry: Option<Vec<super::engine_payload::SrLevel>>,
}

/// The unit of analysis. A regime-driver position is synthetic: sentinel
/// contract like `regime_btc`, chain `regime`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub token_contract: String,
    pub chain: String,
    pub ticker: String,
    pub timeframe: Timeframe,
    pub status: PositionStatus,
    pub book_id: String,
    pub bars_count: u32,
    pub features: Features,
    pub state: EngineState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    pub fn new_regime_driver(
        driver: &str,
        timeframe: Timeframe,
        book_id: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            token_contract: format!("regime_{driver}"),
            chain: "regime".to_string(),
            ticker: driver.to_uppercase(),
            timeframe,
            status: PositionStatus::RegimeDriver,
            book_id: book_id.to_string(),
            bars_count: 0,
            features: Features::default(),
            state: EngineState::S4,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_regime_driver(&self) -> bool {
        self.status == PositionStatus::RegimeDriver
    }

    pub fn latest_engine_payload(&self) -> Option<&EnginePayload> {
        self.features.uptrend_engine_v4.as_ref()
    }
}
