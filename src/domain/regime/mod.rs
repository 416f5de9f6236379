pub mod bar;
pub mod bucket;
pub mod constants;
pub mod engine_meta;
pub mod engine_payload;
pub mod ports;
pub mod position;
pub mod ta_features;
pub mod timeframe;

pub use bar::{detect_gaps, BarSource, DriverBar, Gap, Ohlc, OhlcValidationError, TradableBar};
pub use bucket::Bucket;
pub use constants::EngineConstants;
pub use engine_meta::EngineMeta;
pub use engine_payload::{
    Diagnostics, EmergencyExit, EngineFlags, EngineLevels, EnginePayload, EngineScores,
    EngineState, SrContext, SrLevel,
};
pub use ports::{CandleSource, Kline, StorageGateway, StorageResult};
pub use position::{Features, Position, PositionStatus};
pub use ta_features::{
    AtrBlock, EmaLadder, EmaSlopes, Momentum, Separations, TaFeatureBlock, TaMeta, VolumeBlock,
};
pub use timeframe::Timeframe;
