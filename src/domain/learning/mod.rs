pub mod lesson;
pub mod override_row;
pub mod scope;
pub mod trade_event;

pub use lesson::{DecayMeta, DecayState, Lesson, LessonStats, LessonStatus};
pub use override_row::{OverrideCategory, OverrideRow};
pub use scope::{ScopeMap, ScopeSubset, SCOPE_DIMS};
pub use trade_event::{ActionCategory, Decision, EpisodeOutcome, TradeEvent};
