pub mod ema;
pub mod regression;
pub mod volume_z;
pub mod wilder;

pub use ema::{ema_last, ema_series};
pub use regression::{ema_slope_delta, ema_slope_normalized, lin_slope, linreg_slope};
pub use volume_z::{volume_z_last, VolumeZState, VOLUME_Z_SPAN};
pub use wilder::{adx_series_wilder, atr_series_wilder, rsi, rsi_series};
