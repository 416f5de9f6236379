/// Running EWMA mean/variance of log(1+volume), smoothed with `alpha = 2/(span+1)`.
/// Carried tick to tick so the z-score reflects the full history rather
/// than a fixed lookback window.
#[derive(Debug, Clone, Copy)]
pub struct VolumeZState {
    mean: f64,
    variance: f64,
    initialized: bool,
}

impl Default for VolumeZState {
    fn default() -> Self {
        Self {
            mean: 0.0,
            variance: 0.0,
            initialized: false,
        }
    }
}

pub const VOLUME_Z_SPAN: usize = 64;
const CLUSTER_THRESHOLD: f64 = 2.0;

impl VolumeZState {
    fn alpha(span: usize) -> f64 {
        2.0 / (span as f64 + 1.0)
    }

    /// Feeds one bar's volume through the EWMA and returns `(vo_z, cluster)`.
    pub fn update(&mut self, volume: f64, span: usize) -> (f64, bool) {
        let x = (1.0 + volume.max(0.0)).ln();
        let alpha = Self::alpha(span);
        if !self.initialized {
            self.mean = x;
            self.variance = 0.0;
            self.initialized = true;
            return (0.0, false);
        }
        let diff = x - self.mean;
        self.mean += alpha * diff;
        self.variance = (1.0 - alpha) * (self.variance + alpha * diff * diff);
        let sigma = self.variance.sqrt();
        let z = if sigma > 1e-9 { diff / sigma } else { 0.0 };
        let clamped = z.clamp(-4.0, 6.0);
        (clamped, clamped >= CLUSTER_THRESHOLD)
    }
}

/// Convenience batch entry point: replays a full volume series through a
/// fresh [`VolumeZState`] and returns the final `(vo_z, cluster)` pair.
pub fn volume_z_last(volumes: &[f64], span: usize) -> (f64, bool) {
    let mut state = VolumeZState::default();
    let mut last = (0.0, false);
    for &v in volumes {
        last = state.update(v, span);
    }
    last
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_volume_yields_small_z() {
        let volumes = vec![1000.0; 80];
        let (z, cluster) = volume_z_last(&volumes, VOLUME_Z_SPAN);
        assert!(z.abs() < 1.0);
        assert!(!cluster);
    }

    #[test]
    fn volume_spike_raises_cluster_flag() {
        let mut volumes = vec![1000.0; 80];
        volumes.push(50_000.0);
        let (z, cluster) = volume_z_last(&volumes, VOLUME_Z_SPAN);
        assert!(z >= 2.0);
        assert!(cluster);
    }

    #[test]
    fn z_score_stays_within_clamp_bounds() {
        let mut volumes = vec![1.0; 80];
        volumes.push(10_000_000.0);
        let (z, _) = volume_z_last(&volumes, VOLUME_Z_SPAN);
        assert!((-4.0..=6.0).contains(&z));
    }
}
