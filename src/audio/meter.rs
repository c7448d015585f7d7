//! RMS level metering

/// Floor reported for silence
pub const SILENCE_DB: f32 = -100.0;

const SMOOTHING: f32 = 0.8;

/// RMS meter with a decaying peak, in dBFS
#[derive(Debug, Clone)]
pub struct LevelMeter {
    rms: f32,
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl LevelMeter {
    pub fn new() -> Self {
        Self { rms: 0.0 }
    }

    /// Feed one buffer and return the current level in dBFS
    pub fn process(&mut self, samples: &[f32]) -> f32 {
        if !samples.is_empty() {
            let sum: f32 = samples.iter().map(|s| s * s).sum();
            let rms = (sum / samples.len() as f32).sqrt();
            // Instant attack, exponential release
            self.rms = rms.max(self.rms * SMOOTHING);
        }
        self.level_db()
    }

    pub fn level_db(&self) -> f32 {
        to_db(self.rms)
    }
}

pub fn to_db(amplitude: f32) -> f32 {
    if amplitude <= 0.0 {
        return SILENCE_DB;
    }
    (20.0 * amplitude.log10()).max(SILENCE_DB)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_scale_and_silence() {
        assert_eq!(to_db(1.0), 0.0);
        assert_eq!(to_db(0.0), SILENCE_DB);
        assert!((to_db(0.5) + 6.0206).abs() < 1e-3);
    }

    #[test]
    fn test_meter_converges_and_decays() {
        let mut meter = LevelMeter::new();
        let loud = vec![0.5f32; 256];
        let mut level = SILENCE_DB;
        for _ in 0..50 {
            level = meter.process(&loud);
        }
        assert!((level + 6.0206).abs() < 0.1);

        let quiet = meter.process(&[0.0; 256]);
        assert!(quiet < level);
        assert!(quiet > SILENCE_DB);
    }
}
