//! Peak compressor / limiter
//!
//! One processor is shared by every track. It is re-parameterized at the
//! start of each playback rather than re-allocated.

/// Peak detector attack time in milliseconds
pub const PEAK_ATTACK_MS: f32 = 0.01;

/// Peak detector release time in milliseconds
pub const PEAK_RELEASE_MS: f32 = 10.0;

/// One-pole smoothing coefficient for a time constant at a sample rate
///
/// `1 - exp(-2200 / (time_ms * sample_rate))`. A zero (or negative) time is
/// an instant response.
pub fn coefficient(time_ms: f32, sample_rate: u32) -> f32 {
    if time_ms <= 0.0 || sample_rate == 0 {
        return 1.0;
    }
    1.0 - (-2200.0 / (time_ms * sample_rate as f32)).exp()
}

/// Gain that brings a peak level down to `threshold_db`, never above unity
///
/// `10^(0.05 * min(threshold - 20*log10(|peak|), 0))`
pub fn limiter_gain(peak: f32, threshold_db: f32) -> f32 {
    let level_db = 20.0 * peak.abs().log10();
    let reduction_db = (threshold_db - level_db).min(0.0);
    10f32.powf(0.05 * reduction_db)
}

/// Running average that follows `a` on the way up and `r` on the way down
#[inline]
fn smooth(avg: f32, attack: f32, release: f32, input: f32) -> f32 {
    let coeff = if input > avg { attack } else { release };
    (1.0 - coeff) * avg + coeff * input
}

#[derive(Debug, Clone)]
pub struct DynamicsProcessor {
    sample_rate: u32,
    attack_ms: f32,
    release_ms: f32,
    threshold_db: f32,
    peak_attack: f32,
    peak_release: f32,
    attack: f32,
    release: f32,
    peak_avg: f32,
    gain_avg: f32,
}

impl DynamicsProcessor {
    pub fn new(sample_rate: u32, attack_ms: f32, release_ms: f32, threshold_db: f32) -> Self {
        let mut processor = Self {
            sample_rate,
            attack_ms,
            release_ms,
            threshold_db,
            peak_attack: 1.0,
            peak_release: 1.0,
            attack: 1.0,
            release: 1.0,
            peak_avg: 0.0,
            gain_avg: 1.0,
        };
        processor.configure(sample_rate, attack_ms, release_ms, threshold_db);
        processor
    }

    /// Recompute all coefficients and reset the running averages
    ///
    /// Called when a track starts, so every playback begins from a clean
    /// detector (peak 0, gain 1).
    pub fn configure(&mut self, sample_rate: u32, attack_ms: f32, release_ms: f32, threshold_db: f32) {
        self.sample_rate = sample_rate;
        self.attack_ms = attack_ms;
        self.release_ms = release_ms;
        self.threshold_db = threshold_db;
        self.peak_attack = coefficient(PEAK_ATTACK_MS, sample_rate);
        self.peak_release = coefficient(PEAK_RELEASE_MS, sample_rate);
        self.attack = coefficient(attack_ms, sample_rate);
        self.release = coefficient(release_ms, sample_rate);
        self.peak_avg = 0.0;
        self.gain_avg = 1.0;
    }

    /// Change the threshold without touching the detector state
    pub fn set_threshold(&mut self, threshold_db: f32) {
        self.threshold_db = threshold_db;
    }

    pub fn threshold(&self) -> f32 {
        self.threshold_db
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Compress one sample
    #[inline]
    pub fn process(&mut self, x: f32) -> f32 {
        self.peak_avg = smooth(self.peak_avg, self.peak_attack, self.peak_release, x.abs());
        let target = limiter_gain(self.peak_avg, self.threshold_db);
        // Gain drops with the release coefficient and recovers with the
        // attack coefficient.
        self.gain_avg = smooth(self.gain_avg, self.release, self.attack, target);
        x * self.gain_avg
    }

    /// Volume scaling, compression and hard clamp for one output sample
    ///
    /// Volumes are percentages (100 = unity).
    #[inline]
    pub fn process_with_volume(&mut self, x: f32, track_volume: f32, global_volume: f32) -> f32 {
        let scaled = x * track_volume * global_volume / 10_000.0;
        self.process(scaled).clamp(-1.0, 1.0)
    }
}
