//! Sample type and per-sample hygiene
//!
//! - Denormal flush and NaN/Inf scrubbing
//! - DC blocker
//! - Soft clip (rack stage) and safety clip (engine output stage)
//! - dB ↔ gain conversion
//! - Block channel helpers

use std::f64::consts::PI;

/// Audio sample type used at every block boundary
pub type Sample = f32;

/// Magnitudes below this are flushed to zero in recursive states
pub const DENORMAL_THRESHOLD: f64 = 1e-18;

/// Amplitude ceiling enforced by the rack's final stage
pub const HARD_LIMIT: Sample = 2.0;

// ============ Scrubbing ============

/// Replace a non-finite sample with zero
#[inline(always)]
pub fn scrub(x: Sample) -> Sample {
    if x.is_finite() { x } else { 0.0 }
}

/// Scrub a whole buffer in place, returning how many samples were replaced
#[inline]
pub fn scrub_block(buffer: &mut [Sample]) -> usize {
    let mut replaced = 0;
    for s in buffer.iter_mut() {
        if !s.is_finite() {
            *s = 0.0;
            replaced += 1;
        }
    }
    replaced
}

/// Flush denormal-range values in a recursive state to zero
#[inline(always)]
pub fn flush_denormal(x: f64) -> f64 {
    if x.abs() < DENORMAL_THRESHOLD { 0.0 } else { x }
}

/// Restore a filter state that went non-finite
#[inline(always)]
pub fn sanitize_state(x: f64) -> f64 {
    if x.is_finite() { flush_denormal(x) } else { 0.0 }
}

// ============ Clipping ============

/// Rack soft clip: `tanh(0.7·x) / 0.7`, bounded by ±1/0.7
#[inline(always)]
pub fn soft_clip(x: Sample) -> Sample {
    (x * 0.7).tanh() / 0.7
}

/// Engine output stage: identity for |x| ≤ 1.5, saturates toward ±1.95
#[inline(always)]
pub fn safety_clip(x: Sample) -> Sample {
    const KNEE: Sample = 1.5;
    const HEADROOM: Sample = 0.45;
    let a = x.abs();
    if a <= KNEE {
        x
    } else {
        let y = KNEE + HEADROOM * ((a - KNEE) / HEADROOM).tanh();
        y.copysign(x)
    }
}

/// Hard limit to the rack ceiling
#[inline(always)]
pub fn hard_limit(x: Sample) -> Sample {
    x.clamp(-HARD_LIMIT, HARD_LIMIT)
}

/// Scrub, then blend dry and wet and pass through the safety clip.
///
/// With `mix == 0` the dry sample is returned bit-exact, with `mix == 1` the
/// clipped wet sample.
#[inline(always)]
pub fn blend(dry: Sample, wet: Sample, mix: Sample) -> Sample {
    if mix <= 0.0 {
        return dry;
    }
    let wet = scrub(wet);
    if mix >= 1.0 {
        return safety_clip(wet);
    }
    safety_clip(dry + (wet - dry) * mix)
}

// ============ Level Conversion ============

/// Decibels to linear gain (f32); -144 dB and below map to zero
#[inline]
pub fn db_to_gain(db: f32) -> f32 {
    if db <= -144.0 { 0.0 } else { 10.0_f32.powf(db / 20.0) }
}

/// Linear gain to decibels (f32), floored at -144 dB
#[inline]
pub fn gain_to_db(gain: f32) -> f32 {
    if gain <= 1e-8 { -144.0 } else { 20.0 * gain.log10() }
}

/// Decibels to linear gain (f64)
#[inline]
pub fn db_to_gain_f64(db: f64) -> f64 {
    if db <= -144.0 { 0.0 } else { 10.0_f64.powf(db / 20.0) }
}

/// Linear gain to decibels (f64), floored at -144 dB
#[inline]
pub fn gain_to_db_f64(gain: f64) -> f64 {
    if gain <= 1e-8 { -144.0 } else { 20.0 * gain.log10() }
}

// ============ Stereo Helpers ============

/// Encode L/R into mid/side
#[inline(always)]
pub fn to_mid_side(left: f64, right: f64) -> (f64, f64) {
    ((left + right) * 0.5, (left - right) * 0.5)
}

/// Decode mid/side into L/R
#[inline(always)]
pub fn from_mid_side(mid: f64, side: f64) -> (f64, f64) {
    (mid + side, mid - side)
}

/// Split a host block into its first channel and optional second channel.
///
/// Blocks with more than two channels expose only the first two.
#[inline]
pub fn split_channels<'a>(
    block: &'a mut [&mut [Sample]],
) -> Option<(&'a mut [Sample], Option<&'a mut [Sample]>)> {
    match block {
        [] => None,
        [mono] => Some((&mut **mono, None)),
        [left, right, ..] => {
            let frames = left.len().min(right.len());
            Some((&mut left[..frames], Some(&mut right[..frames])))
        }
    }
}

// ============ DC Blocker ============

/// First-order DC blocker: `y = x − x₁ + R·y₁`
#[derive(Debug, Clone)]
pub struct DcBlocker {
    r: f64,
    cutoff_hz: f64,
    x1: f64,
    y1: f64,
}

impl DcBlocker {
    pub fn new(cutoff_hz: f64, sample_rate: f64) -> Self {
        let mut blocker = Self {
            r: 0.995,
            cutoff_hz,
            x1: 0.0,
            y1: 0.0,
        };
        blocker.set_sample_rate(sample_rate);
        blocker
    }

    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        let r = 1.0 - 2.0 * PI * self.cutoff_hz / sample_rate.max(1.0);
        self.r = r.clamp(0.9, 0.99999);
    }

    #[inline]
    pub fn process(&mut self, x: f64) -> f64 {
        let y = x - self.x1 + self.r * self.y1;
        self.x1 = x;
        self.y1 = flush_denormal(y);
        self.y1
    }

    pub fn reset(&mut self) {
        self.x1 = 0.0;
        self.y1 = 0.0;
    }
}
