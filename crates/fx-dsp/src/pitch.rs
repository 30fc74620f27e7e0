//! Period detection and TD-PSOLA pitch shifting
//!
//! ## Algorithm
//!
//! 1. Estimate the fundamental period T0 by normalized autocorrelation
//!    (coarse search on a decimated copy, refined at full rate)
//! 2. Track pitch epochs: the local maximum within ±5% of T0 around the
//!    previous epoch + T0, never closer than 0.7·T0
//! 3. Refresh T0 as the median of the latest epoch distances
//! 4. Place synthesis marks spaced T0/α on a timeline delayed by a fixed
//!    latency; each mark takes the grain of the nearest analysis epoch
//! 5. Align each grain within ±0.05·T0 against the accumulated output
//!    (normalized cross-correlation, polarity flip on anti-correlation)
//! 6. Hann-window, equalize energy, scale by `1/√(L/Hs)` and overlap-add
//!
//! Ratios close to irrational values (√2, whole-tone and major-third
//! steps) are served by a sinc-interpolated two-head delay shifter at the
//! same latency.

use std::collections::VecDeque;
use std::f64::consts::{FRAC_1_SQRT_2, PI, SQRT_2};

use fx_core::{Sample, scrub};

use crate::dynamics::RmsDetector;
use crate::modulation::DelayPitchShifter;
use crate::ring_buffer::{Interpolation, RingBuffer};

// ============ Constants ============

/// Shortest period tracked (samples)
pub const MIN_PERIOD: f64 = 16.0;

/// Longest period tracked (seconds)
pub const MAX_PERIOD_SECONDS: f64 = 0.03;

/// Epoch history kept for alignment
const EPOCH_HISTORY_SECONDS: f64 = 2.0;

/// Voicing check cadence (samples)
const ANALYSIS_HOP: usize = 256;

/// Period search cadence while no track is held, in analysis hops
const ESTIMATE_EVERY: u64 = 4;

/// Minimum normalized autocorrelation accepted as voiced
const VOICED_CLARITY: f64 = 0.5;

/// Clarity below which a running track is dropped
const UNVOICED_CLARITY: f64 = 0.3;

/// Below this slow RMS the input counts as silent
const SILENCE_RMS: f64 = 1e-4;

/// Gain of the delayed dry signal while epochs are being gathered
const PRIMING_GAIN: Sample = 0.5;

/// Crossfade between pass-through / PSOLA / fallback (seconds)
const BLEND_SECONDS: f64 = 0.01;

const RATIONAL_RATIOS: [f64; 9] = [0.25, 1.0 / 3.0, 0.5, 2.0 / 3.0, 1.0, 1.5, 2.0, 3.0, 4.0];

const IRRATIONAL_RATIOS: [f64; 6] = [
    FRAC_1_SQRT_2,
    SQRT_2,
    1.122_462_048_309_373, // 2^(2/12)
    0.890_898_718_140_339, // 2^(−2/12)
    1.259_921_049_894_873, // 2^(4/12)
    0.793_700_525_984_1,   // 2^(−4/12)
];

const FALLBACK_TOLERANCE: f64 = 0.01;

/// True when `ratio` should bypass PSOLA for the sinc delay shifter.
///
/// Exact small-integer ratios always stay on PSOLA.
pub fn uses_sinc_fallback(ratio: f64) -> bool {
    if RATIONAL_RATIOS.iter().any(|r| (ratio - r).abs() < 1e-3) {
        return false;
    }
    IRRATIONAL_RATIOS
        .iter()
        .any(|r| (ratio - r).abs() <= FALLBACK_TOLERANCE)
}

// ============ Period Estimation ============

/// Normalized cross-correlation of `x[i]` and `x[i + lag]` over `len` samples
fn normalized_correlation(x: &[f32], lag: usize, len: usize) -> f64 {
    if lag + len > x.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut e0 = 0.0f64;
    let mut e1 = 0.0f64;
    for i in 0..len {
        let a = x[i] as f64;
        let b = x[i + lag] as f64;
        dot += a * b;
        e0 += a * a;
        e1 += b * b;
    }
    let denom = (e0 * e1).sqrt();
    if denom < 1e-12 { 0.0 } else { dot / denom }
}

/// Autocorrelation period estimator.
///
/// Searches lags `[MIN_PERIOD, 0.03·fs]` on a decimated copy, takes the
/// shortest lag scoring at least 85% of the best (octave-error guard),
/// climbs to its local peak and refines at full rate with parabolic
/// interpolation.
#[derive(Debug, Clone)]
pub struct PeriodEstimator {
    min_lag: usize,
    max_lag: usize,
    decimation: usize,
    window: usize,
    frame: Vec<f32>,
    coarse: Vec<f32>,
    scores: Vec<f64>,
}

impl PeriodEstimator {
    pub fn new(sample_rate: f64) -> Self {
        let max_lag = (MAX_PERIOD_SECONDS * sample_rate).round().max(MIN_PERIOD * 2.0) as usize;
        let min_lag = MIN_PERIOD as usize;
        let decimation = ((sample_rate / 12_000.0).floor() as usize).max(1);
        let window = 2 * max_lag;
        let frame_len = window + max_lag + 2 * decimation;
        Self {
            min_lag,
            max_lag,
            decimation,
            window,
            frame: vec![0.0; frame_len],
            coarse: vec![0.0; frame_len / decimation + 1],
            scores: vec![0.0; max_lag / decimation + 2],
        }
    }

    /// Samples of history an estimate reads
    pub fn history(&self) -> usize {
        self.frame.len()
    }

    pub fn max_lag(&self) -> usize {
        self.max_lag
    }

    fn load(&mut self, input: &RingBuffer) {
        let len = self.frame.len();
        for (i, dst) in self.frame.iter_mut().enumerate() {
            *dst = input.read(len - 1 - i);
        }
    }

    /// Period of the newest history in samples, `None` when unvoiced
    pub fn estimate(&mut self, input: &RingBuffer) -> Option<f64> {
        self.load(input);
        self.estimate_loaded()
    }

    /// Period of a plain slice (oldest first)
    pub fn estimate_slice(&mut self, signal: &[f32]) -> Option<f64> {
        let len = self.frame.len();
        if signal.len() < len {
            return None;
        }
        self.frame.copy_from_slice(&signal[signal.len() - len..]);
        self.estimate_loaded()
    }

    fn estimate_loaded(&mut self) -> Option<f64> {
        let d = self.decimation;
        let coarse_len = self.frame.len() / d;
        for (j, dst) in self.coarse.iter_mut().take(coarse_len).enumerate() {
            let sum: f32 = self.frame[j * d..(j + 1) * d].iter().sum();
            *dst = sum / d as f32;
        }

        let lo = self.min_lag.div_ceil(d).max(1);
        let hi = (self.max_lag / d).min(self.scores.len() - 1);
        let len = self.window / d;
        let mut best = 0.0f64;
        for lag in lo..=hi {
            let r = normalized_correlation(&self.coarse[..coarse_len], lag, len);
            self.scores[lag] = r;
            best = best.max(r);
        }
        if best < VOICED_CLARITY {
            return None;
        }

        let mut lag = (lo..=hi).find(|&l| self.scores[l] >= 0.85 * best)?;
        while lag < hi && self.scores[lag + 1] > self.scores[lag] {
            lag += 1;
        }

        // full-rate refinement around the coarse peak
        let centre = lag * d;
        let from = centre.saturating_sub(d).max(self.min_lag);
        let to = (centre + d).min(self.max_lag);
        let mut peak = centre.clamp(from, to);
        let mut peak_r = f64::MIN;
        for l in from..=to {
            let r = normalized_correlation(&self.frame, l, self.window);
            if r > peak_r {
                peak_r = r;
                peak = l;
            }
        }

        let mut period = peak as f64;
        if peak > self.min_lag && peak < self.max_lag {
            let r_prev = normalized_correlation(&self.frame, peak - 1, self.window);
            let r_next = normalized_correlation(&self.frame, peak + 1, self.window);
            let denom = r_prev - 2.0 * peak_r + r_next;
            if denom.abs() > 1e-12 {
                period += (0.5 * (r_prev - r_next) / denom).clamp(-0.5, 0.5);
            }
        }
        Some(period.clamp(MIN_PERIOD, self.max_lag as f64))
    }

    /// Normalized autocorrelation of the newest history at `period`
    pub fn clarity(&mut self, input: &RingBuffer, period: f64) -> f64 {
        let lag = period.round() as usize;
        let len = (2 * lag).min(self.frame.len().saturating_sub(lag));
        if lag == 0 || len == 0 {
            return 0.0;
        }
        let total = lag + len;
        for i in 0..total {
            self.frame[i] = input.read(total - 1 - i);
        }
        normalized_correlation(&self.frame[..total], lag, len)
    }
}

// ============ PSOLA ============

/// Analysis pitch mark
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Epoch {
    /// Absolute input sample index
    pub position: u64,
    /// Local period (distance to the previous epoch)
    pub period: f64,
    /// RMS of the period ending at this epoch
    pub rms: f64,
}

/// Shifter state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PsolaState {
    /// Silent input
    #[default]
    Idle,
    /// Gathering epochs; delayed input passes through at reduced gain
    Priming,
    /// Synthesizing grains
    Running,
}

/// Realtime TD-PSOLA pitch shifter for monophonic voiced input.
///
/// Fixed latency of `2·half_max + T0max/2 + search + 64` samples where
/// `half_max` is half the longest grain.
#[derive(Debug, Clone)]
pub struct PsolaShifter {
    sample_rate: f64,
    ratio: f64,
    max_period: f64,
    half_max: usize,
    search_max: usize,
    latency: usize,

    input: RingBuffer,
    output: RingBuffer,
    /// Absolute index of the next input sample
    position: u64,

    estimator: PeriodEstimator,
    level: RmsDetector,
    period: f64,
    epochs: VecDeque<Epoch>,
    epoch_capacity: usize,
    cursor: usize,
    next_mark: f64,
    state: PsolaState,
    analysis_counter: usize,

    window: Vec<f64>,
    scratch: Vec<f64>,

    fallback: DelayPitchShifter,
    blend_step: f32,
    psola_blend: f32,
    fallback_blend: f32,
}

impl PsolaShifter {
    pub fn new(sample_rate: f64) -> Self {
        let estimator = PeriodEstimator::new(sample_rate);
        let max_period = estimator.max_lag() as f64;
        let half_max = (1.25 * max_period).round() as usize;
        let search_max = (0.05 * max_period).ceil() as usize;
        let latency = 2 * half_max + (max_period * 0.5).ceil() as usize + search_max + 64;
        let fallback_window = ((0.04 * sample_rate) as usize).clamp(256, latency);
        let fallback_base = latency.saturating_sub(fallback_window / 2);
        let epoch_capacity = (EPOCH_HISTORY_SECONDS * sample_rate / MIN_PERIOD) as usize + 16;
        let history = ((EPOCH_HISTORY_SECONDS + 0.5) * sample_rate) as usize;

        Self {
            sample_rate,
            ratio: 1.0,
            max_period,
            half_max,
            search_max,
            latency,
            input: RingBuffer::new(history.max(latency + estimator.history() + 4 * half_max)),
            output: RingBuffer::new(latency + 4 * half_max + 64),
            position: 0,
            estimator,
            level: RmsDetector::new(100.0, sample_rate),
            period: 0.0,
            epochs: VecDeque::with_capacity(epoch_capacity),
            epoch_capacity,
            cursor: 0,
            next_mark: 0.0,
            state: PsolaState::Idle,
            analysis_counter: 0,
            window: vec![0.0; 2 * half_max + 1],
            scratch: vec![0.0; 2 * half_max + 1],
            fallback: DelayPitchShifter::with_base_delay(
                fallback_window,
                fallback_base,
                Interpolation::Sinc,
            ),
            blend_step: (1.0 / (BLEND_SECONDS * sample_rate)).min(1.0) as f32,
            psola_blend: 0.0,
            fallback_blend: 0.0,
        }
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Pitch ratio α (0.25..4)
    pub fn set_ratio(&mut self, ratio: f64) {
        if ratio.is_finite() {
            self.ratio = ratio.clamp(0.25, 4.0);
            self.fallback.set_ratio(self.ratio);
        }
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    pub fn latency(&self) -> usize {
        self.latency
    }

    /// Samples until the output settles after the input stops
    pub fn tail(&self) -> usize {
        self.latency + 2 * self.half_max
    }

    pub fn state(&self) -> PsolaState {
        self.state
    }

    /// Current period estimate (0 when unvoiced)
    pub fn period(&self) -> f64 {
        self.period
    }

    pub fn epochs(&self) -> impl Iterator<Item = &Epoch> {
        self.epochs.iter()
    }

    pub fn reset(&mut self) {
        self.input.clear();
        self.output.clear();
        self.position = 0;
        self.level.reset();
        self.period = 0.0;
        self.epochs.clear();
        self.cursor = 0;
        self.next_mark = 0.0;
        self.state = PsolaState::Idle;
        self.analysis_counter = 0;
        self.fallback.reset();
        self.psola_blend = 0.0;
        self.fallback_blend = 0.0;
    }

    pub fn process(&mut self, x: Sample) -> Sample {
        let x = scrub(x);
        self.input.push(x);
        self.fallback.write(x);
        let newest = self.position;
        self.position += 1;
        let level = self.level.process(x as f64);

        self.analysis_counter += 1;
        if self.analysis_counter >= ANALYSIS_HOP {
            self.analysis_counter = 0;
            self.analyse(level, newest);
        }
        if self.period > 0.0 {
            self.track_epochs(newest);
        }

        let out_pos = newest as i64 - self.latency as i64;
        self.update_state(out_pos);
        if self.state == PsolaState::Running {
            self.schedule_grains(out_pos, newest);
        }

        let synthesized = if out_pos >= 0 {
            self.output.take_at(out_pos as u64)
        } else {
            0.0
        };
        let dry = self.input.read(self.latency);

        let psola_target = if self.state == PsolaState::Running { 1.0 } else { 0.0 };
        self.psola_blend = step_towards(self.psola_blend, psola_target, self.blend_step);
        let main = synthesized * self.psola_blend + dry * PRIMING_GAIN * (1.0 - self.psola_blend);

        let fallback_target = if uses_sinc_fallback(self.ratio) { 1.0 } else { 0.0 };
        self.fallback_blend = step_towards(self.fallback_blend, fallback_target, self.blend_step);
        if self.fallback_blend > 0.0 {
            let shifted = self.fallback.read();
            main * (1.0 - self.fallback_blend) + shifted * self.fallback_blend
        } else {
            main
        }
    }

    // ─── analysis ───

    fn analyse(&mut self, level: f64, newest: u64) {
        if level < SILENCE_RMS {
            self.drop_track();
            self.state = PsolaState::Idle;
            return;
        }
        if self.state == PsolaState::Idle {
            self.state = PsolaState::Priming;
        }

        if self.period <= 0.0 {
            let hop = newest / ANALYSIS_HOP as u64;
            if (self.position as usize) < self.estimator.history() || hop % ESTIMATE_EVERY != 0 {
                return;
            }
            if let Some(period) = self.estimator.estimate(&self.input) {
                self.period = period;
                self.seed_epochs(newest);
            }
        } else if self.estimator.clarity(&self.input, self.period) < UNVOICED_CLARITY {
            self.drop_track();
        }
    }

    fn drop_track(&mut self) {
        self.period = 0.0;
        self.epochs.clear();
        self.cursor = 0;
    }

    /// Start the epoch track far enough back to cover the synthesis timeline
    fn seed_epochs(&mut self, newest: u64) {
        let back = (self.latency + 2 * self.max_period as usize) as u64;
        let oldest = self.position.saturating_sub(self.input.capacity() as u64 - 1);
        let start = newest.saturating_sub(back).max(oldest);
        let end = (start + self.period.round() as u64).min(newest);
        let first = self.argmax(start, end);
        self.epochs.clear();
        self.cursor = 0;
        let rms = self.period_rms(first, self.period);
        self.push_epoch(Epoch {
            position: first,
            period: self.period,
            rms,
        });
        self.track_epochs(newest);
    }

    fn track_epochs(&mut self, newest: u64) {
        while let Some(last) = self.epochs.back().copied() {
            let t0 = self.period;
            let reach = (0.05 * t0).round().max(1.0);
            let centre = last.position as f64 + t0;
            let hi = (centre + reach).round() as u64;
            if hi > newest {
                break;
            }
            let lo = (centre - reach)
                .max(last.position as f64 + 0.7 * t0)
                .ceil() as u64;
            let lo = lo.min(hi);
            let position = self.argmax(lo, hi);
            let distance = (position - last.position) as f64;
            let rms = self.period_rms(position, distance);
            self.push_epoch(Epoch {
                position,
                period: distance,
                rms,
            });
            self.period = self.median_period();
        }

        let horizon = (EPOCH_HISTORY_SECONDS * self.sample_rate) as u64;
        while let Some(front) = self.epochs.front() {
            if front.position + horizon >= newest {
                break;
            }
            self.epochs.pop_front();
            self.cursor = self.cursor.saturating_sub(1);
        }
    }

    fn push_epoch(&mut self, epoch: Epoch) {
        if self.epochs.len() >= self.epoch_capacity {
            self.epochs.pop_front();
            self.cursor = self.cursor.saturating_sub(1);
        }
        self.epochs.push_back(epoch);
    }

    /// Median of the last (up to five) epoch distances
    fn median_period(&self) -> f64 {
        let mut recent = [0.0f64; 5];
        let mut n = 0;
        // the oldest epoch may be the seed carrying the autocorrelation estimate
        let skip_seed = usize::from(self.epochs.len() > 1);
        for e in self.epochs.iter().rev().take(self.epochs.len() - skip_seed).take(5) {
            recent[n] = e.period;
            n += 1;
        }
        if n == 0 {
            return self.period;
        }
        let slice = &mut recent[..n];
        slice.sort_by(|a, b| a.total_cmp(b));
        slice[n / 2].clamp(MIN_PERIOD, self.max_period)
    }

    fn argmax(&self, lo: u64, hi: u64) -> u64 {
        let mut best = lo;
        let mut best_value = f32::MIN;
        for p in lo..=hi {
            let v = self.input.at(p);
            if v > best_value {
                best_value = v;
                best = p;
            }
        }
        best
    }

    fn period_rms(&self, end: u64, period: f64) -> f64 {
        let len = (period.round() as u64).clamp(1, end + 1);
        let mut sum = 0.0f64;
        for p in end + 1 - len..=end {
            let v = self.input.at(p) as f64;
            sum += v * v;
        }
        (sum / len as f64).sqrt()
    }

    // ─── synthesis ───

    fn update_state(&mut self, out_pos: i64) {
        match self.state {
            PsolaState::Running => {
                if self.epochs.len() < 3 || self.period <= 0.0 {
                    self.state = PsolaState::Priming;
                }
            }
            PsolaState::Priming => {
                if self.epochs.len() >= 3 && self.period > 0.0 && out_pos >= 0 {
                    self.state = PsolaState::Running;
                    self.cursor = 0;
                    self.next_mark = (out_pos + self.half_max as i64 + 1) as f64;
                }
            }
            PsolaState::Idle => {}
        }
    }

    fn schedule_grains(&mut self, out_pos: i64, newest: u64) {
        let horizon = (out_pos + self.half_max as i64 + 1) as f64;
        while self.next_mark <= horizon {
            let mark = self.next_mark;
            let Some(epoch) = self.nearest_epoch(mark) else {
                self.state = PsolaState::Priming;
                return;
            };
            if (epoch.position as f64 - mark).abs() > 1.5 * epoch.period.max(self.period) {
                // epoch track no longer covers the synthesis timeline
                self.state = PsolaState::Priming;
                return;
            }
            self.place_grain(mark.round() as u64, epoch, newest);
            self.next_mark += (epoch.period / self.ratio).max(1.0);
        }
    }

    fn nearest_epoch(&mut self, mark: f64) -> Option<Epoch> {
        if self.epochs.is_empty() {
            return None;
        }
        self.cursor = self.cursor.min(self.epochs.len() - 1);
        while self.cursor + 1 < self.epochs.len() {
            let here = (self.epochs[self.cursor].position as f64 - mark).abs();
            let next = (self.epochs[self.cursor + 1].position as f64 - mark).abs();
            if next <= here {
                self.cursor += 1;
            } else {
                break;
            }
        }
        Some(self.epochs[self.cursor])
    }

    fn place_grain(&mut self, mark: u64, epoch: Epoch, newest: u64) {
        let period = epoch.period.clamp(MIN_PERIOD, self.max_period);
        let half = ((1.25 * period).round() as usize).clamp(8, self.half_max);
        let len = 2 * half + 1;
        let search = ((0.05 * period).round() as usize).min(self.search_max);

        let Some(out_start) = mark.checked_sub(half as u64) else {
            return;
        };
        let reach = (half + search) as u64;
        if epoch.position < reach || epoch.position + reach > newest {
            return;
        }

        for (j, w) in self.window[..len].iter_mut().enumerate() {
            let t = (j as f64 - half as f64) / (half as f64 + 1.0);
            *w = 0.5 + 0.5 * (PI * t).cos();
        }

        let mut out_energy = 0.0;
        for (j, o) in self.scratch[..len].iter_mut().enumerate() {
            *o = self.output.at(out_start + j as u64) as f64;
            out_energy += *o * *o;
        }

        let (shift, sign) = if out_energy > 1e-9 {
            self.align(epoch.position, half, search, out_energy)
        } else {
            (0, 1.0)
        };
        let start = (epoch.position as i64 + shift - half as i64) as u64;

        let level = self.level.rms();
        let equalize = if epoch.rms > 1e-6 {
            (level / epoch.rms).clamp(0.5, 2.0)
        } else {
            1.0
        };
        let synthesis_hop = (period / self.ratio).max(1.0);
        let density = 1.0 / (len as f64 / synthesis_hop).sqrt();
        let gain = sign * equalize * density;

        for j in 0..len {
            let v = self.window[j] * self.input.at(start + j as u64) as f64 * gain;
            self.output.add_at(out_start + j as u64, v as Sample);
        }
    }

    /// Best grain offset in `[−search, search]` and its polarity
    fn align(&self, centre: u64, half: usize, search: usize, out_energy: f64) -> (i64, f64) {
        let len = 2 * half + 1;
        let mut best_shift = 0i64;
        let mut best_score = 0.0f64;
        let mut zero_score = 0.0f64;
        for shift in -(search as i64)..=(search as i64) {
            let start = (centre as i64 + shift - half as i64) as u64;
            let mut dot = 0.0;
            let mut energy = 0.0;
            for j in 0..len {
                let g = self.window[j] * self.input.at(start + j as u64) as f64;
                dot += g * self.scratch[j];
                energy += g * g;
            }
            let denom = (energy * out_energy).sqrt();
            let score = if denom > 1e-12 { dot / denom } else { 0.0 };
            if shift == 0 {
                zero_score = score;
            }
            if score.abs() > best_score.abs() {
                best_score = score;
                best_shift = shift;
            }
        }
        // hold the epoch unless another offset is clearly better
        if best_score.abs() < zero_score.abs() + 0.05 {
            best_shift = 0;
            best_score = zero_score;
        }
        let sign = if best_score < -0.3 { -1.0 } else { 1.0 };
        (best_shift, sign)
    }
}

#[inline]
fn step_towards(current: f32, target: f32, step: f32) -> f32 {
    if current < target {
        (current + step).min(target)
    } else {
        (current - step).max(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f64 = 48_000.0;

    fn pulse_train(freq: f64, seconds: f64) -> Vec<f32> {
        let width = 0.001 * freq;
        (0..(seconds * SR) as usize)
            .map(|n| {
                let phase = (n as f64 * freq / SR).fract();
                if phase < width {
                    (0.8 * (PI * phase / width).sin().powi(2)) as f32
                } else {
                    0.0
                }
            })
            .collect()
    }

    #[test]
    fn test_fallback_ratio_selection() {
        assert!(uses_sinc_fallback(FRAC_1_SQRT_2));
        assert!(uses_sinc_fallback(1.415));
        assert!(uses_sinc_fallback(2f64.powf(4.0 / 12.0)));
        assert!(!uses_sinc_fallback(1.0));
        assert!(!uses_sinc_fallback(1.5));
        assert!(!uses_sinc_fallback(2.0));
        assert!(!uses_sinc_fallback(1.05));
    }

    #[test]
    fn test_estimator_finds_period() {
        let mut est = PeriodEstimator::new(SR);
        let signal = pulse_train(220.0, 0.2);
        let period = est.estimate_slice(&signal).unwrap();
        assert!((period - SR / 220.0).abs() < 1.0, "period {period}");
    }

    #[test]
    fn test_estimator_rejects_noise_and_silence() {
        let mut est = PeriodEstimator::new(SR);
        assert!(est.estimate_slice(&vec![0.0; 10_000]).is_none());

        let mut state = 0x2545_f491_u32;
        let noise: Vec<f32> = (0..10_000)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state as f32 / u32::MAX as f32) * 2.0 - 1.0
            })
            .collect();
        assert!(est.estimate_slice(&noise).is_none());
    }

    #[test]
    fn test_epochs_follow_pulses() {
        let mut psola = PsolaShifter::new(SR);
        for x in pulse_train(220.0, 0.5) {
            psola.process(x);
        }
        assert_eq!(psola.state(), PsolaState::Running);
        let epochs: Vec<_> = psola.epochs().copied().collect();
        assert!(epochs.len() > 10);
        for pair in epochs.windows(2).skip(1) {
            let d = (pair[1].position - pair[0].position) as f64;
            assert!((d - SR / 220.0).abs() <= 1.5, "distance {d}");
        }
        assert!((psola.period() - SR / 220.0).abs() <= 1.5);
    }

    #[test]
    fn test_silence_stays_idle_and_silent() {
        let mut psola = PsolaShifter::new(SR);
        for _ in 0..20_000 {
            assert_eq!(psola.process(0.0), 0.0);
        }
        assert_eq!(psola.state(), PsolaState::Idle);
    }

    #[test]
    fn test_priming_passes_delayed_input() {
        let mut psola = PsolaShifter::new(SR);
        let latency = psola.latency();
        let mut out = Vec::new();
        let mut input = vec![0.0f32; latency + 10];
        input[0] = 1.0;
        for x in input {
            out.push(psola.process(x));
        }
        assert!((out[latency] - PRIMING_GAIN).abs() < 1e-6);
        assert!(out[..latency].iter().all(|&y| y == 0.0));
    }

    #[test]
    fn test_output_bounded_for_all_ratios() {
        for ratio in [0.25, 0.5, 0.8, 1.0, 1.3, 2.0, 4.0] {
            let mut psola = PsolaShifter::new(SR);
            psola.set_ratio(ratio);
            for x in pulse_train(150.0, 0.6) {
                let y = psola.process(x);
                assert!(y.is_finite() && y.abs() < 4.0, "ratio {ratio}: {y}");
            }
        }
    }
}
