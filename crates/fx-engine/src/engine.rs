//! Engine contract
//!
//! An `Engine` is a stateful processor owned by exactly one rack slot.
//! `prepare` is the only allocation site; `process`, `reset` and
//! `apply_parameters` are wait-free and allocation-free and never fail.
//!
//! Most engines are written as a [`StereoKernel`] (per-frame DSP plus a
//! control-rate update hook) and wrapped in a [`KernelEngine`] that owns the
//! parameter bank, the control-block schedule and the dry/wet blend.

use std::sync::Arc;

use fx_core::{ParameterMap, Sample, blend, split_channels};
use fx_dsp::convolution::IrExchange;

use crate::params::ParamBank;
use crate::registry::EngineId;

/// Sub-block at which coefficient-driven parameters are re-evaluated
pub const CONTROL_BLOCK: usize = 32;

/// Uniform processing interface for every effect
pub trait Engine: Send {
    /// Stable identifier
    fn id(&self) -> EngineId;

    /// Display name
    fn name(&self) -> &'static str {
        self.id().info().name
    }

    /// Allocate buffers for `(sample_rate, max_block)` and reset state.
    /// Idempotent.
    fn prepare(&mut self, sample_rate: f64, max_block: usize);

    /// Clear filter states, delay lines and envelopes without deallocating
    fn reset(&mut self);

    /// Retarget parameters from a sparse normalized map
    fn apply_parameters(&mut self, params: &ParameterMap);

    /// Process a block in place; channels beyond the second are left untouched
    fn process(&mut self, block: &mut [&mut [Sample]]);

    fn parameter_count(&self) -> usize {
        self.id().info().params.len()
    }

    fn parameter_name(&self, index: usize) -> Option<&'static str> {
        self.id().info().params.get(index).map(|p| p.name)
    }

    /// Samples after the last non-silent input until output is below −120 dB
    fn tail_samples(&self) -> usize;

    /// Processing delay of the wet path
    fn latency_samples(&self) -> usize {
        0
    }

    /// Handle for off-thread impulse-response loading
    fn impulse_response_port(&self) -> Option<Arc<IrExchange>> {
        None
    }
}

// ============ Kernel Engines ============

/// Per-frame DSP core of an engine
pub trait StereoKernel: Send + Sized {
    const ID: EngineId;

    /// Allocate for a stream configuration
    fn new(sample_rate: f64, max_block: usize) -> Self;

    /// Recompute coefficients once per control block
    fn control(&mut self, params: &ParamBank);

    /// Process one frame, returning the wet signal
    fn tick(&mut self, params: &ParamBank, left: f64, right: f64) -> (f64, f64);

    fn reset(&mut self);

    fn tail_samples(&self, params: &ParamBank) -> usize;

    fn latency(&self) -> usize {
        0
    }

    fn ir_port(&self) -> Option<Arc<IrExchange>> {
        None
    }
}

/// [`Engine`] adapter that drives a [`StereoKernel`]
pub struct KernelEngine<K: StereoKernel> {
    kernel: K,
    params: ParamBank,
    mix_index: Option<usize>,
    sample_rate: f64,
    max_block: usize,
}

impl<K: StereoKernel> KernelEngine<K> {
    pub fn new(sample_rate: f64, max_block: usize) -> Self {
        let info = K::ID.info();
        let mut params = ParamBank::new(info.params);
        params.prepare(sample_rate);
        let mut engine = Self {
            kernel: K::new(sample_rate, max_block),
            params,
            mix_index: info.mix_index,
            sample_rate,
            max_block,
        };
        engine.kernel.control(&engine.params);
        engine
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    pub fn params(&self) -> &ParamBank {
        &self.params
    }
}

impl<K: StereoKernel> Engine for KernelEngine<K> {
    fn id(&self) -> EngineId {
        K::ID
    }

    fn prepare(&mut self, sample_rate: f64, max_block: usize) {
        if sample_rate != self.sample_rate || max_block != self.max_block {
            self.kernel = K::new(sample_rate, max_block);
            self.sample_rate = sample_rate;
            self.max_block = max_block;
        } else {
            self.kernel.reset();
        }
        self.params.prepare(sample_rate);
        self.kernel.control(&self.params);
    }

    fn reset(&mut self) {
        self.params.reset();
        self.kernel.reset();
        self.kernel.control(&self.params);
    }

    fn apply_parameters(&mut self, params: &ParameterMap) {
        self.params.apply(params);
    }

    fn process(&mut self, block: &mut [&mut [Sample]]) {
        let Some((left, mut right)) = split_channels(block) else {
            return;
        };
        self.params.begin_block();
        let frames = left.len();
        let mut start = 0;
        while start < frames {
            let end = (start + CONTROL_BLOCK).min(frames);
            self.params.control(end - start);
            self.kernel.control(&self.params);
            for i in start..end {
                self.params.tick();
                let dry_l = left[i];
                let dry_r = right.as_deref().map_or(dry_l, |r| r[i]);
                let (wet_l, wet_r) = self.kernel.tick(&self.params, dry_l as f64, dry_r as f64);
                let mix = self.mix_index.map_or(1.0, |m| self.params.value(m));
                left[i] = blend(dry_l, wet_l as Sample, mix);
                if let Some(r) = right.as_deref_mut() {
                    r[i] = blend(dry_r, wet_r as Sample, mix);
                }
            }
            start = end;
        }
    }

    fn tail_samples(&self) -> usize {
        self.kernel.tail_samples(&self.params)
    }

    fn latency_samples(&self) -> usize {
        self.kernel.latency()
    }

    fn impulse_response_port(&self) -> Option<Arc<IrExchange>> {
        self.kernel.ir_port()
    }
}

/// Seconds to samples, rounded up
#[inline]
pub fn seconds_to_samples(seconds: f64, sample_rate: f64) -> usize {
    (seconds.max(0.0) * sample_rate).ceil() as usize
}

/// Samples for a feedback loop of `loop_samples` with gain `feedback` to fall by `db`
pub fn feedback_tail(loop_samples: f64, feedback: f64, db: f64) -> usize {
    let g = feedback.abs().clamp(0.0, 0.9999);
    if g < 1e-6 {
        return loop_samples.ceil() as usize;
    }
    let repeats = (db / 20.0 * std::f64::consts::LN_10) / -g.ln();
    (loop_samples * (repeats.ceil() + 1.0)).ceil() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feedback_tail() {
        // 0.5 per pass: 120 dB needs 20 passes
        let tail = feedback_tail(100.0, 0.5, 120.0);
        assert!((2000..=2200).contains(&tail), "{tail}");
        assert_eq!(feedback_tail(100.0, 0.0, 120.0), 100);
    }
}
