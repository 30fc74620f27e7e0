//! Per-engine parameter declarations and the smoothed parameter bank
//!
//! Every engine declares a static `ParamSpec` table. A `ParamBank` holds one
//! smoother per declared index and is the only place an engine reads its
//! parameters from.

use fx_core::{MAX_PARAMETERS, ParamDisplay, ParameterMap};
use fx_dsp::smoothing::{COEFF_SMOOTHING_MS, GAIN_SMOOTHING_MS, ParamSmoother};

/// How a parameter moves towards a new target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Smoothing {
    /// Per sample, 5 ms (gains, mix, delay times)
    Audio,
    /// Once per control block, 20 ms (filter coefficients)
    Control,
    /// Jumps (mode switches, choices)
    Step,
}

impl Smoothing {
    fn time_ms(self) -> f32 {
        match self {
            Self::Audio => GAIN_SMOOTHING_MS,
            Self::Control => COEFF_SMOOTHING_MS,
            Self::Step => 0.0,
        }
    }
}

/// Static description of one parameter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub default: f32,
    pub display: ParamDisplay,
    pub smoothing: Smoothing,
}

impl ParamSpec {
    pub const fn new(name: &'static str, default: f32, display: ParamDisplay) -> Self {
        Self {
            name,
            default,
            display,
            smoothing: Smoothing::Control,
        }
    }

    /// Per-sample smoothing
    pub const fn audio(mut self) -> Self {
        self.smoothing = Smoothing::Audio;
        self
    }

    /// No smoothing
    pub const fn step(mut self) -> Self {
        self.smoothing = Smoothing::Step;
        self
    }

    /// Standard dry/wet parameter
    pub const fn mix(default: f32) -> Self {
        Self::new("Mix", default, ParamDisplay::Percent).audio()
    }

    /// Engineering value of `v`
    #[inline]
    pub fn plain(&self, v: f32) -> f32 {
        self.display.plain(v)
    }
}

/// Smoothed parameter values for one engine instance
#[derive(Debug, Clone)]
pub struct ParamBank {
    specs: &'static [ParamSpec],
    smoothers: [ParamSmoother; MAX_PARAMETERS],
    /// Next `apply` snaps instead of ramping
    fresh: bool,
}

impl ParamBank {
    pub fn new(specs: &'static [ParamSpec]) -> Self {
        debug_assert!(specs.len() <= MAX_PARAMETERS);
        let mut smoothers: [ParamSmoother; MAX_PARAMETERS] =
            std::array::from_fn(|_| ParamSmoother::new(0.0));
        for (smoother, spec) in smoothers.iter_mut().zip(specs) {
            smoother.set_time_ms(spec.smoothing.time_ms(), 48000.0);
            smoother.set_immediate(spec.default);
        }
        Self {
            specs,
            smoothers,
            fresh: true,
        }
    }

    pub fn prepare(&mut self, sample_rate: f64) {
        for (smoother, spec) in self.smoothers.iter_mut().zip(self.specs) {
            smoother.set_time_ms(spec.smoothing.time_ms(), sample_rate);
            smoother.snap();
        }
        self.fresh = true;
    }

    /// Snap every value to its target
    pub fn reset(&mut self) {
        for smoother in &mut self.smoothers {
            smoother.snap();
        }
    }

    #[inline]
    pub fn specs(&self) -> &'static [ParamSpec] {
        self.specs
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Retarget declared indices; undeclared indices are ignored
    pub fn apply(&mut self, params: &ParameterMap) {
        for (index, value) in params.iter() {
            let Some(smoother) = self.smoothers[..self.specs.len()].get_mut(index) else {
                continue;
            };
            if self.fresh {
                smoother.set_immediate(value);
            } else {
                smoother.set_target(value);
            }
        }
    }

    /// Called once at the start of every processed block
    #[inline]
    pub fn begin_block(&mut self) {
        self.fresh = false;
    }

    /// Advance control-rate parameters by `frames`
    #[inline]
    pub fn control(&mut self, frames: usize) {
        for (smoother, spec) in self.smoothers.iter_mut().zip(self.specs) {
            if spec.smoothing != Smoothing::Audio {
                smoother.advance(frames);
            }
        }
    }

    /// Advance audio-rate parameters by one sample
    #[inline]
    pub fn tick(&mut self) {
        for (smoother, spec) in self.smoothers.iter_mut().zip(self.specs) {
            if spec.smoothing == Smoothing::Audio && smoother.is_smoothing() {
                smoother.next();
            }
        }
    }

    /// Current normalized value
    #[inline]
    pub fn value(&self, index: usize) -> f32 {
        self.smoothers[index].current()
    }

    /// Target normalized value
    #[inline]
    pub fn target(&self, index: usize) -> f32 {
        self.smoothers[index].target()
    }

    /// Current engineering value
    #[inline]
    pub fn plain(&self, index: usize) -> f32 {
        match self.specs.get(index) {
            Some(spec) => spec.plain(self.smoothers[index].current()),
            None => 0.0,
        }
    }

    /// Engineering value as f64
    #[inline]
    pub fn get(&self, index: usize) -> f64 {
        self.plain(index) as f64
    }

    /// Discrete choice index for a `Choice`/`Switch` parameter
    #[inline]
    pub fn choice(&self, index: usize) -> usize {
        self.plain(index).max(0.0) as usize
    }

    /// Switch state
    #[inline]
    pub fn switch(&self, index: usize) -> bool {
        self.plain(index) >= 0.5
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPECS: &[ParamSpec] = &[
        ParamSpec::new("Cutoff", 0.5, ParamDisplay::Frequency),
        ParamSpec::new("Mode", 0.0, ParamDisplay::Choice(3)).step(),
        ParamSpec::mix(1.0),
    ];

    #[test]
    fn test_defaults_and_fresh_snap() {
        let mut bank = ParamBank::new(SPECS);
        bank.prepare(48000.0);
        assert_eq!(bank.value(0), 0.5);
        assert_eq!(bank.value(2), 1.0);

        bank.apply(&ParameterMap::new().with(0, 0.2));
        assert_eq!(bank.value(0), 0.2);
    }

    #[test]
    fn test_ramps_after_first_block() {
        let mut bank = ParamBank::new(SPECS);
        bank.prepare(48000.0);
        bank.begin_block();
        bank.apply(&ParameterMap::new().with(0, 1.0).with(2, 0.0).with(1, 1.0));
        assert_eq!(bank.value(0), 0.5);
        assert_eq!(bank.value(1), 1.0);

        bank.control(32);
        assert!(bank.value(0) > 0.5 && bank.value(0) < 1.0);
        for _ in 0..48000 {
            bank.tick();
        }
        assert_eq!(bank.value(2), 0.0);
        bank.control(48000);
        assert_eq!(bank.value(0), 1.0);
        assert_eq!(bank.choice(1), 2);
    }

    #[test]
    fn test_ignores_undeclared_indices() {
        let mut bank = ParamBank::new(SPECS);
        bank.apply(&ParameterMap::new().with(7, 0.9));
        assert_eq!(bank.value(7), 0.0);
        assert_eq!(bank.plain(7), 0.0);
    }
}
