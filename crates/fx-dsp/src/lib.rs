//! fx-dsp: DSP primitives and kernels for the effects rack
//!
//! All processors allocate only in `new`/`prepare`-style constructors and
//! run allocation-free per sample or per block.
//!
//! ## Modules
//! - `smoothing` - One-pole parameter smoother with guaranteed settling
//! - `ring_buffer` - Power-of-two delay lines, linear/cubic/windowed-sinc readers
//! - `biquad` - TDF-II biquads (RBJ forms) with epsilon coefficient caching
//! - `filters` - TPT state-variable, ladder, one-pole, Thiran/Schroeder allpass
//! - `fft` - Real and complex FFT wrappers, Hermitian reconstruction
//! - `window` - Hann/Hamming/Blackman tables and overlap-add scheduler
//! - `dynamics` - Envelope followers, sliding peak, gain computer
//! - `modulation` - LFOs, Hilbert pair, delay-line pitch shifter
//! - `pitch` - Period detection and TD-PSOLA shifter with sinc fallback
//! - `phase_vocoder` - STFT pitch/time processor
//! - `impulse` - Impulse-response loading, validation and synthesis
//! - `convolution` - Uniform partitioned convolution with lock-free IR exchange
//! - `reverb` - Plate and spring diffusion networks
//! - `dynamic_eq` - Look-ahead dynamic EQ band

pub mod biquad;
pub mod convolution;
pub mod dynamic_eq;
pub mod dynamics;
pub mod fft;
pub mod filters;
pub mod impulse;
pub mod modulation;
pub mod phase_vocoder;
pub mod pitch;
pub mod reverb;
pub mod ring_buffer;
pub mod smoothing;
pub mod window;

use fx_core::Sample;

/// Trait for all DSP processors
pub trait Processor: Send {
    /// Reset processor state
    fn reset(&mut self);

    /// Get latency in samples
    fn latency(&self) -> usize {
        0
    }
}

/// Mono processor trait
pub trait MonoProcessor: Processor {
    /// Process a single sample
    fn process_sample(&mut self, input: Sample) -> Sample;

    /// Process a block of samples
    fn process_block(&mut self, buffer: &mut [Sample]) {
        for sample in buffer.iter_mut() {
            *sample = self.process_sample(*sample);
        }
    }
}

/// Next power of two at or above `n` (minimum 1)
#[inline]
pub fn next_pow2(n: usize) -> usize {
    n.max(1).next_power_of_two()
}
