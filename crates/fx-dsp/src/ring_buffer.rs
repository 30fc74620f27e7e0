//! Ring buffers and fractional delay lines
//!
//! Power-of-two circular buffers with a monotonically increasing 64-bit
//! write index; reads use `index & mask`. A reader staying within the
//! prepared history returns samples from the last `history` writes.
//!
//! Fractional readers:
//! - linear
//! - 4-point cubic Hermite
//! - 32-tap Blackman-windowed sinc with a 1024-row fractional table

use std::f64::consts::PI;
use std::sync::OnceLock;

use fx_core::Sample;

use crate::next_pow2;

// ============ Sinc Table ============

/// Taps per windowed-sinc kernel
pub const SINC_TAPS: usize = 32;

/// Fractional rows in the sinc table (plus one closing row)
pub const SINC_PHASES: usize = 1024;

/// Half the kernel; the minimum delay a sinc read can serve
pub const SINC_HALF: usize = SINC_TAPS / 2;

/// Precomputed windowed-sinc kernels, one row per fractional offset
pub struct SincTable {
    rows: Vec<[f32; SINC_TAPS]>,
}

impl SincTable {
    fn build(cutoff: f64) -> Self {
        let mut rows = Vec::with_capacity(SINC_PHASES + 1);
        for phase in 0..=SINC_PHASES {
            let frac = phase as f64 / SINC_PHASES as f64;
            let mut row = [0.0f32; SINC_TAPS];
            let mut sum = 0.0;
            let mut taps = [0.0f64; SINC_TAPS];
            for (t, tap) in taps.iter_mut().enumerate() {
                // tap t reads delay (i + t − HALF + 1); kernel centred on i + frac
                let x = t as f64 - (SINC_HALF as f64 - 1.0) - frac;
                let sinc = if x.abs() < 1e-12 {
                    1.0
                } else {
                    (PI * cutoff * x).sin() / (PI * x)
                };
                let w_pos = (x + SINC_HALF as f64) / SINC_TAPS as f64;
                let window = if (0.0..=1.0).contains(&w_pos) {
                    0.42 - 0.5 * (2.0 * PI * w_pos).cos() + 0.08 * (4.0 * PI * w_pos).cos()
                } else {
                    0.0
                };
                *tap = sinc * window;
                sum += *tap;
            }
            for (dst, &src) in row.iter_mut().zip(taps.iter()) {
                *dst = if sum.abs() > 1e-12 { (src / sum) as f32 } else { 0.0 };
            }
            rows.push(row);
        }
        Self { rows }
    }

    /// Kernel for a fractional offset in `[0, 1]`
    #[inline]
    pub fn row(&self, frac: f32) -> &[f32; SINC_TAPS] {
        let idx = (frac.clamp(0.0, 1.0) * SINC_PHASES as f32).round() as usize;
        &self.rows[idx.min(SINC_PHASES)]
    }
}

/// Process-wide sinc table (built on first use; call from `prepare`)
pub fn sinc_table() -> &'static SincTable {
    static TABLE: OnceLock<SincTable> = OnceLock::new();
    TABLE.get_or_init(|| SincTable::build(0.92))
}

// ============ Ring Buffer ============

/// Power-of-two circular sample buffer
#[derive(Debug, Clone)]
pub struct RingBuffer {
    buffer: Vec<Sample>,
    mask: usize,
    write: u64,
}

impl RingBuffer {
    /// Buffer holding at least `history` samples
    pub fn new(history: usize) -> Self {
        let size = next_pow2(history.max(4));
        Self {
            buffer: vec![0.0; size],
            mask: size - 1,
            write: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Total samples ever written
    #[inline]
    pub fn write_index(&self) -> u64 {
        self.write
    }

    #[inline]
    pub fn push(&mut self, x: Sample) {
        let idx = (self.write as usize) & self.mask;
        self.buffer[idx] = x;
        self.write = self.write.wrapping_add(1);
    }

    /// Add into an absolute position (overlap-add targets)
    #[inline]
    pub fn add_at(&mut self, position: u64, x: Sample) {
        let idx = (position as usize) & self.mask;
        self.buffer[idx] += x;
    }

    /// Read an absolute position
    #[inline]
    pub fn at(&self, position: u64) -> Sample {
        self.buffer[(position as usize) & self.mask]
    }

    /// Read and zero an absolute position
    #[inline]
    pub fn take_at(&mut self, position: u64) -> Sample {
        let idx = (position as usize) & self.mask;
        std::mem::take(&mut self.buffer[idx])
    }

    /// Sample written `delay` samples ago (0 = newest)
    #[inline]
    pub fn read(&self, delay: usize) -> Sample {
        let idx = (self.write as usize).wrapping_sub(1).wrapping_sub(delay) & self.mask;
        self.buffer[idx]
    }

    /// Linear interpolation at a fractional delay ≥ 0
    #[inline]
    pub fn read_linear(&self, delay: f32) -> Sample {
        let d = delay.clamp(0.0, (self.mask - 1) as f32);
        let i = d as usize;
        let frac = d - i as f32;
        let a = self.read(i);
        let b = self.read(i + 1);
        a + (b - a) * frac
    }

    /// 4-point cubic Hermite at a fractional delay ≥ 1
    #[inline]
    pub fn read_cubic(&self, delay: f32) -> Sample {
        let d = delay.clamp(1.0, (self.mask - 2) as f32);
        let i = d as usize;
        let t = d - i as f32;
        let xm1 = self.read(i - 1);
        let x0 = self.read(i);
        let x1 = self.read(i + 1);
        let x2 = self.read(i + 2);
        let c0 = x0;
        let c1 = 0.5 * (x1 - xm1);
        let c2 = xm1 - 2.5 * x0 + 2.0 * x1 - 0.5 * x2;
        let c3 = 0.5 * (x2 - xm1) + 1.5 * (x0 - x1);
        ((c3 * t + c2) * t + c1) * t + c0
    }

    /// Windowed-sinc read at a fractional delay ≥ `SINC_HALF`
    #[inline]
    pub fn read_sinc(&self, delay: f32, table: &SincTable) -> Sample {
        let d = delay.clamp(SINC_HALF as f32, (self.capacity() - SINC_TAPS - 1) as f32);
        let i = d as usize;
        let kernel = table.row(d - i as f32);
        let base = i + 1 - SINC_HALF;
        let mut acc = 0.0;
        for (t, &h) in kernel.iter().enumerate() {
            acc += h * self.read(base + t);
        }
        acc
    }

    pub fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.write = 0;
    }
}

// ============ Delay Line ============

/// Interpolation used by [`DelayLine::read`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interpolation {
    Linear,
    #[default]
    Cubic,
    Sinc,
}

/// Fractional delay line with a maximum delay fixed at construction
#[derive(Debug, Clone)]
pub struct DelayLine {
    ring: RingBuffer,
    max_delay: f32,
    interpolation: Interpolation,
}

impl DelayLine {
    pub fn new(max_delay_samples: usize, interpolation: Interpolation) -> Self {
        Self {
            ring: RingBuffer::new(max_delay_samples + SINC_TAPS + 4),
            max_delay: max_delay_samples as f32,
            interpolation,
        }
    }

    /// Delay line sized in seconds
    pub fn with_seconds(seconds: f64, sample_rate: f64, interpolation: Interpolation) -> Self {
        Self::new((seconds * sample_rate).ceil() as usize, interpolation)
    }

    #[inline]
    pub fn max_delay(&self) -> f32 {
        self.max_delay
    }

    #[inline]
    pub fn write(&mut self, x: Sample) {
        self.ring.push(x);
    }

    /// Read `delay` samples behind the newest write
    #[inline]
    pub fn read(&self, delay: f32) -> Sample {
        let d = delay.clamp(0.0, self.max_delay);
        match self.interpolation {
            Interpolation::Linear => self.ring.read_linear(d),
            Interpolation::Cubic => self.ring.read_cubic(d),
            Interpolation::Sinc => self.ring.read_sinc(d, sinc_table()),
        }
    }

    /// Write then read, for a delay of at least one sample
    #[inline]
    pub fn process(&mut self, x: Sample, delay: f32) -> Sample {
        self.write(x);
        self.read(delay)
    }

    #[inline]
    pub fn tap(&self, delay: usize) -> Sample {
        self.ring.read(delay)
    }

    pub fn reset(&mut self) {
        self.ring.clear();
    }
}
