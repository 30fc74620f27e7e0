//! STFT phase vocoder
//!
//! `StftFrameProcessor` handles one analysis/synthesis frame:
//! phase-difference instantaneous frequency, bin re-mapping for pitch,
//! phase propagation and Hermitian reconstruction.
//!
//! `PhaseVocoder` streams it in real time. Analysis frames are taken every
//! `HOP` input samples; synthesis frames are overlap-added `Hs` apart, so
//! time stretch moves the write position against the read position. When
//! the write lead leaves `[0, 1 s]` the writer jumps back onto the reader
//! (dropping queued output when it ran ahead) and phases restart. Output is normalized by the accumulated window
//! weight, which keeps the level steady for any `Hs`.

use std::f64::consts::TAU;

use fx_core::{Sample, scrub};

use crate::fft::{Complex64, ComplexFft, RealFft, ZERO, hermitian_fill, princarg};
use crate::ring_buffer::RingBuffer;
use crate::window::WindowKind;

/// FFT size
pub const FRAME: usize = 2048;

/// Analysis hop (N/4)
pub const HOP: usize = FRAME / 4;

/// Stretch range; the ends map onto `Hs = 1` and `Hs = 16·HOP`
pub const MIN_STRETCH: f64 = 1.0 / HOP as f64;
pub const MAX_STRETCH: f64 = 16.0;

/// Synthesis phases are wrapped every this many frames
const WRAP_INTERVAL: u32 = 16;

/// Pitch ratios within this distance of 1 snap to identity
const PITCH_SNAP: f64 = 0.02;

/// Longest lead of the synthesis writer over the output reader (seconds)
const MAX_LEAD_SECONDS: f64 = 1.0;

/// Window weight below which output is attenuated rather than normalized
const WEIGHT_FLOOR: f32 = 0.1;

/// Clamp and snap a pitch ratio to `[0.5, 2]`
pub fn normalize_pitch(ratio: f64) -> f64 {
    if !ratio.is_finite() {
        return 1.0;
    }
    let ratio = ratio.clamp(0.5, 2.0);
    if (ratio - 1.0).abs() <= PITCH_SNAP { 1.0 } else { ratio }
}

/// Synthesis hop for a stretch factor: `clamp(round(Ha·stretch), 1, 16·Ha)`
pub fn synthesis_hop(analysis_hop: usize, stretch: f64) -> usize {
    let stretch = if stretch.is_finite() { stretch } else { 1.0 };
    (analysis_hop as f64 * stretch)
        .round()
        .clamp(1.0, (analysis_hop * 16) as f64) as usize
}

// ============ Frame Processor ============

/// One-frame STFT analysis/resynthesis with phase propagation
pub struct StftFrameProcessor {
    fft: RealFft,
    ifft: ComplexFft,
    window: Vec<f64>,
    time: Vec<f64>,
    half: Vec<Complex64>,
    full: Vec<Complex64>,
    inverse: Vec<Complex64>,
    magnitude: Vec<f64>,
    frequency: Vec<f64>,
    analysis_phase: Vec<f64>,
    synthesis_phase: Vec<f64>,
    pitch: f64,
    first_frame: bool,
    frames: u32,
}

impl StftFrameProcessor {
    pub fn new() -> Self {
        let bins = FRAME / 2 + 1;
        Self {
            fft: RealFft::new(FRAME),
            ifft: ComplexFft::new(FRAME),
            window: WindowKind::Hann.table(FRAME, true),
            time: vec![0.0; FRAME],
            half: vec![ZERO; bins],
            full: vec![ZERO; FRAME],
            inverse: vec![ZERO; FRAME],
            magnitude: vec![0.0; bins],
            frequency: vec![0.0; bins],
            analysis_phase: vec![0.0; bins],
            synthesis_phase: vec![0.0; bins],
            pitch: 1.0,
            first_frame: true,
            frames: 0,
        }
    }

    pub fn set_pitch(&mut self, ratio: f64) {
        self.pitch = normalize_pitch(ratio);
    }

    pub fn pitch(&self) -> f64 {
        self.pitch
    }

    /// Next frame re-initializes synthesis phases from the analysis
    pub fn restart(&mut self) {
        self.first_frame = true;
    }

    /// Analysis and synthesis window
    pub fn window(&self) -> &[f64] {
        &self.window
    }

    /// Last reconstructed spectrum (before the inverse transform)
    pub fn spectrum(&self) -> &[Complex64] {
        &self.full
    }

    /// Analyse `input` (FRAME samples, oldest first) and write the
    /// synthesis-windowed frame to `output`. Overlap-added frames sum to
    /// the input times the accumulated squared window.
    ///
    /// `analysis_hop` is the distance from the previous frame's start;
    /// `synthesis_hop` the distance between output frames.
    pub fn process_frame(
        &mut self,
        input: &[f64],
        analysis_hop: f64,
        synthesis_hop: f64,
        output: &mut [f64],
    ) {
        let bins = FRAME / 2 + 1;
        for ((t, &x), &w) in self.time.iter_mut().zip(input).zip(&self.window) {
            *t = x * w;
        }
        self.fft.forward(&mut self.time, &mut self.half);

        let analysis_hop = analysis_hop.max(1.0);
        for k in 0..bins {
            let bin = self.half[k];
            let phase = bin.im.atan2(bin.re);
            self.magnitude[k] = bin.norm();
            let omega = TAU * k as f64 / FRAME as f64;
            self.frequency[k] = if k == 0 {
                0.0
            } else if self.first_frame {
                omega
            } else {
                let delta = princarg(phase - self.analysis_phase[k] - omega * analysis_hop);
                (omega + delta / analysis_hop).clamp(-2.0 * omega, 2.0 * omega)
            };
            self.analysis_phase[k] = phase;
        }

        let pitch = self.pitch;
        for k in 0..bins {
            let source = (k as f64 / pitch).round() as usize;
            let (magnitude, phase) = if source < bins {
                if self.first_frame {
                    self.synthesis_phase[k] = self.analysis_phase[source];
                } else {
                    self.synthesis_phase[k] += self.frequency[source] * synthesis_hop * pitch;
                }
                (self.magnitude[source], self.synthesis_phase[k])
            } else {
                (0.0, self.synthesis_phase[k])
            };
            self.half[k] = Complex64::from_polar(magnitude, phase);
        }

        self.first_frame = false;
        self.frames = self.frames.wrapping_add(1);
        if self.frames % WRAP_INTERVAL == 0 {
            for theta in &mut self.synthesis_phase {
                *theta = princarg(*theta);
            }
        }

        hermitian_fill(&self.half, &mut self.full);
        // transform a copy so the reconstructed spectrum stays inspectable
        self.inverse.copy_from_slice(&self.full);
        self.ifft.inverse(&mut self.inverse);
        for ((o, c), &w) in output.iter_mut().zip(&self.inverse).zip(&self.window) {
            *o = c.re * w;
        }
    }

    pub fn reset(&mut self) {
        self.analysis_phase.fill(0.0);
        self.synthesis_phase.fill(0.0);
        self.frequency.fill(0.0);
        self.magnitude.fill(0.0);
        self.full.fill(ZERO);
        self.first_frame = true;
        self.frames = 0;
    }
}

impl Default for StftFrameProcessor {
    fn default() -> Self {
        Self::new()
    }
}

// ============ Streaming Vocoder ============

/// Real-time pitch shifter / stretcher, latency `FRAME` samples
pub struct PhaseVocoder {
    frames: StftFrameProcessor,
    input: RingBuffer,
    analysis: Vec<f64>,
    synth: Vec<f64>,
    /// Overlap-added output and the squared window under it
    output: RingBuffer,
    weight: RingBuffer,
    counter: usize,
    stretch: f64,
    /// Next output position to read
    read: u64,
    /// Start of the next synthesis frame
    write: u64,
    max_lead: u64,
}

impl PhaseVocoder {
    pub fn new(sample_rate: f64) -> Self {
        let max_lead = (MAX_LEAD_SECONDS * sample_rate) as usize;
        let span = max_lead + 16 * HOP + FRAME;
        Self {
            frames: StftFrameProcessor::new(),
            input: RingBuffer::new(2 * FRAME),
            analysis: vec![0.0; FRAME],
            synth: vec![0.0; FRAME],
            output: RingBuffer::new(span),
            weight: RingBuffer::new(span),
            counter: 0,
            stretch: 1.0,
            read: 0,
            write: 0,
            max_lead: max_lead as u64,
        }
    }

    pub fn set_pitch(&mut self, ratio: f64) {
        self.frames.set_pitch(ratio);
    }

    /// Time stretch factor; `> 1` spreads synthesis frames further apart
    /// than analysis frames
    pub fn set_stretch(&mut self, stretch: f64) {
        if stretch.is_finite() {
            self.stretch = stretch.clamp(MIN_STRETCH, MAX_STRETCH);
        }
    }

    pub fn stretch(&self) -> f64 {
        self.stretch
    }

    /// Current synthesis hop
    pub fn synthesis_hop(&self) -> usize {
        synthesis_hop(HOP, self.stretch)
    }

    pub fn latency(&self) -> usize {
        FRAME
    }

    pub fn tail(&self) -> usize {
        2 * FRAME + self.max_lead as usize
    }

    pub fn frame_processor(&self) -> &StftFrameProcessor {
        &self.frames
    }

    #[inline]
    pub fn process(&mut self, x: Sample) -> Sample {
        self.input.push(scrub(x));
        let acc = self.output.take_at(self.read);
        let weight = self.weight.take_at(self.read);
        self.read += 1;
        self.counter += 1;
        if self.counter == HOP {
            self.counter = 0;
            self.run_frame();
        }
        acc / weight.max(WEIGHT_FLOOR)
    }

    fn run_frame(&mut self) {
        if self.write < self.read {
            // compressing: positions before `read` are already gone
            self.write = self.read;
            self.frames.restart();
        } else if self.write - self.read > self.max_lead {
            // stretching: drop the queued output instead of overlapping it
            self.output.clear();
            self.weight.clear();
            self.write = self.read;
            self.frames.restart();
        }

        for (i, a) in self.analysis.iter_mut().enumerate() {
            *a = self.input.read(FRAME - 1 - i) as f64;
        }
        let hs = self.synthesis_hop();
        self.frames
            .process_frame(&self.analysis, HOP as f64, hs as f64, &mut self.synth);

        for (i, (&y, &w)) in self.synth.iter().zip(self.frames.window()).enumerate() {
            let position = self.write + i as u64;
            self.output.add_at(position, y as Sample);
            self.weight.add_at(position, (w * w) as Sample);
        }
        self.write += hs as u64;
    }

    pub fn reset(&mut self) {
        self.frames.reset();
        self.input.clear();
        self.output.clear();
        self.weight.clear();
        self.counter = 0;
        self.read = 0;
        self.write = 0;
    }
}
