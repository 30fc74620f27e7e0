//! Window tables and overlap-add scheduling

use std::f64::consts::PI;

/// Supported analysis/synthesis windows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowKind {
    #[default]
    Hann,
    Hamming,
    Blackman,
}

impl WindowKind {
    /// Window value at `i` of `len`; periodic windows tile exactly under OLA
    #[inline]
    pub fn value(self, i: usize, len: usize, periodic: bool) -> f64 {
        let denom = if periodic { len } else { len.saturating_sub(1).max(1) } as f64;
        let x = 2.0 * PI * i as f64 / denom;
        match self {
            Self::Hann => 0.5 - 0.5 * x.cos(),
            Self::Hamming => 0.54 - 0.46 * x.cos(),
            Self::Blackman => 0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos(),
        }
    }

    pub fn table(self, len: usize, periodic: bool) -> Vec<f64> {
        (0..len).map(|i| self.value(i, len, periodic)).collect()
    }
}

/// Sum of `analysis·synthesis` over all frames overlapping one sample.
///
/// Divide the synthesis output by this to get unity reconstruction.
pub fn ola_gain(analysis: &[f64], synthesis: &[f64], hop: usize) -> f64 {
    let n = analysis.len();
    let hop = hop.max(1);
    let mut sum = 0.0;
    let mut i = 0;
    while i < n {
        sum += analysis[i] * synthesis[i];
        i += hop;
    }
    sum
}

// ============ Overlap-Add Scheduler ============

/// Sample-in/sample-out STFT frame scheduler with fixed hop.
///
/// Every `hop` input samples the callback receives the latest `frame`
/// input samples and fills a synthesis frame that is overlap-added into
/// the output. Latency is `frame` samples.
pub struct OverlapAdd {
    frame: usize,
    hop: usize,
    input: Vec<f64>,
    output: Vec<f64>,
    synth: Vec<f64>,
    counter: usize,
}

impl OverlapAdd {
    pub fn new(frame: usize, hop: usize) -> Self {
        let hop = hop.clamp(1, frame.max(1));
        Self {
            frame,
            hop,
            input: vec![0.0; frame],
            output: vec![0.0; frame],
            synth: vec![0.0; frame],
            counter: 0,
        }
    }

    #[inline]
    pub fn latency(&self) -> usize {
        self.frame
    }

    #[inline]
    pub fn hop(&self) -> usize {
        self.hop
    }

    /// Push one sample, pop one sample
    #[inline]
    pub fn push<F>(&mut self, x: f64, mut process: F) -> f64
    where
        F: FnMut(&[f64], &mut [f64]),
    {
        self.input[self.frame - self.hop + self.counter] = x;
        let y = self.output[self.counter];
        self.counter += 1;
        if self.counter == self.hop {
            self.counter = 0;
            self.synth.fill(0.0);
            process(&self.input, &mut self.synth);

            self.output.copy_within(self.hop.., 0);
            let tail = self.frame - self.hop;
            self.output[tail..].fill(0.0);
            for (o, s) in self.output.iter_mut().zip(self.synth.iter()) {
                *o += *s;
            }
            self.input.copy_within(self.hop.., 0);
        }
        y
    }

    pub fn reset(&mut self) {
        self.input.fill(0.0);
        self.output.fill(0.0);
        self.synth.fill(0.0);
        self.counter = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hann_quarter_hop_gain() {
        let w = WindowKind::Hann.table(2048, true);
        assert!((ola_gain(&w, &w, 512) - 1.5).abs() < 1e-9);
        assert!((ola_gain(&w, &vec![1.0; 2048], 1024) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_symmetric_windows() {
        for kind in [WindowKind::Hann, WindowKind::Hamming, WindowKind::Blackman] {
            let w = kind.table(65, false);
            assert!((w[0] - w[64]).abs() < 1e-12);
            assert!((w[32] - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_overlap_add_identity() {
        let frame = 64;
        let hop = 16;
        let w = WindowKind::Hann.table(frame, true);
        let norm = ola_gain(&w, &w, hop);
        let mut ola = OverlapAdd::new(frame, hop);
        let input: Vec<f64> = (0..1024).map(|i| (i as f64 * 0.05).sin()).collect();
        let mut output = Vec::new();
        for &x in &input {
            output.push(ola.push(x, |frame_in, frame_out| {
                for i in 0..frame_in.len() {
                    frame_out[i] = frame_in[i] * w[i] * w[i] / norm;
                }
            }));
        }
        for i in 2 * frame..input.len() {
            assert!((output[i] - input[i - frame]).abs() < 1e-9, "sample {i}");
        }
    }
}
