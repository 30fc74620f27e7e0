//! Uniform partitioned convolution
//!
//! Mono input, stereo output. The impulse response is split into `B`-sample
//! partitions, each zero-padded to `2B` and transformed once
//! ([`IrPartitions`]). Per block the newest `2B` input samples are
//! transformed into a frequency-domain delay line (FDL); the output
//! spectrum is `Σ FDL[head − p] · IR[p]`, inverse-transformed with the
//! first half discarded (overlap-save). Latency is `B` samples.
//!
//! New tables arrive through an [`IrExchange`]: the control thread parks
//! them behind a mutex, the audio thread `try_lock`s and swaps, returning
//! the old table for the control thread to drop.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::fft::{Complex64, RealFft, ZERO};
use crate::impulse::{ImpulseResponse, IrError, MAX_IR_SECONDS};
use crate::next_pow2;

/// Smallest / largest partition size
pub const MIN_BLOCK: usize = 64;
pub const MAX_BLOCK: usize = 8192;

/// Partition size for a host block size
pub fn partition_size(max_block: usize) -> usize {
    next_pow2(max_block).clamp(MIN_BLOCK, MAX_BLOCK)
}

// ============ Partition Table ============

/// Pre-transformed impulse-response partitions for both output channels
pub struct IrPartitions {
    block_size: usize,
    len: usize,
    left: Vec<Vec<Complex64>>,
    right: Vec<Vec<Complex64>>,
}

impl IrPartitions {
    /// Partition and transform `ir` (control thread; allocates)
    pub fn new(ir: &ImpulseResponse, block_size: usize) -> Self {
        let block_size = partition_size(block_size);
        let mut fft = RealFft::new(2 * block_size);
        let left = partition_channel(ir.left(), block_size, &mut fft);
        let right = partition_channel(ir.right(), block_size, &mut fft);
        log::debug!(
            "impulse response partitioned: {} samples, B={}, P={}",
            ir.len(),
            block_size,
            left.len()
        );
        Self {
            block_size,
            len: ir.len(),
            left,
            right,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Partition count P = ⌈L/B⌉
    pub fn partitions(&self) -> usize {
        self.left.len()
    }

    /// Impulse-response length in samples
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

fn partition_channel(ir: &[f32], block: usize, fft: &mut RealFft) -> Vec<Vec<Complex64>> {
    let count = ir.len().div_ceil(block).max(1);
    let mut time = vec![0.0f64; 2 * block];
    let mut parts = Vec::with_capacity(count);
    for p in 0..count {
        time.fill(0.0);
        let start = p * block;
        let end = (start + block).min(ir.len());
        for (dst, &src) in time.iter_mut().zip(&ir[start.min(end)..end]) {
            *dst = src as f64;
        }
        let mut spectrum = vec![ZERO; block + 1];
        fft.forward(&mut time, &mut spectrum);
        parts.push(spectrum);
    }
    parts
}

// ============ Exchange ============

/// Control → audio handoff of partition tables
pub struct IrExchange {
    pending: Mutex<Option<Box<IrPartitions>>>,
    retired: Mutex<Option<Box<IrPartitions>>>,
    block_size: AtomicUsize,
}

impl IrExchange {
    pub fn new(block_size: usize) -> Self {
        Self {
            pending: Mutex::new(None),
            retired: Mutex::new(None),
            block_size: AtomicUsize::new(partition_size(block_size)),
        }
    }

    /// Partition size the consuming convolver runs at
    pub fn block_size(&self) -> usize {
        self.block_size.load(Ordering::Relaxed)
    }

    /// Queue a table; a table not yet picked up is replaced
    pub fn submit(&self, table: IrPartitions) -> Result<(), IrError> {
        let expected = self.block_size();
        if table.block_size() != expected {
            return Err(IrError::BlockSize {
                expected,
                found: table.block_size(),
            });
        }
        let replaced = self.pending.lock().replace(Box::new(table));
        if replaced.is_some() {
            log::debug!("pending impulse response replaced before pickup");
        }
        Ok(())
    }

    /// Partition and queue `ir` at the convolver's block size
    pub fn load(&self, ir: &ImpulseResponse) -> Result<(), IrError> {
        self.submit(IrPartitions::new(ir, self.block_size()))
    }

    /// Take a table the audio thread has swapped out
    pub fn collect_retired(&self) -> Option<Box<IrPartitions>> {
        self.retired.lock().take()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.lock().is_some()
    }

    /// Audio side: swap `current` for the pending table if both locks are free
    /// and the retired slot is empty. Never blocks.
    fn try_swap(&self, current: &mut Box<IrPartitions>) -> bool {
        let Some(mut retired) = self.retired.try_lock() else {
            return false;
        };
        if retired.is_some() {
            return false;
        }
        let Some(mut pending) = self.pending.try_lock() else {
            return false;
        };
        let Some(next) = pending.take() else {
            return false;
        };
        if next.block_size() != current.block_size() {
            *retired = Some(next);
            return false;
        }
        *retired = Some(std::mem::replace(current, next));
        true
    }
}

// ============ Convolver ============

/// Mono-in / stereo-out partitioned convolver
pub struct PartitionedConvolver {
    block: usize,
    fft: RealFft,
    ir: Box<IrPartitions>,
    exchange: Arc<IrExchange>,
    history: Vec<f64>,
    time: Vec<f64>,
    fdl: Vec<Vec<Complex64>>,
    head: usize,
    gains: Vec<f64>,
    length: f64,
    acc_left: Vec<Complex64>,
    acc_right: Vec<Complex64>,
    input: Vec<f64>,
    out_left: Vec<f64>,
    out_right: Vec<f64>,
    fill: usize,
}

impl PartitionedConvolver {
    /// Convolver for host blocks up to `max_block` holding up to 4 s of IR
    pub fn new(ir: &ImpulseResponse, sample_rate: f64, max_block: usize) -> Self {
        let block = partition_size(max_block);
        let max_partitions = ((MAX_IR_SECONDS * sample_rate) / block as f64).ceil() as usize;
        let table = IrPartitions::new(ir, block);
        let fdl_len = max_partitions.max(table.partitions()).max(1);
        Self {
            block,
            fft: RealFft::new(2 * block),
            ir: Box::new(table),
            exchange: Arc::new(IrExchange::new(block)),
            history: vec![0.0; 2 * block],
            time: vec![0.0; 2 * block],
            fdl: vec![vec![ZERO; block + 1]; fdl_len],
            head: 0,
            gains: vec![1.0; fdl_len],
            length: 1.0,
            acc_left: vec![ZERO; block + 1],
            acc_right: vec![ZERO; block + 1],
            input: vec![0.0; block],
            out_left: vec![0.0; block],
            out_right: vec![0.0; block],
            fill: 0,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block
    }

    pub fn latency(&self) -> usize {
        self.block
    }

    /// Samples after the last input until the output is silent
    pub fn tail(&self) -> usize {
        self.ir.len() + 2 * self.block
    }

    /// Handle for the control thread
    pub fn exchange(&self) -> Arc<IrExchange> {
        Arc::clone(&self.exchange)
    }

    /// Scale the usable tail: partitions past `fraction` of the IR fade out
    /// over the last quarter of the kept span.
    pub fn set_length(&mut self, fraction: f64) {
        let fraction = fraction.clamp(0.05, 1.0);
        if fraction != self.length {
            self.length = fraction;
            self.update_gains();
        }
    }

    fn update_gains(&mut self) {
        let parts = self.ir.partitions() as f64;
        let keep = (parts * self.length).max(1.0);
        let fade_start = keep * 0.75;
        for (p, g) in self.gains.iter_mut().enumerate() {
            let p = p as f64;
            *g = if p < fade_start {
                1.0
            } else if p < keep {
                let t = (p - fade_start) / (keep - fade_start).max(1e-9);
                0.5 + 0.5 * (std::f64::consts::PI * t).cos()
            } else {
                0.0
            };
        }
    }

    /// Push one sample, pop one stereo pair
    #[inline]
    pub fn process(&mut self, x: f64) -> (f64, f64) {
        self.input[self.fill] = x;
        let out = (self.out_left[self.fill], self.out_right[self.fill]);
        self.fill += 1;
        if self.fill == self.block {
            self.fill = 0;
            self.run_block();
        }
        out
    }

    fn run_block(&mut self) {
        if self.exchange.try_swap(&mut self.ir) {
            self.update_gains();
        }

        let b = self.block;
        self.history.copy_within(b.., 0);
        self.history[b..].copy_from_slice(&self.input);
        self.time.copy_from_slice(&self.history);

        let slots = self.fdl.len();
        self.head = (self.head + 1) % slots;
        self.fft.forward(&mut self.time, &mut self.fdl[self.head]);

        self.acc_left.fill(ZERO);
        self.acc_right.fill(ZERO);
        let used = self.ir.partitions().min(slots);
        for p in 0..used {
            let g = self.gains[p];
            if g == 0.0 {
                continue;
            }
            let spectrum = &self.fdl[(self.head + slots - p) % slots];
            let (ir_l, ir_r) = (&self.ir.left[p], &self.ir.right[p]);
            for k in 0..=b {
                let x = spectrum[k] * g;
                self.acc_left[k] += x * ir_l[k];
                self.acc_right[k] += x * ir_r[k];
            }
        }

        self.fft.inverse(&mut self.acc_left, &mut self.time);
        self.out_left.copy_from_slice(&self.time[b..]);
        self.fft.inverse(&mut self.acc_right, &mut self.time);
        self.out_right.copy_from_slice(&self.time[b..]);

        for v in self.out_left.iter_mut().chain(self.out_right.iter_mut()) {
            *v = fx_core::flush_denormal(*v);
        }
    }

    pub fn reset(&mut self) {
        self.history.fill(0.0);
        for slot in &mut self.fdl {
            slot.fill(ZERO);
        }
        self.input.fill(0.0);
        self.out_left.fill(0.0);
        self.out_right.fill(0.0);
        self.fill = 0;
        self.head = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn impulse_ir(left_delay: usize, right_delay: usize) -> ImpulseResponse {
        let len = left_delay.max(right_delay) + 1;
        let mut l = vec![0.0; len];
        let mut r = vec![0.0; len];
        l[left_delay] = 1.0;
        r[right_delay] = 0.5;
        ImpulseResponse::from_channels(l, r, 48_000.0).unwrap()
    }

    #[test]
    fn test_partition_size() {
        assert_eq!(partition_size(1), 64);
        assert_eq!(partition_size(512), 512);
        assert_eq!(partition_size(600), 1024);
        assert_eq!(partition_size(100_000), 8192);
    }

    #[test]
    fn test_delayed_impulse_across_partitions() {
        let ir = impulse_ir(300, 70);
        let mut conv = PartitionedConvolver::new(&ir, 48_000.0, 64);
        let latency = conv.latency();
        let mut left = Vec::new();
        let mut right = Vec::new();
        for n in 0..2048 {
            let (l, r) = conv.process(if n == 0 { 1.0 } else { 0.0 });
            left.push(l);
            right.push(r);
        }
        assert!((left[latency + 300] - 1.0).abs() < 1e-9);
        assert!((right[latency + 70] - 0.5).abs() < 1e-9);
        let stray: f64 = left
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != latency + 300)
            .map(|(_, v)| v.abs())
            .fold(0.0, f64::max);
        assert!(stray < 1e-9);
    }

    #[test]
    fn test_exchange_swaps_at_block_boundary() {
        let mut conv = PartitionedConvolver::new(&impulse_ir(0, 0), 48_000.0, 64);
        let exchange = conv.exchange();
        exchange.load(&impulse_ir(10, 10)).unwrap();
        assert!(exchange.has_pending());

        for _ in 0..64 {
            conv.process(0.0);
        }
        assert!(!exchange.has_pending());
        assert!(exchange.collect_retired().is_some());

        let mut out = Vec::new();
        for n in 0..256 {
            out.push(conv.process(if n == 0 { 1.0 } else { 0.0 }).0);
        }
        assert!((out[64 + 10] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_exchange_rejects_wrong_block_size() {
        let exchange = IrExchange::new(256);
        let table = IrPartitions::new(&impulse_ir(0, 0), 1024);
        assert!(matches!(
            exchange.submit(table),
            Err(IrError::BlockSize { expected: 256, found: 1024 })
        ));
    }

    #[test]
    fn test_length_scaling_truncates_tail() {
        let ir = impulse_ir(4000, 4000);
        let mut conv = PartitionedConvolver::new(&ir, 48_000.0, 64);
        conv.set_length(0.25);
        let mut peak = 0.0f64;
        for n in 0..6000 {
            peak = peak.max(conv.process(if n == 0 { 1.0 } else { 0.0 }).0.abs());
        }
        assert!(peak < 1e-9);
    }
}
