//! Host-facing engine rack
//!
//! [`EngineRack`] lives on the audio thread and [`RackController`] on control
//! threads. The two halves share only atomics and lock-free queues:
//!
//! - parameters: relaxed `f32` stores plus a per-slot dirty mask
//! - engines: built and prepared by the controller, handed over through one
//!   SPSC queue per slot, crossfaded in, then returned through the reclaim
//!   queue so they are dropped off the audio thread
//! - impulse responses: partitioned by the controller and swapped by the
//!   convolution engine through its try-lock exchange

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use fx_core::{
    AtomicParam, DenormalGuard, FxError, FxResult, MAX_PARAMETERS, ParameterMap, Sample,
    db_to_gain, hard_limit, scrub_block, soft_clip, validate_stream,
};
use fx_dsp::convolution::IrExchange;
use fx_dsp::impulse::{ImpulseResponse, IrError};
use log::{debug, info, warn};
use parking_lot::Mutex;
use rtrb::{Consumer, Producer, PushError, RingBuffer};

use crate::config::{RACK_SLOTS, RackConfig};
use crate::engine::Engine;
use crate::factory::create_engine;
use crate::registry::EngineId;

/// Engines that may wait for pickup per slot
pub const HANDOFF_CAPACITY: usize = 4;

/// Retired engines awaiting [`RackController::collect_garbage`]
pub const RECLAIM_CAPACITY: usize = RACK_SLOTS * (HANDOFF_CAPACITY + 1);

/// Master peak meter fall time
const PEAK_RELEASE_SECONDS: f64 = 0.3;

const NO_ENGINE: u32 = u32::MAX;

// ============ Shared State ============

struct SlotShared {
    bypass: AtomicBool,
    mix: AtomicParam,
    /// Linear
    post_gain: AtomicParam,
    values: [AtomicParam; MAX_PARAMETERS],
    dirty: AtomicU32,
    /// Engine currently processing, `NO_ENGINE` when empty
    active: AtomicU32,
    latency: AtomicUsize,
    tail: AtomicUsize,
    ir_port: Mutex<Option<Arc<IrExchange>>>,
}

impl SlotShared {
    fn new() -> Self {
        Self {
            bypass: AtomicBool::new(false),
            mix: AtomicParam::new(1.0),
            post_gain: AtomicParam::new(1.0),
            values: std::array::from_fn(|_| AtomicParam::new(0.5)),
            dirty: AtomicU32::new(0),
            active: AtomicU32::new(NO_ENGINE),
            latency: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            ir_port: Mutex::new(None),
        }
    }

    /// Control side: publish new targets
    fn write_parameters(&self, params: &ParameterMap) {
        let mut bits = 0u32;
        for (index, value) in params.iter() {
            let Some(slot) = self.values.get(index) else {
                continue;
            };
            if !value.is_finite() {
                continue;
            }
            slot.set(value.clamp(0.0, 1.0));
            bits |= 1 << index;
        }
        if bits != 0 {
            self.dirty.fetch_or(bits, Ordering::Release);
        }
    }

    /// Audio side: values written since the last call
    fn take_parameters(&self) -> Option<ParameterMap> {
        let bits = self.dirty.swap(0, Ordering::Acquire);
        if bits == 0 {
            return None;
        }
        let mut map = ParameterMap::new();
        for (index, value) in self.values.iter().enumerate() {
            if bits & (1 << index) != 0 {
                map.set(index, value.get());
            }
        }
        Some(map)
    }

    /// Audio side: hand taken values back to the next block
    fn defer_parameters(&self, map: &ParameterMap) {
        let bits = map.iter().fold(0u32, |bits, (index, _)| bits | 1 << index);
        self.dirty.fetch_or(bits, Ordering::Relaxed);
    }
}

struct RackShared {
    slots: [SlotShared; RACK_SLOTS],
    master_gain: AtomicParam,
    peak: AtomicParam,
    sample_rate: AtomicU64,
    max_block: AtomicUsize,
    stale: AtomicU64,
}

impl RackShared {
    fn new(config: &RackConfig) -> Self {
        Self {
            slots: std::array::from_fn(|_| SlotShared::new()),
            master_gain: AtomicParam::new(1.0),
            peak: AtomicParam::new(0.0),
            sample_rate: AtomicU64::new(config.sample_rate.to_bits()),
            max_block: AtomicUsize::new(config.max_block_size),
            stale: AtomicU64::new(0),
        }
    }

    fn stream(&self) -> (f64, usize) {
        (
            f64::from_bits(self.sample_rate.load(Ordering::Acquire)),
            self.max_block.load(Ordering::Acquire),
        )
    }
}

/// Prepared engine in transit; `None` empties the slot
struct Handoff {
    engine: Option<Box<dyn Engine>>,
    sample_rate: f64,
    max_block: usize,
}

// ============ Audio Side ============

struct Slot {
    engine: Option<Box<dyn Engine>>,
    /// Engine being faded out, or waiting for room in the reclaim queue
    outgoing: Option<Box<dyn Engine>>,
    fading: bool,
    fade_pos: usize,
    incoming: Consumer<Handoff>,
    mix: f32,
    post_gain: f32,
}

impl Slot {
    fn new(incoming: Consumer<Handoff>) -> Self {
        Self {
            engine: None,
            outgoing: None,
            fading: false,
            fade_pos: 0,
            incoming,
            mix: 1.0,
            post_gain: 1.0,
        }
    }

    fn retire(&mut self, reclaim: &mut Producer<Box<dyn Engine>>) {
        if self.fading {
            return;
        }
        if let Some(old) = self.outgoing.take() {
            if let Err(PushError::Full(old)) = reclaim.push(old) {
                self.outgoing = Some(old);
            }
        }
    }

    /// Take at most one pending engine
    fn accept(
        &mut self,
        state: &SlotShared,
        reclaim: &mut Producer<Box<dyn Engine>>,
        stale: &AtomicU64,
        (sample_rate, max_block): (f64, usize),
        fade_len: usize,
    ) {
        if self.fading || self.outgoing.is_some() || reclaim.is_full() {
            return;
        }
        let Ok(handoff) = self.incoming.pop() else {
            return;
        };
        if handoff.sample_rate != sample_rate || handoff.max_block != max_block {
            stale.fetch_add(1, Ordering::Relaxed);
            if let Some(engine) = handoff.engine {
                let _ = reclaim.push(engine);
            }
            return;
        }

        let id = handoff
            .engine
            .as_ref()
            .map_or(NO_ENGINE, |e| e.id().to_u32());
        state.active.store(id, Ordering::Relaxed);

        self.outgoing = std::mem::replace(&mut self.engine, handoff.engine);
        self.fade_pos = 0;
        self.fading = fade_len > 0 && (self.outgoing.is_some() || self.engine.is_some());
        self.retire(reclaim);
    }

    fn is_idle(&self, target_mix: f32) -> bool {
        if self.fading {
            return false;
        }
        self.engine.is_none() || (self.mix == 0.0 && target_mix == 0.0)
    }
}

/// Run `engine` over the first `n` frames of `bufs`
fn run(engine: &mut dyn Engine, bufs: &mut [Vec<Sample>; 2], channels: usize, n: usize) {
    let [left, right] = bufs;
    let mut block: [&mut [Sample]; 2] = [&mut left[..n], &mut right[..n]];
    engine.process(&mut block[..channels]);
}

/// Fixed array of engine slots with a master stage
///
/// Owned by the audio thread. `prepare` allocates and may only be called
/// between callbacks; `process` and `reset` are wait-free.
pub struct EngineRack {
    slots: Vec<Slot>,
    shared: Arc<RackShared>,
    reclaim: Producer<Box<dyn Engine>>,
    config: RackConfig,
    wet: [Vec<Sample>; 2],
    fade: [Vec<Sample>; 2],
    master_gain: f32,
    peak: f32,
    peak_decay: f32,
}

impl EngineRack {
    /// Build a prepared rack and its control handle
    pub fn new(config: RackConfig) -> FxResult<(Self, RackController)> {
        config.validate()?;
        let shared = Arc::new(RackShared::new(&config));
        let (reclaim_tx, reclaim_rx) = RingBuffer::new(RECLAIM_CAPACITY);

        let mut slots = Vec::with_capacity(RACK_SLOTS);
        let mut producers = Vec::with_capacity(RACK_SLOTS);
        for _ in 0..RACK_SLOTS {
            let (tx, rx) = RingBuffer::new(HANDOFF_CAPACITY);
            slots.push(Slot::new(rx));
            producers.push(tx);
        }

        let mut rack = Self {
            slots,
            shared: Arc::clone(&shared),
            reclaim: reclaim_tx,
            config: config.clone(),
            wet: [Vec::new(), Vec::new()],
            fade: [Vec::new(), Vec::new()],
            master_gain: 1.0,
            peak: 0.0,
            peak_decay: 0.0,
        };
        rack.prepare(config.sample_rate, config.max_block_size)?;

        let controller = RackController {
            shared,
            handoff: producers,
            reclaim: reclaim_rx,
            requested: [EngineId::Bypass; RACK_SLOTS],
        };
        Ok((rack, controller))
    }

    /// Reallocate for a new stream and re-prepare every installed engine.
    /// Engines still in transit from the controller become stale.
    pub fn prepare(&mut self, sample_rate: f64, max_block: usize) -> FxResult<()> {
        validate_stream(sample_rate, max_block)?;
        self.config.sample_rate = sample_rate;
        self.config.max_block_size = max_block;

        for buf in self.wet.iter_mut().chain(self.fade.iter_mut()) {
            buf.clear();
            buf.resize(max_block, 0.0);
        }

        for (slot, state) in self.slots.iter_mut().zip(&self.shared.slots) {
            slot.fading = false;
            slot.outgoing = None;
            if let Some(engine) = slot.engine.as_mut() {
                engine.prepare(sample_rate, max_block);
            }
            *state.ir_port.lock() = slot
                .engine
                .as_ref()
                .and_then(|e| e.impulse_response_port());
        }

        self.peak = 0.0;
        self.peak_decay = (-1.0 / (PEAK_RELEASE_SECONDS * sample_rate)).exp() as f32;
        self.shared.peak.set(0.0);
        self.shared
            .sample_rate
            .store(sample_rate.to_bits(), Ordering::Release);
        self.shared.max_block.store(max_block, Ordering::Release);

        info!(
            "Rack prepared: {}Hz, {} samples, {} channel(s)",
            sample_rate, max_block, self.config.channels
        );
        Ok(())
    }

    /// Clear every engine's state and the meter
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            if let Some(engine) = slot.engine.as_mut() {
                engine.reset();
            }
            slot.fading = false;
        }
        self.peak = 0.0;
        self.shared.peak.set(0.0);
    }

    /// Process a block in place. Channels beyond the configured count are
    /// left untouched; blocks longer than the prepared maximum are split.
    pub fn process(&mut self, block: &mut [&mut [Sample]]) {
        let _guard = DenormalGuard::new();

        let channels = block.len().min(self.config.channels);
        if channels == 0 {
            return;
        }
        let frames = block[..channels]
            .iter()
            .map(|c| c.len())
            .min()
            .unwrap_or(0);
        for ch in block[..channels].iter_mut() {
            scrub_block(&mut ch[..frames]);
        }

        self.begin_block();

        let mut start = 0;
        while start < frames {
            let end = (start + self.config.max_block_size).min(frames);
            self.process_slots(block, channels, start, end);
            self.process_master(block, channels, start, end);
            start = end;
        }

        self.publish();
    }

    fn begin_block(&mut self) {
        let stream = (self.config.sample_rate, self.config.max_block_size);
        let fade_len = self.config.swap_fade_samples;
        for (slot, state) in self.slots.iter_mut().zip(&self.shared.slots) {
            slot.retire(&mut self.reclaim);
            slot.accept(state, &mut self.reclaim, &self.shared.stale, stream, fade_len);
            let Some(map) = state.take_parameters() else {
                continue;
            };
            // updates written after a queued swap belong to the queued engine
            if !slot.incoming.is_empty() {
                state.defer_parameters(&map);
            } else if let Some(engine) = slot.engine.as_mut() {
                engine.apply_parameters(&map);
            }
        }
    }

    fn process_slots(&mut self, block: &mut [&mut [Sample]], channels: usize, start: usize, end: usize) {
        let n = end - start;
        let fade_len = self.config.swap_fade_samples.max(1);

        for (slot, state) in self.slots.iter_mut().zip(&self.shared.slots) {
            let target_mix = if state.bypass.load(Ordering::Relaxed) {
                0.0
            } else {
                state.mix.get()
            };
            let target_gain = state.post_gain.get();
            if slot.is_idle(target_mix) {
                slot.mix = target_mix;
                slot.post_gain = target_gain;
                continue;
            }

            for c in 0..channels {
                self.wet[c][..n].copy_from_slice(&block[c][start..end]);
            }
            if let Some(engine) = slot.engine.as_mut() {
                run(engine.as_mut(), &mut self.wet, channels, n);
            }

            if slot.fading {
                for c in 0..channels {
                    self.fade[c][..n].copy_from_slice(&block[c][start..end]);
                }
                if let Some(old) = slot.outgoing.as_mut() {
                    run(old.as_mut(), &mut self.fade, channels, n);
                }
                for c in 0..channels {
                    let (wet, old) = (&mut self.wet[c][..n], &self.fade[c][..n]);
                    for (i, (w, o)) in wet.iter_mut().zip(old).enumerate() {
                        let t = ((slot.fade_pos + i + 1) as f32 / fade_len as f32).min(1.0);
                        *w = o + (*w - o) * t;
                    }
                }
                slot.fade_pos += n;
                if slot.fade_pos >= fade_len {
                    slot.fading = false;
                }
            }

            let step = 1.0 / n as f32;
            for c in 0..channels {
                let wet = &mut self.wet[c][..n];
                scrub_block(wet);
                let out = &mut block[c][start..end];
                for (i, (y, w)) in out.iter_mut().zip(wet.iter()).enumerate() {
                    let t = (i + 1) as f32 * step;
                    let mix = slot.mix + (target_mix - slot.mix) * t;
                    let gain = slot.post_gain + (target_gain - slot.post_gain) * t;
                    *y = *y * (1.0 - mix) + soft_clip(*w) * mix * gain;
                }
            }
            slot.mix = target_mix;
            slot.post_gain = target_gain;
        }
    }

    fn process_master(&mut self, block: &mut [&mut [Sample]], channels: usize, start: usize, end: usize) {
        let target = self.shared.master_gain.get();
        let step = 1.0 / (end - start) as f32;
        for i in start..end {
            let t = (i - start + 1) as f32 * step;
            let gain = self.master_gain + (target - self.master_gain) * t;
            self.peak *= self.peak_decay;
            for ch in block[..channels].iter_mut() {
                let y = hard_limit(ch[i] * gain);
                ch[i] = y;
                self.peak = self.peak.max(y.abs());
            }
        }
        self.master_gain = target;
    }

    fn publish(&self) {
        for (slot, state) in self.slots.iter().zip(&self.shared.slots) {
            let (latency, tail) = slot
                .engine
                .as_ref()
                .map_or((0, 0), |e| (e.latency_samples(), e.tail_samples()));
            state.latency.store(latency, Ordering::Relaxed);
            state.tail.store(tail, Ordering::Relaxed);
        }
        self.shared.peak.set(self.peak);
    }

    pub fn config(&self) -> &RackConfig {
        &self.config
    }

    /// Engine processing in `slot`, if any
    pub fn slot_engine(&self, slot: usize) -> Option<EngineId> {
        self.slots.get(slot)?.engine.as_ref().map(|e| e.id())
    }

    /// Summed latency of the non-bypassed slots
    pub fn latency_samples(&self) -> usize {
        self.slots
            .iter()
            .zip(&self.shared.slots)
            .filter(|(_, state)| !state.bypass.load(Ordering::Relaxed))
            .filter_map(|(slot, _)| slot.engine.as_ref())
            .map(|e| e.latency_samples())
            .sum()
    }

    /// Longest time the chain may ring after its input falls silent
    pub fn tail_samples(&self) -> usize {
        self.slots
            .iter()
            .filter_map(|slot| slot.engine.as_ref())
            .fold(0usize, |acc, e| acc.saturating_add(e.tail_samples()))
    }
}

// ============ Control Side ============

/// Control-thread handle of an [`EngineRack`]
///
/// Every operation either succeeds or leaves the slot as it was.
pub struct RackController {
    shared: Arc<RackShared>,
    handoff: Vec<Producer<Handoff>>,
    reclaim: Consumer<Box<dyn Engine>>,
    requested: [EngineId; RACK_SLOTS],
}

impl RackController {
    fn slot_state(&self, slot: usize) -> FxResult<&SlotShared> {
        self.shared.slots.get(slot).ok_or(FxError::InvalidSlot(slot))
    }

    /// Stream the audio side is currently prepared for
    pub fn stream(&self) -> (f64, usize) {
        self.shared.stream()
    }

    /// Build, prepare and queue an engine for `slot`. `Bypass` empties it.
    pub fn set_slot_engine(&mut self, slot: usize, id: EngineId) -> FxResult<()> {
        self.set_slot_engine_with(slot, id, &ParameterMap::new())
    }

    /// As [`set_slot_engine`](Self::set_slot_engine), starting from `params`
    /// instead of the defaults
    pub fn set_slot_engine_with(&mut self, slot: usize, id: EngineId, params: &ParameterMap) -> FxResult<()> {
        if slot >= RACK_SLOTS {
            warn!("set_slot_engine: slot {slot} out of range");
            return Err(FxError::InvalidSlot(slot));
        }
        if self.handoff[slot].is_full() {
            warn!("set_slot_engine: handoff queue full for slot {slot}");
            return Err(FxError::QueueFull(slot));
        }

        let (sample_rate, max_block) = self.shared.stream();
        let engine = (id != EngineId::Bypass).then(|| {
            let mut engine = create_engine(id, sample_rate, max_block);
            engine.apply_parameters(params);
            engine
        });
        let port = engine.as_ref().and_then(|e| e.impulse_response_port());

        let state = &self.shared.slots[slot];
        state.dirty.store(0, Ordering::Relaxed);
        let handoff = Handoff {
            engine,
            sample_rate,
            max_block,
        };
        if self.handoff[slot].push(handoff).is_err() {
            warn!("set_slot_engine: handoff queue full for slot {slot}");
            return Err(FxError::QueueFull(slot));
        }
        *state.ir_port.lock() = port;
        self.requested[slot] = id;
        info!("Slot {slot}: {id} queued at {sample_rate}Hz/{max_block}");
        Ok(())
    }

    /// Decode a raw host identifier, then install
    pub fn set_slot_engine_by_id(&mut self, slot: usize, raw: u32) -> FxResult<()> {
        let id = EngineId::from_u32(raw).ok_or_else(|| {
            warn!("set_slot_engine: unknown engine id {raw}");
            FxError::UnknownEngine(raw)
        })?;
        self.set_slot_engine(slot, id)
    }

    /// Swap the slot's engine out for nothing
    pub fn clear_slot(&mut self, slot: usize) -> FxResult<()> {
        self.set_slot_engine(slot, EngineId::Bypass)
    }

    pub fn set_slot_bypass(&self, slot: usize, bypass: bool) -> FxResult<()> {
        self.slot_state(slot)?
            .bypass
            .store(bypass, Ordering::Relaxed);
        Ok(())
    }

    /// Slot dry/wet, `0` dry to `1` wet
    pub fn set_slot_mix(&self, slot: usize, mix: f32) -> FxResult<()> {
        let state = self.slot_state(slot)?;
        if mix.is_finite() {
            state.mix.set(mix.clamp(0.0, 1.0));
        }
        Ok(())
    }

    /// Gain on the slot's wet contribution
    pub fn set_slot_post_gain(&self, slot: usize, db: f32) -> FxResult<()> {
        let state = self.slot_state(slot)?;
        if db.is_finite() {
            state.post_gain.set(db_to_gain(db.clamp(-96.0, 24.0)));
        }
        Ok(())
    }

    /// Retarget parameters of the slot's engine. Values are clamped;
    /// non-finite values and indices past the transport are dropped.
    pub fn update_slot_parameters(&self, slot: usize, params: &ParameterMap) -> FxResult<()> {
        self.slot_state(slot)?.write_parameters(params);
        Ok(())
    }

    pub fn set_master_gain(&self, db: f32) {
        if db.is_finite() {
            self.shared.master_gain.set(db_to_gain(db.clamp(-96.0, 24.0)));
        }
    }

    /// Decaying output peak, linear
    pub fn master_peak(&self) -> f32 {
        self.shared.peak.get()
    }

    /// Engine last requested for `slot`
    pub fn slot_engine(&self, slot: usize) -> FxResult<EngineId> {
        self.requested
            .get(slot)
            .copied()
            .ok_or(FxError::InvalidSlot(slot))
    }

    /// Engine the audio thread is running in `slot`
    pub fn active_engine(&self, slot: usize) -> FxResult<Option<EngineId>> {
        let raw = self.slot_state(slot)?.active.load(Ordering::Relaxed);
        Ok(EngineId::from_u32(raw))
    }

    pub fn is_bypassed(&self, slot: usize) -> FxResult<bool> {
        Ok(self.slot_state(slot)?.bypass.load(Ordering::Relaxed))
    }

    pub fn slot_latency(&self, slot: usize) -> FxResult<usize> {
        Ok(self.slot_state(slot)?.latency.load(Ordering::Relaxed))
    }

    pub fn slot_tail(&self, slot: usize) -> FxResult<usize> {
        Ok(self.slot_state(slot)?.tail.load(Ordering::Relaxed))
    }

    /// Summed latency of the non-bypassed slots, as of the last block
    pub fn total_latency(&self) -> usize {
        self.shared
            .slots
            .iter()
            .filter(|s| !s.bypass.load(Ordering::Relaxed))
            .map(|s| s.latency.load(Ordering::Relaxed))
            .sum()
    }

    /// Handoffs dropped because the rack was re-prepared while in transit
    pub fn stale_rejections(&self) -> u64 {
        self.shared.stale.load(Ordering::Relaxed)
    }

    /// Partition `ir` and queue it for the slot's convolution engine
    pub fn load_impulse_response(&self, slot: usize, ir: &ImpulseResponse) -> FxResult<()> {
        let port = self
            .slot_state(slot)?
            .ir_port
            .lock()
            .clone()
            .ok_or(FxError::NoImpulseInput)?;
        let (sample_rate, _) = self.shared.stream();
        if (ir.sample_rate() - sample_rate).abs() > 0.5 {
            let err = IrError::SampleRate {
                expected: sample_rate,
                found: ir.sample_rate().round() as u32,
            };
            warn!("Slot {slot}: {err}");
            return Err(err.into());
        }
        port.load(ir).map_err(|e| {
            warn!("Slot {slot}: impulse response rejected: {e}");
            FxError::from(e)
        })?;
        debug!(
            "Slot {slot}: impulse response queued ({} samples, {} partitions of {})",
            ir.len(),
            ir.len().div_ceil(port.block_size()),
            port.block_size()
        );
        Ok(())
    }

    /// Read, validate and queue a WAV impulse response
    pub fn load_impulse_response_wav(&self, slot: usize, path: impl AsRef<Path>) -> FxResult<()> {
        let (sample_rate, _) = self.shared.stream();
        let ir = ImpulseResponse::from_wav(path.as_ref(), sample_rate).map_err(|e| {
            warn!("{}: {e}", path.as_ref().display());
            FxError::from(e)
        })?;
        self.load_impulse_response(slot, &ir)
    }

    /// Drop engines and impulse-response tables the audio thread has
    /// released. Returns the number of engines dropped.
    pub fn collect_garbage(&mut self) -> usize {
        let mut engines = 0;
        while let Ok(engine) = self.reclaim.pop() {
            debug!("Reclaimed {}", engine.name());
            engines += 1;
        }
        for (slot, state) in self.shared.slots.iter().enumerate() {
            let port = state.ir_port.lock().clone();
            if let Some(table) = port.and_then(|p| p.collect_retired()) {
                debug!("Slot {slot}: released impulse response of {} partitions", table.partitions());
            }
        }
        engines
    }
}
