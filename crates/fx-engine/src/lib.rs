//! fx-engine: Engine runtime, engine library and host-facing rack
//!
//! Provides:
//! - The `Engine` contract and the kernel adapter most engines are built on
//! - The append-only `EngineId` registry with per-engine parameter tables
//! - Default parameters and the engine factory
//! - 57 engines across dynamics, EQ, filters, distortion, modulation, pitch,
//!   delay, reverb, spatial, spectral and experimental categories
//! - `EngineRack` (audio thread) and `RackController` (control threads)

// Audio engine uses explicit indexing for per-channel loops
#![allow(clippy::needless_range_loop)]
// Too many arguments is common in audio processing functions
#![allow(clippy::too_many_arguments)]

mod config;
mod defaults;
pub mod engine;
pub mod engines;
mod factory;
pub mod params;
mod rack;
pub mod registry;

pub use config::{MAX_SWAP_FADE, RACK_SLOTS, RackConfig};
pub use defaults::{UNDECLARED_DEFAULT, default_mix, default_parameters, default_value};
pub use engine::{CONTROL_BLOCK, Engine, KernelEngine, StereoKernel};
pub use factory::{create_engine, create_engine_by_id, create_engine_by_name};
pub use params::{ParamBank, ParamSpec, Smoothing};
pub use rack::{EngineRack, HANDOFF_CAPACITY, RECLAIM_CAPACITY, RackController};
pub use registry::{Category, ENGINE_COUNT, EngineId, EngineInfo};

pub use fx_core::{FxError, FxResult, ParamDisplay, ParameterMap, Sample};
pub use fx_dsp::impulse::ImpulseResponse;
