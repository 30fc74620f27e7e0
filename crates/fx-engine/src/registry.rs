//! Engine identifier registry
//!
//! Identifiers are permanent: new engines are appended, nothing is ever
//! renumbered or reused. `EngineId::info()` is the single static source of
//! names, categories and parameter tables.

use serde::{Deserialize, Serialize};

use crate::engines::{
    delay, distortion, dynamics, eq, experimental, filters, modulation, pitch, reverb, spatial, spectral, utility,
};
use crate::params::ParamSpec;

/// Number of registered engines
pub const ENGINE_COUNT: usize = 57;

/// Stable engine identifier (`Bypass` = 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u32)]
pub enum EngineId {
    #[default]
    Bypass = 0,
    OptoCompressor = 1,
    ClassicCompressor = 2,
    TransientShaper = 3,
    NoiseGate = 4,
    MasteringLimiter = 5,
    DynamicEq = 6,
    ParametricEq = 7,
    VintageConsoleEq = 8,
    LadderFilter = 9,
    StateVariableFilter = 10,
    FormantFilter = 11,
    EnvelopeFilter = 12,
    CombResonator = 13,
    VocalFormant = 14,
    TubePreamp = 15,
    WaveFolder = 16,
    HarmonicExciter = 17,
    BitCrusher = 18,
    MultibandSaturator = 19,
    MuffFuzz = 20,
    RodentDistortion = 21,
    KStyleOverdrive = 22,
    DigitalChorus = 23,
    ResonantChorus = 24,
    AnalogPhaser = 25,
    RingModulator = 26,
    FrequencyShifter = 27,
    HarmonicTremolo = 28,
    ClassicTremolo = 29,
    RotarySpeaker = 30,
    PitchShifter = 31,
    DetuneDoubler = 32,
    IntelligentHarmonizer = 33,
    TapeEcho = 34,
    DigitalDelay = 35,
    MagneticDrumEcho = 36,
    BucketBrigadeDelay = 37,
    BufferRepeat = 38,
    PlateReverb = 39,
    SpringReverb = 40,
    ConvolutionReverb = 41,
    ShimmerReverb = 42,
    GatedReverb = 43,
    StereoWidener = 44,
    StereoImager = 45,
    DimensionExpander = 46,
    SpectralFreeze = 47,
    SpectralGate = 48,
    PhasedVocoder = 49,
    GranularCloud = 50,
    ChaosGenerator = 51,
    FeedbackNetwork = 52,
    MidSide = 53,
    GainUtility = 54,
    MonoMaker = 55,
    PhaseAlign = 56,
}

/// Engine family; decides the default-parameter bias
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Utility,
    Dynamics,
    Eq,
    Filter,
    Distortion,
    Modulation,
    Pitch,
    Delay,
    Reverb,
    Spatial,
    Spectral,
    Experimental,
}

/// Static description of a registered engine
#[derive(Debug, Clone, Copy)]
pub struct EngineInfo {
    pub id: EngineId,
    pub name: &'static str,
    pub category: Category,
    pub params: &'static [ParamSpec],
    /// Index of the dry/wet parameter; `None` only for `Bypass`
    pub mix_index: Option<usize>,
}

impl EngineInfo {
    const fn new(id: EngineId, name: &'static str, category: Category, params: &'static [ParamSpec]) -> Self {
        Self {
            id,
            name,
            category,
            params,
            mix_index: find_param(params, "Mix"),
        }
    }
}

const fn str_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    let mut i = 0;
    while i < a.len() {
        if a[i] != b[i] {
            return false;
        }
        i += 1;
    }
    true
}

const fn find_param(params: &[ParamSpec], name: &str) -> Option<usize> {
    let mut i = 0;
    while i < params.len() {
        if str_eq(params[i].name, name) {
            return Some(i);
        }
        i += 1;
    }
    None
}

use Category as C;
use EngineId as E;

static ENGINES: [EngineInfo; ENGINE_COUNT] = [
    EngineInfo::new(E::Bypass, "Bypass", C::Utility, &[]),
    EngineInfo::new(E::OptoCompressor, "Vintage Opto Compressor", C::Dynamics, dynamics::OPTO_PARAMS),
    EngineInfo::new(E::ClassicCompressor, "Classic Compressor", C::Dynamics, dynamics::CLASSIC_PARAMS),
    EngineInfo::new(E::TransientShaper, "Transient Shaper", C::Dynamics, dynamics::TRANSIENT_PARAMS),
    EngineInfo::new(E::NoiseGate, "Noise Gate", C::Dynamics, dynamics::GATE_PARAMS),
    EngineInfo::new(E::MasteringLimiter, "Mastering Limiter", C::Dynamics, dynamics::LIMITER_PARAMS),
    EngineInfo::new(E::DynamicEq, "Dynamic EQ", C::Eq, eq::DYNAMIC_EQ_PARAMS),
    EngineInfo::new(E::ParametricEq, "Parametric EQ", C::Eq, eq::PARAMETRIC_EQ_PARAMS),
    EngineInfo::new(E::VintageConsoleEq, "Vintage Console EQ", C::Eq, eq::CONSOLE_EQ_PARAMS),
    EngineInfo::new(E::LadderFilter, "Ladder Filter", C::Filter, filters::LADDER_PARAMS),
    EngineInfo::new(E::StateVariableFilter, "State Variable Filter", C::Filter, filters::SVF_PARAMS),
    EngineInfo::new(E::FormantFilter, "Formant Filter", C::Filter, filters::FORMANT_PARAMS),
    EngineInfo::new(E::EnvelopeFilter, "Envelope Filter", C::Filter, filters::ENVELOPE_FILTER_PARAMS),
    EngineInfo::new(E::CombResonator, "Comb Resonator", C::Filter, filters::COMB_PARAMS),
    EngineInfo::new(E::VocalFormant, "Vocal Formant Filter", C::Filter, filters::VOCAL_FORMANT_PARAMS),
    EngineInfo::new(E::TubePreamp, "Vintage Tube Preamp", C::Distortion, distortion::TUBE_PARAMS),
    EngineInfo::new(E::WaveFolder, "Wave Folder", C::Distortion, distortion::WAVE_FOLDER_PARAMS),
    EngineInfo::new(E::HarmonicExciter, "Harmonic Exciter", C::Distortion, distortion::EXCITER_PARAMS),
    EngineInfo::new(E::BitCrusher, "Bit Crusher", C::Distortion, distortion::BIT_CRUSHER_PARAMS),
    EngineInfo::new(E::MultibandSaturator, "Multiband Saturator", C::Distortion, distortion::MULTIBAND_PARAMS),
    EngineInfo::new(E::MuffFuzz, "Muff Fuzz", C::Distortion, distortion::MUFF_PARAMS),
    EngineInfo::new(E::RodentDistortion, "Rodent Distortion", C::Distortion, distortion::RODENT_PARAMS),
    EngineInfo::new(E::KStyleOverdrive, "K-Style Overdrive", C::Distortion, distortion::KSTYLE_PARAMS),
    EngineInfo::new(E::DigitalChorus, "Digital Chorus", C::Modulation, modulation::CHORUS_PARAMS),
    EngineInfo::new(E::ResonantChorus, "Resonant Chorus", C::Modulation, modulation::RESONANT_CHORUS_PARAMS),
    EngineInfo::new(E::AnalogPhaser, "Analog Phaser", C::Modulation, modulation::PHASER_PARAMS),
    EngineInfo::new(E::RingModulator, "Ring Modulator", C::Modulation, modulation::RING_MOD_PARAMS),
    EngineInfo::new(E::FrequencyShifter, "Frequency Shifter", C::Modulation, modulation::FREQ_SHIFTER_PARAMS),
    EngineInfo::new(E::HarmonicTremolo, "Harmonic Tremolo", C::Modulation, modulation::HARMONIC_TREMOLO_PARAMS),
    EngineInfo::new(E::ClassicTremolo, "Classic Tremolo", C::Modulation, modulation::CLASSIC_TREMOLO_PARAMS),
    EngineInfo::new(E::RotarySpeaker, "Rotary Speaker", C::Modulation, modulation::ROTARY_PARAMS),
    EngineInfo::new(E::PitchShifter, "Pitch Shifter", C::Pitch, pitch::PITCH_SHIFTER_PARAMS),
    EngineInfo::new(E::DetuneDoubler, "Detune Doubler", C::Pitch, pitch::DOUBLER_PARAMS),
    EngineInfo::new(E::IntelligentHarmonizer, "Intelligent Harmonizer", C::Pitch, pitch::HARMONIZER_PARAMS),
    EngineInfo::new(E::TapeEcho, "Tape Echo", C::Delay, delay::TAPE_ECHO_PARAMS),
    EngineInfo::new(E::DigitalDelay, "Digital Delay", C::Delay, delay::DIGITAL_DELAY_PARAMS),
    EngineInfo::new(E::MagneticDrumEcho, "Magnetic Drum Echo", C::Delay, delay::DRUM_ECHO_PARAMS),
    EngineInfo::new(E::BucketBrigadeDelay, "Bucket Brigade Delay", C::Delay, delay::BBD_PARAMS),
    EngineInfo::new(E::BufferRepeat, "Buffer Repeat", C::Delay, delay::BUFFER_REPEAT_PARAMS),
    EngineInfo::new(E::PlateReverb, "Plate Reverb", C::Reverb, reverb::PLATE_PARAMS),
    EngineInfo::new(E::SpringReverb, "Spring Reverb", C::Reverb, reverb::SPRING_PARAMS),
    EngineInfo::new(E::ConvolutionReverb, "Convolution Reverb", C::Reverb, reverb::CONVOLUTION_PARAMS),
    EngineInfo::new(E::ShimmerReverb, "Shimmer Reverb", C::Reverb, reverb::SHIMMER_PARAMS),
    EngineInfo::new(E::GatedReverb, "Gated Reverb", C::Reverb, reverb::GATED_PARAMS),
    EngineInfo::new(E::StereoWidener, "Stereo Widener", C::Spatial, spatial::WIDENER_PARAMS),
    EngineInfo::new(E::StereoImager, "Stereo Imager", C::Spatial, spatial::IMAGER_PARAMS),
    EngineInfo::new(E::DimensionExpander, "Dimension Expander", C::Spatial, spatial::DIMENSION_PARAMS),
    EngineInfo::new(E::SpectralFreeze, "Spectral Freeze", C::Spectral, spectral::FREEZE_PARAMS),
    EngineInfo::new(E::SpectralGate, "Spectral Gate", C::Spectral, spectral::GATE_PARAMS),
    EngineInfo::new(E::PhasedVocoder, "Phased Vocoder", C::Spectral, spectral::VOCODER_PARAMS),
    EngineInfo::new(E::GranularCloud, "Granular Cloud", C::Spectral, spectral::GRANULAR_PARAMS),
    EngineInfo::new(E::ChaosGenerator, "Chaos Generator", C::Experimental, experimental::CHAOS_PARAMS),
    EngineInfo::new(E::FeedbackNetwork, "Feedback Network", C::Experimental, experimental::NETWORK_PARAMS),
    EngineInfo::new(E::MidSide, "Mid-Side Processor", C::Utility, utility::MID_SIDE_PARAMS),
    EngineInfo::new(E::GainUtility, "Gain Utility", C::Utility, utility::GAIN_PARAMS),
    EngineInfo::new(E::MonoMaker, "Mono Maker", C::Utility, utility::MONO_MAKER_PARAMS),
    EngineInfo::new(E::PhaseAlign, "Phase Align", C::Utility, utility::PHASE_ALIGN_PARAMS),
];

impl EngineId {
    /// Every registered engine in identifier order
    pub const ALL: [EngineId; ENGINE_COUNT] = [
        Self::Bypass, Self::OptoCompressor, Self::ClassicCompressor, Self::TransientShaper,
        Self::NoiseGate, Self::MasteringLimiter, Self::DynamicEq, Self::ParametricEq,
        Self::VintageConsoleEq, Self::LadderFilter, Self::StateVariableFilter, Self::FormantFilter,
        Self::EnvelopeFilter, Self::CombResonator, Self::VocalFormant, Self::TubePreamp,
        Self::WaveFolder, Self::HarmonicExciter, Self::BitCrusher, Self::MultibandSaturator,
        Self::MuffFuzz, Self::RodentDistortion, Self::KStyleOverdrive, Self::DigitalChorus,
        Self::ResonantChorus, Self::AnalogPhaser, Self::RingModulator, Self::FrequencyShifter,
        Self::HarmonicTremolo, Self::ClassicTremolo, Self::RotarySpeaker, Self::PitchShifter,
        Self::DetuneDoubler, Self::IntelligentHarmonizer, Self::TapeEcho, Self::DigitalDelay,
        Self::MagneticDrumEcho, Self::BucketBrigadeDelay, Self::BufferRepeat, Self::PlateReverb,
        Self::SpringReverb, Self::ConvolutionReverb, Self::ShimmerReverb, Self::GatedReverb,
        Self::StereoWidener, Self::StereoImager, Self::DimensionExpander, Self::SpectralFreeze,
        Self::SpectralGate, Self::PhasedVocoder, Self::GranularCloud, Self::ChaosGenerator,
        Self::FeedbackNetwork, Self::MidSide, Self::GainUtility, Self::MonoMaker, Self::PhaseAlign,
    ];

    /// Decode a published identifier
    pub fn from_u32(v: u32) -> Option<Self> {
        Self::ALL.get(v as usize).copied()
    }

    #[inline]
    pub fn to_u32(self) -> u32 {
        self as u32
    }

    #[inline]
    pub fn info(self) -> &'static EngineInfo {
        &ENGINES[self as usize]
    }

    #[inline]
    pub fn name(self) -> &'static str {
        self.info().name
    }

    #[inline]
    pub fn category(self) -> Category {
        self.info().category
    }

    /// Find an engine by display name, ignoring case
    pub fn from_name(name: &str) -> Option<Self> {
        ENGINES.iter().find(|e| e.name.eq_ignore_ascii_case(name)).map(|e| e.id)
    }
}

impl TryFrom<u32> for EngineId {
    type Error = fx_core::FxError;

    fn try_from(v: u32) -> Result<Self, Self::Error> {
        Self::from_u32(v).ok_or(fx_core::FxError::UnknownEngine(v))
    }
}

impl std::fmt::Display for EngineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
