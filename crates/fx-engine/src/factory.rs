//! Engine construction keyed on `EngineId`
//!
//! Runs on control threads only: every constructor allocates.

use fx_core::{FxError, FxResult, validate_stream};

use crate::engine::{Engine, KernelEngine};
use crate::engines::{
    delay, distortion, dynamics, eq, experimental, filters, modulation, pitch, reverb, spatial,
    spectral, utility,
};
use crate::registry::EngineId;

/// Build a prepared engine for `(sample_rate, max_block)`
pub fn create_engine(id: EngineId, sample_rate: f64, max_block: usize) -> Box<dyn Engine> {
    macro_rules! kernel {
        ($k:ty) => {
            Box::new(KernelEngine::<$k>::new(sample_rate, max_block))
        };
    }

    match id {
        EngineId::Bypass => Box::new(utility::Bypass),

        EngineId::OptoCompressor => kernel!(dynamics::OptoCompressor),
        EngineId::ClassicCompressor => kernel!(dynamics::ClassicCompressor),
        EngineId::TransientShaper => kernel!(dynamics::TransientShaper),
        EngineId::NoiseGate => kernel!(dynamics::NoiseGate),
        EngineId::MasteringLimiter => kernel!(dynamics::MasteringLimiter),

        EngineId::DynamicEq => kernel!(eq::DynamicEq),
        EngineId::ParametricEq => kernel!(eq::ParametricEq),
        EngineId::VintageConsoleEq => kernel!(eq::VintageConsoleEq),

        EngineId::LadderFilter => kernel!(filters::Ladder),
        EngineId::StateVariableFilter => kernel!(filters::StateVariable),
        EngineId::FormantFilter => kernel!(filters::Formant),
        EngineId::EnvelopeFilter => kernel!(filters::EnvelopeFilter),
        EngineId::CombResonator => kernel!(filters::CombResonator),
        EngineId::VocalFormant => kernel!(filters::VocalFormant),

        EngineId::TubePreamp => kernel!(distortion::TubePreamp),
        EngineId::WaveFolder => kernel!(distortion::WaveFolder),
        EngineId::HarmonicExciter => kernel!(distortion::HarmonicExciter),
        EngineId::BitCrusher => kernel!(distortion::BitCrusher),
        EngineId::MultibandSaturator => kernel!(distortion::MultibandSaturator),
        EngineId::MuffFuzz => kernel!(distortion::MuffFuzz),
        EngineId::RodentDistortion => kernel!(distortion::RodentDistortion),
        EngineId::KStyleOverdrive => kernel!(distortion::KStyleOverdrive),

        EngineId::DigitalChorus => kernel!(modulation::DigitalChorus),
        EngineId::ResonantChorus => kernel!(modulation::ResonantChorus),
        EngineId::AnalogPhaser => kernel!(modulation::AnalogPhaser),
        EngineId::RingModulator => kernel!(modulation::RingModulator),
        EngineId::FrequencyShifter => kernel!(modulation::FrequencyShifter),
        EngineId::HarmonicTremolo => kernel!(modulation::HarmonicTremolo),
        EngineId::ClassicTremolo => kernel!(modulation::ClassicTremolo),
        EngineId::RotarySpeaker => kernel!(modulation::RotarySpeaker),

        EngineId::PitchShifter => kernel!(pitch::PitchShifter),
        EngineId::DetuneDoubler => kernel!(pitch::DetuneDoubler),
        EngineId::IntelligentHarmonizer => kernel!(pitch::IntelligentHarmonizer),

        EngineId::TapeEcho => kernel!(delay::TapeEcho),
        EngineId::DigitalDelay => kernel!(delay::DigitalDelay),
        EngineId::MagneticDrumEcho => kernel!(delay::MagneticDrumEcho),
        EngineId::BucketBrigadeDelay => kernel!(delay::BucketBrigadeDelay),
        EngineId::BufferRepeat => kernel!(delay::BufferRepeat),

        EngineId::PlateReverb => kernel!(reverb::Plate),
        EngineId::SpringReverb => kernel!(reverb::Spring),
        EngineId::ConvolutionReverb => kernel!(reverb::Convolution),
        EngineId::ShimmerReverb => kernel!(reverb::Shimmer),
        EngineId::GatedReverb => kernel!(reverb::Gated),

        EngineId::StereoWidener => kernel!(spatial::StereoWidener),
        EngineId::StereoImager => kernel!(spatial::StereoImager),
        EngineId::DimensionExpander => kernel!(spatial::DimensionExpander),

        EngineId::SpectralFreeze => kernel!(spectral::SpectralFreeze),
        EngineId::SpectralGate => kernel!(spectral::SpectralGate),
        EngineId::PhasedVocoder => kernel!(spectral::PhasedVocoder),
        EngineId::GranularCloud => kernel!(spectral::GranularCloud),

        EngineId::ChaosGenerator => kernel!(experimental::ChaosGenerator),
        EngineId::FeedbackNetwork => kernel!(experimental::FeedbackNetwork),

        EngineId::MidSide => kernel!(utility::MidSide),
        EngineId::GainUtility => kernel!(utility::GainUtility),
        EngineId::MonoMaker => kernel!(utility::MonoMaker),
        EngineId::PhaseAlign => kernel!(utility::PhaseAlign),
    }
}

/// Build from a raw host identifier, validating the stream first
pub fn create_engine_by_id(raw: u32, sample_rate: f64, max_block: usize) -> FxResult<Box<dyn Engine>> {
    validate_stream(sample_rate, max_block)?;
    let id = EngineId::from_u32(raw).ok_or(FxError::UnknownEngine(raw))?;
    Ok(create_engine(id, sample_rate, max_block))
}

/// Build from a display name (case-insensitive)
pub fn create_engine_by_name(name: &str, sample_rate: f64, max_block: usize) -> Option<Box<dyn Engine>> {
    let id = EngineId::from_name(name)?;
    Some(create_engine(id, sample_rate, max_block))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_id_builds_its_own_engine() {
        for id in EngineId::ALL {
            let engine = create_engine(id, 48000.0, 256);
            assert_eq!(engine.id(), id);
            assert_eq!(engine.name(), id.name());
            assert_eq!(engine.parameter_count(), id.info().params.len());
            assert!(engine.parameter_count() <= fx_core::MAX_PARAMETERS);
        }
    }

    #[test]
    fn test_raw_id_errors() {
        assert!(matches!(
            create_engine_by_id(9999, 48000.0, 256),
            Err(FxError::UnknownEngine(9999))
        ));
        assert!(matches!(
            create_engine_by_id(1, 10.0, 256),
            Err(FxError::UnsupportedSampleRate(_))
        ));
        let engine = create_engine_by_id(39, 48000.0, 256).unwrap();
        assert_eq!(engine.id(), EngineId::PlateReverb);
    }

    #[test]
    fn test_only_convolution_takes_impulse_responses() {
        for id in EngineId::ALL {
            let engine = create_engine(id, 48000.0, 256);
            assert_eq!(
                engine.impulse_response_port().is_some(),
                id == EngineId::ConvolutionReverb,
                "{id:?}"
            );
        }
    }
}
