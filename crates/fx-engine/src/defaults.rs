//! Default parameter table
//!
//! Defaults live next to each engine's parameter declarations; this module
//! is the host-facing view keyed by `EngineId`. Category bias:
//!
//! | Category | Bias |
//! |----------|------|
//! | Compressors | threshold 0.7, mix 1.0 |
//! | Reverbs | size 0.5, mix 0.3 |
//! | Delays | time 0.4, feedback 0.3, mix 0.3 |
//! | Filters | cutoff 0.5, mix 0.0 |
//! | Modulation | rate 0.2, depth 0.3, mix 0.3 |
//! | Distortion | drive 0.3, mix 1.0 |
//! | EQ, Spatial, Utility | 0.5, mix 1.0 |
//! | Pitch, Spectral, Experimental | 0.5, mix 0.5 |

use fx_core::ParameterMap;

use crate::registry::EngineId;

/// Value of an index an engine does not declare
pub const UNDECLARED_DEFAULT: f32 = 0.5;

/// Every declared index at its default
pub fn default_parameters(id: EngineId) -> ParameterMap {
    id.info()
        .params
        .iter()
        .enumerate()
        .map(|(i, spec)| (i, spec.default))
        .collect()
}

/// Default of a single index
pub fn default_value(id: EngineId, index: usize) -> f32 {
    id.info()
        .params
        .get(index)
        .map_or(UNDECLARED_DEFAULT, |spec| spec.default)
}

/// Default dry/wet of an engine; `Bypass` reports fully wet
pub fn default_mix(id: EngineId) -> f32 {
    id.info()
        .mix_index
        .map_or(1.0, |i| default_value(id, i))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Category;

    #[test]
    fn test_map_covers_declared_indices() {
        for id in EngineId::ALL {
            let map = default_parameters(id);
            assert_eq!(map.len(), id.info().params.len(), "{id:?}");
        }
        assert!(default_parameters(EngineId::Bypass).is_empty());
        assert_eq!(default_value(EngineId::MonoMaker, 14), UNDECLARED_DEFAULT);
    }

    #[test]
    fn test_category_bias() {
        for id in EngineId::ALL {
            let mix = default_mix(id);
            match id.category() {
                Category::Reverb => {
                    assert_eq!(default_value(id, 0), 0.5, "{id:?}");
                    assert_eq!(mix, 0.3, "{id:?}");
                }
                Category::Delay => {
                    assert_eq!(default_value(id, 0), 0.4, "{id:?}");
                    assert_eq!(default_value(id, 1), 0.3, "{id:?}");
                    assert_eq!(mix, 0.3, "{id:?}");
                }
                Category::Filter => {
                    assert_eq!(default_value(id, 0), 0.5, "{id:?}");
                    assert_eq!(mix, 0.0, "{id:?}");
                }
                Category::Modulation => {
                    assert_eq!(default_value(id, 0), 0.2, "{id:?}");
                    assert_eq!(default_value(id, 1), 0.3, "{id:?}");
                    assert_eq!(mix, 0.3, "{id:?}");
                }
                Category::Distortion => {
                    assert_eq!(default_value(id, 0), 0.3, "{id:?}");
                    assert_eq!(mix, 1.0, "{id:?}");
                }
                Category::Eq | Category::Spatial | Category::Utility | Category::Dynamics => {
                    assert_eq!(mix, 1.0, "{id:?}");
                }
                Category::Pitch | Category::Spectral | Category::Experimental => {
                    assert_eq!(mix, 0.5, "{id:?}");
                }
            }
        }
    }

    #[test]
    fn test_compressor_bias() {
        for id in [EngineId::OptoCompressor, EngineId::ClassicCompressor] {
            let map = default_parameters(id);
            assert_eq!(map.get(0), Some(0.7));
            assert_eq!(map.get(6), Some(1.0));
        }
    }
}
