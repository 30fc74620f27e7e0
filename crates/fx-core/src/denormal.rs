//! Flush-to-zero / denormals-are-zero scope guard

/// Enables FTZ/DAZ for its lifetime and restores the previous mode on drop.
///
/// Create one at the top of an audio callback; nested guards are harmless.
pub struct DenormalGuard {
    #[cfg(target_arch = "x86_64")]
    saved: u32,
    #[cfg(target_arch = "aarch64")]
    saved: u64,
}

impl DenormalGuard {
    #[inline]
    #[allow(deprecated)]
    pub fn new() -> Self {
        #[cfg(target_arch = "x86_64")]
        {
            // Safety: MXCSR only affects floating-point rounding/flush
            // behavior of the current thread
            unsafe {
                use std::arch::x86_64::{_mm_getcsr, _mm_setcsr};
                let saved = _mm_getcsr();
                // DAZ = bit 6 (0x0040), FTZ = bit 15 (0x8000)
                _mm_setcsr(saved | 0x8040);
                Self { saved }
            }
        }

        #[cfg(target_arch = "aarch64")]
        {
            let saved: u64;
            // Safety: FPCR.FZ (bit 24) only affects the current thread
            unsafe {
                std::arch::asm!("mrs {}, fpcr", out(reg) saved);
                std::arch::asm!("msr fpcr, {}", in(reg) saved | (1 << 24));
            }
            Self { saved }
        }

        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
        {
            Self {}
        }
    }
}

impl Default for DenormalGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DenormalGuard {
    #[inline]
    #[allow(deprecated)]
    fn drop(&mut self) {
        #[cfg(target_arch = "x86_64")]
        unsafe {
            use std::arch::x86_64::_mm_setcsr;
            _mm_setcsr(self.saved);
        }

        #[cfg(target_arch = "aarch64")]
        unsafe {
            std::arch::asm!("msr fpcr, {}", in(reg) self.saved);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::hint::black_box;

    /// Normal times normal, landing in the subnormal range
    fn subnormal_product() -> f32 {
        black_box(1.0e-38_f32) * black_box(1.0e-3_f32)
    }

    #[test]
    fn test_guard_restores_mode() {
        let before = subnormal_product();
        assert!(before != 0.0 && !before.is_normal());

        {
            let _guard = DenormalGuard::new();
            {
                let _nested = DenormalGuard::new();
            }
            // the inner guard restores the outer guard's mode
            let inside = subnormal_product();
            if cfg!(any(target_arch = "x86_64", target_arch = "aarch64")) {
                assert_eq!(inside, 0.0);
            }
        }

        let after = subnormal_product();
        assert_eq!(before.to_bits(), after.to_bits());
    }
}
