//! Parameter transport types
//!
//! Parameters travel as normalized `[0, 1]` scalars keyed by a small index.
//! A `ParameterMap` is a fixed-size sparse map, `Copy` and allocation-free,
//! so it can be built on the control thread and consumed on the audio thread.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};

/// Parameter indices per engine (transport width)
pub const MAX_PARAMETERS: usize = 15;

/// Sparse `{index → normalized value}` map
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "StoredParameterMap")]
pub struct ParameterMap {
    values: [f32; MAX_PARAMETERS],
    present: u16,
}

/// Wire form of [`ParameterMap`], re-validated on the way in
#[derive(Deserialize)]
struct StoredParameterMap {
    values: [f32; MAX_PARAMETERS],
    present: u16,
}

impl From<StoredParameterMap> for ParameterMap {
    fn from(stored: StoredParameterMap) -> Self {
        let mut map = Self::new();
        for (index, &value) in stored.values.iter().enumerate() {
            if stored.present & (1 << index) != 0 {
                map.set(index, value);
            }
        }
        map
    }
}

impl ParameterMap {
    pub const fn new() -> Self {
        Self {
            values: [0.0; MAX_PARAMETERS],
            present: 0,
        }
    }

    /// Builder form of [`set`](Self::set)
    #[must_use]
    pub fn with(mut self, index: usize, value: f32) -> Self {
        self.set(index, value);
        self
    }

    /// Insert a value, clamped to `[0, 1]`.
    ///
    /// Out-of-range indices and non-finite values are rejected and the
    /// previous entry (if any) is kept.
    pub fn set(&mut self, index: usize, value: f32) -> bool {
        if index >= MAX_PARAMETERS || !value.is_finite() {
            return false;
        }
        self.values[index] = value.clamp(0.0, 1.0);
        self.present |= 1 << index;
        true
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<f32> {
        if self.contains(index) {
            Some(self.values[index])
        } else {
            None
        }
    }

    #[inline]
    pub fn contains(&self, index: usize) -> bool {
        index < MAX_PARAMETERS && self.present & (1 << index) != 0
    }

    pub fn remove(&mut self, index: usize) {
        if index < MAX_PARAMETERS {
            self.present &= !(1 << index);
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.present.count_ones() as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.present == 0
    }

    /// Bitmask of present indices
    #[inline]
    pub fn mask(&self) -> u16 {
        self.present
    }

    /// Present entries in index order
    pub fn iter(&self) -> impl Iterator<Item = (usize, f32)> + '_ {
        (0..MAX_PARAMETERS).filter_map(move |i| self.get(i).map(|v| (i, v)))
    }

    /// Overlay `other` on top of `self`
    pub fn merge(&mut self, other: &ParameterMap) {
        for (i, v) in other.iter() {
            self.set(i, v);
        }
    }
}

impl FromIterator<(usize, f32)> for ParameterMap {
    fn from_iter<I: IntoIterator<Item = (usize, f32)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (i, v) in iter {
            map.set(i, v);
        }
        map
    }
}

/// Atomic f32 for lock-free control → audio handoff
#[derive(Debug)]
pub struct AtomicParam {
    bits: AtomicU32,
}

impl AtomicParam {
    pub fn new(value: f32) -> Self {
        Self {
            bits: AtomicU32::new(value.to_bits()),
        }
    }

    #[inline]
    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn set(&self, value: f32) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }
}

impl Default for AtomicParam {
    fn default() -> Self {
        Self::new(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_clamps_and_rejects() {
        let mut map = ParameterMap::new();
        assert!(map.set(0, 1.5));
        assert!(map.set(1, -3.0));
        assert!(!map.set(2, f32::NAN));
        assert!(!map.set(15, 0.5));
        assert_eq!(map.get(0), Some(1.0));
        assert_eq!(map.get(1), Some(0.0));
        assert_eq!(map.get(2), None);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_non_finite_keeps_prior() {
        let mut map = ParameterMap::new().with(3, 0.25);
        map.set(3, f32::INFINITY);
        assert_eq!(map.get(3), Some(0.25));
    }

    #[test]
    fn test_merge_and_iter() {
        let mut a: ParameterMap = [(0, 0.1), (4, 0.4)].into_iter().collect();
        let b = ParameterMap::new().with(4, 0.9).with(14, 1.0);
        a.merge(&b);
        let entries: Vec<_> = a.iter().collect();
        assert_eq!(entries, vec![(0, 0.1), (4, 0.9), (14, 1.0)]);
        a.remove(4);
        assert!(!a.contains(4));
        assert_eq!(a.mask(), (1 << 0) | (1 << 14));
    }

    #[test]
    fn test_deserialize_clamps() {
        let json = r#"{ "values": [1.5, -2.0, 0.25, 9.0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0], "present": 65535 }"#;
        let map: ParameterMap = serde_json::from_str(json).unwrap();
        assert_eq!(map.get(0), Some(1.0));
        assert_eq!(map.get(1), Some(0.0));
        assert_eq!(map.get(2), Some(0.25));
        assert_eq!(map.get(3), Some(1.0));
        // bit 15 is past the transport
        assert_eq!(map.mask(), 0x7fff);

        let sparse: ParameterMap = serde_json::from_str(r#"{ "values": [0.5, 3.0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0], "present": 2 }"#).unwrap();
        assert_eq!(sparse.get(0), None);
        assert_eq!(sparse.get(1), Some(1.0));

        let round = serde_json::to_string(&map).unwrap();
        assert_eq!(serde_json::from_str::<ParameterMap>(&round).unwrap(), map);
    }

    #[test]
    fn test_atomic_param() {
        let p = AtomicParam::new(0.5);
        assert_eq!(p.get(), 0.5);
        p.set(-0.25);
        assert_eq!(p.get(), -0.25);
    }
}
