//! Cached volume state for the two parameter paths.

use std::collections::HashMap;

use auricle_core::EffectScene;

/// Last volumes pushed to the DSP (global) and to each AP scene chain.
///
/// Updates only propagate when the computed value actually changed, so
/// the caches double as change detectors.
#[derive(Debug, Default)]
pub struct EffectVolume {
    dsp_volume: u32,
    ap_volume: HashMap<EffectScene, u32>,
}

impl EffectVolume {
    /// Empty cache; every first update counts as a change.
    pub fn new() -> Self {
        EffectVolume::default()
    }

    /// Last volume sent to the DSP.
    pub fn dsp_volume(&self) -> u32 {
        self.dsp_volume
    }

    /// Record a DSP volume push.
    pub fn set_dsp_volume(&mut self, volume: u32) {
        self.dsp_volume = volume;
    }

    /// Last volume applied to `scene`'s AP chain.
    pub fn ap_volume(&self, scene: EffectScene) -> u32 {
        self.ap_volume.get(&scene).copied().unwrap_or(0)
    }

    /// Record an AP volume push for `scene`.
    pub fn set_ap_volume(&mut self, scene: EffectScene, volume: u32) {
        self.ap_volume.insert(scene, volume);
    }
}
