//! Cached display rotation.

/// Last rotation pushed into the effect parameters, in degrees.
#[derive(Debug, Default)]
pub struct EffectRotation {
    rotation: u32,
}

impl EffectRotation {
    /// Zero-rotation state.
    pub fn new() -> Self {
        EffectRotation::default()
    }

    /// Current rotation in degrees (0/90/180/270).
    pub fn rotation(&self) -> u32 {
        self.rotation
    }

    /// Record a rotation push.
    pub fn set_rotation(&mut self, rotation: u32) {
        self.rotation = rotation;
    }
}
