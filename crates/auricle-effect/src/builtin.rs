//! Bundled reference effect library.
//!
//! Ships a handful of trivial processors so demos and integration tests
//! can exercise the full create/command/process/release ABI without a
//! vendor library. These are deliberately uninteresting as DSP.

use std::sync::Arc;

use auricle_core::EffectScene;

use crate::abi::{
    AudioBuffer, AudioBufferMut, CommandReply, EffectCommand, EffectHandle, Pcm, PcmMut,
};
use crate::library::{EFFECT_ABI_VERSION, EffectDescriptor, EffectLibrary, LibraryDescriptor};
use crate::{EffectError, Result};

/// Name the bundled library registers under.
pub const BUNDLED_LIBRARY_NAME: &str = "libbundled";

/// The bundled library: provides `passthrough` and `scene_gain`.
pub struct BundledLibrary {
    desc: LibraryDescriptor,
}

impl BundledLibrary {
    /// Construct the library, ready for registration.
    pub fn new() -> Arc<dyn EffectLibrary> {
        Arc::new(BundledLibrary {
            desc: LibraryDescriptor {
                name: BUNDLED_LIBRARY_NAME.to_string(),
                implementor: "auricle".to_string(),
                api_version: EFFECT_ABI_VERSION,
            },
        })
    }
}

impl EffectLibrary for BundledLibrary {
    fn descriptor(&self) -> &LibraryDescriptor {
        &self.desc
    }

    fn create_effect(
        &self,
        descriptor: &EffectDescriptor,
    ) -> std::result::Result<Box<dyn EffectHandle>, EffectError> {
        match descriptor.effect_name.as_str() {
            "passthrough" => Ok(Box::new(Passthrough { latency_us: 120 })),
            "scene_gain" => Ok(Box::new(SceneGain {
                gain: 1.0,
                latency_us: 250,
            })),
            other => Err(EffectError::Creation {
                effect: other.to_string(),
                library: self.desc.name.clone(),
                reason: "no such effect in bundled library".to_string(),
            }),
        }
    }
}

/// Copies input to output byte-for-byte. Works on both PCM encodings.
struct Passthrough {
    latency_us: u32,
}

impl EffectHandle for Passthrough {
    fn command(&mut self, command: EffectCommand<'_>) -> Result<CommandReply> {
        match command {
            EffectCommand::SetParam(_) => Ok(CommandReply {
                latency_us: self.latency_us,
            }),
            _ => Ok(CommandReply::default()),
        }
    }

    fn process(&mut self, input: AudioBuffer<'_>, output: AudioBufferMut<'_>) -> Result<()> {
        match (input.pcm, output.pcm) {
            (Pcm::F32(src), PcmMut::F32(dst)) => {
                let n = src.len().min(dst.len());
                dst[..n].copy_from_slice(&src[..n]);
                Ok(())
            }
            (Pcm::Bytes(src), PcmMut::Bytes(dst)) => {
                let n = src.len().min(dst.len());
                dst[..n].copy_from_slice(&src[..n]);
                Ok(())
            }
            _ => Err(EffectError::UnsupportedBuffer),
        }
    }
}

/// Scales samples by a gain derived from the SET_PARAM volume, so scene
/// volume propagation is observable in tests. Float only.
struct SceneGain {
    gain: f32,
    latency_us: u32,
}

impl EffectHandle for SceneGain {
    fn command(&mut self, command: EffectCommand<'_>) -> Result<CommandReply> {
        match command {
            EffectCommand::SetParam(params) => {
                // volume steps 0..=100 map linearly onto gain
                self.gain = params.volume.min(100) as f32 / 100.0;
                if params.scene == EffectScene::Ring {
                    // ring tones bypass attenuation
                    self.gain = 1.0;
                }
                Ok(CommandReply {
                    latency_us: self.latency_us,
                })
            }
            _ => Ok(CommandReply::default()),
        }
    }

    fn process(&mut self, input: AudioBuffer<'_>, output: AudioBufferMut<'_>) -> Result<()> {
        match (input.pcm, output.pcm) {
            (Pcm::F32(src), PcmMut::F32(dst)) => {
                let n = src.len().min(dst.len());
                for i in 0..n {
                    dst[i] = src[i] * self.gain;
                }
                Ok(())
            }
            _ => Err(EffectError::UnsupportedBuffer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::EffectParams;
    use auricle_core::EffectMode;

    fn descriptor(effect: &str) -> EffectDescriptor {
        EffectDescriptor {
            library_name: BUNDLED_LIBRARY_NAME.to_string(),
            effect_name: effect.to_string(),
        }
    }

    #[test]
    fn creates_known_effects_rejects_unknown() {
        let lib = BundledLibrary::new();
        assert!(lib.create_effect(&descriptor("passthrough")).is_ok());
        assert!(lib.create_effect(&descriptor("scene_gain")).is_ok());
        assert!(lib.create_effect(&descriptor("chorus")).is_err());
    }

    #[test]
    fn scene_gain_tracks_volume() {
        let lib = BundledLibrary::new();
        let mut handle = lib.create_effect(&descriptor("scene_gain")).unwrap();
        let params = EffectParams {
            scene: EffectScene::Music,
            mode: EffectMode::Default,
            rotation: 0,
            volume: 50,
        };
        handle.command(EffectCommand::SetParam(&params)).unwrap();
        let src = [1.0f32, -1.0];
        let mut dst = [0.0f32; 2];
        handle
            .process(
                AudioBuffer {
                    frame_len: 1,
                    pcm: Pcm::F32(&src),
                },
                AudioBufferMut {
                    frame_len: 1,
                    pcm: PcmMut::F32(&mut dst),
                },
            )
            .unwrap();
        assert_eq!(dst, [0.5, -0.5]);
    }

    #[test]
    fn passthrough_reports_latency() {
        let lib = BundledLibrary::new();
        let mut handle = lib.create_effect(&descriptor("passthrough")).unwrap();
        let params = EffectParams {
            scene: EffectScene::Music,
            mode: EffectMode::Default,
            rotation: 0,
            volume: 10,
        };
        let reply = handle.command(EffectCommand::SetParam(&params)).unwrap();
        assert!(reply.latency_us > 0);
    }
}
