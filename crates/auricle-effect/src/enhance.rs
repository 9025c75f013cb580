//! Capture-side (enhance) chain.
//!
//! Enhance chains run on interleaved PCM bytes from the mic source. The
//! effect ABI expects planar channel-grouped data laid out as
//! `[ref channels..., mic channels...]`, with reference channels zeroed
//! when the scene has no AEC reference feed, so each frame is
//! de-interleaved into that shape before processing.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use auricle_core::{EffectMode, EffectScene, EnhanceBufferAttr};

use crate::abi::{
    AudioBuffer, AudioBufferMut, ConfigPayload, DataDescription, EffectCommand, EffectHandle, Pcm,
    PcmMut,
};
use crate::library::EffectLibrary;
use crate::{EffectError, Result};

struct EnhanceEntry {
    handle: Box<dyn EffectHandle>,
    library: Arc<dyn EffectLibrary>,
}

struct EnhanceState {
    mode: EffectMode,
    entries: Vec<EnhanceEntry>,
    config_sent: bool,
}

/// Ordered list of enhance handles for one capture scene.
pub struct EnhanceChain {
    scene: EffectScene,
    state: Mutex<EnhanceState>,
}

impl EnhanceChain {
    /// New empty enhance chain.
    pub fn new(scene: EffectScene) -> Self {
        EnhanceChain {
            scene,
            state: Mutex::new(EnhanceState {
                mode: EffectMode::Default,
                entries: Vec::new(),
                config_sent: false,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EnhanceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Scene this chain serves.
    pub fn scene(&self) -> EffectScene {
        self.scene
    }

    /// Record the enhance mode label.
    pub fn set_mode(&self, mode: EffectMode) {
        self.lock().mode = mode;
    }

    /// True when no handles are attached.
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Run INIT on a freshly created handle and append it. SET_CONFIG is
    /// deferred to the first processed frame, when the stream description
    /// is known.
    pub fn add_enhance_handle(
        &self,
        mut handle: Box<dyn EffectHandle>,
        library: Arc<dyn EffectLibrary>,
    ) -> Result<()> {
        let mut state = self.lock();
        let io = crate::abi::IoConfig::default();
        if let Err(err) = handle.command(EffectCommand::Init(&io)) {
            warn!(scene = %self.scene, mode = %state.mode, %err,
                "enhance INIT failed, skipping handle");
            library.release_effect(handle);
            return Err(err);
        }
        state.entries.push(EnhanceEntry { handle, library });
        Ok(())
    }

    /// Process one capture frame.
    ///
    /// The input is de-interleaved into `[ref..., mic...]` planar blocks
    /// (reference channels zeroed), handed to every handle, and the last
    /// output copied back. On an empty chain or any failure the frame is
    /// passed through unchanged and an error returned.
    pub fn apply(&self, attr: &mut EnhanceBufferAttr) -> Result<()> {
        let byte_len = attr.byte_len_per_frame();
        let out_len = byte_len * attr.out_count as usize;
        let pass_len = out_len.min(attr.input.len());

        let mut state = self.lock();
        if state.entries.is_empty() {
            pass_through(attr, pass_len);
            return Err(EffectError::EmptyChain);
        }

        let input = match build_frame_input(attr, byte_len) {
            Some(input) => input,
            None => {
                warn!(scene = %self.scene, "building enhance input frame failed");
                pass_through(attr, pass_len);
                return Err(EffectError::Process(
                    "enhance frame assembly failed".to_string(),
                ));
            }
        };
        let mut output = vec![0u8; out_len];
        let frame_len = byte_len / attr.bytes_per_sample.max(1) as usize;

        if !state.config_sent {
            let desc = DataDescription {
                frame_length_ms: attr.frame_length_ms,
                sample_rate: attr.sample_rate,
                bytes_per_sample: attr.bytes_per_sample,
                mic_count: attr.mic_count,
                ref_count: attr.ref_count,
                out_count: attr.out_count,
            };
            for entry in &mut state.entries {
                if let Err(err) = entry
                    .handle
                    .command(EffectCommand::SetConfig(ConfigPayload::Data(&desc)))
                {
                    warn!(scene = %self.scene, %err, "enhance SET_CONFIG failed");
                }
            }
            state.config_sent = true;
        }

        for entry in &mut state.entries {
            let result = entry.handle.process(
                AudioBuffer {
                    frame_len,
                    pcm: Pcm::Bytes(&input),
                },
                AudioBufferMut {
                    frame_len,
                    pcm: PcmMut::Bytes(&mut output),
                },
            );
            if let Err(err) = result {
                debug!(scene = %self.scene, %err, "enhance process failed, bypassing handle");
            }
        }

        let n = out_len.min(attr.output.len());
        attr.output[..n].copy_from_slice(&output[..n]);
        Ok(())
    }

    /// Return every handle to its library and clear the chain.
    pub fn release(&self) {
        let mut state = self.lock();
        for entry in state.entries.drain(..) {
            entry.library.release_effect(entry.handle);
        }
        state.config_sent = false;
    }
}

impl Drop for EnhanceChain {
    fn drop(&mut self) {
        self.release();
    }
}

fn pass_through(attr: &mut EnhanceBufferAttr, len: usize) {
    let n = len.min(attr.output.len());
    attr.output[..n].copy_from_slice(&attr.input[..n]);
}

/// De-interleave the mic channels of one frame into planar blocks laid
/// out `[ref..., mic...]`, zero-filling the reference channels.
fn build_frame_input(attr: &EnhanceBufferAttr, byte_len: usize) -> Option<Vec<u8>> {
    let bps = attr.bytes_per_sample as usize;
    if bps == 0 {
        return None;
    }
    let batch = (attr.ref_count + attr.mic_count) as usize;
    let frames = byte_len / bps;
    let mic = attr.mic_count as usize;
    if attr.input.len() < frames * mic * bps {
        return None;
    }

    let mut planar = vec![0u8; byte_len * batch];
    let mic_base = attr.ref_count as usize * byte_len;
    for frame in 0..frames {
        for ch in 0..mic {
            let src = (frame * mic + ch) * bps;
            let dst = mic_base + ch * byte_len + frame * bps;
            planar[dst..dst + bps].copy_from_slice(&attr.input[src..src + bps]);
        }
    }
    Some(planar)
}

impl std::fmt::Debug for EnhanceChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("EnhanceChain")
            .field("scene", &self.scene)
            .field("mode", &state.mode)
            .field("handles", &state.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::CommandReply;
    use crate::library::{EFFECT_ABI_VERSION, EffectDescriptor, LibraryDescriptor};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingLibrary {
        desc: LibraryDescriptor,
    }

    impl RecordingLibrary {
        fn new() -> Arc<RecordingLibrary> {
            Arc::new(RecordingLibrary {
                desc: LibraryDescriptor {
                    name: "libcapture".to_string(),
                    implementor: "tests".to_string(),
                    api_version: EFFECT_ABI_VERSION,
                },
            })
        }
    }

    impl EffectLibrary for RecordingLibrary {
        fn descriptor(&self) -> &LibraryDescriptor {
            &self.desc
        }
        fn create_effect(
            &self,
            _: &EffectDescriptor,
        ) -> std::result::Result<Box<dyn EffectHandle>, EffectError> {
            Err(EffectError::UnknownEffect("unused".to_string()))
        }
    }

    /// Enhance handle that records how many SET_CONFIG commands it saw and
    /// copies the first `out` bytes through.
    struct CaptureHandle {
        configs: Arc<AtomicUsize>,
    }

    impl EffectHandle for CaptureHandle {
        fn command(&mut self, command: EffectCommand<'_>) -> Result<CommandReply> {
            if matches!(command, EffectCommand::SetConfig(ConfigPayload::Data(_))) {
                self.configs.fetch_add(1, Ordering::SeqCst);
            }
            Ok(CommandReply::default())
        }
        fn process(
            &mut self,
            input: AudioBuffer<'_>,
            output: AudioBufferMut<'_>,
        ) -> Result<()> {
            match (input.pcm, output.pcm) {
                (Pcm::Bytes(src), PcmMut::Bytes(dst)) => {
                    let n = src.len().min(dst.len());
                    dst[..n].copy_from_slice(&src[..n]);
                    Ok(())
                }
                _ => Err(EffectError::UnsupportedBuffer),
            }
        }
    }

    fn attr(mic: u32, refs: u32) -> EnhanceBufferAttr {
        let frame_ms = 10;
        let rate = 16_000;
        let bps = 2;
        let bytes = (rate as usize / 1000) * frame_ms as usize * bps as usize;
        EnhanceBufferAttr {
            input: (0..bytes * mic as usize).map(|i| i as u8).collect(),
            output: vec![0u8; bytes],
            frame_length_ms: frame_ms,
            sample_rate: rate,
            bytes_per_sample: bps,
            mic_count: mic,
            ref_count: refs,
            out_count: 1,
        }
    }

    #[test]
    fn empty_chain_passes_through() {
        let chain = EnhanceChain::new(EffectScene::Speech);
        let mut a = attr(1, 0);
        let err = chain.apply(&mut a);
        assert!(matches!(err, Err(EffectError::EmptyChain)));
        assert_eq!(&a.output[..], &a.input[..a.output.len()]);
    }

    #[test]
    fn set_config_sent_once_across_frames() {
        let chain = EnhanceChain::new(EffectScene::Speech);
        let configs = Arc::new(AtomicUsize::new(0));
        chain
            .add_enhance_handle(
                Box::new(CaptureHandle {
                    configs: configs.clone(),
                }),
                RecordingLibrary::new(),
            )
            .unwrap();
        let mut a = attr(1, 0);
        chain.apply(&mut a).unwrap();
        chain.apply(&mut a).unwrap();
        assert_eq!(configs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reference_channels_are_zeroed() {
        let a = attr(1, 1);
        let byte_len = a.byte_len_per_frame();
        let planar = build_frame_input(&a, byte_len).unwrap();
        assert_eq!(planar.len(), byte_len * 2);
        assert!(planar[..byte_len].iter().all(|&b| b == 0));
        assert_eq!(&planar[byte_len..], &a.input[..byte_len]);
    }

    #[test]
    fn two_mics_deinterleave_planar() {
        let mut a = attr(2, 0);
        // interleaved: L R L R ... with distinct bytes
        a.input = (0..a.byte_len_per_frame() * 2).map(|i| (i % 251) as u8).collect();
        let byte_len = a.byte_len_per_frame();
        let planar = build_frame_input(&a, byte_len).unwrap();
        // first samples of each planar channel come from the first frame
        assert_eq!(planar[0], a.input[0]);
        assert_eq!(planar[1], a.input[1]);
        assert_eq!(planar[byte_len], a.input[2]);
        assert_eq!(planar[byte_len + 1], a.input[3]);
    }
}
