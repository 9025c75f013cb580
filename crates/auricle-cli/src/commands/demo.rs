//! Threaded demo against null devices.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use tracing::info;

use auricle_core::{ChannelLayout, DeviceType, EffectMode, EffectScene};
use auricle_engine::{NullPostureSensor, SessionEffectInfo};
use auricle_hal::{DeviceClass, HdiParamProxy, NullSink, SinkAdapter, SinkBackend};
use auricle_mixer::{PcmSource, SceneMixer, SinkInput, SinkInputInfo};
use auricle_server::{AudioEffectService, ServiceConfig};
use auricle_sink::{HdiSink, SilentSource, SinkConfig, SinkRunState};

/// Arguments for `auricle demo`.
#[derive(Args)]
pub struct DemoArgs {
    /// Effect configuration (TOML); empty config when omitted
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// How long to run, in milliseconds
    #[arg(short, long, default_value_t = 500)]
    pub duration_ms: u64,

    /// Tone frequency fed into the music scene
    #[arg(long, default_value_t = 440.0)]
    pub frequency: f32,
}

/// Endless stereo sine tone.
struct ToneSource {
    phase: f32,
    step: f32,
}

impl ToneSource {
    fn new(frequency: f32, sample_rate: u32) -> Self {
        ToneSource {
            phase: 0.0,
            step: std::f32::consts::TAU * frequency / sample_rate as f32,
        }
    }
}

impl PcmSource for ToneSource {
    fn pull(&mut self, buf: &mut [f32]) -> usize {
        for frame in buf.chunks_exact_mut(2) {
            let sample = self.phase.sin() * 0.4;
            frame[0] = sample;
            frame[1] = sample;
            self.phase = (self.phase + self.step) % std::f32::consts::TAU;
        }
        buf.len()
    }
}

pub fn run(args: DemoArgs) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(path) => {
            ServiceConfig::load(path).with_context(|| format!("loading {}", path.display()))?
        }
        None => ServiceConfig::default(),
    };
    let service = Arc::new(AudioEffectService::new(
        HdiParamProxy::disconnected(),
        Arc::new(NullPostureSensor::default()),
    ));
    service.init(&config);
    service
        .manager()
        .set_output_device_sink(DeviceType::Speaker, "Speaker")?;

    let manager = Arc::clone(service.manager());
    let sink_config = SinkConfig::default();
    let mut mixer = SceneMixer::new(
        Arc::clone(&manager),
        sink_config.sample_rate,
        sink_config.channels,
        sink_config.format,
    );

    let session = "1";
    manager.check_and_add_session_id(session);
    manager.session_info_add(session, SessionEffectInfo::stereo(EffectScene::Music, 80))?;
    manager.create_chain(EffectScene::Music)?;
    manager.effect_volume_update(session, 80)?;

    mixer.add_input(SinkInput::new(
        SinkInputInfo {
            session_id: session.to_string(),
            scene: EffectScene::Music,
            mode: EffectMode::Default,
            spatialization_enabled: false,
            offload: false,
            sample_rate: sink_config.sample_rate,
            channels: 2,
            layout: ChannelLayout::STEREO,
            running: true,
        },
        Box::new(ToneSource::new(args.frequency, sink_config.sample_rate)),
    ));
    let mixer = Arc::new(Mutex::new(mixer));

    let null = |class| SinkAdapter::new(class, SinkBackend::Null(NullSink::new(1 << 20, 384_000)));
    let sink = HdiSink::new(
        sink_config,
        Arc::clone(&manager),
        mixer,
        null(DeviceClass::Primary),
        Some((null(DeviceClass::Offload), Box::new(SilentSource))),
        Some(null(DeviceClass::MultiChannel)),
    );

    sink.set_run_state(SinkRunState::Running);
    info!(duration_ms = args.duration_ms, "demo running");
    std::thread::sleep(Duration::from_millis(args.duration_ms));
    sink.set_run_state(SinkRunState::Suspended);

    info!(
        bytes_dropped = sink.bytes_dropped(),
        latency_us = manager.get_latency(session),
        "demo finished"
    );
    sink.shutdown();
    Ok(())
}
