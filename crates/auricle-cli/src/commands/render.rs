//! Offline render: WAV in, chain, WAV out.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Args;
use tracing::info;

use auricle_core::{BufferAttr, DeviceType, EffectScene};
use auricle_engine::{NullPostureSensor, SessionEffectInfo};
use auricle_hal::HdiParamProxy;
use auricle_server::{AudioEffectService, ServiceConfig};

/// Arguments for `auricle render`.
#[derive(Args)]
pub struct RenderArgs {
    /// Effect configuration (TOML)
    #[arg(short, long)]
    pub config: PathBuf,

    /// Input WAV file
    pub input: PathBuf,

    /// Output WAV file
    pub output: PathBuf,

    /// Scene to render under
    #[arg(short, long, default_value = "SCENE_MUSIC")]
    pub scene: EffectScene,

    /// Session volume step (0-100)
    #[arg(short, long, default_value_t = 100)]
    pub volume: u32,

    /// Frames per processing block
    #[arg(long, default_value_t = 960)]
    pub block: usize,
}

pub fn run(args: RenderArgs) -> anyhow::Result<()> {
    let config = ServiceConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let service = AudioEffectService::new(
        HdiParamProxy::disconnected(),
        Arc::new(NullPostureSensor::default()),
    );
    service.init(&config);
    service
        .manager()
        .set_output_device_sink(DeviceType::Speaker, "Speaker")?;

    let session = "render";
    service.manager().check_and_add_session_id(session);
    service
        .manager()
        .session_info_add(session, SessionEffectInfo::stereo(args.scene, args.volume))?;
    service.manager().create_chain(args.scene)?;
    service.manager().effect_volume_update(session, args.volume)?;

    let mut reader = hound::WavReader::open(&args.input)
        .with_context(|| format!("opening {}", args.input.display()))?;
    let spec = reader.spec();
    if spec.channels != 2 {
        bail!("render expects stereo input, got {} channels", spec.channels);
    }
    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = 1.0_f32 / (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<Result<_, _>>()?
        }
    };

    let out_spec = hound::WavSpec {
        channels: 2,
        sample_rate: spec.sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(&args.output, out_spec)
        .with_context(|| format!("creating {}", args.output.display()))?;

    let mut attr = BufferAttr::new(args.block, 2, 2);
    attr.sample_rate = spec.sample_rate;
    let block_samples = args.block * 2;
    for chunk in samples.chunks(block_samples) {
        attr.buf_in[..chunk.len()].copy_from_slice(chunk);
        attr.buf_in[chunk.len()..].fill(0.0);
        attr.frame_len = chunk.len() / 2;
        // a missing chain already degraded to pass-through; keep going
        let _ = service.manager().apply_chain(args.scene, &mut attr);
        for &sample in &attr.buf_out[..chunk.len()] {
            writer.write_sample(sample)?;
        }
    }
    writer.finalize()?;

    info!(
        scene = %args.scene,
        latency_us = service.manager().get_latency(session),
        output = %args.output.display(),
        "render finished"
    );
    Ok(())
}
