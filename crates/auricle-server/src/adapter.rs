//! Module adapter surface.
//!
//! Thin wrappers mirroring the native module loader's callback table.
//! Each function maps arguments and errors only; the logic lives in the
//! managers. Callers hold the context, or resolve the installed one via
//! [`AudioEffectService::installed`].

use auricle_core::{BufferAttr, EffectMode, EffectScene, EnhanceBufferAttr};

use crate::Result;
use crate::service::AudioEffectService;

/// Process one playback buffer through the scene's chain.
pub fn effect_chain_manager_process(
    service: &AudioEffectService,
    scene: EffectScene,
    attr: &mut BufferAttr,
) -> Result<()> {
    service.manager().apply_chain(scene, attr)?;
    Ok(())
}

/// Session created: register its id and create (or refcount) the chain.
pub fn effect_chain_manager_create_cb(
    service: &AudioEffectService,
    scene: EffectScene,
    session_id: &str,
) -> Result<()> {
    if !service.manager().check_and_add_session_id(session_id) {
        return Ok(());
    }
    service.manager().create_chain(scene)?;
    Ok(())
}

/// Session gone: deregister and release the chain reference.
pub fn effect_chain_manager_release_cb(
    service: &AudioEffectService,
    scene: EffectScene,
    session_id: &str,
) -> Result<()> {
    if !service.manager().check_and_remove_session_id(session_id) {
        return Ok(());
    }
    service.manager().release_chain(scene)?;
    Ok(())
}

/// Re-elect and push the chain's multichannel input configuration.
pub fn effect_chain_manager_multichannel_update(
    service: &AudioEffectService,
    scene: EffectScene,
) -> Result<()> {
    service.manager().update_multichannel_config(scene)?;
    Ok(())
}

/// Stream volume changed.
pub fn effect_chain_manager_volume_update(
    service: &AudioEffectService,
    session_id: &str,
    volume: u32,
) -> Result<()> {
    service.manager().effect_volume_update(session_id, volume)?;
    Ok(())
}

/// Display rotation changed.
pub fn effect_chain_manager_rotation_update(
    service: &AudioEffectService,
    rotation: u32,
) -> Result<()> {
    service.manager().effect_rotation_update(rotation)?;
    Ok(())
}

/// Push the DSP bypass flag and room mode.
pub fn effect_chain_manager_set_hdi_param(
    service: &AudioEffectService,
    scene: EffectScene,
    mode: EffectMode,
    enabled: bool,
) -> Result<()> {
    service.manager().set_hdi_param(scene, mode, enabled)?;
    Ok(())
}

/// Does an applicable, non-empty AP chain exist for the triple?
pub fn effect_chain_manager_exist(
    service: &AudioEffectService,
    scene: EffectScene,
    mode: EffectMode,
    spatialization_enabled: bool,
) -> bool {
    service.manager().exist_chain(scene, mode, spatialization_enabled)
}

/// Re-enable every handle of the scene's chain.
pub fn effect_chain_manager_init_cb(
    service: &AudioEffectService,
    scene: EffectScene,
) -> Result<()> {
    service.manager().init_chain(scene)?;
    Ok(())
}

/// Record a session's effect info.
pub fn effect_chain_manager_add_session_info(
    service: &AudioEffectService,
    session_id: &str,
    info: auricle_engine::SessionEffectInfo,
) -> Result<()> {
    service.manager().session_info_add(session_id, info)?;
    Ok(())
}

/// Drop a session's effect info.
pub fn effect_chain_manager_delete_session_info(
    service: &AudioEffectService,
    scene: EffectScene,
    session_id: &str,
) -> Result<()> {
    service.manager().session_info_delete(scene, session_id)?;
    Ok(())
}

/// Input channel election for a scene.
pub fn effect_chain_manager_return_effect_channel_info(
    service: &AudioEffectService,
    scene: EffectScene,
) -> (u32, auricle_core::ChannelLayout) {
    service.manager().return_effect_channel_info(scene)
}

/// Process one capture frame through the scene's enhance chain.
pub fn enhance_chain_manager_process(
    service: &AudioEffectService,
    scene: EffectScene,
    attr: &mut EnhanceBufferAttr,
) -> Result<()> {
    let devices = service.enhance().up_and_down_device();
    service.enhance().apply_chain(scene, &devices, attr)?;
    Ok(())
}

/// Build a capture chain for (scene, up device, down device).
pub fn enhance_chain_manager_create_cb(
    service: &AudioEffectService,
    scene: EffectScene,
    mode: EffectMode,
    up_device: &str,
    down_device: &str,
) -> Result<()> {
    let key = format!("{up_device}_&_{down_device}");
    service.enhance().create_chain(scene, mode, &key)?;
    Ok(())
}

/// Tear down a capture chain.
pub fn enhance_chain_manager_release_cb(
    service: &AudioEffectService,
    scene: EffectScene,
    up_device: &str,
    down_device: &str,
) -> Result<()> {
    let key = format!("{up_device}_&_{down_device}");
    service.enhance().release_chain(scene, &key)?;
    Ok(())
}

/// Resolve the installed service for loaders that cannot carry the
/// context themselves.
pub fn installed_service() -> Result<std::sync::Arc<AudioEffectService>> {
    AudioEffectService::installed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use auricle_engine::NullPostureSensor;
    use auricle_hal::HdiParamProxy;
    use std::sync::Arc;

    const CONFIG: &str = r#"
        [[library]]
        name = "libbundled"

        [[effect]]
        name = "scene_gain"
        library = "libbundled"

        [[chain]]
        name = "music_effect_chain"
        apply = ["scene_gain"]

        [[scene-map]]
        scene = "SCENE_MUSIC"
        mode = "EFFECT_DEFAULT"
        device = "DEVICE_TYPE_SPEAKER"
        chain = "music_effect_chain"
    "#;

    fn service() -> AudioEffectService {
        let service = AudioEffectService::new(
            HdiParamProxy::disconnected(),
            Arc::new(NullPostureSensor::default()),
        );
        service.init(&ServiceConfig::from_toml(CONFIG).unwrap());
        service
    }

    #[test]
    fn create_cb_is_idempotent_per_session() {
        let service = service();
        effect_chain_manager_create_cb(&service, EffectScene::Music, "1").unwrap();
        // same session again: no second reference
        effect_chain_manager_create_cb(&service, EffectScene::Music, "1").unwrap();
        let refcounts = service.manager().refcounts();
        assert_eq!(refcounts.values().sum::<i32>(), 1);

        effect_chain_manager_release_cb(&service, EffectScene::Music, "1").unwrap();
        assert!(service.manager().refcounts().is_empty());
        // releasing an unknown session is a no-op
        effect_chain_manager_release_cb(&service, EffectScene::Music, "1").unwrap();
    }

    #[test]
    fn process_routes_through_chain() {
        let service = service();
        effect_chain_manager_create_cb(&service, EffectScene::Music, "1").unwrap();
        assert!(effect_chain_manager_exist(
            &service,
            EffectScene::Music,
            EffectMode::Default,
            false
        ));
        let mut attr = BufferAttr::new(16, 2, 2);
        attr.buf_in.fill(0.5);
        effect_chain_manager_process(&service, EffectScene::Music, &mut attr).unwrap();
        // gain starts at volume 0: output muted
        assert!(attr.buf_out.iter().all(|&s| s == 0.0));
    }
}
