//! HDI parameter protocol for the DSP effect processor.
//!
//! Commands cross the driver boundary as a fixed 20-byte array whose
//! first byte is the command tag; replies come back in 10 bytes, most of
//! which carry a single status byte.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::{HalError, Result};

/// Length of the command frame sent to the driver.
pub const SEND_HDI_COMMAND_LEN: usize = 20;

/// Length of the reply buffer.
pub const GET_HDI_BUFFER_LEN: usize = 10;

/// Commands understood by the DSP effect processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HdiCommand {
    /// Bring the DSP chain up. Success flips the manager into offload.
    Init,
    /// Tear the DSP chain down.
    Destroy,
    /// Bypass (true) or engage (false) DSP processing.
    Bypass(bool),
    /// Scene and mode for the DSP room-effect stage.
    RoomMode {
        /// Numeric scene tag.
        scene: i32,
        /// Numeric mode tag.
        mode: i32,
    },
    /// Global volume step for DSP gain staging.
    Volume(u32),
    /// Display rotation in degrees.
    Rotation(u32),
    /// Head-tracking mode on/off.
    HeadMode(bool),
    /// Bluetooth routing mode.
    BluetoothMode(u8),
}

impl HdiCommand {
    /// Wire tag in byte 0 of the command frame.
    pub const fn tag(self) -> u8 {
        match self {
            HdiCommand::Init => 0,
            HdiCommand::Destroy => 1,
            HdiCommand::Bypass(_) => 2,
            HdiCommand::RoomMode { .. } => 3,
            HdiCommand::Volume(_) => 4,
            HdiCommand::Rotation(_) => 5,
            HdiCommand::HeadMode(_) => 6,
            HdiCommand::BluetoothMode(_) => 7,
        }
    }

    /// Encode into the fixed-length command frame.
    pub fn encode(self) -> [u8; SEND_HDI_COMMAND_LEN] {
        let mut frame = [0u8; SEND_HDI_COMMAND_LEN];
        frame[0] = self.tag();
        match self {
            HdiCommand::Init | HdiCommand::Destroy => {}
            HdiCommand::Bypass(bypass) => frame[1] = u8::from(bypass),
            HdiCommand::RoomMode { scene, mode } => {
                frame[1] = scene as u8;
                frame[2] = mode as u8;
            }
            HdiCommand::Volume(volume) => frame[1] = volume.min(u32::from(u8::MAX)) as u8,
            HdiCommand::Rotation(rotation) => {
                frame[1..5].copy_from_slice(&rotation.to_le_bytes());
            }
            HdiCommand::HeadMode(enabled) => frame[1] = u8::from(enabled),
            HdiCommand::BluetoothMode(mode) => frame[1] = mode,
        }
        frame
    }
}

/// One bound DSP effect control endpoint.
pub trait HdiEffectControl: Send + Sync {
    /// Send one command frame; write the reply into `output`.
    fn send_command(
        &self,
        input: &[u8; SEND_HDI_COMMAND_LEN],
        output: &mut [u8; GET_HDI_BUFFER_LEN],
    ) -> Result<()>;
}

/// Fans HDI commands out to every bound control.
///
/// Binding happens once at manager init; a proxy with no controls accepts
/// every command (there is nothing to refuse it), matching the driver-less
/// bring-up path.
#[derive(Clone)]
pub struct HdiParamProxy {
    controls: Vec<Arc<dyn HdiEffectControl>>,
}

impl HdiParamProxy {
    /// Proxy over the given controls.
    pub fn new(controls: Vec<Arc<dyn HdiEffectControl>>) -> Self {
        HdiParamProxy { controls }
    }

    /// Proxy with no bound controls.
    pub fn disconnected() -> Self {
        HdiParamProxy {
            controls: Vec::new(),
        }
    }

    /// True when at least one control is bound.
    pub fn is_connected(&self) -> bool {
        !self.controls.is_empty()
    }

    /// Send `command` to every control; first failure aborts.
    pub fn update(&self, command: HdiCommand) -> Result<()> {
        let frame = command.encode();
        for control in &self.controls {
            let mut reply = [0u8; GET_HDI_BUFFER_LEN];
            if let Err(err) = control.send_command(&frame, &mut reply) {
                warn!(?command, %err, "hdi command failed");
                return Err(err);
            }
            if reply[0] != 0 {
                warn!(?command, status = reply[0], "hdi command rejected");
                return Err(HalError::Hdi(format!(
                    "command {:?} rejected with status {}",
                    command, reply[0]
                )));
            }
        }
        debug!(?command, controls = self.controls.len(), "hdi command sent");
        Ok(())
    }
}

impl std::fmt::Debug for HdiParamProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HdiParamProxy")
            .field("controls", &self.controls.len())
            .finish()
    }
}
