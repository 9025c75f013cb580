//! Output device types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Output device a chain is keyed against.
///
/// `None` means no device has been selected yet; the manager refuses to
/// build chains until the policy layer sets one.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub enum DeviceType {
    /// No output device selected.
    #[default]
    None,
    /// Built-in speaker.
    Speaker,
    /// Wired headset / headphones.
    WiredHeadset,
    /// Bluetooth A2DP sink.
    BluetoothA2dp,
    /// USB audio device.
    Usb,
    /// Remote (distributed) device.
    Remote,
}

impl DeviceType {
    /// All concrete devices (excluding `None`).
    pub const ALL: [DeviceType; 5] = [
        DeviceType::Speaker,
        DeviceType::WiredHeadset,
        DeviceType::BluetoothA2dp,
        DeviceType::Usb,
        DeviceType::Remote,
    ];

    /// Wire name used in chain keys and configuration files.
    ///
    /// `None` has no wire name; it renders as the empty string, which no
    /// configured key can match.
    pub const fn wire_name(self) -> &'static str {
        match self {
            DeviceType::None => "",
            DeviceType::Speaker => "DEVICE_TYPE_SPEAKER",
            DeviceType::WiredHeadset => "DEVICE_TYPE_WIRED_HEADSET",
            DeviceType::BluetoothA2dp => "DEVICE_TYPE_BLUETOOTH_A2DP",
            DeviceType::Usb => "DEVICE_TYPE_USB_HEADSET",
            DeviceType::Remote => "DEVICE_TYPE_REMOTE_CAST",
        }
    }

    /// True when a concrete device is selected.
    pub const fn is_set(self) -> bool {
        !matches!(self, DeviceType::None)
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl FromStr for DeviceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeviceType::ALL
            .iter()
            .copied()
            .find(|device| device.wire_name() == s)
            .ok_or_else(|| format!("unknown device type: {s}"))
    }
}

impl TryFrom<String> for DeviceType {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<DeviceType> for String {
    fn from(device: DeviceType) -> String {
        device.wire_name().to_string()
    }
}
