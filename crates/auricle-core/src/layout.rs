//! Channel layout bitmasks.
//!
//! Layouts follow the conventional speaker-mask encoding: one bit per
//! speaker position, channel count = popcount. The spatializer only
//! accepts the layouts in [`HVS_SUPPORTED_LAYOUTS`]; everything else is
//! downmixed to stereo before a chain sees it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Speaker position behind a single layout bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ChannelPosition {
    FrontLeft,
    FrontRight,
    FrontCenter,
    LowFrequency,
    BackLeft,
    BackRight,
    FrontLeftOfCenter,
    FrontRightOfCenter,
    BackCenter,
    SideLeft,
    SideRight,
    TopCenter,
    TopFrontLeft,
    TopFrontCenter,
    TopFrontRight,
    TopBackLeft,
    TopBackCenter,
    TopBackRight,
    TopSideLeft,
    TopSideRight,
    WideLeft,
    WideRight,
}

/// Bit assignments for single positions. Order matters: it is the
/// channel interleaving order.
const POSITION_BITS: &[(u64, ChannelPosition)] = &[
    (1 << 0, ChannelPosition::FrontLeft),
    (1 << 1, ChannelPosition::FrontRight),
    (1 << 2, ChannelPosition::FrontCenter),
    (1 << 3, ChannelPosition::LowFrequency),
    (1 << 4, ChannelPosition::BackLeft),
    (1 << 5, ChannelPosition::BackRight),
    (1 << 6, ChannelPosition::FrontLeftOfCenter),
    (1 << 7, ChannelPosition::FrontRightOfCenter),
    (1 << 8, ChannelPosition::BackCenter),
    (1 << 9, ChannelPosition::SideLeft),
    (1 << 10, ChannelPosition::SideRight),
    (1 << 11, ChannelPosition::TopCenter),
    (1 << 12, ChannelPosition::TopFrontLeft),
    (1 << 13, ChannelPosition::TopFrontCenter),
    (1 << 14, ChannelPosition::TopFrontRight),
    (1 << 15, ChannelPosition::TopBackLeft),
    (1 << 16, ChannelPosition::TopBackCenter),
    (1 << 17, ChannelPosition::TopBackRight),
    (1 << 36, ChannelPosition::TopSideLeft),
    (1 << 37, ChannelPosition::TopSideRight),
    (1 << 39, ChannelPosition::WideLeft),
    (1 << 40, ChannelPosition::WideRight),
];

/// Channel layout as a speaker bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelLayout(pub u64);

impl ChannelLayout {
    /// Mono (front center).
    pub const MONO: ChannelLayout = ChannelLayout(0x4);
    /// Stereo.
    pub const STEREO: ChannelLayout = ChannelLayout(0x3);
    /// 5.1 with side surrounds (mask 1551).
    pub const CH_5POINT1: ChannelLayout = ChannelLayout(0x60F);
    /// 5.1 with back surrounds.
    pub const CH_5POINT1_BACK: ChannelLayout = ChannelLayout(0x3F);
    /// 5.1.2 (two top side speakers).
    pub const CH_5POINT1POINT2: ChannelLayout = ChannelLayout(0x60F | (1 << 36) | (1 << 37));
    /// 7.1.
    pub const CH_7POINT1: ChannelLayout = ChannelLayout(0x63F);
    /// 5.1.4 (four top speakers).
    pub const CH_5POINT1POINT4: ChannelLayout =
        ChannelLayout(0x60F | (1 << 12) | (1 << 14) | (1 << 15) | (1 << 17));
    /// 7.1.2.
    pub const CH_7POINT1POINT2: ChannelLayout = ChannelLayout(0x63F | (1 << 36) | (1 << 37));
    /// 7.1.4.
    pub const CH_7POINT1POINT4: ChannelLayout =
        ChannelLayout(0x63F | (1 << 12) | (1 << 14) | (1 << 15) | (1 << 17));
    /// 9.1.4 (7.1.4 plus wide fronts).
    pub const CH_9POINT1POINT4: ChannelLayout =
        ChannelLayout(Self::CH_7POINT1POINT4.0 | (1 << 39) | (1 << 40));
    /// 9.1.6 (9.1.4 plus top sides).
    pub const CH_9POINT1POINT6: ChannelLayout =
        ChannelLayout(Self::CH_9POINT1POINT4.0 | (1 << 36) | (1 << 37));

    /// Number of channels in this layout.
    pub const fn channels(self) -> u32 {
        self.0.count_ones()
    }

    /// Default layout for a given channel count, used when a stream does
    /// not declare one.
    pub const fn default_for_channels(channels: u32) -> ChannelLayout {
        match channels {
            1 => Self::MONO,
            2 => Self::STEREO,
            6 => Self::CH_5POINT1,
            8 => Self::CH_7POINT1,
            _ => Self::STEREO,
        }
    }

    /// True if the spatializer accepts this layout as-is.
    pub fn is_hvs_supported(self) -> bool {
        HVS_SUPPORTED_LAYOUTS.contains(&self)
    }

    /// Speaker positions in interleaving order.
    pub fn positions(self) -> Vec<ChannelPosition> {
        POSITION_BITS
            .iter()
            .filter(|(bit, _)| self.0 & bit != 0)
            .map(|&(_, pos)| pos)
            .collect()
    }
}

impl fmt::Display for ChannelLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Layouts the binaural spatializer can render without a stereo downmix.
pub const HVS_SUPPORTED_LAYOUTS: [ChannelLayout; 9] = [
    ChannelLayout::STEREO,
    ChannelLayout::CH_5POINT1_BACK,
    ChannelLayout::CH_5POINT1POINT2,
    ChannelLayout::CH_7POINT1,
    ChannelLayout::CH_5POINT1POINT4,
    ChannelLayout::CH_7POINT1POINT2,
    ChannelLayout::CH_7POINT1POINT4,
    ChannelLayout::CH_9POINT1POINT4,
    ChannelLayout::CH_9POINT1POINT6,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_counts_match_masks() {
        assert_eq!(ChannelLayout::STEREO.channels(), 2);
        assert_eq!(ChannelLayout::CH_5POINT1.channels(), 6);
        assert_eq!(ChannelLayout::CH_5POINT1_BACK.channels(), 6);
        assert_eq!(ChannelLayout::CH_5POINT1POINT2.channels(), 8);
        assert_eq!(ChannelLayout::CH_7POINT1.channels(), 8);
        assert_eq!(ChannelLayout::CH_7POINT1POINT4.channels(), 12);
        assert_eq!(ChannelLayout::CH_9POINT1POINT6.channels(), 16);
    }

    #[test]
    fn five_point_one_is_mask_1551() {
        assert_eq!(ChannelLayout::CH_5POINT1.0, 1551);
    }

    #[test]
    fn hvs_gate() {
        assert!(ChannelLayout::STEREO.is_hvs_supported());
        assert!(ChannelLayout::CH_7POINT1POINT4.is_hvs_supported());
        assert!(!ChannelLayout::MONO.is_hvs_supported());
        // 5.1 side-surround is not in the gate set; only the back variant is.
        assert!(!ChannelLayout::CH_5POINT1.is_hvs_supported());
    }

    #[test]
    fn positions_follow_interleaving_order() {
        let positions = ChannelLayout::STEREO.positions();
        assert_eq!(
            positions,
            vec![ChannelPosition::FrontLeft, ChannelPosition::FrontRight]
        );
        assert_eq!(
            ChannelLayout::CH_5POINT1.positions().len() as u32,
            ChannelLayout::CH_5POINT1.channels()
        );
    }

    #[test]
    fn default_layouts() {
        assert_eq!(ChannelLayout::default_for_channels(2), ChannelLayout::STEREO);
        assert_eq!(
            ChannelLayout::default_for_channels(6),
            ChannelLayout::CH_5POINT1
        );
        assert_eq!(ChannelLayout::default_for_channels(3), ChannelLayout::STEREO);
    }
}
