//! Playback scenes and effect modes.
//!
//! A *scene* is the high-level audio context the policy layer assigns to a
//! stream (music, game, ...). A *mode* selects which chain recipe applies
//! within a scene. The mixer partitions sink inputs into one bucket per
//! scene plus a virtual `EFFECT_NONE` bucket for streams that bypass
//! processing entirely.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Audio scene assigned to a playback session by the policy layer.
///
/// The enumeration order is fixed: the mixer iterates scenes in this order
/// every tick, which pins the floating-point summation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EffectScene {
    /// `SCENE_MUSIC`
    Music,
    /// `SCENE_GAME`
    Game,
    /// `SCENE_MOVIE`
    Movie,
    /// `SCENE_SPEECH`
    Speech,
    /// `SCENE_RING`
    Ring,
    /// `SCENE_OTHERS`
    Others,
}

impl EffectScene {
    /// All supported scenes, in mixing order.
    pub const ALL: [EffectScene; 6] = [
        EffectScene::Music,
        EffectScene::Game,
        EffectScene::Movie,
        EffectScene::Speech,
        EffectScene::Ring,
        EffectScene::Others,
    ];

    /// Wire name used by the policy protocol and configuration files.
    pub const fn wire_name(self) -> &'static str {
        match self {
            EffectScene::Music => "SCENE_MUSIC",
            EffectScene::Game => "SCENE_GAME",
            EffectScene::Movie => "SCENE_MOVIE",
            EffectScene::Speech => "SCENE_SPEECH",
            EffectScene::Ring => "SCENE_RING",
            EffectScene::Others => "SCENE_OTHERS",
        }
    }

    /// Numeric tag carried in effect SET_PARAM payloads and HDI commands.
    pub const fn as_i32(self) -> i32 {
        match self {
            EffectScene::Music => 0,
            EffectScene::Game => 1,
            EffectScene::Movie => 2,
            EffectScene::Speech => 3,
            EffectScene::Ring => 4,
            EffectScene::Others => 5,
        }
    }
}

impl fmt::Display for EffectScene {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl FromStr for EffectScene {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EffectScene::ALL
            .iter()
            .copied()
            .find(|scene| scene.wire_name() == s)
            .ok_or_else(|| format!("unknown scene type: {s}"))
    }
}

impl TryFrom<String> for EffectScene {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<EffectScene> for String {
    fn from(scene: EffectScene) -> String {
        scene.wire_name().to_string()
    }
}

/// Effect mode within a scene: which recipe the manager picks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EffectMode {
    /// `EFFECT_DEFAULT`: the scene's configured recipe.
    #[default]
    Default,
    /// `EFFECT_NONE`: bypass; resolves to an empty chain.
    None,
}

impl EffectMode {
    /// Wire name used by the policy protocol and configuration files.
    pub const fn wire_name(self) -> &'static str {
        match self {
            EffectMode::Default => "EFFECT_DEFAULT",
            EffectMode::None => "EFFECT_NONE",
        }
    }

    /// Numeric tag carried in effect SET_PARAM payloads and HDI commands.
    pub const fn as_i32(self) -> i32 {
        match self {
            EffectMode::None => 0,
            EffectMode::Default => 1,
        }
    }
}

impl fmt::Display for EffectMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl FromStr for EffectMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EFFECT_DEFAULT" => Ok(EffectMode::Default),
            "EFFECT_NONE" | "" | "None" => Ok(EffectMode::None),
            other => Err(format!("unknown effect mode: {other}")),
        }
    }
}

impl TryFrom<String> for EffectMode {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<EffectMode> for String {
    fn from(mode: EffectMode) -> String {
        mode.wire_name().to_string()
    }
}

/// Mixer partitioning bucket: one per scene plus the virtual bypass bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SceneBucket {
    /// Inputs whose scene has a live, non-empty chain.
    Scene(EffectScene),
    /// Inputs without an applicable chain; mixed and passed through.
    Bypass,
}

impl SceneBucket {
    /// All buckets, in mixing order. `Bypass` comes last.
    pub const ALL: [SceneBucket; 7] = [
        SceneBucket::Scene(EffectScene::Music),
        SceneBucket::Scene(EffectScene::Game),
        SceneBucket::Scene(EffectScene::Movie),
        SceneBucket::Scene(EffectScene::Speech),
        SceneBucket::Scene(EffectScene::Ring),
        SceneBucket::Scene(EffectScene::Others),
        SceneBucket::Bypass,
    ];

    /// The scene backing this bucket, if it is not the bypass bucket.
    pub const fn scene(self) -> Option<EffectScene> {
        match self {
            SceneBucket::Scene(scene) => Some(scene),
            SceneBucket::Bypass => None,
        }
    }
}

impl fmt::Display for SceneBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SceneBucket::Scene(scene) => scene.fmt(f),
            SceneBucket::Bypass => f.write_str("EFFECT_NONE"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scene_wire_names_round_trip() {
        for scene in EffectScene::ALL {
            assert_eq!(scene.wire_name().parse::<EffectScene>(), Ok(scene));
        }
    }

    #[test]
    fn unknown_scene_rejected() {
        assert!("SCENE_PODCAST".parse::<EffectScene>().is_err());
    }

    #[test]
    fn mode_round_trip() {
        assert_eq!("EFFECT_DEFAULT".parse::<EffectMode>(), Ok(EffectMode::Default));
        assert_eq!("EFFECT_NONE".parse::<EffectMode>(), Ok(EffectMode::None));
        assert_eq!(EffectMode::default(), EffectMode::Default);
    }

    #[test]
    fn buckets_cover_all_scenes_plus_bypass() {
        assert_eq!(SceneBucket::ALL.len(), EffectScene::ALL.len() + 1);
        assert_eq!(SceneBucket::ALL.last(), Some(&SceneBucket::Bypass));
        for scene in EffectScene::ALL {
            assert!(SceneBucket::ALL.contains(&SceneBucket::Scene(scene)));
        }
    }

    #[test]
    fn numeric_tags_are_stable() {
        assert_eq!(EffectScene::Music.as_i32(), 0);
        assert_eq!(EffectScene::Others.as_i32(), 5);
        assert_eq!(EffectMode::None.as_i32(), 0);
        assert_eq!(EffectMode::Default.as_i32(), 1);
    }
}
