//! Encoding parameters and the fixed quality profile table.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::Error;

/// Fixed encoding presets a viewer can pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QualityProfile {
    Min,
    Low,
    Medium,
    High,
}

impl QualityProfile {
    pub const ALL: [Self; 4] = [Self::Min, Self::Low, Self::Medium, Self::High];

    #[must_use]
    pub const fn bitrate_bps(self) -> u64 {
        match self {
            Self::Min => 3_000_000,
            Self::Low => 6_000_000,
            Self::Medium => 8_000_000,
            Self::High => 12_000_000,
        }
    }

    #[must_use]
    pub const fn framerate_fps(self) -> u32 {
        match self {
            Self::Min | Self::Medium => 30,
            Self::Low | Self::High => 60,
        }
    }

    /// Target capture size as (width, height).
    #[must_use]
    pub const fn dimensions(self) -> (u32, u32) {
        match self {
            Self::Min | Self::Low => (1280, 720),
            Self::Medium | Self::High => (1920, 1080),
        }
    }

    /// Numeric id used by older clients (`<height><fps>`).
    #[must_use]
    pub const fn legacy_id(self) -> &'static str {
        match self {
            Self::Min => "72030",
            Self::Low => "72060",
            Self::Medium => "108030",
            Self::High => "108060",
        }
    }

    #[must_use]
    pub const fn encoding(self) -> EncodingProfile {
        EncodingProfile {
            max_bitrate_bps: self.bitrate_bps(),
            max_framerate_fps: self.framerate_fps(),
            downscale_factor: 1.0,
        }
    }

    #[must_use]
    pub const fn track_constraints(self) -> TrackConstraints {
        let (width, height) = self.dimensions();
        TrackConstraints {
            width,
            height,
            frame_rate: self.framerate_fps(),
        }
    }
}

/// What a `qualitySelect` asks for: a pinned profile or the adaptive loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileSelection {
    Auto,
    Fixed(QualityProfile),
}

impl FromStr for ProfileSelection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let profile = match s.trim().to_ascii_lowercase().as_str() {
            "auto" => return Ok(Self::Auto),
            "min" | "72030" => QualityProfile::Min,
            "low" | "72060" => QualityProfile::Low,
            "medium" | "108030" => QualityProfile::Medium,
            "high" | "108060" => QualityProfile::High,
            other => {
                return Err(Error::InvalidInput(format!("unknown quality profile '{other}'")));
            }
        };
        Ok(Self::Fixed(profile))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", content = "profile", rename_all = "camelCase")]
pub enum QualityMode {
    #[default]
    Auto,
    Manual(QualityProfile),
}

/// Discrete downscale ladder for the outbound video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResolutionTier {
    #[default]
    Full,
    TwoThirds,
    Half,
    Third,
}

impl ResolutionTier {
    /// Value for the encoder's `scaleResolutionDownBy`.
    #[must_use]
    pub const fn downscale_factor(self) -> f64 {
        match self {
            Self::Full => 1.0,
            Self::TwoThirds => 1.5,
            Self::Half => 2.0,
            Self::Third => 3.0,
        }
    }
}

/// Sender parameters currently applied to one peer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodingProfile {
    pub max_bitrate_bps: u64,
    pub max_framerate_fps: u32,
    pub downscale_factor: f64,
}

impl Default for EncodingProfile {
    fn default() -> Self {
        QualityProfile::High.encoding()
    }
}

/// Sender parameters to apply. No downscale means the resolution stays as it is.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodingUpdate {
    pub max_bitrate_bps: u64,
    pub max_framerate_fps: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downscale_factor: Option<f64>,
}

impl From<EncodingProfile> for EncodingUpdate {
    fn from(profile: EncodingProfile) -> Self {
        Self {
            max_bitrate_bps: profile.max_bitrate_bps,
            max_framerate_fps: profile.max_framerate_fps,
            downscale_factor: Some(profile.downscale_factor),
        }
    }
}

/// Constraints for a cloned outbound track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackConstraints {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_table() {
        assert_eq!(QualityProfile::Min.encoding().max_bitrate_bps, 3_000_000);
        assert_eq!(QualityProfile::Low.framerate_fps(), 60);
        assert_eq!(QualityProfile::Medium.dimensions(), (1920, 1080));
        assert_eq!(QualityProfile::High.legacy_id(), "108060");
    }

    #[test]
    fn test_default_encoding_is_top_profile() {
        let encoding = EncodingProfile::default();
        assert_eq!(encoding.max_bitrate_bps, 12_000_000);
        assert_eq!(encoding.max_framerate_fps, 60);
        assert!((encoding.downscale_factor - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_selection() {
        assert_eq!("auto".parse::<ProfileSelection>().unwrap(), ProfileSelection::Auto);
        assert_eq!(
            "72060".parse::<ProfileSelection>().unwrap(),
            ProfileSelection::Fixed(QualityProfile::Low)
        );
        assert_eq!(
            "Medium".parse::<ProfileSelection>().unwrap(),
            ProfileSelection::Fixed(QualityProfile::Medium)
        );
        assert!("4k".parse::<ProfileSelection>().is_err());

        for profile in QualityProfile::ALL {
            assert_eq!(
                profile.legacy_id().parse::<ProfileSelection>().unwrap(),
                ProfileSelection::Fixed(profile)
            );
        }
    }

    #[test]
    fn test_tier_factors_are_ordered() {
        let factors: Vec<f64> = [
            ResolutionTier::Full,
            ResolutionTier::TwoThirds,
            ResolutionTier::Half,
            ResolutionTier::Third,
        ]
        .iter()
        .map(|t| t.downscale_factor())
        .collect();
        assert_eq!(factors, vec![1.0, 1.5, 2.0, 3.0]);
    }
}
