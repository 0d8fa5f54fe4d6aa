//! Latent-to-RGB calibration tables.
//!
//! Preview tensors arrive in latent space. Each model family gets one fixed
//! linear projection (one RGB row per latent channel) plus a bias, producing
//! values in roughly `[-1, 1]` that are then mapped onto `0..=255`.
//! The coefficients are approximations and may be swapped for better ones.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A fixed latent-to-RGB projection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatentCalibration {
    /// One `[r, g, b]` row per latent channel.
    pub factors: &'static [[f32; 3]],
    pub bias: [f32; 3],
}

impl LatentCalibration {
    /// Number of latent channels this table expects.
    pub fn channels(&self) -> usize {
        self.factors.len()
    }

    /// Project one latent pixel to RGB in the `[-1, 1]` range.
    ///
    /// `latent` must have exactly [`Self::channels`] values.
    pub fn project(&self, latent: &[f32]) -> [f32; 3] {
        let mut rgb = self.bias;
        for (value, row) in latent.iter().zip(self.factors) {
            rgb[0] += value * row[0];
            rgb[1] += value * row[1];
            rgb[2] += value * row[2];
        }
        rgb
    }
}

const SD15_FACTORS: [[f32; 3]; 4] = [
    [0.3512, 0.2297, 0.3227],
    [0.3250, 0.4974, 0.2350],
    [-0.2829, 0.1762, 0.2721],
    [-0.2120, -0.2616, -0.7177],
];

const SDXL_FACTORS: [[f32; 3]; 4] = [
    [0.3651, 0.4232, 0.4341],
    [-0.2533, -0.0042, 0.1068],
    [0.1076, 0.1111, -0.0362],
    [-0.3165, -0.2492, -0.2188],
];

const SD3_FACTORS: [[f32; 3]; 16] = [
    [-0.0922, -0.0175, 0.0749],
    [0.0311, 0.0633, 0.0954],
    [0.1994, 0.0927, 0.0458],
    [0.0856, 0.0339, 0.0902],
    [0.0587, 0.0272, -0.0496],
    [-0.0006, 0.1104, 0.0309],
    [0.0978, 0.0306, 0.0427],
    [-0.0042, 0.1038, 0.1358],
    [-0.0194, 0.0020, 0.0669],
    [-0.0488, 0.0130, -0.0268],
    [0.0922, 0.0988, 0.0951],
    [-0.0278, 0.0524, -0.0542],
    [0.0332, 0.0456, 0.0895],
    [-0.0069, -0.0030, -0.0810],
    [-0.0596, -0.0465, -0.1293],
    [-0.1151, -0.0887, -0.0810],
];

const FLUX_FACTORS: [[f32; 3]; 16] = [
    [-0.0346, 0.0244, 0.0681],
    [0.0034, 0.0210, 0.0687],
    [0.0275, -0.0668, -0.0433],
    [-0.0174, 0.0160, 0.0617],
    [0.0859, 0.0721, 0.0329],
    [0.0004, 0.0383, 0.0115],
    [0.0405, 0.0861, 0.0915],
    [-0.0236, -0.0185, -0.0259],
    [-0.0245, 0.0250, 0.1180],
    [0.1008, 0.0755, -0.0421],
    [-0.0515, 0.0201, 0.0011],
    [0.0428, -0.0012, -0.0036],
    [0.0817, 0.0765, 0.0749],
    [-0.1264, -0.0522, -0.1103],
    [-0.0280, -0.0881, -0.0499],
    [-0.1262, -0.0982, -0.0778],
];

const SD15: LatentCalibration = LatentCalibration {
    factors: &SD15_FACTORS,
    bias: [0.0, 0.0, 0.0],
};

const SDXL: LatentCalibration = LatentCalibration {
    factors: &SDXL_FACTORS,
    bias: [0.1084, -0.0175, -0.0011],
};

const SD3: LatentCalibration = LatentCalibration {
    factors: &SD3_FACTORS,
    bias: [0.0, 0.0, 0.0],
};

const FLUX: LatentCalibration = LatentCalibration {
    factors: &FLUX_FACTORS,
    bias: [-0.0329, -0.0718, -0.0851],
};

/// Model family, used to pick the latent calibration for previews.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    /// Stable Diffusion 1.x / 2.x (4 latent channels).
    Sd15,
    /// Stable Diffusion XL (4 latent channels).
    Sdxl,
    /// Stable Diffusion 3 (16 latent channels).
    Sd3,
    /// Flux (16 latent channels).
    Flux,
}

impl ModelFamily {
    /// Family assumed when none is given for a tensor with `channels` channels.
    pub fn default_for_channels(channels: u32) -> Option<Self> {
        match channels {
            4 => Some(ModelFamily::Sdxl),
            16 => Some(ModelFamily::Flux),
            _ => None,
        }
    }

    /// Latent channel count of this family.
    pub fn latent_channels(self) -> u32 {
        self.calibration().channels() as u32
    }

    /// The fixed calibration table for this family.
    pub fn calibration(self) -> &'static LatentCalibration {
        match self {
            ModelFamily::Sd15 => &SD15,
            ModelFamily::Sdxl => &SDXL,
            ModelFamily::Sd3 => &SD3,
            ModelFamily::Flux => &FLUX,
        }
    }

    /// Best-effort guess from a model file or display name.
    pub fn from_model_name(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        if name.contains("flux") {
            Some(ModelFamily::Flux)
        } else if name.contains("sd3") || name.contains("sd_3") {
            Some(ModelFamily::Sd3)
        } else if name.contains("sdxl") || name.contains("sd_xl") || name.contains("_xl") {
            Some(ModelFamily::Sdxl)
        } else if name.contains("v1-5") || name.contains("sd15") || name.contains("sd_v1") {
            Some(ModelFamily::Sd15)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ModelFamily::Sd15 => "sd15",
            ModelFamily::Sdxl => "sdxl",
            ModelFamily::Sd3 => "sd3",
            ModelFamily::Flux => "flux",
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sd15" | "sd1" => Ok(ModelFamily::Sd15),
            "sdxl" => Ok(ModelFamily::Sdxl),
            "sd3" => Ok(ModelFamily::Sd3),
            "flux" => Ok(ModelFamily::Flux),
            other => Err(format!(
                "unknown model family '{other}' (expected sd15|sdxl|sd3|flux)"
            )),
        }
    }
}
