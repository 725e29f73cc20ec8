pub mod engine;
pub mod state;

pub use engine::PolicyEngine;
pub use state::{Bounds, ScalingSnapshot, ScalingState};

use crate::core::error::ScaleError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;

/// One utilization reading per sampling period, each field on the 0-255 scale
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UtilizationSample {
    pub gpu_utilization: u32,
    pub vertex_processor_utilization: u32,
    pub fragment_processor_utilization: u32,
}

impl UtilizationSample {
    pub fn new(gpu: u32, vertex: u32, fragment: u32) -> Self {
        Self {
            gpu_utilization: gpu,
            vertex_processor_utilization: vertex,
            fragment_processor_utilization: fragment,
        }
    }

    /// Same value on every channel
    pub fn uniform(util: u32) -> Self {
        Self::new(util, util, util)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScalingMode {
    CoreCountOnly,
    #[default]
    FrequencyAndCore,
    Disabled,
    Turbo,
}

impl ScalingMode {
    pub const ALL: [ScalingMode; 4] = [
        Self::CoreCountOnly,
        Self::FrequencyAndCore,
        Self::Disabled,
        Self::Turbo,
    ];

    pub fn as_u32(self) -> u32 {
        match self {
            Self::CoreCountOnly => 0,
            Self::FrequencyAndCore => 1,
            Self::Disabled => 2,
            Self::Turbo => 3,
        }
    }

    pub fn to_upper_str(&self) -> &'static str {
        match self {
            Self::CoreCountOnly => "CORE_ONLY",
            Self::FrequencyAndCore => "FREQ_CORE",
            Self::Disabled => "DISABLED",
            Self::Turbo => "TURBO",
        }
    }
}

impl TryFrom<u32> for ScalingMode {
    type Error = ScaleError;

    fn try_from(v: u32) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_u32() == v)
            .ok_or_else(|| ScaleError::invalid(format!("scaling mode {} out of range 0..=3", v)))
    }
}

impl FromStr for ScalingMode {
    type Err = ScaleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(n) = s.trim().parse::<u32>() {
            return Self::try_from(n);
        }
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "core_only" | "pp" | "core" => Ok(Self::CoreCountOnly),
            "freq_core" | "pp_fs" | "combined" => Ok(Self::FrequencyAndCore),
            "disabled" | "disable" | "off" => Ok(Self::Disabled),
            "turbo" => Ok(Self::Turbo),
            other => Err(ScaleError::invalid(format!("unknown scaling mode '{}'", other))),
        }
    }
}

impl std::fmt::Display for ScalingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CoreCountOnly => write!(f, "core_only"),
            Self::FrequencyAndCore => write!(f, "freq_core"),
            Self::Disabled => write!(f, "disabled"),
            Self::Turbo => write!(f, "turbo"),
        }
    }
}

impl<'de> Deserialize<'de> for ScalingMode {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::{self, Visitor};

        struct ModeVisitor;

        impl<'de> Visitor<'de> for ModeVisitor {
            type Value = ScalingMode;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a scaling mode number (0-3) or name")
            }

            fn visit_u64<E>(self, v: u64) -> std::result::Result<Self::Value, E>
            where
                E: de::Error,
            {
                let v = u32::try_from(v).map_err(E::custom)?;
                ScalingMode::try_from(v).map_err(E::custom)
            }

            fn visit_i64<E>(self, v: i64) -> std::result::Result<Self::Value, E>
            where
                E: de::Error,
            {
                let v = u32::try_from(v).map_err(E::custom)?;
                ScalingMode::try_from(v).map_err(E::custom)
            }

            fn visit_str<E>(self, v: &str) -> std::result::Result<Self::Value, E>
            where
                E: de::Error,
            {
                v.parse::<ScalingMode>().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(ModeVisitor)
    }
}

impl Serialize for ScalingMode {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
