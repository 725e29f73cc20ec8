use crate::core::error::{Result, ScaleError};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Full scale of a utilization reading (255 ~ 100%)
pub const UTIL_FULL_SCALE: u32 = 255;

/// Fixed utilization bands on the 0-255 scale
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtilBand {
    P20,
    P30,
    P40,
    P50,
    P60,
    P80,
    P90,
}

impl UtilBand {
    pub const fn value(self) -> u32 {
        match self {
            Self::P20 => 51,
            Self::P30 => 77,
            Self::P40 => 102,
            Self::P50 => 128,
            Self::P60 => 154,
            Self::P80 => 205,
            Self::P90 => 230,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrequencyStep {
    #[serde(default)]
    pub index: usize,
    /// Frequency reported to telemetry consumers, in MHz
    pub freq_mhz: u32,
    /// Opaque value handed to the clock backend for this step
    #[serde(default)]
    pub clock_value: u32,
    pub up_threshold: u32,
    pub down_threshold: u32,
    pub hold_count: u32,
}

impl FrequencyStep {
    pub const fn new(
        freq_mhz: u32,
        clock_value: u32,
        down_threshold: u32,
        up_threshold: u32,
        hold_count: u32,
    ) -> Self {
        Self {
            index: 0,
            freq_mhz,
            clock_value,
            up_threshold,
            down_threshold,
            hold_count,
        }
    }
}

/// Ordered frequency steps, lowest frequency first.
///
/// Never mutated in place; a new table replaces the old one as a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdTable {
    steps: Vec<FrequencyStep>,
}

impl ThresholdTable {
    pub fn new(steps: Vec<FrequencyStep>) -> Result<Self> {
        if steps.is_empty() {
            return Err(ScaleError::InvalidTable("table has no steps".into()));
        }

        for (i, step) in steps.iter().enumerate() {
            if step.up_threshold < step.down_threshold {
                return Err(ScaleError::InvalidTable(format!(
                    "step {}: up threshold {} below down threshold {}",
                    i, step.up_threshold, step.down_threshold
                )));
            }
        }

        Ok(Self::indexed(steps))
    }

    fn indexed(mut steps: Vec<FrequencyStep>) -> Self {
        for (i, step) in steps.iter_mut().enumerate() {
            step.index = i;
        }
        Self { steps }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    #[inline]
    pub fn last_index(&self) -> usize {
        self.steps.len() - 1
    }

    #[inline]
    pub fn get(&self, step: usize) -> Option<&FrequencyStep> {
        self.steps.get(step)
    }

    /// Indexed lookup for steps already known to be in range
    #[inline]
    pub fn step(&self, step: usize) -> &FrequencyStep {
        &self.steps[step]
    }

    pub fn steps(&self) -> &[FrequencyStep] {
        &self.steps
    }

    pub fn freq_mhz(&self, step: usize) -> u32 {
        self.get(step).map(|s| s.freq_mhz).unwrap_or(0)
    }

    /// Highest cooling level; level 0 is the fastest step
    pub fn max_level(&self) -> usize {
        self.last_index()
    }

    /// Cooling level for a frequency: the fastest step not above `freq_mhz`,
    /// counted down from the top of the table.
    pub fn frequency_level(&self, freq_mhz: u32) -> usize {
        let step = self
            .steps
            .iter()
            .rposition(|s| s.freq_mhz <= freq_mhz)
            .unwrap_or(0);
        self.last_index() - step
    }

    pub fn step_for_level(&self, level: usize) -> usize {
        self.last_index().saturating_sub(level)
    }
}

/// Per-chip scaling configuration, selected once at initialization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChipProfile {
    pub name: String,
    pub table: ThresholdTable,
    pub core_count: u32,
    pub initial_step: usize,
    /// Step preheat raises to
    pub default_step: usize,
    /// Step pinned while only the core count is scaled
    pub up_step: usize,
    pub turbo_step: usize,
    pub min_step: usize,
    pub max_step: usize,
    pub min_cores: u32,
}

impl ChipProfile {
    pub fn with_core_count(mut self, cores: u32) -> Self {
        self.core_count = cores;
        self.min_cores = self.min_cores.min(cores).max(1);
        self
    }

    pub fn with_initial_step(mut self, step: usize) -> Self {
        self.initial_step = step;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let len = self.table.len();
        for (name, step) in [
            ("initial_step", self.initial_step),
            ("default_step", self.default_step),
            ("up_step", self.up_step),
            ("turbo_step", self.turbo_step),
            ("min_step", self.min_step),
            ("max_step", self.max_step),
        ] {
            if step >= len {
                return Err(ScaleError::InvalidTable(format!(
                    "{} {} outside table of {} steps",
                    name, step, len
                )));
            }
        }
        if self.min_step > self.max_step {
            return Err(ScaleError::InvalidTable(format!(
                "min_step {} above max_step {}",
                self.min_step, self.max_step
            )));
        }
        if self.max_step > self.turbo_step {
            return Err(ScaleError::InvalidTable(format!(
                "max_step {} above turbo_step {}",
                self.max_step, self.turbo_step
            )));
        }
        if self.core_count == 0 {
            return Err(ScaleError::InvalidTable("core_count must be at least 1".into()));
        }
        if self.min_cores == 0 || self.min_cores > self.core_count {
            return Err(ScaleError::InvalidTable(format!(
                "min_cores {} outside 1..={}",
                self.min_cores, self.core_count
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChipVariant {
    M8,
    M8b,
    M6tvd,
}

impl FromStr for ChipVariant {
    type Err = ScaleError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "m8" | "meson8" => Ok(Self::M8),
            "m8b" | "meson8b" => Ok(Self::M8b),
            "m6tvd" | "meson6tvd" => Ok(Self::M6tvd),
            other => Err(ScaleError::invalid(format!("unknown chip variant '{}'", other))),
        }
    }
}

impl std::fmt::Display for ChipVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::M8 => write!(f, "m8"),
            Self::M8b => write!(f, "m8b"),
            Self::M6tvd => write!(f, "m6tvd"),
        }
    }
}

impl ChipVariant {
    pub fn profile(self) -> ChipProfile {
        let (steps, default_step, up_step, turbo_step, max_step) = match self {
            Self::M8b => (
                vec![
                    FrequencyStep::new(255, 0xE01, 0, 180, 5),
                    FrequencyStep::new(364, 0x800, 152, 205, 5),
                    FrequencyStep::new(425, 0xC01, 180, 212, 5),
                    FrequencyStep::new(510, 0xE00, 205, 236, 5),
                    FrequencyStep::new(637, 0xA00, 230, 256, 5),
                ],
                1,
                3,
                4,
                3,
            ),
            Self::M8 => (
                vec![
                    FrequencyStep::new(182, 0xE01, 0, 200, 2),
                    FrequencyStep::new(319, 0x800, 152, 205, 2),
                    FrequencyStep::new(425, 0xC01, 180, 212, 2),
                    FrequencyStep::new(510, 0xE00, 205, 236, 2),
                    FrequencyStep::new(637, 0xA00, 230, 256, 2),
                ],
                1,
                3,
                4,
                3,
            ),
            Self::M6tvd => (
                vec![
                    FrequencyStep::new(182, 0x809, 0, 200, 2),
                    FrequencyStep::new(319, 0xA04, 152, 205, 2),
                    FrequencyStep::new(425, 0xC01, 180, 212, 2),
                    FrequencyStep::new(510, 0xE00, 205, 256, 2),
                ],
                3,
                3,
                3,
                3,
            ),
        };

        ChipProfile {
            name: self.to_string(),
            table: ThresholdTable::indexed(steps),
            core_count: 2,
            initial_step: default_step,
            default_step,
            up_step,
            turbo_step,
            min_step: 0,
            max_step,
            min_cores: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_inverted_thresholds() {
        let err = ThresholdTable::new(vec![FrequencyStep::new(100, 0, 120, 100, 1)]).unwrap_err();
        assert!(matches!(err, ScaleError::InvalidTable(_)));
        assert!(ThresholdTable::new(Vec::new()).is_err());
    }

    #[test]
    fn test_table_reindexes_steps() {
        let mut a = FrequencyStep::new(100, 0, 0, 100, 1);
        a.index = 7;
        let t = ThresholdTable::new(vec![a, FrequencyStep::new(200, 0, 50, 150, 1)]).unwrap();
        assert_eq!(t.step(0).index, 0);
        assert_eq!(t.step(1).index, 1);
        assert_eq!(t.last_index(), 1);
    }

    #[test]
    fn test_presets_validate() {
        for v in [ChipVariant::M8, ChipVariant::M8b, ChipVariant::M6tvd] {
            let p = v.profile();
            assert!(p.validate().is_ok(), "{} preset invalid", v);
        }
        let m8b = ChipVariant::M8b.profile();
        assert_eq!(m8b.table.len(), 5);
        assert_eq!(m8b.table.step(0).hold_count, 5);
        assert_eq!(m8b.turbo_step, 4);
    }

    #[test]
    fn test_frequency_level_counts_from_top() {
        let t = ChipVariant::M8b.profile().table;
        assert_eq!(t.max_level(), 4);
        assert_eq!(t.frequency_level(637), 0);
        assert_eq!(t.frequency_level(700), 0);
        assert_eq!(t.frequency_level(500), 2);
        assert_eq!(t.frequency_level(100), 4);
        assert_eq!(t.step_for_level(1), 3);
    }

    #[test]
    fn test_profile_rejects_bad_bounds() {
        let mut p = ChipVariant::M8.profile();
        p.min_step = 4;
        assert!(p.validate().is_err());

        let mut p = ChipVariant::M8.profile();
        p.min_cores = 3;
        assert!(p.validate().is_err());

        let mut p = ChipVariant::M8.profile();
        p.turbo_step = 9;
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_core_count_override_keeps_min_cores_legal() {
        let p = ChipVariant::M8b.profile().with_core_count(4).with_initial_step(2);
        assert_eq!(p.core_count, 4);
        assert_eq!(p.initial_step, 2);
        assert!(p.validate().is_ok());

        let mut p = ChipVariant::M8b.profile();
        p.min_cores = 2;
        let p = p.with_core_count(1);
        assert_eq!(p.min_cores, 1);
    }

    #[test]
    fn test_variant_parse() {
        assert_eq!("M8B".parse::<ChipVariant>().unwrap(), ChipVariant::M8b);
        assert_eq!("meson6tvd".parse::<ChipVariant>().unwrap(), ChipVariant::M6tvd);
        assert!("x9".parse::<ChipVariant>().is_err());
    }
}
